//! Six-digit second-factor codes.
//!
//! Codes are stored as SHA-256 hashes so a store dump does not leak them.
//! Every verification attempt counts, right or wrong; the fourth attempt burns
//! the challenge, so the real code stops working too.

use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::keys;
use crate::stores::{AttemptCounter, AttemptOutcome, Stores, TokenOptions, TokenStore};

const MAX_ATTEMPTS: u32 = 3;
const CODE_HASH_FIELD: &str = "codeHash";

/// Issued challenge; `code` goes to the user out of band and is not stored.
#[derive(Debug, Clone)]
pub struct TwoFactorChallenge {
    pub challenge_id: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorOutcome {
    Verified,
    /// Wrong, expired, or already-used code.
    Invalid,
    /// Too many attempts; the challenge no longer exists.
    Burned,
}

#[derive(Clone)]
pub struct TwoFactorCodes {
    tokens: TokenStore,
    attempts: AttemptCounter,
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

impl TwoFactorCodes {
    pub fn new(stores: &Stores) -> Self {
        Self {
            tokens: stores.tokens.clone(),
            attempts: stores.attempt_counter(
                keys::TWO_FACTOR_PREFIX,
                MAX_ATTEMPTS,
                keys::TWO_FACTOR_TTL_SECS,
            ),
        }
    }

    pub async fn issue(&self, user_id: &str) -> Result<TwoFactorChallenge> {
        let code: String = {
            let mut rng = rand::rng();
            (0..6)
                .map(|_| rng.random_range(0..10).to_string())
                .collect()
        };
        let challenge_id = TokenStore::generate_token_id();

        self.tokens
            .store_token_with_metadata(
                user_id,
                &challenge_id,
                json!({ CODE_HASH_FIELD: hash_code(&code) }),
                TokenOptions::new(keys::TWO_FACTOR_PREFIX).with_ttl(keys::TWO_FACTOR_TTL_SECS),
            )
            .await?;

        tracing::info!(user_id = %user_id, "two-factor code issued");
        Ok(TwoFactorChallenge { challenge_id, code })
    }

    pub async fn verify(&self, user_id: &str, challenge_id: &str, code: &str) -> Result<TwoFactorOutcome> {
        // The counter is keyed by challenge alone; only the owner may touch it.
        let Some(envelope) = self
            .tokens
            .get_token_data(user_id, challenge_id, keys::TWO_FACTOR_PREFIX)
            .await?
        else {
            return Ok(TwoFactorOutcome::Invalid);
        };

        let token_key = keys::item_key(keys::TWO_FACTOR_PREFIX, &envelope.user_id, challenge_id);
        if self
            .attempts
            .register_attempt(challenge_id, &[token_key])
            .await?
            == AttemptOutcome::Burned
        {
            return Ok(TwoFactorOutcome::Burned);
        }

        let expected = envelope.metadata[CODE_HASH_FIELD].as_str();
        if expected != Some(hash_code(code).as_str()) {
            tracing::warn!(user_id = %user_id, "two-factor verification failed: wrong code");
            return Ok(TwoFactorOutcome::Invalid);
        }

        // Only the caller whose delete lands wins a concurrent race.
        if !self
            .tokens
            .revoke_token(user_id, challenge_id, keys::TWO_FACTOR_PREFIX)
            .await?
        {
            return Ok(TwoFactorOutcome::Invalid);
        }
        self.attempts.reset_attempts(challenge_id).await?;

        Ok(TwoFactorOutcome::Verified)
    }
}
