//! Key naming and default lifetimes.
//!
//! These layouts are shared with existing deployments and must not change:
//!
//! ```text
//! {prefix}:{user_id}:{item_id}            data record
//! {prefix}:user-sets:{user_id}            index set
//! {prefix}:{user_id}:*                    bulk revoke/list pattern
//! rate-limit:{feature}:{limit_type}:{id}  per-identity counters
//! attempts:{context}:{token_id}           per-token burn counters
//! token-map:{feature}:{token_id}          token -> user reverse index
//! ```

pub const REFRESH_TOKEN_PREFIX: &str = "refresh-token";
pub const TRUSTED_DEVICE_PREFIX: &str = "trusted-device";
pub const RESET_PASSWORD_PREFIX: &str = "reset-password";
pub const EMAIL_VERIFICATION_PREFIX: &str = "email-verification";
pub const TWO_FACTOR_PREFIX: &str = "2fa";

pub const REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const REFRESH_TOKEN_MAX_PER_USER: usize = 5;
pub const TRUSTED_DEVICE_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const TRUSTED_DEVICE_MAX_PER_USER: usize = 10;
pub const RESET_PASSWORD_TTL_SECS: u64 = 60 * 60;
pub const EMAIL_VERIFICATION_TTL_SECS: u64 = 24 * 60 * 60;
pub const TWO_FACTOR_TTL_SECS: u64 = 5 * 60;
/// Used when a token is stored without an explicit lifetime.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 15 * 60;

const INDEX_SEGMENT: &str = "user-sets";
const RATE_LIMIT_NAMESPACE: &str = "rate-limit";
const ATTEMPTS_NAMESPACE: &str = "attempts";
const TOKEN_MAP_NAMESPACE: &str = "token-map";

pub fn item_key(prefix: &str, user_id: &str, item_id: &str) -> String {
    format!("{}:{}:{}", prefix, user_id, item_id)
}

pub fn index_key(prefix: &str, user_id: &str) -> String {
    format!("{}:{}:{}", prefix, INDEX_SEGMENT, user_id)
}

/// SCAN MATCH pattern for every `{prefix}:{user_id}:` key. Both parts are
/// escaped, so an id like `u?` matches only itself.
pub fn user_pattern(prefix: &str, user_id: &str) -> String {
    format!("{}:{}:*", escape_glob(prefix), escape_glob(user_id))
}

/// Literal prefix shared by all of a user's keys under `prefix`.
pub fn user_key_prefix(prefix: &str, user_id: &str) -> String {
    format!("{}:{}:", prefix, user_id)
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn rate_limit_key(context: &str, identity: &str) -> String {
    format!("{}:{}:{}", RATE_LIMIT_NAMESPACE, context, identity)
}

pub fn attempts_key(context: &str, token_id: &str) -> String {
    format!("{}:{}:{}", ATTEMPTS_NAMESPACE, context, token_id)
}

pub fn token_map_key(feature: &str, token_id: &str) -> String {
    format!("{}:{}:{}", TOKEN_MAP_NAMESPACE, feature, token_id)
}
