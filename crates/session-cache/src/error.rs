use std::error::Error as StdError;

/// Errors that cross the cache boundary.
///
/// Missing keys, ghost index members and corrupt payloads are not errors here:
/// lookups report them as `None`/`false` so callers can answer every case with
/// the same "invalid or expired" message.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store could not be reached or did not answer in time.
    #[error("key-value store unavailable during {operation}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A rate-limit policy refused the attempt.
    #[error("too many attempts for {context}")]
    TooManyAttempts {
        context: String,
        /// Seconds until the current window closes, when the store knows it.
        retry_after_secs: Option<u64>,
    },

    /// A payload could not be serialized before writing.
    #[error("failed to encode payload")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    pub fn unavailable(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::StoreUnavailable {
            operation,
            source: source.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooManyAttempts { .. })
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
