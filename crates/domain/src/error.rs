/// Shared error type used across all Aragora crates.
///
/// Variants double as the platform's error kinds: `Transient` failures are
/// retriable per component policy, `Permanent` failures are not, and
/// `Canceled` is not an error from the user's perspective.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Retriable dependency failure (network, 5xx, 429, contention).
    #[error("transient: {0}")]
    Transient(String),

    /// Non-retriable dependency rejection (4xx semantic refusal).
    #[error("permanent: {0}")]
    Permanent(String),

    /// Cooperative cancellation was observed.
    #[error("canceled")]
    Canceled,

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("storage: {0}")]
    Storage(String),

    /// Durable-state invariant violation (duplicate slug, schema mismatch,
    /// conflicting seal). Fatal to the debate, not the process.
    #[error("integrity: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a component retry policy may re-attempt the failed call.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Http(_))
    }

    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "bad_json",
            Error::Http(_) => "http",
            Error::Timeout(_) => "timeout",
            Error::Transient(_) => "dependency_unavailable",
            Error::Permanent(_) => "dependency_rejected",
            Error::Canceled => "canceled",
            Error::Provider { .. } => "provider",
            Error::Storage(_) => "storage",
            Error::Integrity(_) => "integrity",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Unauthorized(_) => "unauthorized",
            Error::RateLimited { .. } => "rate_limited",
            Error::InvalidInput(_) => "invalid_input",
            Error::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retriable() {
        assert!(Error::Transient("503".into()).is_retriable());
        assert!(!Error::Permanent("400".into()).is_retriable());
        assert!(!Error::Canceled.is_retriable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::RateLimited { retry_after_secs: 1 }.code(), "rate_limited");
        assert_eq!(Error::NotFound("x".into()).code(), "not_found");
        assert_eq!(Error::Integrity("dup".into()).code(), "integrity");
    }
}
