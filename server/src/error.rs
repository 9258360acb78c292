//! Error taxonomy for calls into the ERP.

/// Failure of the shared cache store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("cache store backend error: {0}")]
    Backend(String),

    #[error("cache value could not be encoded or decoded: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Failure reported by the login transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoginError {
    #[error("login endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("login request failed: {message}")]
    Transport { message: String, transient: bool },

    #[error("login response has no bearer token: {0}")]
    MalformedResponse(String),
}

impl LoginError {
    /// 5xx responses and network-level failures are worth another attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Transport { transient, .. } => *transient,
            Self::MalformedResponse(_) => false,
        }
    }
}

/// Error surfaced by the token manager, the executor and the fetchers.
///
/// Cloneable so every caller collapsed onto one deduplicated request
/// receives the same error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErpError {
    /// Bad credentials or an unexpected login response. Never retried.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// 5xx or network failure that outlived the retry budget.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 401/403 even after one token refresh.
    #[error("session expired")]
    SessionExpired,

    /// The token renewal lock could not be obtained in time.
    #[error("timed out waiting for the token renewal lock")]
    LockTimeout,

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ErpError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::LockTimeout)
    }

    /// Short label used in metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "auth_failed",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::SessionExpired => "session_expired",
            Self::LockTimeout => "lock_timeout",
            Self::RequestFailed { .. } => "request_failed",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<LoginError> for ErpError {
    fn from(err: LoginError) -> Self {
        if err.is_transient() {
            Self::ServiceUnavailable(err.to_string())
        } else {
            Self::AuthFailed(err.to_string())
        }
    }
}
