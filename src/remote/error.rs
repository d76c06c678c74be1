use thiserror::Error;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cloud backend is not configured")]
    NotConfigured,

    #[error("not signed in")]
    NoSession,

    #[error("backend error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

impl RemoteError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the stored session was rejected and the user has to sign in
    /// again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::NoSession) || matches!(self.status_code(), Some(401 | 403))
    }
}
