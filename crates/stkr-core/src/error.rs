use thiserror::Error;

pub type StkrResult<T> = Result<T, StkrError>;

#[derive(Debug, Error)]
pub enum StkrError {
    #[error("invalid sticker share url: {0}")]
    InvalidUrl(String),

    #[error("invalid pack key: {0}")]
    KeyFormat(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("integrity check failed: HMAC mismatch on {len}-byte blob")]
    Integrity { len: usize },

    #[error("manifest parse error at offset {offset}: {reason}")]
    ManifestParse { offset: usize, reason: String },

    #[error("malformed ciphertext: {len} bytes ({reason})")]
    MalformedCiphertext { len: usize, reason: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A CDN request that did not produce a body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {cause}")]
    Transport { url: String, cause: String },
}

impl NetworkError {
    /// Transport failures and 5xx responses may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Status { status, .. } => *status >= 500,
            NetworkError::Transport { .. } => true,
        }
    }
}

impl StkrError {
    pub fn manifest_parse(offset: usize, reason: impl Into<String>) -> Self {
        StkrError::ManifestParse {
            offset,
            reason: reason.into(),
        }
    }

    /// Errors that mean "no usable blob yet" (unreachable or unparseable).
    /// Integrity and ciphertext failures are fatal for the blob they came
    /// from: a wrong key or tampering, not a condition that clears up.
    pub fn is_recoverable_fetch(&self) -> bool {
        matches!(
            self,
            StkrError::Network(_) | StkrError::ManifestParse { .. }
        )
    }

    /// True for errors worth retrying at the orchestrator level.
    pub fn is_transient(&self) -> bool {
        match self {
            StkrError::Network(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let not_found = NetworkError::Status {
            url: "https://cdn.example/x".into(),
            status: 404,
        };
        let unavailable = NetworkError::Status {
            url: "https://cdn.example/x".into(),
            status: 503,
        };
        let transport = NetworkError::Transport {
            url: "https://cdn.example/x".into(),
            cause: "connection refused".into(),
        };
        assert!(!not_found.is_transient());
        assert!(unavailable.is_transient());
        assert!(transport.is_transient());
        assert!(StkrError::from(transport).is_transient());
        assert!(!StkrError::Integrity { len: 64 }.is_transient());
    }

    #[test]
    fn recoverable_vs_fatal() {
        assert!(StkrError::manifest_parse(3, "truncated").is_recoverable_fetch());
        assert!(StkrError::from(NetworkError::Status {
            url: "https://cdn.example/x".into(),
            status: 404,
        })
        .is_recoverable_fetch());
        assert!(!StkrError::Integrity { len: 80 }.is_recoverable_fetch());
        assert!(!StkrError::MalformedCiphertext {
            len: 17,
            reason: "not a multiple of the block size".into(),
        }
        .is_recoverable_fetch());
        assert!(!StkrError::KeyFormat("odd length".into()).is_recoverable_fetch());
        assert!(!StkrError::InvalidUrl("nope".into()).is_recoverable_fetch());
    }

    #[test]
    fn integrity_message_has_length_only() {
        let msg = StkrError::Integrity { len: 1234 }.to_string();
        assert!(msg.contains("1234"));
    }
}
