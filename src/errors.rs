use thiserror::Error;

/// Failure taxonomy for the feed pipeline. Nothing here is fatal to the
/// process: every variant resolves to a retry, a resync, or a degraded
/// projection plus a visible status string.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("sequence gap: next diff starts at {got}, expected at most {expected}")]
    SequenceGap { expected: u64, got: u64 },
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

impl FeedError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::Parse(err.to_string())
    }
}
