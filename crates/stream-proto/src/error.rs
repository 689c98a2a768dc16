use thiserror::Error;

/// Failures of the program catalog: the remote schedule fetch and the
/// offline store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The HTTP round trip itself failed (DNS, connect, timeout, body read).
    #[error("schedule request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered, but not with a success status.
    #[error("schedule endpoint {url} returned status {status}")]
    Status { status: u16, url: String },

    /// A schedule or offline document did not have the expected shape.
    #[error("malformed catalog document: {0}")]
    Parse(String),

    /// Reading or rewriting the offline document failed.
    #[error("offline catalog storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
