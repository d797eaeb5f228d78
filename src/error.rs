use reqwest::StatusCode;

/// Reasons a quote could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("quotes API rejected the request with status {0}")]
    Rejected(StatusCode),
    #[error("malformed quotes API response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("quotes API returned no quotes")]
    Empty,
    #[error("request to quotes API failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// Whether this is the remote refusing the request, as opposed to a
    /// broken response or a failed connection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, FetchError::Rejected(_))
    }
}
