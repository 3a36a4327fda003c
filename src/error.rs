use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Transform unavailable: {0}")]
    TransformUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    /// True when the client sent something we refuse to serve, as opposed
    /// to a failure while serving it.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            ProxyError::MalformedRequestLine(_)
                | ProxyError::UnsupportedMethod(_)
                | ProxyError::InvalidUrl(_)
        )
    }
}
