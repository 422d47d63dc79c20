/// Errors raised by the domain layer.
///
/// Every variant here is fatal to a run: they are detected before any script
/// executes. Per-script failures never surface as `CoreError`; they are
/// captured as [`ExecutionResult`](crate::result::ExecutionResult) data.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Shorthand for building a [`CoreError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
