use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} failed: {reason}")]
    ScanTool { tool: String, reason: String },
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("other error: {0}")]
    Other(String),
}
