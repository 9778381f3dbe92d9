use thiserror::Error;

pub type Result<T> = std::result::Result<T, WallError>;

#[derive(Error, Debug)]
pub enum WallError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Scene error: {0}")]
    Scene(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<String> for WallError {
    fn from(s: String) -> Self {
        WallError::Unknown(s)
    }
}

impl From<&str> for WallError {
    fn from(s: &str) -> Self {
        WallError::Unknown(s.to_string())
    }
}
