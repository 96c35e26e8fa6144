use thiserror::Error;

/// Failures outside the frame core: config loading, windowing and surface setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("window: {0}")]
    Window(String),

    /// Surface creation and extension queries, which happen before a
    /// device exists.
    #[error("surface: {0}")]
    Surface(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
