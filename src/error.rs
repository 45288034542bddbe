use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid module: {0}")]
    Validation(String),

    #[error("Unmet module dependencies; removed modules: {removed:?}")]
    Dependency {
        removed: Vec<String>,
        log: Vec<String>,
    },

    #[error("Cloud error: {0}")]
    Cloud(String),

    #[error("No module with the id '{0}' was found in the catalog")]
    ModuleNotFound(String),

    #[error("Version '{version}' of module '{id}' cannot be found")]
    VersionNotFound { id: String, version: String },

    #[error("Module instantiation failed: {0}")]
    Instantiation(String),

    #[error("Download of '{0}' was cancelled")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}
