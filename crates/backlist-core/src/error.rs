use thiserror::Error;

/// Failures raised by the store, the ingest path and the dedup/recommend passes.
#[derive(Debug, Error)]
pub enum BacklistError {
    #[error("Author not found: {0}")]
    AuthorNotFound(String),

    #[error("Catalog entry not found: {0}")]
    EntryNotFound(i64),

    /// Ambiguous or invalid identity decision that needs a human.
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// A merge would leave a reference pointing at nothing.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Could not read config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Could not write config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl BacklistError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AuthorNotFound(_) | Self::EntryNotFound(_))
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            e if e.is_not_found() => ExitCode::NotFound,
            Self::IdentityConflict(_) | Self::DataIntegrity(_) => ExitCode::Conflict,
            Self::ValidationError(_) | Self::ConfigError(_) | Self::TomlParse(_) => {
                ExitCode::InvalidArgs
            }
            Self::Io(_) => ExitCode::FileSystemError,
            _ => ExitCode::GeneralError,
        }
    }
}

/// Process exit status reported by the `backlist` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    FileSystemError = 4,
    NetworkError = 6,
    Conflict = 7,
}

pub type Result<T> = std::result::Result<T, BacklistError>;
