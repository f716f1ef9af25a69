use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelicError {
    #[error("source path not found: {0}")]
    SourcePathNotFound(String),

    #[error("path '{0}' does not name a project")]
    NotAProject(String),

    #[error("invalid exclude pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("invalid path mapping '{0}': {1}")]
    InvalidMapping(String, String),

    #[error("unknown character encoding: {0}")]
    UnknownEncoding(String),

    #[error("malformed source item '{0}': {1}")]
    MalformedItem(String, String),

    #[error("no recorded content for item '{0}' at version {1}")]
    MissingContent(String, u32),

    #[error("tree operation failed on '{0}': {1}")]
    TreeOp(String, String),

    #[error("output repository locked by another process: {0}")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RelicError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourcePathNotFound(_) => "source_path_not_found",
            Self::NotAProject(_) => "not_a_project",
            Self::InvalidPattern(_, _) => "invalid_pattern",
            Self::InvalidMapping(_, _) => "invalid_mapping",
            Self::UnknownEncoding(_) => "unknown_encoding",
            Self::MalformedItem(_, _) => "malformed_item",
            Self::MissingContent(_, _) => "missing_content",
            Self::TreeOp(_, _) => "tree_op_failed",
            Self::Locked(_) => "locked",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Git(_) => "git",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
        }
    }

    /// Configuration errors surface synchronously before any background work
    /// starts; everything else flows through the captured-error channel.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SourcePathNotFound(_)
                | Self::NotAProject(_)
                | Self::InvalidPattern(_, _)
                | Self::InvalidMapping(_, _)
                | Self::UnknownEncoding(_)
                | Self::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelicError>;
