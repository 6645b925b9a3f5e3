use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid stack name {name}\nMust only consist of alphanumeric characters and hyphens, must start with an alphabetical character, and cannot be longer than 128 characters.")]
    InvalidStackName { name: String },

    #[error("Invalid construct id '{id}'. Ids must be non-empty and cannot contain '/'")]
    InvalidConstructId { id: String },

    #[error("There is already a construct with id '{id}' under '{parent}'")]
    DuplicateConstructId { parent: String, id: String },

    #[error("Logical id '{logical_id}' generated for '{path}' collides with an existing resource")]
    DuplicateLogicalId { path: String, logical_id: String },

    #[error("Resource '{from}' references '{to}' which is not defined in the template")]
    UnresolvedReference { from: String, to: String },

    #[error("Resources form a dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Must provide a staging bucket to write the deploy script (config key 'staging_bucket')")]
    MissingStagingBucket,

    #[error("Asset directory {0:?} does not exist or is not a directory")]
    AssetDirectoryMissing(PathBuf),

    #[error("Asset directory {0:?} contains no files")]
    EmptyAssetDirectory(PathBuf),

    #[error("Failed to evaluate config script {path:?}\n{reason}")]
    Script { path: PathBuf, reason: String },

    #[error("IO error at {path:?}\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize template\n{0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Request to {url} failed\n{reason}")]
    Http { url: String, reason: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub fn config(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig { key: key.to_string(), reason: reason.into() }
    }
}
