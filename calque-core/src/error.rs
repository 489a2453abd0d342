use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unknown page {0}")]
    UnknownPage(String),

    #[error("page {id} already registered for {url}")]
    DuplicateRegistration { id: String, url: String },

    #[error("node {child} would break the depth invariant under {parent}")]
    DepthInvariant { parent: String, child: String },

    #[error("execution requires a confirmed discovery tree")]
    ExecutionWithoutDiscovery,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("render engine error: {0}")]
    RenderError(#[from] calque_render::RenderError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;
