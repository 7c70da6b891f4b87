pub type PixfxResult<T> = Result<T, PixfxError>;

#[derive(thiserror::Error, Debug)]
pub enum PixfxError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("shader error in '{filter}': {log}")]
    Shader { filter: String, log: String },

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PixfxError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn shader(filter: impl Into<String>, log: impl Into<String>) -> Self {
        Self::Shader {
            filter: filter.into(),
            log: log.into(),
        }
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
