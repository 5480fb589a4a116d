use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    /// Malformed description: unknown type, missing or ill-typed field.
    #[error("plan construction error: {0}")]
    Construction(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("choice error: {0}")]
    Choice(String),

    #[error(transparent)]
    Op(#[from] sitewise_operators::OpError),

    #[error(transparent)]
    Core(#[from] sitewise_core::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
