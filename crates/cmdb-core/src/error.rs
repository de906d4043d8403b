use thiserror::Error;

/// Domain error shared by every GraphCMDB crate.
#[derive(Error, Debug)]
pub enum CmdbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown node type: {0}")]
    UnknownType(String),

    #[error("Node not found: {label} with id {id}")]
    NotFound { label: String, id: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Missing required property: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error("Invalid value '{value}' for {property}; expected one of: {}", .choices.join(", "))]
    InvalidChoice {
        property: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Feature pack error: {0}")]
    Pack(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
