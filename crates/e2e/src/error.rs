//! Error types for E2E support code

use thiserror::Error;

use crate::wait::ProbeError;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Condition not met: {message} (last observed: {last})")]
    ConditionNotMet { message: String, last: String },

    #[error("Command failed to start: {command} - {reason}")]
    CommandStartup { command: String, reason: String },

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
