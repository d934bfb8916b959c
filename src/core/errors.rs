use thiserror::Error;

use crate::coord::types::JobId;

/// Unified error type for coordinator operations
#[derive(Debug, Error)]
pub enum CoordError {
    /// A job's result was read before its completion signal fired
    #[error("Job {job} is not ready: result read before completion")]
    NotReady { job: JobId },

    /// A job's result was already handed out
    #[error("Job {job} result was already taken")]
    ResultTaken { job: JobId },

    /// `start` was called on a job that is no longer pending
    #[error("Job {job} was already started")]
    AlreadyStarted { job: JobId },

    /// The post-drain final step failed
    #[error("Final step failed: {source}")]
    FinalStep {
        #[source]
        source: anyhow::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Channel/messaging errors
    #[error("Channel error: {channel} - {message}")]
    Channel { channel: String, message: String },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoordError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a final step error
    pub fn final_step(source: anyhow::Error) -> Self {
        Self::FinalStep { source }
    }

    /// Create a channel error
    pub fn channel<S: Into<String>, M: Into<String>>(channel: S, message: M) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotReady { .. } => "not_ready",
            Self::ResultTaken { .. } => "result_taken",
            Self::AlreadyStarted { .. } => "already_started",
            Self::FinalStep { .. } => "final_step",
            Self::Configuration { .. } => "configuration",
            Self::Channel { .. } => "channel",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CoordError>;

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for CoordError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

/// Why a job finished without a value.
///
/// Delivered to the job's reaction in place of its result. A failure never
/// leaves the job it belongs to.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// The job body returned an error
    #[error("{source}")]
    Failed {
        #[source]
        source: anyhow::Error,
    },

    /// A chain stage returned an error; later stages never ran
    #[error("stage {index} ({stage}) failed: {source}")]
    Stage {
        stage: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The job panicked
    #[error("job panicked: {message}")]
    Panicked { message: String },
}

impl JobFailure {
    pub fn failed(source: anyhow::Error) -> Self {
        Self::Failed { source }
    }

    pub fn stage<S: Into<String>>(stage: S, index: usize, source: anyhow::Error) -> Self {
        Self::Stage {
            stage: stage.into(),
            index,
            source,
        }
    }

    /// Name of the failing chain stage, if the failure came from one
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(err)
    }
}
