// ABOUTME: Error types for child process execution

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with {}", .code.map_or_else(|| "no exit code (killed by signal)".to_string(), |c| format!("exit code {c}")))]
    Failed { command: String, code: Option<i32> },

    #[error("`{command}` interrupted by {signal}")]
    Interrupted { command: String, signal: String },

    #[error("`{command}` produced non-UTF-8 output")]
    InvalidOutput { command: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Exit code of the failed child, when it exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}
