#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write prompt to {command}: {source}")]
    PromptWrite {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stream read failed: {source}")]
    Stream {
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with error (status {status:?})")]
    Exited {
        command: String,
        status: Option<i32>,
    },
    #[error("agent run cancelled")]
    Cancelled,
}
