pub mod claude;
pub mod codex;
pub mod error;
pub mod linereader;
pub mod signal;
pub mod types;

pub use claude::ClaudeExecutor;
pub use codex::CodexExecutor;
pub use error::AgentError;
pub use signal::{detect_signal, Signal};
pub use types::{ChildProcess, CommandRunner, ExecOutcome, Executor, OutputHandler, StreamChannel};
