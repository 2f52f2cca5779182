pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod sse;
pub mod watch;

pub use error::WebError;
pub use handler::ApiState;
pub use server::DashboardServer;
pub use watch::spawn_watcher;
