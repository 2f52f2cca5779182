#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to encode notification payload: {message}")]
    Encode { message: String },
    #[error("notification transport failed: {message}")]
    Transport { message: String },
}
