use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for warden_core::ModerationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Storage(s) => warden_core::ModerationError::Transport(s),
            StoreError::NotFound(s) => warden_core::ModerationError::NotFound(s),
        }
    }
}
