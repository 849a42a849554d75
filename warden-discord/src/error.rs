//! Discord-specific error type, mapped onto `warden_engine`'s `DispatchError`
//! taxonomy at the effector boundary.

use thiserror::Error;
use warden_engine::error::DispatchError;

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("discord gateway: {0}")]
    Gateway(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl From<serenity::Error> for DiscordError {
    fn from(e: serenity::Error) -> Self {
        match &e {
            serenity::Error::Http(http) => match http {
                serenity::http::HttpError::UnsuccessfulRequest(res) if res.status_code.as_u16() == 403 => {
                    DiscordError::Forbidden(res.error.message.clone())
                }
                serenity::http::HttpError::UnsuccessfulRequest(res) if res.status_code.as_u16() == 404 => {
                    DiscordError::NotFound(res.error.message.clone())
                }
                other => DiscordError::Transport(other.to_string()),
            },
            other => DiscordError::Transport(other.to_string()),
        }
    }
}

impl From<DiscordError> for DispatchError {
    fn from(e: DiscordError) -> Self {
        match e {
            DiscordError::Gateway(s) => DispatchError::Internal(s),
            DiscordError::NotFound(s) => DispatchError::NotFound(s),
            DiscordError::Forbidden(s) => DispatchError::Authorization(s),
            DiscordError::Transport(s) => DispatchError::Transport(s),
        }
    }
}
