//! Error types for the bot process.
//!
//! - `StartupError`: fatal wiring failures in `main`
//! - `TelegramError`: Bot API transport failures
//! - `RouteError`: failures while handling one inbound update

use pitchside_core::ChatId;
use std::fmt;

/// Errors that stop the process before it starts serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Migrations failed.
    Migration { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "migrations failed: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Errors from the Telegram Bot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramError {
    /// The HTTP request did not complete.
    Request { method: String, details: String },
    /// The API answered `ok: false`.
    Api { method: String, description: String },
}

impl fmt::Display for TelegramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { method, details } => {
                write!(f, "telegram {method} request failed: {details}")
            }
            Self::Api {
                method,
                description,
            } => write!(f, "telegram {method} rejected: {description}"),
        }
    }
}

impl std::error::Error for TelegramError {}

/// Errors while routing one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Reading or writing conversations failed.
    Conversation,
    /// A roster or attribute lookup failed.
    Lookup { details: String },
    /// Answering in the chat failed.
    Reply { chat: ChatId },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation handling failed"),
            Self::Lookup { details } => write!(f, "lookup failed: {details}"),
            Self::Reply { chat } => write!(f, "failed to reply in chat {chat}"),
        }
    }
}

impl std::error::Error for RouteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_error_display() {
        let err = TelegramError::Api {
            method: "sendMessage".to_string(),
            description: "Forbidden: bot was blocked by the user".to_string(),
        };
        assert!(err.to_string().contains("sendMessage"));
        assert!(err.to_string().contains("blocked"));
    }
}
