//! Typed errors for the chat protocol and routing layers.
//!
//! Connection-level failures travel as `anyhow::Error` (or plain
//! `std::io::Error`) because the only thing a session does with them is log
//! and close. The enums here exist for the cases callers branch on.

use thiserror::Error;

/// A received unit could not be turned into a [`crate::codec::Message`].
///
/// Both variants are recoverable: the session logs them and drops the frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message kind")]
    UnknownMessageKind,
}

/// Why a line could not be queued for a connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session behind the handle has closed its outbox.
    #[error("connection closed")]
    Closed,

    /// The recipient is not draining its outbox fast enough.
    #[error("outbox full")]
    Full,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The sending connection has no registered name.
    #[error("sender is not logged in")]
    SenderUnknown,

    #[error("recipient '{0}' not found")]
    RecipientNotFound(String),
}
