//! Marker-delimited chat protocol.
//!
//! Every client request is wrapped in a pair of identical markers that name
//! its kind. Direct messages additionally split their payload into a target
//! and a body on [`SEPARATOR`]. Server replies to a login reuse the login
//! marker; everything else the server sends is plain chat text terminated by
//! a newline.
//!
//! Payloads may not contain any marker, the separator, or a line break.
//! [`Message::validate`] enforces that before encoding and [`Message::decode`]
//! enforces it on the way in.

use crate::error::CodecError;

pub const LOGIN_MARK: &str = "∏∑";
pub const DIRECT_MARK: &str = "★【";
pub const BROADCAST_MARK: &str = "§γ";
pub const SEPARATOR: char = '※';

pub const LOGIN_ACCEPTED: &str = "OK";
pub const NAME_TAKEN: &str = "NAME_TAKEN";

pub(crate) const MARKS: [&str; 3] = [LOGIN_MARK, DIRECT_MARK, BROADCAST_MARK];

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// A request sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Login { name: String },
    Direct { target: String, body: String },
    Broadcast { body: String },
}

impl Message {
    pub fn encode(&self) -> String {
        match self {
            Message::Login { name } => wrap(LOGIN_MARK, name),
            Message::Direct { target, body } => {
                wrap(DIRECT_MARK, &format!("{target}{SEPARATOR}{body}"))
            }
            Message::Broadcast { body } => wrap(BROADCAST_MARK, body),
        }
    }

    /// Classifies one complete unit read off the wire.
    pub fn decode(unit: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(unit)
            .map_err(|_| CodecError::MalformedMessage("frame is not valid UTF-8".to_string()))?;

        let message = if let Some(name) = unwrap_marked(text, LOGIN_MARK) {
            Message::Login {
                name: name.to_string(),
            }
        } else if let Some(payload) = unwrap_marked(text, DIRECT_MARK) {
            split_direct(payload)?
        } else if let Some(body) = unwrap_marked(text, BROADCAST_MARK) {
            Message::Broadcast {
                body: body.to_string(),
            }
        } else {
            return Err(CodecError::UnknownMessageKind);
        };

        message.validate()?;
        Ok(message)
    }

    /// Checks that every payload field survives framing unchanged.
    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            Message::Login { name } => validate_name(name),
            Message::Direct { target, body } => {
                validate_name(target)?;
                validate_payload(body)
            }
            Message::Broadcast { body } => validate_payload(body),
        }
    }
}

/// The server's answer to a login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Accepted,
    NameTaken,
}

impl LoginReply {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginReply::Accepted => LOGIN_ACCEPTED,
            LoginReply::NameTaken => NAME_TAKEN,
        }
    }

    pub fn encode(self) -> String {
        wrap(LOGIN_MARK, self.as_str())
    }
}

/// Anything a client can receive from the server.
///
/// Only the exact login reply shapes are recognised; every other unit is chat
/// text to be shown as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Login(LoginReply),
    Text(String),
}

impl ServerFrame {
    pub fn decode(unit: &[u8]) -> Self {
        let text = String::from_utf8_lossy(unit);
        match unwrap_marked(&text, LOGIN_MARK) {
            Some(LOGIN_ACCEPTED) => ServerFrame::Login(LoginReply::Accepted),
            Some(NAME_TAKEN) => ServerFrame::Login(LoginReply::NameTaken),
            _ => ServerFrame::Text(text.trim_end_matches(LINE_ENDINGS).to_string()),
        }
    }
}

/// Encodes a line of chat text for a client.
pub fn encode_text(line: &str) -> String {
    format!("{line}\n")
}

pub fn validate_name(name: &str) -> Result<(), CodecError> {
    if name.trim().is_empty() {
        return Err(CodecError::MalformedMessage(
            "name must not be blank".to_string(),
        ));
    }
    validate_payload(name)
}

pub fn validate_payload(payload: &str) -> Result<(), CodecError> {
    if let Some(mark) = MARKS.iter().find(|mark| payload.contains(**mark)) {
        return Err(CodecError::MalformedMessage(format!(
            "payload contains reserved marker '{mark}'"
        )));
    }
    if payload.contains(SEPARATOR) {
        return Err(CodecError::MalformedMessage(format!(
            "payload contains reserved separator '{SEPARATOR}'"
        )));
    }
    if payload.contains(LINE_ENDINGS) {
        return Err(CodecError::MalformedMessage(
            "payload contains a line break".to_string(),
        ));
    }
    Ok(())
}

fn wrap(mark: &str, payload: &str) -> String {
    let mut frame = String::with_capacity(mark.len() * 2 + payload.len());
    frame.push_str(mark);
    frame.push_str(payload);
    frame.push_str(mark);
    frame
}

fn unwrap_marked<'a>(text: &'a str, mark: &str) -> Option<&'a str> {
    text.strip_prefix(mark)?.strip_suffix(mark)
}

fn split_direct(payload: &str) -> Result<Message, CodecError> {
    let malformed = || {
        CodecError::MalformedMessage(format!(
            "direct message needs exactly one '{SEPARATOR}' separator"
        ))
    };

    if payload.matches(SEPARATOR).count() != 1 {
        return Err(malformed());
    }
    let (target, body) = payload.split_once(SEPARATOR).ok_or_else(malformed)?;

    Ok(Message::Direct {
        target: target.to_string(),
        body: body.to_string(),
    })
}
