use std::fmt::Write as _;

use strum_macros::{AsRefStr, EnumString};

use crate::{HeartBeat, StompError};

/// Well-known header names.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// A STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// `CONNECT` and `CONNECTED` frames are exempt from header escaping.
    #[must_use]
    pub const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }

    /// Parses a command line.
    ///
    /// # Errors
    ///
    /// * If the line is not a STOMP command
    pub fn parse(line: &str) -> Result<Self, StompError> {
        line.parse::<Self>()
            .map_err(|_| StompError::UnknownCommand(line.to_string()))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A single STOMP frame with a text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of header `name`.
    ///
    /// STOMP 1.2 says only the first occurrence of a repeated header is used.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// `CONNECT` frame for a STOMP 1.2 session.
    #[must_use]
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .with_header(headers::ACCEPT_VERSION, "1.2")
            .with_header(headers::HOST, host)
            .with_header(headers::HEART_BEAT, heart_beat.to_string())
    }

    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header(headers::ID, id)
            .with_header(headers::DESTINATION, destination)
    }

    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header(headers::ID, id)
    }

    /// `SEND` frame carrying a JSON body.
    #[must_use]
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    #[must_use]
    pub const fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serializes the frame, NUL terminator included.
    ///
    /// A `content-length` header is added for non-empty bodies unless one
    /// was set explicitly.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_ref());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.header(headers::CONTENT_LENGTH).is_none() {
            let _ = writeln!(out, "{}:{}", headers::CONTENT_LENGTH, self.body.len());
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');

        out
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }

    out
}

pub(crate) fn unescape_header(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(value.to_string())),
        }
    }

    Ok(out)
}
