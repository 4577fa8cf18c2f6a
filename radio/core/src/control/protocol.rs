//! Line protocol
//!
//! ```text
//! request := VERB [SP ARG] LF
//! reply   := ("OK" | DATA | "ERR " MESSAGE) LF
//! ```
//!
//! Verbs are case-insensitive (normalized to uppercase); the argument keeps
//! its case so URLs survive intact. Exactly one line is exchanged in each
//! direction per connection.

use std::fmt;

use thiserror::Error;

/// Longest accepted request line, newline included
pub const MAX_REQUEST_BYTES: usize = 4096;

/// Malformed request lines
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Nothing but whitespace (or nothing at all) was received
    #[error("empty command")]
    Empty,

    /// The line exceeded [`MAX_REQUEST_BYTES`]
    #[error("request too long")]
    TooLong,

    /// The line was not valid UTF-8
    #[error("malformed command")]
    Malformed,
}

/// Verbs understood by the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Liveness probe
    Ping,
    /// Play the URL given as argument
    Play,
    /// Stop playback
    Stop,
    /// Stop if playing, otherwise replay the last URL
    Toggle,
    /// Report whether something is playing
    Status,
    /// Report the last URL played
    Last,
}

impl Verb {
    /// Look up a normalized (uppercase) verb
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PING" => Some(Self::Ping),
            "PLAY" => Some(Self::Play),
            "STOP" => Some(Self::Stop),
            "TOGGLE" => Some(Self::Toggle),
            "STATUS" => Some(Self::Status),
            "LAST" => Some(Self::Last),
            _ => None,
        }
    }

    /// Wire name of the verb
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Play => "PLAY",
            Self::Stop => "STOP",
            Self::Toggle => "TOGGLE",
            Self::Status => "STATUS",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    verb: String,
    argument: Option<String>,
}

impl Request {
    /// Build a request for a known verb
    pub fn new(verb: Verb, argument: Option<String>) -> Self {
        Self {
            verb: verb.as_str().to_string(),
            argument: argument
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
        }
    }

    /// Parse one request line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        Ok(Self {
            verb: verb.to_uppercase(),
            argument: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }

    /// Normalized verb text
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Argument following the verb, if any
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Wire form, newline-terminated
    pub fn encode(&self) -> String {
        match &self.argument {
            Some(arg) => format!("{} {}\n", self.verb, arg),
            None => format!("{}\n", self.verb),
        }
    }
}

/// Outcome of one command
///
/// Exactly one reply is produced per request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Whether the command succeeded
    pub ok: bool,
    /// Payload for successful commands
    pub data: String,
    /// Reason for failed commands
    pub err_message: String,
}

impl Reply {
    /// Success without payload (`OK`)
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// Success carrying `data`
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            ok: true,
            data: data.into(),
            err_message: String::new(),
        }
    }

    /// Failure with `message`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: String::new(),
            err_message: message.into(),
        }
    }

    /// Wire form, exactly one newline-terminated line
    pub fn encode(&self) -> String {
        let body = if self.ok {
            let data = self.data.trim();
            if data.is_empty() {
                "OK".to_string()
            } else {
                data.to_string()
            }
        } else {
            let message = self.err_message.trim();
            let message = if message.is_empty() { "error" } else { message };
            format!("ERR {message}")
        };
        let mut line = single_line(&body);
        line.push('\n');
        line
    }

    /// Decode a reply line received by a client
    pub fn decode(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            Self::ok()
        } else if line == "ERR" {
            Self::error("error")
        } else if let Some(message) = line.strip_prefix("ERR ") {
            Self::error(message.trim())
        } else {
            Self::data(line)
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

fn single_line(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
