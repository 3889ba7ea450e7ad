//! The driver's single error type.
//!
//! Every public operation returns [`Result<T>`]. Variants line up with the
//! `source` taxonomy of the wire protocol: `server`, `network`, `driver`,
//! `client`.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The server returned `!code!message`.
    #[error("server {message}")]
    Server {
        code: Option<i32>,
        message: String,
    },

    /// A TCP-level failure: timeout, reset, refused connect.
    #[error("network {0}")]
    Network(String),

    /// The driver could not parse a server response, or a response violated
    /// an assumed invariant. `details` carries the offending bytes.
    #[error("driver {message}")]
    Driver {
        message: String,
        details: Option<Vec<u8>>,
    },

    /// Caller misuse: nested transactions, calling an operation against a
    /// statement or transaction that does not belong to the connection, etc.
    #[error("client {0}")]
    Client(String),
}

impl Error {
    pub fn server(code: Option<i32>, message: impl Into<String>) -> Self {
        Error::Server { code, message: message.into() }
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Error::Driver { message: message.into(), details: None }
    }

    pub fn driver_with_details(message: impl Into<String>, details: Vec<u8>) -> Self {
        Error::Driver { message: message.into(), details: Some(details) }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Error::Network(message.into())
    }

    /// `true` for errors after which the connection must be evicted from its
    /// pool: the socket may be left in an indeterminate state.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Server code 7003: "attempt to deallocate an unknown statement". The
    /// server has already dropped the statement after a failed exec; this is
    /// benign and must not be surfaced to callers as a new failure.
    pub fn is_benign_deallocate_failure(&self) -> bool {
        matches!(self, Error::Server { code: Some(7003), .. })
    }

    /// The `source` tag as it appears in the user-visible rendering.
    fn source_tag(&self) -> &'static str {
        match self {
            Error::Server { .. } => "server",
            Error::Network(_) => "network",
            Error::Driver { .. } => "driver",
            Error::Client(_) => "client",
        }
    }

    fn details(&self) -> Option<&[u8]> {
        match self {
            Error::Driver { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    fn bare_message(&self) -> String {
        match self {
            Error::Server { message, .. } => message.clone(),
            Error::Network(m) => m.clone(),
            Error::Driver { message, .. } => message.clone(),
            Error::Client(m) => m.clone(),
        }
    }

    /// Renders `<source> <message>` with an optional `\n\n<details>` tail,
    /// matching the user-visible representation mandated by the spec.
    pub fn to_user_string(&self) -> String {
        let mut s = format!("{} {}", self.source_tag(), self.bare_message());
        if let Some(details) = self.details() {
            s.push_str("\n\n");
            s.push_str(&String::from_utf8_lossy(details));
        }
        s
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Network(err.to_string())
    }
}
