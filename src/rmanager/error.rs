use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur on the remote manager control channel.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("received end of stream from the engine")]
    Eof,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected answer: {0}")]
    Unexpected(String),
}
