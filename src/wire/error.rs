use thiserror::Error;

use super::upcode::DecodeError;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while parsing or rendering commands.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown keyword in line `{0}`")]
    UnknownKeyword(String),

    #[error("missing value for field `{field}` of `{keyword}`")]
    MissingField {
        keyword: &'static str,
        field: &'static str,
    },

    #[error("invalid value `{value}` for field `{field}` of `{keyword}`")]
    InvalidField {
        keyword: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("key on a key-value pair cannot be empty")]
    EmptyKey,
}
