use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur when interracting with the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Wire(#[from] crate::wire::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("the engine is already running")]
    AlreadyRunning,

    #[error("the engine is shutting down")]
    Stopped,

    #[error("a handler is already installed for `{0}`")]
    HandlerInstalled(String),

    #[error("a watcher is already installed for `{0}`")]
    WatcherInstalled(String),

    #[error("no handler is installed for `{0}`")]
    NoSuchHandler(String),

    #[error("no watcher is installed for `{0}`")]
    NoSuchWatcher(String),

    #[error("a request for `{0}` is already outstanding")]
    RequestOutstanding(String),

    #[error("the engine rejected the request: {0}")]
    Rejected(String),

    #[error("the engine answered the request with `{0}`")]
    MismatchedReply(String),
}
