//! The store of outstanding requests awaiting their acknowledgement.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::wire::{
    Command, InstallAck, MessageAck, SetLocalAck, UninstallAck, UnwatchAck, WatchAck,
};

use super::{Error, Result};

/// The correlation key tying an outbound request to its acknowledgement.
///
/// Messages correlate by id, every other request kind by the name it
/// operates on. At most one request per key may be outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum Key {
    Message(String),
    Install(String),
    Uninstall(String),
    SetLocal(String),
    Watch(String),
    Unwatch(String),
}

impl Key {
    /// Key of an outbound command, if that kind expects an acknowledgement.
    pub fn of_request(command: &Command) -> Option<Self> {
        match command {
            Command::Message(cmd) => Some(Self::Message(cmd.id.clone())),
            Command::Install(cmd) => Some(Self::Install(cmd.name.clone())),
            Command::Uninstall(cmd) => Some(Self::Uninstall(cmd.name.clone())),
            Command::SetLocal(cmd) => Some(Self::SetLocal(cmd.name.clone())),
            Command::Watch(cmd) => Some(Self::Watch(cmd.name.clone())),
            Command::Unwatch(cmd) => Some(Self::Unwatch(cmd.name.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(id) => write!(f, "message {id}"),
            Self::Install(name) => write!(f, "install {name}"),
            Self::Uninstall(name) => write!(f, "uninstall {name}"),
            Self::SetLocal(name) => write!(f, "setlocal {name}"),
            Self::Watch(name) => write!(f, "watch {name}"),
            Self::Unwatch(name) => write!(f, "unwatch {name}"),
        }
    }
}

/// An acknowledgement kind a [`Pending`] request can resolve to.
pub trait Reply: Sized + sealed::Sealed {
    #[doc(hidden)]
    fn from_command(command: Command) -> Option<Self>;
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::InstallAck {}
    impl Sealed for super::UninstallAck {}
    impl Sealed for super::SetLocalAck {}
    impl Sealed for super::WatchAck {}
    impl Sealed for super::UnwatchAck {}
    impl Sealed for super::MessageAck {}
}

impl Reply for InstallAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::InstallAck(ack) => Some(ack),
            _ => None,
        }
    }
}

impl Reply for UninstallAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::UninstallAck(ack) => Some(ack),
            _ => None,
        }
    }
}

impl Reply for SetLocalAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::SetLocalAck(ack) => Some(ack),
            _ => None,
        }
    }
}

impl Reply for WatchAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::WatchAck(ack) => Some(ack),
            _ => None,
        }
    }
}

impl Reply for UnwatchAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::UnwatchAck(ack) => Some(ack),
            _ => None,
        }
    }
}

impl Reply for MessageAck {
    fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::MessageAck(ack) => Some(ack),

            // the engine may deliver a delayed answer as a full message,
            // hand it over as an unprocessed acknowledgement
            Command::Message(message) => Some(MessageAck {
                id: message.id,
                processed: false,
                name: Some(message.name),
                retvalue: message.retvalue,
                kvp: message.kvp,
            }),

            _ => None,
        }
    }
}

/// The acknowledgement of a request submitted to the engine.
///
/// Awaiting resolves once the engine answers; dropping it instead is
/// fine, the request stays on the wire and its acknowledgement is
/// consumed and logged when it arrives.
#[must_use = "dropping a `Pending` discards the acknowledgement"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<Command>>,
    _reply: PhantomData<fn() -> T>,
}

impl<T: Reply> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|resolved| {
            match resolved {
                // every pending entry is dropped on shutdown
                Err(_) => Err(Error::Stopped),
                Ok(Err(err)) => Err(err),
                Ok(Ok(command)) => {
                    // keys only ever resolve to their own acknowledgement kind
                    let line = command.to_string();
                    T::from_command(command).ok_or(Error::MismatchedReply(line))
                }
            }
        })
    }
}

/// The set of outstanding requests, keyed by [`Key`].
#[derive(Default)]
pub(super) struct Correlator {
    pending: Mutex<HashMap<Key, oneshot::Sender<Result<Command>>>>,
}

impl Correlator {
    /// Reserve a key, handing back the [`Pending`] acknowledgement.
    ///
    /// A key can only be reserved once until it resolves.
    pub fn submit<T: Reply>(&self, key: Key) -> Result<Pending<T>> {
        let mut pending = self.pending.lock().unwrap();

        match pending.entry(key) {
            Entry::Occupied(entry) => Err(Error::RequestOutstanding(entry.key().to_string())),
            Entry::Vacant(entry) => {
                let (sender, receiver) = oneshot::channel();
                entry.insert(sender);

                Ok(Pending {
                    receiver,
                    _reply: PhantomData,
                })
            }
        }
    }

    /// Take the resolver for `key`, if a request is outstanding.
    pub fn resolve(&self, key: &Key) -> Option<oneshot::Sender<Result<Command>>> {
        self.pending.lock().unwrap().remove(key)
    }

    /// Drop every outstanding request, failing their [`Pending`] halves.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}
