//! Keyed stores of user-registered message handlers and watchers.

use std::{collections::HashMap, collections::hash_map::Entry, sync::Arc, sync::Mutex};

use futures::{FutureExt, future::BoxFuture};

use crate::wire::{Message, MessageAck};

use super::{Error, Result};

/// A user function processing inbound [`Message`]s for an installed name.
///
/// Implemented for any `async` closure taking the message and returning
/// the acknowledgement to send back, or `None` to acknowledge it as
/// unprocessed and let the engine pass it down the handler chain.
pub trait Handler: Send + Sync + 'static {
    /// Process one inbound message.
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<MessageAck>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<MessageAck>> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<MessageAck>> {
        (self)(message).boxed()
    }
}

/// A user function observing post-dispatch notifications for a watched
/// name. Purely observational, nothing is sent back.
pub trait Watcher: Send + Sync + 'static {
    /// Observe one notification.
    fn notify(&self, notification: MessageAck) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Watcher for F
where
    F: Fn(MessageAck) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn notify(&self, notification: MessageAck) -> BoxFuture<'static, ()> {
        (self)(notification).boxed()
    }
}

/// The two maps of user registrations, keyed by message name.
#[derive(Default)]
pub(super) struct Registry {
    handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
    watchers: Mutex<HashMap<String, Arc<dyn Watcher>>>,
}

impl Registry {
    pub fn add_handler(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        match self.handlers.lock().unwrap().entry(name.into()) {
            Entry::Occupied(_) => Err(Error::HandlerInstalled(name.into())),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    pub fn remove_handler(&self, name: &str) -> Result<()> {
        self.handlers
            .lock()
            .unwrap()
            .remove(name)
            .map(drop)
            .ok_or_else(|| Error::NoSuchHandler(name.into()))
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.lock().unwrap().get(name).cloned()
    }

    pub fn add_watcher(&self, name: &str, watcher: Arc<dyn Watcher>) -> Result<()> {
        match self.watchers.lock().unwrap().entry(name.into()) {
            Entry::Occupied(_) => Err(Error::WatcherInstalled(name.into())),
            Entry::Vacant(entry) => {
                entry.insert(watcher);
                Ok(())
            }
        }
    }

    pub fn remove_watcher(&self, name: &str) -> Result<()> {
        self.watchers
            .lock()
            .unwrap()
            .remove(name)
            .map(drop)
            .ok_or_else(|| Error::NoSuchWatcher(name.into()))
    }

    pub fn watcher(&self, name: &str) -> Option<Arc<dyn Watcher>> {
        self.watchers.lock().unwrap().get(name).cloned()
    }
}
