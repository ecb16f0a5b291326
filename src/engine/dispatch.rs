//! Per-command routing of inbound traffic.

use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;

use crate::wire::{self, Command, Message, MessageAck};

use super::{Engine, correlator::Key, registry::Handler, registry::Watcher};

/// Route one parsed inbound command.
///
/// Message handlers and watcher notifications run on a worker; in
/// parallel mode the worker is spawned onto `workers` and may overlap
/// with others, in sequential mode it is awaited in place. Everything
/// else resolves or logs synchronously.
pub(super) async fn route(engine: &Engine, command: Command, workers: &mut JoinSet<()>) {
    tracing::debug!("received command: {command}");

    match command {
        Command::Message(message) => {
            if let Some(handler) = engine.shared.registry.handler(&message.name) {
                run(engine, workers, handle(engine.clone(), handler, message)).await;
            } else if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::Message(message.id.clone()))
            {
                // delayed answer to one of our own messages
                let _ = resolver.send(Ok(Command::Message(message)));
            } else if let Some(watcher) = engine.shared.registry.watcher(&message.name) {
                // notify the watcher, but still acknowledge the message
                // so the engine does not wait on us
                let _ = engine.enqueue(&message.ack().into());

                let notification = MessageAck {
                    id: String::new(),
                    processed: false,
                    name: Some(message.name.clone()),
                    retvalue: message.retvalue.clone(),
                    kvp: message.kvp.clone(),
                };
                run(engine, workers, notify(watcher, notification)).await;
            } else {
                tracing::error!("no handler installed for message \"{}\"", message.name);
                let _ = engine.enqueue(&message.ack().into());
            }
        }

        Command::MessageAck(ack) => {
            if !ack.id.is_empty()
                && let Some(resolver) = engine.shared.correlator.resolve(&Key::Message(ack.id.clone()))
            {
                let _ = resolver.send(Ok(Command::MessageAck(ack)));
            } else if let Some(watcher) = ack
                .name
                .as_deref()
                .and_then(|name| engine.shared.registry.watcher(name))
            {
                run(engine, workers, notify(watcher, ack)).await;
            } else {
                tracing::info!("no request outstanding for acknowledgement: {ack:?}");
            }
        }

        Command::InstallAck(ack) => {
            if ack.success {
                tracing::info!("installed handler for \"{}\"", ack.name);
            } else {
                tracing::error!("error installing handler for \"{}\"", ack.name);
            }

            if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::Install(ack.name.clone()))
            {
                let _ = resolver.send(Ok(Command::InstallAck(ack)));
            }
        }

        Command::UninstallAck(ack) => {
            if ack.success {
                tracing::info!("removed handler for \"{}\"", ack.name);
            } else {
                tracing::error!("error removing handler for \"{}\"", ack.name);
            }

            if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::Uninstall(ack.name.clone()))
            {
                let _ = resolver.send(Ok(Command::UninstallAck(ack)));
            }
        }

        Command::SetLocalAck(ack) => {
            if ack.success {
                tracing::info!("parameter \"{}\" set to: {}", ack.name, ack.value);
            } else {
                tracing::error!("error setting parameter \"{}\"", ack.name);
            }

            if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::SetLocal(ack.name.clone()))
            {
                let _ = resolver.send(Ok(Command::SetLocalAck(ack)));
            }
        }

        Command::WatchAck(ack) => {
            if ack.success {
                tracing::info!("installed watcher for \"{}\"", ack.name);
            } else {
                tracing::error!("error installing watcher for \"{}\"", ack.name);
            }

            if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::Watch(ack.name.clone()))
            {
                let _ = resolver.send(Ok(Command::WatchAck(ack)));
            }
        }

        Command::UnwatchAck(ack) => {
            if ack.success {
                tracing::info!("removed watcher for \"{}\"", ack.name);
            } else {
                tracing::error!("error removing watcher for \"{}\"", ack.name);
            }

            if let Some(resolver) = engine
                .shared
                .correlator
                .resolve(&Key::Unwatch(ack.name.clone()))
            {
                let _ = resolver.send(Ok(Command::UnwatchAck(ack)));
            }
        }

        Command::ErrorIn(error) => {
            tracing::error!("invalid command: {}", error.original);

            // fail the request the rejected line belongs to, if any
            if let Ok(original) = wire::from_str(&error.original)
                && let Some(key) = Key::of_request(&original)
                && let Some(resolver) = engine.shared.correlator.resolve(&key)
            {
                let _ = resolver.send(Err(super::Error::Rejected(error.original)));
            }
        }

        // engine-bound commands have no business arriving here
        command => tracing::error!("no handler defined for `{}` command", command.keyword()),
    }
}

/// Run a worker according to the configured execution policy.
async fn run(engine: &Engine, workers: &mut JoinSet<()>, worker: impl Future<Output = ()> + Send + 'static) {
    if engine.shared.options.parallel {
        workers.spawn(worker);
    } else {
        worker.await;
    }
}

/// Worker invoking a message handler and acknowledging the message.
///
/// A `None` result and a panicked handler both fall back to the default
/// unprocessed acknowledgement, the engine must never be left hanging.
fn handle(
    engine: Engine,
    handler: Arc<dyn Handler>,
    message: Message,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let fallback = message.ack();

        let ack = match std::panic::AssertUnwindSafe(handler.handle(message.clone()))
            .catch_unwind()
            .await
        {
            Ok(Some(ack)) => ack,
            Ok(None) => fallback,
            Err(_) => {
                tracing::error!("handler panicked processing message: {message:?}");
                fallback
            }
        };

        if let Err(err) = engine.enqueue(&ack.into()) {
            tracing::error!("unable to acknowledge message: {err}");
        }
    }
}

/// Worker invoking a watcher, its outcome is purely observational.
fn notify(
    watcher: Arc<dyn Watcher>,
    notification: MessageAck,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let name = notification.name.clone();

        if std::panic::AssertUnwindSafe(watcher.notify(notification))
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!("watcher for {name:?} panicked");
        }
    }
}
