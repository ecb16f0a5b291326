//! An abstraction of the telephony engine and its main loop.

use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, watch},
    task::JoinSet,
};

use crate::wire::{
    self, Command, Connect, ConnectRole, Filter, Install, InstallAck, KeyValueList, Message,
    MessageAck, Output, SetLocal, SetLocalAck, Uninstall, UninstallAck, Unwatch, UnwatchAck,
    Watch, WatchAck,
};

mod error;
pub use error::{Error, Result};

mod correlator;
use correlator::{Correlator, Key};
pub use correlator::{Pending, Reply};

mod registry;
use registry::Registry;
pub use registry::{Handler, Watcher};

mod dispatch;

#[cfg(test)]
mod tests;

/// Size of the read buffer in front of the engine's stream.
const READ_BUFFER: usize = 8192;

/// Configuration of an [`Engine`].
#[derive(Debug, Clone)]
pub struct Options {
    name: String,
    track_param: Option<String>,
    restart: Option<bool>,
    parallel: bool,
}

impl Options {
    /// Options for a module called `name`; the name seeds generated
    /// message ids and, through [`Options::track_param`], the engine-side
    /// handler tracking.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            track_param: None,
            restart: None,
            parallel: true,
        }
    }

    /// Set the handler tracking parameter on startup.
    pub fn track_param(mut self, value: impl Into<String>) -> Self {
        self.track_param = Some(value.into());
        self
    }

    /// Ask the engine to restart this module if it terminates
    /// unexpectedly; must be `false` to allow normal termination.
    pub fn restart(mut self, restart: bool) -> Self {
        self.restart = Some(restart);
        self
    }

    /// Process commands one at a time instead of spawning a worker per
    /// message.
    ///
    /// Handlers must not wait on their own engine requests in this mode,
    /// the answer only gets dispatched once the handler returned.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

/// Outbound traffic is buffered until the main loop starts; `connect`
/// jumps the startup queue as it must be the first line on the wire.
enum Outbound {
    Gathering {
        early: Vec<String>,
        startup: Vec<String>,
    },
    Running(mpsc::UnboundedSender<Option<String>>),
}

struct Shared {
    options: Options,
    correlator: Correlator,
    registry: Registry,
    outbound: Mutex<Outbound>,
    stopping: watch::Sender<bool>,
    on_stop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// A connector to the telephony engine.
///
/// The handle is cheap to clone and shared with every handler worker;
/// commands issued before [`Engine::run`] are buffered and drained to
/// the wire, in order, when the main loop starts.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Initialize an engine connector with the provided [`Options`].
    pub fn new(options: Options) -> Self {
        let engine = Self {
            shared: Arc::new(Shared {
                options,
                correlator: Correlator::default(),
                registry: Registry::default(),
                outbound: Mutex::new(Outbound::Gathering {
                    early: Vec::new(),
                    startup: Vec::new(),
                }),
                stopping: watch::Sender::new(false),
                on_stop: Mutex::new(None),
            }),
        };

        if let Some(value) = engine.shared.options.track_param.clone() {
            tracing::debug!("setting handler tracking parameter");
            let _ = engine.set_local("trackparam", value);
        }

        if let Some(restart) = engine.shared.options.restart {
            tracing::debug!("setting module restart parameter");
            let _ = engine.set_local("restart", restart.to_string());
        }

        engine
    }

    /// Render and enqueue a command for the writer.
    fn send(&self, command: &Command, early: bool) -> Result<()> {
        let line = wire::to_string(command);
        tracing::debug!("queueing command: {line}");

        match &mut *self.shared.outbound.lock().unwrap() {
            Outbound::Gathering { early: queue, .. } if early => queue.push(line),
            Outbound::Gathering { startup, .. } => startup.push(line),
            Outbound::Running(queue) => {
                queue.send(Some(line)).map_err(|_| Error::Stopped)?;
            }
        }

        Ok(())
    }

    /// Enqueue a command through the regular path.
    pub(crate) fn enqueue(&self, command: &Command) -> Result<()> {
        self.send(command, false)
    }

    /// Submit a request expecting an acknowledgement.
    fn request<T: Reply>(&self, command: Command) -> Result<Pending<T>> {
        let key = match Key::of_request(&command) {
            Some(key) => key,
            None => unreachable!("the command kind expects no acknowledgement"),
        };

        let pending = self.shared.correlator.submit(key)?;
        self.enqueue(&command)?;

        Ok(pending)
    }

    /// Register this module on a socket interface.
    ///
    /// Must be the first command on a socket transport; it is sent ahead
    /// of any startup traffic no matter when it was issued.
    pub fn connect(
        &self,
        role: ConnectRole,
        id: impl Into<Option<String>>,
        kind: impl Into<Option<String>>,
    ) -> Result<()> {
        tracing::info!("connecting as \"{role}\"");

        self.send(
            &Connect {
                role,
                id: id.into(),
                kind: kind.into(),
            }
            .into(),
            true,
        )
    }

    /// Relay some arbitrary text to the engine's logging output.
    pub fn output(&self, text: impl Into<String>) -> Result<()> {
        self.enqueue(&Output { text: text.into() }.into())
    }

    /// Request the change of a local parameter.
    pub fn set_local(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Pending<SetLocalAck>> {
        let name = name.into();
        tracing::info!("setting parameter \"{name}\"");

        self.request(
            SetLocal {
                name,
                value: Some(value.into()),
            }
            .into(),
        )
    }

    /// Query the value of a local parameter.
    pub fn get_local(&self, name: impl Into<String>) -> Result<Pending<SetLocalAck>> {
        let name = name.into();
        tracing::info!("querying parameter \"{name}\"");

        self.request(SetLocal { name, value: None }.into())
    }

    /// Install a message handler with the provided `priority`,
    /// default (`100`) if `None`.
    ///
    /// The handler processes every matching inbound message until
    /// [`Engine::uninstall`] or shutdown; installing twice for the same
    /// name is an error.
    pub fn install(
        &self,
        name: impl Into<String>,
        priority: impl Into<Option<u64>>,
        filter: impl Into<Option<Filter>>,
        handler: impl Handler,
    ) -> Result<Pending<InstallAck>> {
        let name = name.into();
        tracing::info!("installing handler for \"{name}\"");

        self.shared.registry.add_handler(&name, Arc::new(handler))?;

        self.request(
            Install {
                priority: priority.into(),
                name: name.clone(),
                filter: filter.into(),
            }
            .into(),
        )
        .inspect_err(|_| {
            let _ = self.shared.registry.remove_handler(&name);
        })
    }

    /// Remove a previously installed message handler.
    pub fn uninstall(&self, name: impl Into<String>) -> Result<Pending<UninstallAck>> {
        let name = name.into();
        tracing::info!("removing handler for \"{name}\"");

        self.shared.registry.remove_handler(&name)?;

        self.request(Uninstall { name }.into())
    }

    /// Install a message watcher (post-dispatching notifier).
    pub fn watch(
        &self,
        name: impl Into<String>,
        watcher: impl Watcher,
    ) -> Result<Pending<WatchAck>> {
        let name = name.into();
        tracing::info!("installing watcher for \"{name}\"");

        self.shared.registry.add_watcher(&name, Arc::new(watcher))?;

        self.request(Watch { name: name.clone() }.into())
            .inspect_err(|_| {
                let _ = self.shared.registry.remove_watcher(&name);
            })
    }

    /// Remove a previously installed message watcher.
    pub fn unwatch(&self, name: impl Into<String>) -> Result<Pending<UnwatchAck>> {
        let name = name.into();
        tracing::info!("removing watcher for \"{name}\"");

        self.shared.registry.remove_watcher(&name)?;

        self.request(Unwatch { name }.into())
    }

    /// Send a message to the engine for dispatching, with a generated
    /// unique id and the current time.
    pub fn message(
        &self,
        name: impl Into<String>,
        retvalue: impl Into<Option<String>>,
        kvp: KeyValueList,
    ) -> Result<Pending<MessageAck>> {
        let time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        self.send_message(Message {
            id: self.next_id(),
            time,
            name: name.into(),
            retvalue: retvalue.into(),
            kvp,
        })
    }

    /// Send a fully specified [`Message`] to the engine for dispatching.
    ///
    /// The id must be unique among the outstanding messages.
    pub fn send_message(&self, message: Message) -> Result<Pending<MessageAck>> {
        tracing::debug!("sending message to the engine: {message:?}");

        self.request(message.into())
    }

    fn next_id(&self) -> String {
        let id = (0..12)
            .map(|_| fastrand::alphanumeric())
            .collect::<String>();

        format!("{}.{id}", self.shared.options.name)
    }

    /// Register a hook invoked once, after the main loop wound down.
    pub fn on_stop(&self, hook: impl FnOnce() + Send + 'static) {
        *self.shared.on_stop.lock().unwrap() = Some(Box::new(hook));
    }

    /// Initiate shutdown: the main loop stops accepting input, drains
    /// queued output and joins its workers. Idempotent, not cancelable.
    pub fn stop(&self) {
        if !self.shared.stopping.send_replace(true) {
            tracing::info!("stopping module");
        }
    }

    /// Run the main loop over the provided transport until the engine
    /// closes the stream, a fatal I/O error occurs, `SIGINT`/`SIGTERM`
    /// is received or [`Engine::stop`] is called.
    ///
    /// Startup traffic buffered before this point is put on the wire,
    /// in order, before anything else is processed.
    pub async fn run<I, O>(&self, input: I, output: O) -> Result<()>
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        tracing::debug!("dumping the startup queue into the output queue");
        {
            let mut outbound = self.shared.outbound.lock().unwrap();

            let Outbound::Gathering { early, startup } = &mut *outbound else {
                return Err(Error::AlreadyRunning);
            };

            for line in early.drain(..).chain(startup.drain(..)) {
                let _ = output_tx.send(Some(line));
            }

            *outbound = Outbound::Running(output_tx.clone());
        }

        tracing::debug!("starting module workers");

        let stopper = tokio::spawn({
            let mut stopping = self.shared.stopping.subscribe();
            let (input_tx, output_tx) = (input_tx.clone(), output_tx.clone());

            async move {
                let _ = stopping.wait_for(|stopping| *stopping).await;

                // sentinels order after everything already queued
                let _ = input_tx.send(None);
                let _ = output_tx.send(None);
            }
        });

        let signals = tokio::spawn(signals(self.clone(), self.shared.stopping.subscribe()));

        let reader = tokio::spawn(read_loop(
            self.clone(),
            input,
            input_tx,
            self.shared.stopping.subscribe(),
        ));
        let writer = tokio::spawn(write_loop(self.clone(), output, output_rx));
        let dispatcher = tokio::spawn(dispatch_loop(self.clone(), input_rx));

        let (reader, writer, dispatcher) = tokio::join!(reader, writer, dispatcher);

        // fail anything still waiting for an answer
        self.shared.correlator.clear();

        let _ = tokio::join!(stopper, signals);

        if let Some(hook) = self.shared.on_stop.lock().unwrap().take() {
            tracing::debug!("invoking stop hook");
            hook();
        }

        tracing::debug!("processed all commands, exiting");

        reader??;
        writer??;
        dispatcher?;

        Ok(())
    }
}

/// Wait for an interrupt or termination request and initiate shutdown.
#[cfg(unix)]
async fn signals(engine: Engine, mut stopping: watch::Receiver<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
        _ => {
            tracing::warn!("unable to install the signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => engine.stop(),
        _ = terminate.recv() => engine.stop(),
        _ = stopping.wait_for(|stopping| *stopping) => (),
    }
}

/// Wait for an interrupt or break event and initiate shutdown.
#[cfg(windows)]
async fn signals(engine: Engine, mut stopping: watch::Receiver<bool>) {
    use tokio::signal::windows::{ctrl_break, ctrl_c};

    let (mut interrupt, mut brk) = match (ctrl_c(), ctrl_break()) {
        (Ok(interrupt), Ok(brk)) => (interrupt, brk),
        _ => {
            tracing::warn!("unable to install the signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => engine.stop(),
        _ = brk.recv() => engine.stop(),
        _ = stopping.wait_for(|stopping| *stopping) => (),
    }
}

#[cfg(not(any(unix, windows)))]
async fn signals(engine: Engine, mut stopping: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => engine.stop(),
        _ = stopping.wait_for(|stopping| *stopping) => (),
    }
}

/// Reader worker: lines from the transport into the input queue.
///
/// Exhaustion of the stream or an I/O error both wind the module down.
async fn read_loop<I>(
    engine: Engine,
    input: I,
    queue: mpsc::UnboundedSender<Option<String>>,
    mut stopping: watch::Receiver<bool>,
) -> Result<()>
where
    I: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::with_capacity(READ_BUFFER, input).lines();

    let result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    tracing::trace!("received {} bytes: {line:?}", line.len());

                    if queue.send(Some(line)).is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => {
                    tracing::debug!("received end of stream, stopping input");
                    break Ok(());
                }
                Err(err) => {
                    tracing::error!("stopping input: {err}");
                    break Err(err.into());
                }
            },
            _ = stopping.wait_for(|stopping| *stopping) => break Ok(()),
        }
    };

    engine.stop();

    result
}

/// Writer worker: lines from the output queue onto the transport,
/// newline-terminated and flushed, until the shutdown sentinel.
async fn write_loop<O>(
    engine: Engine,
    mut output: O,
    mut queue: mpsc::UnboundedReceiver<Option<String>>,
) -> Result<()>
where
    O: AsyncWrite + Send + Unpin + 'static,
{
    let result = loop {
        match queue.recv().await {
            None | Some(None) => break Ok(()),
            Some(Some(line)) => {
                tracing::trace!("sending {} bytes: {line:?}", line.len() + 1);

                let written = async {
                    output.write_all(line.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await
                };

                if let Err(err) = written.await {
                    tracing::error!("stopping output: {err}");
                    break Err(err.into());
                }
            }
        }
    };

    engine.stop();

    result
}

/// Dispatcher worker: parse queued lines and route them, then wait for
/// any in-flight handler workers before exiting.
async fn dispatch_loop(engine: Engine, mut queue: mpsc::UnboundedReceiver<Option<String>>) {
    let mut workers = JoinSet::new();

    loop {
        match queue.recv().await {
            None | Some(None) => break,
            Some(Some(line)) => {
                match wire::from_str(&line) {
                    Ok(command) => dispatch::route(&engine, command, &mut workers).await,

                    // a malformed line does not bring the module down
                    Err(err) => tracing::error!("dropped line {line:?}: {err}"),
                }

                // reap workers that already finished
                while workers.try_join_next().is_some() {}
            }
        }
    }

    tracing::debug!("waiting for {} in-flight workers", workers.len());
    while workers.join_next().await.is_some() {}
}
