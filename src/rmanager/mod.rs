//! A client for the engine's remote manager control channel.
//!
//! The rmanager module listens on a TCP port (5038 by default) and
//! speaks a telnet flavor: CRLF-delimited lines, occasional option
//! negotiation (which this client always refuses) and, for commands
//! with a long answer, a body bracketed by `%%+` and `%%-` marker
//! lines.

use std::fmt;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use crate::transport;

mod error;
pub use error::{Error, Result};

mod status;
pub use status::{Detail, ModuleStatus, Uptime};

mod telnet;
use telnet::Negotiator;

#[cfg(test)]
mod tests;

/// Size of a single read off the control channel.
const READ_CHUNK: usize = 8192;

/// Privilege level granted by the engine on this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    /// Observation commands only.
    User,
    /// Full control of the engine.
    Admin,
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Admin => "admin",
        })
    }
}

/// The framed answer to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A single-line answer.
    Line(String),
    /// The lines between the `%%+` and `%%-` markers of a long answer.
    Batch(Vec<String>),
}

/// A session on the engine's remote manager control channel.
///
/// Dropping the session closes the underlying stream; [`RManager::close`]
/// additionally says goodbye with a `quit` first.
pub struct RManager<S = TcpStream> {
    stream: S,
    buffer: Vec<u8>,
    telnet: Negotiator,
    auth: Option<AuthLevel>,
    header: String,
}

impl RManager<TcpStream> {
    /// Connect to the control channel at `host:port` and perform the
    /// handshake, authenticating when a `password` is supplied.
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let stream = transport::tcp_connect(host, port).await?;

        Self::handshake(stream, password).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RManager<S> {
    /// Perform the handshake over an already established stream:
    /// read the greeting, probe the granted privileges by turning
    /// output and debug relaying off, authenticate when a `password`
    /// is supplied and disable answer coloring.
    pub async fn handshake(stream: S, password: Option<&str>) -> Result<Self> {
        let mut session = Self {
            stream,
            buffer: Vec::new(),
            telnet: Negotiator::default(),
            auth: None,
            header: String::new(),
        };

        session.header = session.read_line().await?;
        tracing::debug!("connected to: {}", session.header);

        session.write_line("output off").await?;
        loop {
            match session.read_line().await?.as_str() {
                "Output mode: off" => {
                    session.auth = Some(AuthLevel::User);
                    break;
                }
                "Not authenticated!" => break,
                _ => (),
            }
        }

        if session.auth.is_none() && password.is_none() {
            return Err(Error::Auth("server requires authentication".into()));
        }

        session.write_line("debug off").await?;
        loop {
            let line = session.read_line().await?;

            if line.starts_with("Debug level: ") {
                session.auth = Some(AuthLevel::Admin);
                break;
            } else if line == "Not authenticated!" {
                break;
            }
        }

        if let Some(password) = password {
            session.auth(password).await?;
        }

        session.color(false).await?;

        Ok(session)
    }

    /// The greeting line the engine opened the session with.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// The privilege level granted so far, if any.
    pub fn auth_level(&self) -> Option<AuthLevel> {
        self.auth
    }

    /// Read one CRLF-terminated line, answering and stripping any
    /// telnet negotiation encountered on the way.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(end) = self.buffer.windows(2).position(|bytes| bytes == b"\r\n") {
                let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                self.buffer.drain(..end + 2);

                tracing::trace!("received line: {line:?}");
                return Ok(line);
            }

            let mut chunk = [0; READ_CHUNK];
            let received = self.stream.read(&mut chunk).await?;
            if received == 0 {
                return Err(Error::Eof);
            }

            let scan = self.telnet.feed(&chunk[..received]);
            if !scan.replies.is_empty() {
                for reply in &scan.replies {
                    self.stream.write_all(reply).await?;
                }
                self.stream.flush().await?;
            }

            self.buffer.extend_from_slice(&scan.data);
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        tracing::trace!("sending line: {line:?}");

        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await.map_err(Into::into)
    }

    /// Send one command and frame its answer.
    pub async fn send(&mut self, command: &str) -> Result<Response> {
        self.write_line(command).await?;

        let line = self.read_line().await?;

        if line.starts_with("Cannot understand: ") {
            return Err(Error::Syntax(line));
        } else if line == "Not authenticated!" {
            return Err(Error::Permission(line));
        } else if line.starts_with("%%+") {
            let mut body = Vec::new();

            loop {
                let line = self.read_line().await?;

                if line.starts_with("%%-") {
                    return Ok(Response::Batch(body));
                }

                body.push(line);
            }
        }

        Ok(Response::Line(line))
    }

    /// Send one command, expecting a single-line answer.
    async fn send_single(&mut self, command: &str) -> Result<String> {
        match self.send(command).await? {
            Response::Line(line) => Ok(line),
            Response::Batch(lines) => Err(Error::Unexpected(format!(
                "multi-line answer to `{command}`: {lines:?}"
            ))),
        }
    }

    /// Authenticate with the engine, upgrading the privilege level.
    pub async fn auth(&mut self, password: &str) -> Result<AuthLevel> {
        let level = match self.send_single(&format!("auth {password}")).await?.as_str() {
            "Authenticated successfully as admin!"
            | "You are already authenticated as admin!" => AuthLevel::Admin,

            "Authenticated successfully as user!" | "You are already authenticated as user!" => {
                AuthLevel::User
            }

            other => return Err(Error::Auth(other.into())),
        };

        tracing::debug!("authenticated as {level}");
        self.auth = Some(level);

        Ok(level)
    }

    /// Toggle ANSI coloring of the engine's answers.
    pub async fn color(&mut self, enable: bool) -> Result<()> {
        self.send(&format!("color {}", onoff(enable))).await?;

        Ok(())
    }

    /// Toggle relaying of the engine's log output on this session.
    pub async fn output_mode(&mut self, enable: bool) -> Result<String> {
        self.send_single(&format!("output {}", onoff(enable))).await
    }

    /// Toggle relaying of debugging messages on this session.
    pub async fn debug_mode(&mut self, enable: bool) -> Result<String> {
        self.send_single(&format!("debug {}", onoff(enable))).await
    }

    /// Query the status of every module, or of `module` alone; with
    /// `details` off only the overview groups are reported.
    pub async fn status(
        &mut self,
        module: Option<&str>,
        details: bool,
    ) -> Result<Vec<ModuleStatus>> {
        let mut command = String::from("status");
        if !details {
            command.push_str(" overview");
        }
        if let Some(module) = module {
            command.push(' ');
            command.push_str(module);
        }

        match self.send(&command).await? {
            Response::Batch(lines) => {
                Ok(lines.iter().map(|line| status::module_status(line)).collect())
            }
            Response::Line(line) => Err(Error::Unexpected(line)),
        }
    }

    /// Query how long the engine has been up, and its CPU usage.
    pub async fn uptime(&mut self) -> Result<Uptime> {
        let line = self.send_single("uptime").await?;

        status::uptime(&line).ok_or(Error::Unexpected(line))
    }

    /// Establish a new call from `channel` to `target`.
    pub async fn call(&mut self, channel: &str, target: &str) -> Result<String> {
        self.send_single(&format!("call {channel} {target}")).await
    }

    /// Drop (terminate) a call channel, with an optional `reason`.
    pub async fn drop_channel(&mut self, channel: &str, reason: Option<&str>) -> Result<String> {
        match reason {
            Some(reason) => self.send_single(&format!("drop {channel} {reason}")).await,
            None => self.send_single(&format!("drop {channel}")).await,
        }
    }

    /// Reload the engine configuration, or a single `plugin`'s.
    pub async fn reload(&mut self, plugin: Option<&str>) -> Result<String> {
        match plugin {
            Some(plugin) => self.send_single(&format!("reload {plugin}")).await,
            None => self.send_single("reload").await,
        }
    }

    /// Restart the engine, forcefully so when `now` is set.
    pub async fn restart(&mut self, now: bool) -> Result<String> {
        if now {
            self.send_single("restart now").await
        } else {
            self.send_single("restart").await
        }
    }

    /// Stop the engine, with an optional exit code.
    pub async fn stop(&mut self, exitcode: Option<u32>) -> Result<String> {
        match exitcode {
            Some(exitcode) => self.send_single(&format!("stop {exitcode}")).await,
            None => self.send_single("stop").await,
        }
    }

    /// Apply a control operation on a channel, with its parameters.
    pub async fn control<'kv>(
        &mut self,
        channel: &str,
        operation: &str,
        parameters: impl IntoIterator<Item = (&'kv str, &'kv str)>,
    ) -> Result<String> {
        let mut command = format!("control {channel} {operation}");
        for (key, value) in parameters {
            command.push(' ');
            command.push_str(key);
            command.push('=');
            command.push_str(value);
        }

        self.send_single(&command).await
    }

    /// Say goodbye and tear the session down.
    ///
    /// The stream is closed either way; an engine slamming the
    /// connection shut on `quit` is not an error.
    pub async fn close(mut self) -> Result<()> {
        match self.send("quit").await {
            Ok(Response::Line(line)) if line == "Goodbye!" => Ok(()),
            Ok(answer) => {
                tracing::error!("unexpected answer to quit: {answer:?}");
                Ok(())
            }
            Err(Error::Eof) | Err(Error::Io(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn onoff(enable: bool) -> &'static str {
    if enable { "on" } else { "off" }
}
