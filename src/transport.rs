//! Byte-stream transports carrying the external module protocol.
//!
//! The engine consumes any pair of read/write halves; this module
//! provides the two usual ones, the standard streams of a module
//! spawned by the engine and a socket connection to its listener.

use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, lookup_host},
};

/// Boxed reading half of a connected transport.
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writing half of a connected transport.
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// The standard input/output streams, for modules spawned by the engine
/// itself.
pub fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}

/// Location of the engine's external module listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A UNIX socket at this filesystem path.
    #[cfg(unix)]
    Unix(std::path::PathBuf),

    /// A TCP listener at this host and port.
    Tcp(String, u16),
}

impl Endpoint {
    /// Interpret a target the way the engine's configuration does:
    /// anything starting with `.` or `/` is a socket path, everything
    /// else a host requiring a port.
    pub fn parse(host_or_path: &str, port: Option<u16>) -> io::Result<Self> {
        if host_or_path.starts_with('.') || host_or_path.starts_with('/') {
            #[cfg(unix)]
            return Ok(Self::Unix(host_or_path.into()));

            #[cfg(not(unix))]
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "socket paths are only supported on unix",
            ));
        }

        match port {
            Some(port) => Ok(Self::Tcp(host_or_path.into(), port)),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a port number must be specified for tcp hosts",
            )),
        }
    }

    /// Connect to the engine, handing back the transport halves.
    ///
    /// Hosts are resolved and every returned address is tried in turn,
    /// the first successful connection wins.
    pub async fn connect(&self) -> io::Result<(Reader, Writer)> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                let (reader, writer) = stream.into_split();

                Ok((Box::new(reader), Box::new(writer)))
            }

            Self::Tcp(host, port) => {
                let (reader, writer) = tcp_connect(host, *port).await?.into_split();

                Ok((Box::new(reader), Box::new(writer)))
            }
        }
    }
}

/// Resolve `host` and try every returned address in turn,
/// the first successful connection wins.
pub(crate) async fn tcp_connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last = None;

    for address in lookup_host((host, port)).await? {
        match TcpStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                tracing::debug!("unable to connect to {address}: {err}");
                last = Some(err);
            }
        }
    }

    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_classifies_endpoints() {
        assert_eq!(
            Endpoint::parse("localhost", Some(5039)).unwrap(),
            Endpoint::Tcp("localhost".into(), 5039)
        );

        assert!(Endpoint::parse("localhost", None).is_err());

        #[cfg(unix)]
        {
            assert_eq!(
                Endpoint::parse("/run/yate/extmodule.sock", None).unwrap(),
                Endpoint::Unix("/run/yate/extmodule.sock".into())
            );
            assert_eq!(
                Endpoint::parse("./extmodule.sock", Some(5039)).unwrap(),
                Endpoint::Unix("./extmodule.sock".into())
            );
        }
    }

    #[tokio::test]
    async fn it_connects_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let endpoint = Endpoint::parse("127.0.0.1", Some(port)).unwrap();
        let (connected, accepted) = tokio::join!(endpoint.connect(), listener.accept());

        connected.unwrap();
        accepted.unwrap();
    }
}
