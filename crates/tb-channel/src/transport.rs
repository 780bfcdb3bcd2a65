//! Connection establishment for the two supported channel types.
//!
//! `Tcp` addresses are `host:port`. `NamedPipe` addresses are local socket
//! paths (Unix domain sockets on Unix platforms).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tb_core::EndpointId;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ChannelError, Result};
use crate::host::ChannelHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChannelType {
    NamedPipe,
    #[default]
    Tcp,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamedPipe => write!(f, "NamedPipe"),
            Self::Tcp => write!(f, "Tcp"),
        }
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "namedpipe" | "named-pipe" | "pipe" => Ok(Self::NamedPipe),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

/// An accept loop feeding connections into a host. Stops when dropped.
pub struct Listener {
    local_address: String,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind `address` and attach every accepted connection to `host`.
    /// A TCP port of `0` binds an ephemeral port; see [`Listener::local_address`].
    pub async fn bind(host: Arc<ChannelHost>, channel_type: ChannelType, address: &str) -> Result<Self> {
        match channel_type {
            ChannelType::Tcp => {
                let listener = TcpListener::bind(address).await?;
                let local_address = listener.local_addr()?.to_string();
                info!(address = %local_address, "listening (tcp)");
                let task = tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, remote)) => {
                                let _ = stream.set_nodelay(true);
                                spawn_attach(&host, stream, remote.to_string());
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                });
                Ok(Self {
                    local_address,
                    task,
                })
            }
            ChannelType::NamedPipe => bind_local(host, address).await,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn spawn_attach<S>(host: &Arc<ChannelHost>, stream: S, remote: String)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let host = Arc::clone(host);
    tokio::spawn(async move {
        if let Err(e) = host.attach(stream).await {
            warn!(remote = %remote, error = %e, "incoming connection rejected");
        }
    });
}

#[cfg(unix)]
async fn bind_local(host: Arc<ChannelHost>, address: &str) -> Result<Listener> {
    use tokio::net::UnixListener;

    // A stale socket file from a previous run blocks the bind.
    if std::path::Path::new(address).exists() {
        std::fs::remove_file(address)?;
    }
    let listener = UnixListener::bind(address)?;
    let local_address = address.to_string();
    info!(address = %local_address, "listening (local socket)");
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => spawn_attach(&host, stream, "local".to_string()),
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    });
    Ok(Listener {
        local_address,
        task,
    })
}

#[cfg(not(unix))]
async fn bind_local(_host: Arc<ChannelHost>, _address: &str) -> Result<Listener> {
    Err(ChannelError::Unsupported(ChannelType::NamedPipe))
}

/// Dial `address` and attach the connection to `host`. Returns the identity
/// the remote side announced.
pub async fn connect(host: &Arc<ChannelHost>, channel_type: ChannelType, address: &str) -> Result<EndpointId> {
    match channel_type {
        ChannelType::Tcp => {
            let stream = TcpStream::connect(address).await?;
            let _ = stream.set_nodelay(true);
            host.attach(stream).await
        }
        ChannelType::NamedPipe => connect_local(host, address).await,
    }
}

#[cfg(unix)]
async fn connect_local(host: &Arc<ChannelHost>, address: &str) -> Result<EndpointId> {
    let stream = tokio::net::UnixStream::connect(address).await?;
    host.attach(stream).await
}

#[cfg(not(unix))]
async fn connect_local(_host: &Arc<ChannelHost>, _address: &str) -> Result<EndpointId> {
    Err(ChannelError::Unsupported(ChannelType::NamedPipe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_parses_case_insensitively() {
        assert_eq!("tcp".parse::<ChannelType>().unwrap(), ChannelType::Tcp);
        assert_eq!("NamedPipe".parse::<ChannelType>().unwrap(), ChannelType::NamedPipe);
        assert_eq!("namedpipe".parse::<ChannelType>().unwrap(), ChannelType::NamedPipe);
        assert!("udp".parse::<ChannelType>().is_err());
        assert_eq!(ChannelType::NamedPipe.to_string(), "NamedPipe");
    }

    #[tokio::test]
    async fn tcp_connect_exchanges_identities() {
        let server = ChannelHost::new(EndpointId::new("controller-1"));
        let client = ChannelHost::new(EndpointId::new("worker-1"));
        let listener = Listener::bind(server.clone(), ChannelType::Tcp, "127.0.0.1:0")
            .await
            .unwrap();

        let peer = connect(&client, ChannelType::Tcp, listener.local_address())
            .await
            .unwrap();
        assert_eq!(peer.as_str(), "controller-1");
    }
}
