//! The per-process channel endpoint.
//!
//! A [`ChannelHost`] owns every connection of its process. Each connection
//! runs a reader task and a writer task; all frames to one peer go through
//! that peer's single outbound queue, so they reach the wire in the order
//! they were queued. Incoming requests are served on their own tasks, which
//! keeps a slow command from blocking notifications or a `Terminate`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tb_core::EndpointId;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::broker::UploadBroker;
use crate::codec::{read_frame, write_frame};
use crate::error::{ChannelError, Result};
use crate::protocol::{Capability, Command, Frame, Notification, Reply};
use crate::registry::SignInRegistry;

const PEER_QUEUE_CAPACITY: usize = 256;
const NOTIFICATION_CAPACITY: usize = 1024;
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the commands addressed to this host (everything except
/// `Download`, which the broker answers).
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, caller: &EndpointId, command: Command) -> anyhow::Result<Reply>;
}

#[derive(Debug, Clone)]
pub struct IncomingNotification {
    pub from: EndpointId,
    pub notification: Notification,
}

struct Peer {
    connection: u64,
    outbound: mpsc::Sender<Frame>,
    reader: Option<AbortHandle>,
    writer: JoinHandle<()>,
}

struct PendingCall {
    target: EndpointId,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Removes a pending call when the caller stops waiting for it.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingCall>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

pub struct ChannelHost {
    endpoint: EndpointId,
    peers: DashMap<EndpointId, Peer>,
    pending: DashMap<u64, PendingCall>,
    next_request: AtomicU64,
    next_connection: AtomicU64,
    exposed: Mutex<Vec<Capability>>,
    commands: SignInRegistry,
    notifications: SignInRegistry,
    notify_tx: broadcast::Sender<IncomingNotification>,
    handler: RwLock<Option<Arc<dyn CommandHandler>>>,
    broker: UploadBroker,
}

impl ChannelHost {
    pub fn new(endpoint: EndpointId) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Arc::new(Self {
            endpoint,
            peers: DashMap::new(),
            pending: DashMap::new(),
            next_request: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
            exposed: Mutex::new(Vec::new()),
            commands: SignInRegistry::new(Capability::Commands),
            notifications: SignInRegistry::new(Capability::Notifications),
            notify_tx,
            handler: RwLock::new(None),
            broker: UploadBroker::new(),
        })
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn broker(&self) -> &UploadBroker {
        &self.broker
    }

    pub fn registry(&self, capability: Capability) -> &SignInRegistry {
        match capability {
            Capability::Commands => &self.commands,
            Capability::Notifications => &self.notifications,
        }
    }

    pub fn install_handler(&self, handler: Arc<dyn CommandHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Notifications raised by any connected peer, in arrival order per peer.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<IncomingNotification> {
        self.notify_tx.subscribe()
    }

    pub fn is_connected(&self, endpoint: &EndpointId) -> bool {
        self.peers.contains_key(endpoint)
    }

    pub fn peers(&self) -> Vec<EndpointId> {
        self.peers.iter().map(|p| p.key().clone()).collect()
    }

    /// Announce `capability` to every current and future peer.
    pub async fn sign_in(&self, capability: Capability) {
        {
            let mut exposed = self.exposed.lock().unwrap_or_else(PoisonError::into_inner);
            if !exposed.contains(&capability) {
                exposed.push(capability);
            }
        }
        let targets: Vec<_> = self
            .peers
            .iter()
            .map(|p| (p.key().clone(), p.outbound.clone()))
            .collect();
        for (peer, outbound) in targets {
            if outbound.send(Frame::SignIn { capability }).await.is_err() {
                debug!(peer = %peer, "peer went away before sign-in was sent");
            }
        }
        info!(endpoint = %self.endpoint, capability = %capability, "capability signed in");
    }

    fn exposed_capabilities(&self) -> Vec<Capability> {
        self.exposed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the connection protocol over `stream`: exchange hellos, then serve
    /// frames until either side closes. Returns the peer's identity.
    pub async fn attach<S>(self: &Arc<Self>, stream: S) -> Result<EndpointId>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        write_frame(
            &mut write_half,
            &Frame::Hello {
                endpoint: self.endpoint.clone(),
            },
        )
        .await?;

        let peer = match tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut read_half)).await {
            Ok(Ok(Some(Frame::Hello { endpoint }))) => endpoint,
            Ok(Ok(Some(other))) => {
                return Err(ChannelError::Handshake(format!(
                    "expected hello, got {}",
                    other.name()
                )))
            }
            Ok(Ok(None)) => {
                return Err(ChannelError::Handshake(
                    "connection closed before hello".to_string(),
                ))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ChannelError::Handshake(
                    "timed out waiting for hello".to_string(),
                ))
            }
        };

        let (outbound, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
        for capability in self.exposed_capabilities() {
            // Fresh queue with spare capacity: cannot block.
            let _ = outbound.try_send(Frame::SignIn { capability });
        }

        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let writer = tokio::spawn(write_loop(write_half, rx, peer.clone()));
        if let Some(previous) = self.peers.insert(
            peer.clone(),
            Peer {
                connection,
                outbound: outbound.clone(),
                reader: None,
                writer,
            },
        ) {
            warn!(peer = %peer, "replacing existing connection");
            if let Some(reader) = previous.reader {
                reader.abort();
            }
        }

        let reader = tokio::spawn(Arc::clone(self).read_loop(
            read_half,
            peer.clone(),
            connection,
            outbound,
        ));
        if let Some(mut entry) = self.peers.get_mut(&peer) {
            if entry.connection == connection {
                entry.reader = Some(reader.abort_handle());
            }
        }

        info!(endpoint = %self.endpoint, peer = %peer, "connection established");
        Ok(peer)
    }

    async fn read_loop<R>(
        self: Arc<Self>,
        mut reader: R,
        peer: EndpointId,
        connection: u64,
        outbound: mpsc::Sender<Frame>,
    ) where
        R: AsyncRead + Unpin,
    {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => self.dispatch(&peer, frame, &outbound),
                Ok(None) => {
                    debug!(peer = %peer, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping connection after read error");
                    break;
                }
            }
        }
        self.disconnect(&peer, connection);
    }

    fn dispatch(self: &Arc<Self>, peer: &EndpointId, frame: Frame, outbound: &mpsc::Sender<Frame>) {
        match frame {
            Frame::Hello { endpoint } => {
                warn!(peer = %peer, announced = %endpoint, "ignoring repeated hello");
            }
            Frame::SignIn { capability } => self.registry(capability).sign_in(peer.clone()),
            Frame::Request { id, command } => {
                let host = Arc::clone(self);
                let caller = peer.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let name = command.name();
                    let outcome = host.serve(&caller, command).await;
                    if let Err(e) = &outcome {
                        debug!(caller = %caller, command = name, error = %e, "command failed");
                    }
                    if outbound.send(Frame::Response { id, outcome }).await.is_err() {
                        debug!(caller = %caller, command = name, "caller went away before the response");
                    }
                });
            }
            Frame::Response { id, outcome } => match self.pending.remove(&id) {
                Some((_, call)) => {
                    let _ = call.reply.send(outcome.map_err(ChannelError::Remote));
                }
                None => debug!(peer = %peer, id, "response for a call nobody waits on"),
            },
            Frame::Notification(notification) => {
                let _ = self.notify_tx.send(IncomingNotification {
                    from: peer.clone(),
                    notification,
                });
            }
        }
    }

    async fn serve(&self, caller: &EndpointId, command: Command) -> std::result::Result<Reply, String> {
        if let Command::Download {
            token,
            offset,
            length,
        } = command
        {
            return self
                .broker
                .read_chunk(token, offset, length)
                .await
                .map(|(data, eof)| Reply::Chunk { data, eof })
                .map_err(|e| e.to_string());
        }
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler
                .handle(caller, command)
                .await
                .map_err(|e| format!("{e:#}")),
            None => Err(ChannelError::NoHandler.to_string()),
        }
    }

    fn disconnect(&self, peer: &EndpointId, connection: u64) {
        if self
            .peers
            .remove_if(peer, |_, p| p.connection == connection)
            .is_none()
        {
            return;
        }
        self.commands.sign_out(peer);
        self.notifications.sign_out(peer);
        // Dropping the reply senders fails the waiting callers.
        self.pending.retain(|_, call| call.target != *peer);
        info!(endpoint = %self.endpoint, peer = %peer, "connection closed");
    }

    fn outbound(&self, target: &EndpointId) -> Result<mpsc::Sender<Frame>> {
        self.peers
            .get(target)
            .map(|p| p.outbound.clone())
            .ok_or_else(|| ChannelError::UnknownEndpoint(target.clone()))
    }

    /// Invoke `command` on `target` and wait for its reply.
    pub async fn call(&self, target: &EndpointId, command: Command) -> Result<Reply> {
        let outbound = self.outbound(target)?;
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                target: target.clone(),
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        if !self.peers.contains_key(target) {
            return Err(ChannelError::Disconnected(target.clone()));
        }
        if outbound.send(Frame::Request { id, command }).await.is_err() {
            return Err(ChannelError::Disconnected(target.clone()));
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ChannelError::Disconnected(target.clone())),
        }
    }

    /// Raise `notification` towards `target`.
    pub async fn notify(&self, target: &EndpointId, notification: Notification) -> Result<()> {
        let outbound = self.outbound(target)?;
        outbound
            .send(Frame::Notification(notification))
            .await
            .map_err(|_| ChannelError::Disconnected(target.clone()))
    }

    /// Close the connection to `peer` after flushing what is queued for it.
    pub async fn close(&self, peer: &EndpointId, flush_timeout: Duration) {
        if let Some((_, p)) = self.peers.remove(peer) {
            self.commands.sign_out(peer);
            self.notifications.sign_out(peer);
            self.pending.retain(|_, call| call.target != *peer);
            flush_and_close(peer, p, flush_timeout).await;
        }
    }

    /// Close every connection. Responses still being produced by in-flight
    /// request tasks are written before the writer stops.
    pub async fn shutdown(&self, flush_timeout: Duration) {
        for peer in self.peers() {
            self.close(&peer, flush_timeout).await;
        }
    }
}

async fn flush_and_close(peer: &EndpointId, p: Peer, flush_timeout: Duration) {
    if let Some(reader) = p.reader {
        reader.abort();
    }
    drop(p.outbound);
    let mut writer = p.writer;
    if tokio::time::timeout(flush_timeout, &mut writer).await.is_err() {
        // Request tasks still hold the queue open; cut the connection anyway.
        warn!(peer = %peer, "outbound queue not flushed in time");
        writer.abort();
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Frame>, peer: EndpointId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!(peer = %peer, frame = frame.name(), error = %e, "write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
