//! Request/reply correlation over one connection.
//!
//! A [`Speaker`] owns both halves of a stream. After the header exchange a
//! single reader task decodes every incoming envelope: replies complete the
//! matching pending request, everything else goes to the [`Inbound`]
//! channel. Any number of tasks may send concurrently; each frame is
//! written whole under the write lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use codervpn_core::ScopedLock;
use codervpn_protocol::{
    Envelope, FrameReader, FrameWriter, Header, Payload, Role, Rpc, RpcVersion, encode_message,
};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SpeakerConfig;
use crate::error::{SpeakerError, SpeakerResult};
use crate::handshake;

type BoxRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a [`Speaker`].
#[derive(Debug, Clone)]
pub enum SpeakerState {
    /// Created, handshake not started.
    Created,
    /// Exchanging headers.
    Handshaking,
    /// Handshake done, messages flowing.
    Running,
    /// Disposed locally.
    Closed,
    /// The connection failed.
    Faulted(Arc<SpeakerError>),
}

impl SpeakerState {
    /// Returns true for `Closed` and `Faulted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpeakerState::Closed | SpeakerState::Faulted(_))
    }

    /// Returns true while messages can be sent.
    pub fn is_running(&self) -> bool {
        matches!(self, SpeakerState::Running)
    }
}

impl fmt::Display for SpeakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerState::Created => f.write_str("created"),
            SpeakerState::Handshaking => f.write_str("handshaking"),
            SpeakerState::Running => f.write_str("running"),
            SpeakerState::Closed => f.write_str("closed"),
            SpeakerState::Faulted(err) => write!(f, "faulted: {err}"),
        }
    }
}

type ReplySender<P> = oneshot::Sender<SpeakerResult<P>>;

struct PendingTable<P> {
    entries: HashMap<u64, ReplySender<P>>,
    // Set once the connection is gone; later registrations fail with it.
    closed: Option<Arc<SpeakerError>>,
}

struct Shared<M: Payload> {
    next_id: AtomicU64,
    pending: Mutex<PendingTable<M::Peer>>,
    writer: ScopedLock<FrameWriter<BoxWrite>>,
    state: watch::Sender<SpeakerState>,
    cancel: CancellationToken,
    negotiated: OnceLock<RpcVersion>,
}

impl<M: Payload> Shared<M> {
    fn pending(&self) -> MutexGuard<'_, PendingTable<M::Peer>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Error returned to callers that arrive when the speaker cannot send.
    fn unavailable(&self) -> SpeakerError {
        match &*self.state.borrow() {
            SpeakerState::Created | SpeakerState::Handshaking => SpeakerError::NotRunning,
            SpeakerState::Running => match &self.pending().closed {
                Some(err) => SpeakerError::replay(err),
                None => SpeakerError::NotRunning,
            },
            SpeakerState::Closed => SpeakerError::Disposed,
            SpeakerState::Faulted(err) => SpeakerError::Faulted(Arc::clone(err)),
        }
    }

    fn ensure_running(&self) -> SpeakerResult<()> {
        if self.state.borrow().is_running() {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    /// Moves to `Faulted` unless already terminal. Only the first fault is
    /// logged and recorded.
    fn fault(&self, cause: SpeakerError) -> SpeakerError {
        let cause = Arc::new(cause);
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = SpeakerState::Faulted(Arc::clone(&cause));
            true
        });
        if !changed {
            return self.unavailable();
        }

        match cause.as_ref() {
            SpeakerError::ConnectionClosed => info!(role = %M::ROLE, "peer closed the connection"),
            err => error!(role = %M::ROLE, error = %err, "connection faulted"),
        }
        self.cancel.cancel();
        self.fail_pending(Arc::clone(&cause));
        SpeakerError::Faulted(cause)
    }

    /// Moves to `Closed` unless already terminal.
    fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = SpeakerState::Closed;
            true
        });
        self.cancel.cancel();
        if changed {
            debug!(role = %M::ROLE, "speaker disposed");
            self.fail_pending(Arc::new(SpeakerError::Disposed));
        }
    }

    fn fail_pending(&self, cause: Arc<SpeakerError>) {
        let drained: Vec<_> = {
            let mut table = self.pending();
            table.closed.get_or_insert_with(|| Arc::clone(&cause));
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests");
        }
        for (_, reply) in drained {
            let _ = reply.send(Err(SpeakerError::replay(&cause)));
        }
    }

    fn register(&self) -> SpeakerResult<(u64, oneshot::Receiver<SpeakerResult<M::Peer>>)> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.pending();
        if let Some(err) = &table.closed {
            return Err(SpeakerError::replay(err));
        }
        let id = self.next_id();
        table.entries.insert(id, tx);
        Ok((id, rx))
    }

    fn complete(&self, request_id: u64, msg: M::Peer) {
        let entry = self.pending().entries.remove(&request_id);
        match entry {
            Some(reply) => {
                let _ = reply.send(Ok(msg));
            }
            None => debug!(
                response_to = request_id,
                "dropping reply with no pending request"
            ),
        }
    }

    /// Encodes `envelope` and writes it as one frame.
    ///
    /// The write runs in its own task so a caller dropping its future
    /// never leaves half a frame on the wire.
    async fn write(self: &Arc<Self>, envelope: Envelope<M>) -> SpeakerResult<()> {
        self.ensure_running()?;
        let frame = encode_message(&envelope)?;

        let shared = Arc::clone(self);
        let task = tokio::spawn(async move { shared.write_frame(frame).await });
        match task.await {
            Ok(result) => result,
            Err(err) => Err(SpeakerError::Io(std::io::Error::other(err))),
        }
    }

    async fn write_frame(&self, frame: Vec<u8>) -> SpeakerResult<()> {
        let mut writer = self
            .writer
            .lock_or_cancelled(&self.cancel)
            .await
            .map_err(|_| self.unavailable())?;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.unavailable()),
            result = writer.write_frame(&frame) => result,
        };
        drop(writer);

        result.map_err(|err| self.fault(err.into()))
    }
}

/// Removes a pending entry when the waiting request goes away.
struct PendingGuard<'a, M: Payload> {
    shared: &'a Shared<M>,
    id: u64,
}

impl<M: Payload> Drop for PendingGuard<'_, M> {
    fn drop(&mut self) {
        self.shared.pending().entries.remove(&self.id);
    }
}

/// One end of a connection speaking payload `M` and receiving `M::Peer`.
///
/// ```ignore
/// let speaker = Speaker::<ClientMessage>::new(stream, SpeakerConfig::default());
/// let mut inbound = speaker.start().await?;
/// let reply = speaker.send_request(ClientMessage::Status(StatusRequest {})).await?;
/// ```
pub struct Speaker<M: Payload> {
    shared: Arc<Shared<M>>,
    reader: Mutex<Option<BoxRead>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    config: SpeakerConfig,
}

impl<M: Payload> Speaker<M> {
    /// Wraps `stream`. Nothing is read or written until [`start`](Self::start).
    pub fn new<S>(stream: S, config: SpeakerConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (state, _) = watch::channel(SpeakerState::Created);

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable {
                entries: HashMap::new(),
                closed: None,
            }),
            writer: ScopedLock::new(FrameWriter::new(Box::new(write_half) as BoxWrite)),
            state,
            cancel: CancellationToken::new(),
            negotiated: OnceLock::new(),
        });

        Self {
            shared,
            reader: Mutex::new(Some(Box::new(read_half) as BoxRead)),
            reader_task: Mutex::new(None),
            config,
        }
    }

    /// Role this side announces.
    pub fn role(&self) -> Role {
        M::ROLE
    }

    /// Current state.
    pub fn state(&self) -> SpeakerState {
        self.shared.state.borrow().clone()
    }

    /// Version agreed during the handshake.
    pub fn negotiated_version(&self) -> Option<RpcVersion> {
        self.shared.negotiated.get().copied()
    }

    /// Performs the handshake and starts the reader task.
    ///
    /// On failure the speaker is faulted and the error is returned wrapped
    /// in [`SpeakerError::Faulted`]; [`SpeakerError::root`] gives the cause.
    pub async fn start(&self) -> SpeakerResult<Inbound<M>> {
        let mut refused = None;
        self.shared.state.send_if_modified(|state| match state {
            SpeakerState::Created => {
                *state = SpeakerState::Handshaking;
                true
            }
            SpeakerState::Closed => {
                refused = Some(SpeakerError::Disposed);
                false
            }
            _ => {
                refused = Some(SpeakerError::AlreadyStarted);
                false
            }
        });
        if let Some(err) = refused {
            return Err(err);
        }

        let read_half = lock(&self.reader).take().ok_or(SpeakerError::AlreadyStarted)?;
        let mut reader = BufReader::new(read_half);
        let local = Header::new(M::ROLE, self.config.versions.clone());

        let negotiation = async {
            let mut writer = self
                .shared
                .writer
                .lock_or_cancelled(&self.shared.cancel)
                .await
                .map_err(|_| SpeakerError::Disposed)?;
            let remote = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Err(SpeakerError::Disposed),
                result = handshake::exchange(
                    &mut reader,
                    writer.get_mut(),
                    &local,
                    self.config.handshake_timeout,
                ) => result?,
            };
            handshake::negotiate(&local, &remote, <M::Peer as Payload>::ROLE)
        };

        let version = match negotiation.await {
            Ok(version) => version,
            Err(SpeakerError::Disposed) => return Err(SpeakerError::Disposed),
            Err(err) => return Err(self.shared.fault(err)),
        };

        let _ = self.shared.negotiated.set(version);
        let running = self.shared.state.send_if_modified(|state| {
            if matches!(state, SpeakerState::Handshaking) {
                *state = SpeakerState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            return Err(self.shared.unavailable());
        }
        info!(role = %M::ROLE, version = %version, "handshake complete");

        let (tx, rx) = mpsc::channel(self.config.inbound_capacity);
        let task = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            FrameReader::new(reader),
            tx,
        ));
        *lock(&self.reader_task) = Some(task);

        Ok(Inbound { rx })
    }

    /// Sends a message that expects no reply.
    pub async fn send(&self, msg: M) -> SpeakerResult<()> {
        let envelope = Envelope::new(Rpc::new(self.shared.next_id()), msg);
        self.shared.write(envelope).await
    }

    /// Sends a request and waits for its reply.
    ///
    /// Dropping the returned future forgets the request; a reply that
    /// arrives afterwards is discarded.
    pub async fn send_request(&self, msg: M) -> SpeakerResult<M::Peer> {
        self.shared.ensure_running()?;
        let (id, reply) = self.shared.register()?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        self.shared.write(Envelope::request(id, msg)).await?;
        match reply.await {
            Ok(result) => result,
            Err(_) => Err(self.shared.unavailable()),
        }
    }

    /// Like [`send_request`](Self::send_request), giving up with
    /// [`SpeakerError::Cancelled`] when `token` fires.
    pub async fn send_request_with_cancel(
        &self,
        msg: M,
        token: &CancellationToken,
    ) -> SpeakerResult<M::Peer> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SpeakerError::Cancelled),
            result = self.send_request(msg) => result,
        }
    }

    /// Waits for the terminal state. Returns the fault, if there was one.
    pub async fn closed(&self) -> Option<Arc<SpeakerError>> {
        let mut rx = self.shared.state.subscribe();
        let state = rx.wait_for(SpeakerState::is_terminal).await.ok()?;
        match &*state {
            SpeakerState::Faulted(err) => Some(Arc::clone(err)),
            _ => None,
        }
    }

    /// Stops the speaker. Pending requests fail with
    /// [`SpeakerError::Disposed`]. Safe to call more than once.
    pub async fn dispose(&self) {
        self.shared.close();

        let task = lock(&self.reader_task).take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "reader task did not finish cleanly");
        }

        let mut writer = self.shared.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "write half already closed");
        }
    }
}

impl<M: Payload> Drop for Speaker<M> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<M: Payload> fmt::Debug for Speaker<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Speaker")
            .field("role", &M::ROLE)
            .field("state", &*self.shared.state.borrow())
            .field("version", &self.negotiated_version())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop<M: Payload>(
    shared: Arc<Shared<M>>,
    mut reader: FrameReader<BufReader<BoxRead>>,
    inbound: mpsc::Sender<InboundMessage<M>>,
) {
    let mut inbound = Some(inbound);
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = reader.read_message::<Envelope<M::Peer>>() => next,
        };

        let envelope = match next {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                shared.fault(SpeakerError::ConnectionClosed);
                break;
            }
            Err(err) => {
                shared.fault(err.into());
                break;
            }
        };

        if let Some(request_id) = envelope.rpc.response_to {
            shared.complete(request_id, envelope.msg);
            continue;
        }

        let Some(tx) = inbound.as_ref() else {
            debug!(msg_id = envelope.rpc.msg_id, "no inbound consumer, discarding message");
            continue;
        };
        let message = InboundMessage {
            rpc: envelope.rpc,
            msg: envelope.msg,
            shared: Arc::clone(&shared),
        };
        let sent = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            sent = tx.send(message) => sent,
        };
        if sent.is_err() {
            debug!("inbound receiver dropped, discarding further messages");
            inbound = None;
        }
    }
    debug!(role = %M::ROLE, "reader stopped");
}

/// Messages from the peer that are not replies.
pub struct Inbound<M: Payload> {
    rx: mpsc::Receiver<InboundMessage<M>>,
}

impl<M: Payload> Inbound<M> {
    /// Waits for the next message. Returns `None` once the connection ends.
    pub async fn recv(&mut self) -> Option<InboundMessage<M>> {
        self.rx.recv().await
    }
}

impl<M: Payload> fmt::Debug for Inbound<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound").finish_non_exhaustive()
    }
}

/// A message from the peer, with a way to answer it.
pub struct InboundMessage<M: Payload> {
    rpc: Rpc,
    msg: M::Peer,
    shared: Arc<Shared<M>>,
}

impl<M: Payload> InboundMessage<M> {
    /// Identifier the peer gave this message.
    pub fn msg_id(&self) -> u64 {
        self.rpc.msg_id
    }

    /// The payload.
    pub fn message(&self) -> &M::Peer {
        &self.msg
    }

    /// Takes the payload, giving up the ability to reply.
    pub fn into_message(self) -> M::Peer {
        self.msg
    }

    /// Sends `msg` as the reply to this message.
    pub async fn reply(&self, msg: M) -> SpeakerResult<()> {
        let envelope = Envelope::response(self.shared.next_id(), self.rpc.msg_id, msg);
        self.shared.write(envelope).await
    }
}

impl<M: Payload> fmt::Debug for InboundMessage<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("rpc", &self.rpc)
            .field("msg", &self.msg)
            .finish()
    }
}
