//! Service-role host: answers client requests over any [`Listener`].
//!
//! Each accepted connection gets its own `Speaker<ServiceMessage>`. Requests
//! are dispatched to a [`ServiceHandler`] in their own task so a slow start
//! never holds up status queries or pushes. Pushes published by the handler
//! are forwarded to every connected client.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use codervpn_protocol::{
    ClientMessage, DownloadProgress, Lifecycle, PeerUpdate, ServiceMessage, StartProgress,
    StartProgressStage, StartRequest, StartResponse, Status, StopRequest, StopResponse,
};
use codervpn_speaker::{Speaker, SpeakerConfig};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::ServerResult;
use crate::listener::Listener;

/// Capacity of the push channel shared by all connections.
const PUSH_CAPACITY: usize = 64;

/// Business logic behind the service role.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Brings the tunnel up.
    fn start(&self, request: StartRequest) -> impl Future<Output = StartResponse> + Send;

    /// Takes the tunnel down.
    fn stop(&self, request: StopRequest) -> impl Future<Output = StopResponse> + Send;

    /// Reports the current status.
    fn status(&self) -> impl Future<Output = Status> + Send;

    /// Subscribes to pushes sent to every client.
    fn subscribe(&self) -> broadcast::Receiver<ServiceMessage>;
}

/// Maps one client request to the handler and builds the reply.
pub async fn dispatch<H: ServiceHandler>(handler: &H, request: ClientMessage) -> ServiceMessage {
    match request {
        ClientMessage::Start(request) => ServiceMessage::Start(handler.start(request).await),
        ClientMessage::Stop(request) => ServiceMessage::Stop(handler.stop(request).await),
        ClientMessage::Status(_) => ServiceMessage::Status(handler.status().await),
    }
}

/// Runs a [`ServiceHandler`] for every connection of a listener.
pub struct ServiceHost<H> {
    handler: Arc<H>,
    config: SpeakerConfig,
    token: CancellationToken,
}

impl<H: ServiceHandler> ServiceHost<H> {
    /// Creates a host around `handler`.
    pub fn new(handler: H, config: SpeakerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            token: CancellationToken::new(),
        }
    }

    /// Returns the handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Accepts connections until `shutdown` completes, then closes every
    /// open connection.
    pub async fn serve<L, S>(self: Arc<Self>, listener: &L, shutdown: S) -> ServerResult<()>
    where
        L: Listener,
        S: Future<Output = ()> + Send,
    {
        let host = Arc::clone(&self);
        let result = listener
            .run_until_shutdown(
                move |connection| {
                    let host = Arc::clone(&host);
                    async move { host.handle_connection(connection).await }
                },
                shutdown,
            )
            .await;
        self.token.cancel();
        result
    }

    /// Serves a single connection, logging a failed handshake.
    pub async fn handle_connection(&self, connection: Connection) {
        if let Err(err) = self.serve_connection(connection).await {
            warn!(error = %err, "client handshake failed");
        }
    }

    /// Serves a single connection until the client leaves or the host
    /// shuts down.
    ///
    /// Fails with [`ServerError::Speaker`](crate::ServerError::Speaker) if the
    /// handshake does not complete.
    pub async fn serve_connection(&self, connection: Connection) -> ServerResult<()> {
        let speaker = Speaker::<ServiceMessage>::new(connection, self.config.clone());
        let mut inbound = speaker.start().await?;
        let mut pushes = self.handler.subscribe();
        info!("client connected");

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                request = inbound.recv() => {
                    let Some(request) = request else { break };
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        let reply = dispatch(handler.as_ref(), request.message().clone()).await;
                        if let Err(err) = request.reply(reply).await {
                            debug!(error = %err, "could not deliver reply");
                        }
                    });
                }
                push = pushes.recv() => match push {
                    Ok(message) => {
                        if let Err(err) = speaker.send(message).await {
                            debug!(error = %err, "could not deliver push");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client fell behind on pushes");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        speaker.dispose().await;
        info!("client disconnected");
        Ok(())
    }
}

/// In-memory service used to exercise clients without a real tunnel.
///
/// Walks through the start stages with short pauses, publishing progress
/// and every lifecycle change as pushes.
pub struct LoopbackService {
    status: Mutex<Status>,
    pushes: broadcast::Sender<ServiceMessage>,
    step_delay: Duration,
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackService {
    /// Creates a stopped service.
    pub fn new() -> Self {
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            status: Mutex::new(Status::new(Lifecycle::Stopped)),
            pushes,
            step_delay: Duration::from_millis(100),
        }
    }

    /// Sets the pause between start stages.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Moves to `next` if the lifecycle is one of `idle`. Returns the
    /// lifecycle found.
    fn claim(&self, idle: &[Lifecycle], next: Lifecycle) -> Lifecycle {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let current = status.lifecycle;
        if idle.contains(&current) {
            status.lifecycle = next;
        }
        current
    }

    fn transition(&self, lifecycle: Lifecycle, error_message: Option<String>) {
        let status = {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.lifecycle = lifecycle;
            status.error_message = error_message;
            status.peer_update = (lifecycle == Lifecycle::Started).then(PeerUpdate::default);
            status.clone()
        };
        debug!(%lifecycle, "loopback lifecycle changed");
        self.publish(ServiceMessage::Status(status));
    }

    fn publish(&self, message: ServiceMessage) {
        // No subscribers is fine.
        let _ = self.pushes.send(message);
    }

    async fn progress(&self, progress: StartProgress) {
        self.publish(ServiceMessage::StartProgress(progress));
        tokio::time::sleep(self.step_delay).await;
    }
}

impl ServiceHandler for LoopbackService {
    async fn start(&self, request: StartRequest) -> StartResponse {
        if let Err(err) = url::Url::parse(&request.coder_url) {
            return StartResponse::failed(format!("invalid coder_url: {err}"));
        }
        if request.api_token.is_empty() {
            return StartResponse::failed("api_token is empty");
        }
        match self.claim(&[Lifecycle::Unknown, Lifecycle::Stopped], Lifecycle::Starting) {
            Lifecycle::Started => return StartResponse::ok(),
            Lifecycle::Starting | Lifecycle::Stopping => {
                return StartResponse::failed("another operation is in progress");
            }
            Lifecycle::Unknown | Lifecycle::Stopped => {}
        }

        info!(url = %request.coder_url, "loopback start");
        self.transition(Lifecycle::Starting, None);
        self.progress(StartProgress::stage(StartProgressStage::Initializing))
            .await;
        self.progress(StartProgress {
            stage: StartProgressStage::Downloading,
            download: Some(DownloadProgress {
                bytes_written: 0,
                bytes_total: None,
            }),
        })
        .await;
        self.progress(StartProgress::stage(StartProgressStage::Finalizing))
            .await;
        self.transition(Lifecycle::Started, None);
        StartResponse::ok()
    }

    async fn stop(&self, _request: StopRequest) -> StopResponse {
        match self.claim(&[Lifecycle::Started], Lifecycle::Stopping) {
            Lifecycle::Stopped | Lifecycle::Unknown => return StopResponse::ok(),
            Lifecycle::Starting | Lifecycle::Stopping => {
                return StopResponse::failed("another operation is in progress");
            }
            Lifecycle::Started => {}
        }

        info!("loopback stop");
        self.transition(Lifecycle::Stopping, None);
        tokio::time::sleep(self.step_delay).await;
        self.transition(Lifecycle::Stopped, None);
        StopResponse::ok()
    }

    async fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceMessage> {
        self.pushes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use codervpn_protocol::StatusRequest;

    fn fast_service() -> LoopbackService {
        LoopbackService::new().with_step_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn loopback_start_stop_cycle() {
        let service = fast_service();
        let mut pushes = service.subscribe();

        let reply = dispatch(
            &service,
            ClientMessage::Start(StartRequest::new("https://coder.example.com", "token")),
        )
        .await;
        assert_eq!(reply, ServiceMessage::Start(StartResponse::ok()));

        let mut seen = Vec::new();
        while let Ok(push) = pushes.try_recv() {
            seen.push(push);
        }
        assert!(matches!(
            seen.first(),
            Some(ServiceMessage::Status(s)) if s.lifecycle == Lifecycle::Starting
        ));
        assert!(matches!(
            seen.last(),
            Some(ServiceMessage::Status(s)) if s.lifecycle == Lifecycle::Started
        ));
        let stages: Vec<_> = seen
            .iter()
            .filter_map(|push| match push {
                ServiceMessage::StartProgress(p) => Some(p.stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                StartProgressStage::Initializing,
                StartProgressStage::Downloading,
                StartProgressStage::Finalizing
            ]
        );

        let status = dispatch(&service, ClientMessage::Status(StatusRequest {})).await;
        assert!(matches!(
            status,
            ServiceMessage::Status(s) if s.lifecycle == Lifecycle::Started && s.peer_update.is_some()
        ));

        let reply = dispatch(&service, ClientMessage::Stop(StopRequest {})).await;
        assert_eq!(reply, ServiceMessage::Stop(StopResponse::ok()));
        assert_eq!(service.status().await.lifecycle, Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn loopback_rejects_bad_request() {
        let service = fast_service();

        let reply = service.start(StartRequest::new("not a url", "token")).await;
        assert!(!reply.success);
        assert!(reply.error_message.unwrap().contains("coder_url"));

        let reply = service
            .start(StartRequest::new("https://coder.example.com", ""))
            .await;
        assert!(!reply.success);
        assert_eq!(service.status().await.lifecycle, Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_ok() {
        let service = fast_service();
        assert!(service.stop(StopRequest {}).await.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn host_answers_client_over_socket() {
        use crate::config::ServerConfig;
        use crate::socket::SocketServer;

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("vpn.sock");
        let listener = SocketServer::new(ServerConfig::new(&socket_path))
            .await
            .unwrap();

        let host = Arc::new(ServiceHost::new(fast_service(), SpeakerConfig::default()));
        let shutdown = CancellationToken::new();
        let server = {
            let host = Arc::clone(&host);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                host.serve(&listener, shutdown.cancelled_owned()).await
            })
        };

        let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        let client = Speaker::<ClientMessage>::new(stream, SpeakerConfig::default());
        let mut inbound = client.start().await.unwrap();

        let reply = client
            .send_request(ClientMessage::Start(StartRequest::new(
                "https://coder.example.com",
                "token",
            )))
            .await
            .unwrap();
        assert_eq!(reply, ServiceMessage::Start(StartResponse::ok()));

        // Lifecycle pushes reach the client.
        let mut saw_started = false;
        while !saw_started {
            let push = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
                .await
                .unwrap()
                .unwrap();
            saw_started = matches!(
                push.message(),
                ServiceMessage::Status(s) if s.lifecycle == Lifecycle::Started
            );
        }

        let status = client
            .send_request(ClientMessage::Status(StatusRequest {}))
            .await
            .unwrap();
        assert!(matches!(status, ServiceMessage::Status(s) if s.lifecycle == Lifecycle::Started));

        shutdown.cancel();
        server.await.unwrap().unwrap();
        assert!(client.closed().await.is_some());
    }

    #[tokio::test]
    async fn silent_client_fails_handshake() {
        let (server_side, _client_side) = tokio::io::duplex(1024);
        let permit = Arc::new(tokio::sync::Semaphore::new(1))
            .acquire_owned()
            .await
            .unwrap();
        let connection = Connection::new(Box::new(server_side), permit);

        let config = SpeakerConfig::default().with_handshake_timeout(Duration::from_millis(50));
        let host = ServiceHost::new(fast_service(), config);
        let err = host.serve_connection(connection).await.unwrap_err();
        assert!(
            matches!(
                err,
                ServerError::Speaker(ref e)
                    if matches!(e.root(), codervpn_speaker::SpeakerError::HandshakeTimeout { .. })
            ),
            "unexpected error: {:?}",
            err
        );
    }
}
