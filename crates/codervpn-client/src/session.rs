//! Request helpers for talking to the service as a client.

use std::time::Duration;

use codervpn_protocol::{
    ClientMessage, ServiceMessage, StartRequest, Status, StatusRequest, StopRequest,
};
use codervpn_speaker::{Inbound, Speaker, SpeakerConfig};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::transport::{self, Endpoint};

/// A connected, handshaken client session.
pub struct VpnClient {
    speaker: Speaker<ClientMessage>,
    pushes: Option<Inbound<ClientMessage>>,
    timeout: Duration,
}

impl VpnClient {
    /// Connects to `endpoint` and performs the handshake.
    ///
    /// `timeout` bounds the connect, the handshake and every request.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> ClientResult<Self> {
        let stream = transport::connect(endpoint, timeout).await?;
        let config = SpeakerConfig::default().with_handshake_timeout(timeout);
        let speaker = Speaker::new(stream, config);
        let pushes = speaker.start().await?;

        info!(
            %endpoint,
            version = ?speaker.negotiated_version().map(|v| v.to_string()),
            "connected to service"
        );

        Ok(Self {
            speaker,
            pushes: Some(pushes),
            timeout,
        })
    }

    /// Asks the service to bring the tunnel up.
    pub async fn start(&self, request: StartRequest) -> ClientResult<()> {
        match self.request(ClientMessage::Start(request)).await? {
            ServiceMessage::Start(resp) if resp.success => Ok(()),
            ServiceMessage::Start(resp) => Err(ClientError::Rejected(
                resp.error_message
                    .unwrap_or_else(|| "start failed".to_string()),
            )),
            other => Err(unexpected("start", &other)),
        }
    }

    /// Asks the service to bring the tunnel down.
    pub async fn stop(&self) -> ClientResult<()> {
        match self.request(ClientMessage::Stop(StopRequest::default())).await? {
            ServiceMessage::Stop(resp) if resp.success => Ok(()),
            ServiceMessage::Stop(resp) => Err(ClientError::Rejected(
                resp.error_message.unwrap_or_else(|| "stop failed".to_string()),
            )),
            other => Err(unexpected("stop", &other)),
        }
    }

    /// Fetches the current service status.
    pub async fn status(&self) -> ClientResult<Status> {
        match self
            .request(ClientMessage::Status(StatusRequest::default()))
            .await?
        {
            ServiceMessage::Status(status) => Ok(status),
            other => Err(unexpected("status", &other)),
        }
    }

    /// Takes the stream of pushes sent by the service.
    ///
    /// Returns `None` after the first call.
    pub fn take_pushes(&mut self) -> Option<Inbound<ClientMessage>> {
        self.pushes.take()
    }

    /// Returns the underlying speaker.
    pub fn speaker(&self) -> &Speaker<ClientMessage> {
        &self.speaker
    }

    /// Closes the session.
    pub async fn close(self) {
        self.speaker.dispose().await;
    }

    async fn request(&self, msg: ClientMessage) -> ClientResult<ServiceMessage> {
        debug!(request = ?msg, "sending request");
        tokio::time::timeout(self.timeout, self.speaker.send_request(msg))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "no reply within {}s",
                    self.timeout.as_secs_f32()
                ))
            })?
            .map_err(ClientError::from)
    }
}

fn unexpected(request: &str, reply: &ServiceMessage) -> ClientError {
    ClientError::UnexpectedResponse(format!("{} request answered with {:?}", request, reply))
}

impl std::fmt::Debug for VpnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnClient")
            .field("speaker", &self.speaker)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use codervpn_protocol::Lifecycle;
    use codervpn_speaker::SpeakerError;
    use codervpn_server::{LoopbackService, ServerConfig, ServiceHost, SocketServer};
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn serve_loopback(
        dir: &tempfile::TempDir,
    ) -> (Endpoint, CancellationToken, tokio::task::JoinHandle<()>) {
        let path = dir.path().join("vpn.sock");
        let listener = SocketServer::new(ServerConfig::new(&path))
            .await
            .unwrap();
        let service = LoopbackService::new().with_step_delay(Duration::from_millis(1));
        let host = Arc::new(ServiceHost::new(service, SpeakerConfig::default()));

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            host.serve(&listener, stop.cancelled_owned()).await.unwrap();
        });
        (Endpoint::UnixSocket(path), shutdown, task)
    }

    #[tokio::test]
    async fn start_status_stop_against_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, shutdown, task) = serve_loopback(&dir).await;

        let client = VpnClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.status().await.unwrap().lifecycle, Lifecycle::Stopped);

        client
            .start(StartRequest::new("https://coder.example.com", "token"))
            .await
            .unwrap();
        assert_eq!(client.status().await.unwrap().lifecycle, Lifecycle::Started);

        client.stop().await.unwrap();
        assert_eq!(client.status().await.unwrap().lifecycle, Lifecycle::Stopped);

        client.close().await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_start_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, shutdown, task) = serve_loopback(&dir).await;

        let client = VpnClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client
            .start(StartRequest::new("not a url", "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));

        client.close().await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pushes_are_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, shutdown, task) = serve_loopback(&dir).await;

        let mut client = VpnClient::connect(&endpoint, Duration::from_secs(5))
            .await
            .unwrap();
        let mut pushes = client.take_pushes().unwrap();
        assert!(client.take_pushes().is_none());

        client
            .start(StartRequest::new("https://coder.example.com", "token"))
            .await
            .unwrap();
        let first = pushes.recv().await.unwrap();
        assert!(matches!(
            first.message(),
            ServiceMessage::Status(_) | ServiceMessage::StartProgress(_)
        ));

        client.close().await;
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let _accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = VpnClient::connect(&Endpoint::UnixSocket(path), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Speaker(ref e) if matches!(e.root(), SpeakerError::HandshakeTimeout { .. })
        ));
    }
}
