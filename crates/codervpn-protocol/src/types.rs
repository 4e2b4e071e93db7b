//! Envelope and payload types for the codervpn protocol.
//!
//! Each role sends exactly one payload type. The mapping from payload type
//! to role is fixed at compile time through [`Payload`], so a speaker for
//! one side of a pairing can only ever send and receive the right messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::role::Role;

/// A payload type sent by one role.
///
/// `Peer` is the payload type the other side of the pairing sends back.
pub trait Payload: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Role of the process sending this payload.
    const ROLE: Role;

    /// Payload type received from the peer.
    type Peer: Payload<Peer = Self>;
}

/// Control block carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rpc {
    /// Per-connection identifier of this message.
    pub msg_id: u64,
    /// Identifier of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<u64>,
}

impl Rpc {
    /// Control block for a message that does not reply to anything.
    pub fn new(msg_id: u64) -> Self {
        Self {
            msg_id,
            response_to: None,
        }
    }

    /// Control block for a reply to `request_id`.
    pub fn reply(msg_id: u64, request_id: u64) -> Self {
        Self {
            msg_id,
            response_to: Some(request_id),
        }
    }

    /// Returns true if this message answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.response_to.is_some()
    }
}

/// Message envelope wrapping all protocol messages.
///
/// Every message exchanged between peers is wrapped in this envelope which
/// provides request correlation. The payload is a closed enum, so an
/// envelope without a payload cannot be constructed or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Correlation data.
    pub rpc: Rpc,
    /// The actual payload.
    pub msg: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope.
    pub fn new(rpc: Rpc, msg: T) -> Self {
        Self { rpc, msg }
    }

    /// Creates an unsolicited message or request envelope.
    pub fn request(msg_id: u64, msg: T) -> Self {
        Self::new(Rpc::new(msg_id), msg)
    }

    /// Creates an envelope replying to `request_id`.
    pub fn response(msg_id: u64, request_id: u64, msg: T) -> Self {
        Self::new(Rpc::reply(msg_id, request_id), msg)
    }
}

// ---------------------------------------------------------------------------
// Role payloads
// ---------------------------------------------------------------------------

/// Messages a manager sends to its tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Ask the tunnel for a full peer snapshot.
    GetPeerUpdate,
    /// Bring the tunnel up.
    Start(StartRequest),
    /// Bring the tunnel down.
    Stop(StopRequest),
}

impl Payload for ManagerMessage {
    const ROLE: Role = Role::Manager;
    type Peer = TunnelMessage;
}

/// Messages a tunnel sends to its manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelMessage {
    /// A log line forwarded from the tunnel.
    Log(Log),
    /// Workspaces and agents changed.
    PeerUpdate(PeerUpdate),
    /// Result of a start request.
    Start(StartResponse),
    /// Result of a stop request.
    Stop(StopResponse),
}

impl Payload for TunnelMessage {
    const ROLE: Role = Role::Tunnel;
    type Peer = ManagerMessage;
}

/// Messages a client sends to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bring the VPN up.
    Start(StartRequest),
    /// Bring the VPN down.
    Stop(StopRequest),
    /// Ask for the current status.
    Status(StatusRequest),
}

impl Payload for ClientMessage {
    const ROLE: Role = Role::Client;
    type Peer = ServiceMessage;
}

/// Messages the service sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceMessage {
    /// Result of a start request.
    Start(StartResponse),
    /// Result of a stop request.
    Stop(StopResponse),
    /// Current status, as a reply or a push.
    Status(Status),
    /// Progress of an ongoing start.
    StartProgress(StartProgress),
}

impl Payload for ServiceMessage {
    const ROLE: Role = Role::Service;
    type Peer = ClientMessage;
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// An extra HTTP header the tunnel should send to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Request to bring the tunnel up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Control-plane URL.
    pub coder_url: String,
    /// Session token for the control plane.
    pub api_token: String,
    /// Additional headers for control-plane requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HttpHeader>,
    /// Stable identifier of this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl StartRequest {
    /// Creates a start request for the given deployment.
    pub fn new(coder_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            coder_url: coder_url.into(),
            api_token: api_token.into(),
            headers: Vec::new(),
            device_id: None,
        }
    }

    /// Builder: add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Builder: set the device id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    /// Whether the tunnel came up.
    pub success: bool,
    /// Why it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StartResponse {
    /// A successful response.
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// A failed response.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Request to bring the tunnel down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    /// Whether the tunnel went down.
    pub success: bool,
    /// Why it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StopResponse {
    /// A successful response.
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// A failed response.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Request for the current service status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {}

/// Lifecycle of the tunnel as seen by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Not known yet.
    #[default]
    Unknown,
    /// Coming up.
    Starting,
    /// Up.
    Started,
    /// Going down.
    Stopping,
    /// Down.
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Unknown => "unknown",
            Lifecycle::Starting => "starting",
            Lifecycle::Started => "started",
            Lifecycle::Stopping => "stopping",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Service status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Tunnel lifecycle.
    pub lifecycle: Lifecycle,
    /// Last error, if the tunnel failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Full peer snapshot, present while the tunnel is up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_update: Option<PeerUpdate>,
}

impl Status {
    /// Creates a status with the given lifecycle.
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            lifecycle,
            ..Default::default()
        }
    }
}

/// Stage reached by an ongoing start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartProgressStage {
    /// Preparing.
    Initializing,
    /// Downloading the tunnel binary.
    Downloading,
    /// Bringing the tunnel up.
    Finalizing,
}

/// Download progress of the tunnel binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Bytes written so far.
    pub bytes_written: u64,
    /// Total size, if the server announced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
}

/// Progress push sent while a start is underway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProgress {
    /// Current stage.
    pub stage: StartProgressStage,
    /// Download details while downloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadProgress>,
}

impl StartProgress {
    /// Progress at the given stage without download details.
    pub fn stage(stage: StartProgressStage) -> Self {
        Self {
            stage,
            download: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Workspace build status as reported by the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    #[default]
    Unknown,
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Canceling,
    Canceled,
    Deleting,
    Deleted,
}

/// A workspace reachable over the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: WorkspaceStatus,
}

/// An agent inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
    /// DNS names the agent answers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fqdn: Vec<String>,
    /// Tunnel addresses of the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addrs: Vec<String>,
    /// Last successful handshake with the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handshake: Option<DateTime<Utc>>,
}

/// Change set of workspaces and agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserted_workspaces: Vec<Workspace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserted_agents: Vec<Agent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_workspaces: Vec<Workspace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_agents: Vec<Agent>,
}

impl PeerUpdate {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.upserted_workspaces.is_empty()
            && self.upserted_agents.is_empty()
            && self.deleted_workspaces.is_empty()
            && self.deleted_agents.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Severity of a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Fatal,
}

/// A structured field attached to a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogField {
    pub name: String,
    pub value: String,
}

/// A log line forwarded from the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logger_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<LogField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roles_pair_up() {
        assert_eq!(ManagerMessage::ROLE.peer(), TunnelMessage::ROLE);
        assert_eq!(TunnelMessage::ROLE.peer(), ManagerMessage::ROLE);
        assert_eq!(ClientMessage::ROLE.peer(), ServiceMessage::ROLE);
        assert_eq!(ServiceMessage::ROLE.peer(), ClientMessage::ROLE);
        assert_eq!(
            <<ClientMessage as Payload>::Peer as Payload>::ROLE,
            Role::Service
        );
    }

    #[test]
    fn envelope_serde_request() {
        let envelope = Envelope::request(
            1,
            ClientMessage::Start(StartRequest::new("https://coder.example.com", "secret")),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        insta::assert_snapshot!(
            json,
            @r#"{"rpc":{"msg_id":1},"msg":{"type":"start","coder_url":"https://coder.example.com","api_token":"secret"}}"#
        );

        let parsed: Envelope<ClientMessage> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
        assert!(!parsed.rpc.is_reply());
    }

    #[test]
    fn envelope_serde_response() {
        let envelope = Envelope::response(4, 1, ServiceMessage::Start(StartResponse::ok()));
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            json,
            r#"{"rpc":{"msg_id":4,"response_to":1},"msg":{"type":"start","success":true}}"#
        );

        let parsed: Envelope<ServiceMessage> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rpc.response_to, Some(1));
    }

    #[test]
    fn unit_variant_serde() {
        let json = serde_json::to_string(&ManagerMessage::GetPeerUpdate).unwrap();
        assert_eq!(json, r#"{"type":"get_peer_update"}"#);

        let json = serde_json::to_string(&ClientMessage::Stop(StopRequest {})).unwrap();
        assert_eq!(json, r#"{"type":"stop"}"#);
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ClientMessage::Stop(StopRequest {}));
    }

    #[test]
    fn envelope_without_payload_is_rejected() {
        let result = serde_json::from_str::<Envelope<ClientMessage>>(r#"{"rpc":{"msg_id":1}}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<Envelope<ClientMessage>>(
            r#"{"rpc":{"msg_id":1},"msg":{"type":"reboot"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn status_with_peer_update_roundtrip() {
        let status = Status {
            lifecycle: Lifecycle::Started,
            error_message: None,
            peer_update: Some(PeerUpdate {
                upserted_workspaces: vec![Workspace {
                    id: "ws-1".into(),
                    name: "dev".into(),
                    status: WorkspaceStatus::Running,
                }],
                upserted_agents: vec![Agent {
                    id: "ag-1".into(),
                    name: "main".into(),
                    workspace_id: "ws-1".into(),
                    fqdn: vec!["main.dev.me.coder.".into()],
                    ip_addrs: vec!["fd60:627a:a42b::1".into()],
                    last_handshake: None,
                }],
                ..Default::default()
            }),
        };
        let message = ServiceMessage::Status(status.clone());
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""lifecycle":"started""#));

        let parsed: ServiceMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ServiceMessage::Status(status));
    }

    #[test]
    fn start_request_builder() {
        let request = StartRequest::new("https://coder.example.com", "token")
            .with_header("X-Forwarded-For", "10.0.0.1")
            .with_device_id("device-1");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers[0].name, "X-Forwarded-For");
        assert_eq!(request.device_id.as_deref(), Some("device-1"));
    }

    #[test]
    fn responses() {
        assert!(StartResponse::ok().success);
        let failed = StopResponse::failed("busy");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("busy"));
        assert!(PeerUpdate::default().is_empty());
        assert_eq!(Lifecycle::Starting.to_string(), "starting");
    }
}
