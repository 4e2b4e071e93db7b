//! Interactive debug console.
//!
//! Reads one command per line from stdin, sends it to the service and
//! prints the reply. Pushes from the service are printed as they arrive.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

use codervpn_core::{TaskError, join_cancellable};
use codervpn_protocol::{
    ClientMessage, ServiceMessage, StartProgress, StartProgressStage, StartRequest, Status,
};
use codervpn_speaker::Inbound;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::VpnClient;

const HELP: &str = "\
commands:
  start <url> <token>   bring the tunnel up
  stop                  bring the tunnel down
  status                show the service status
  help                  show this message
  quit                  leave the console";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start { url: String, token: String },
    Stop,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("start", [url, token]) => Self::Start {
                url: url.to_string(),
                token: token.to_string(),
            },
            ("start", _) => return Err("usage: start <url> <token>".to_string()),
            ("stop", []) => Self::Stop,
            ("status", []) => Self::Status,
            ("help" | "?", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            ("stop" | "status" | "help" | "?" | "quit" | "exit", _) => {
                return Err(format!("`{}` takes no arguments", verb));
            }
            _ => return Err(format!("unknown command `{}`, try `help`", verb)),
        };
        Ok(command)
    }
}

/// Renders a status for the console.
pub fn format_status(status: &Status) -> String {
    let mut out = format!("status: {}", status.lifecycle);
    if let Some(ref err) = status.error_message {
        out.push_str(&format!(" (error: {})", err));
    }
    if let Some(ref peers) = status.peer_update {
        out.push_str(&format!(
            ", {} workspaces, {} agents",
            peers.upserted_workspaces.len(),
            peers.upserted_agents.len()
        ));
    }
    out
}

fn format_progress(progress: &StartProgress) -> String {
    let stage = match progress.stage {
        StartProgressStage::Initializing => "initializing",
        StartProgressStage::Downloading => "downloading",
        StartProgressStage::Finalizing => "finalizing",
    };
    match &progress.download {
        Some(download) => match download.bytes_total {
            Some(total) => format!(
                "progress: {} {}/{} bytes",
                stage, download.bytes_written, total
            ),
            None => format!("progress: {} {} bytes", stage, download.bytes_written),
        },
        None => format!("progress: {}", stage),
    }
}

/// Renders a push from the service.
pub fn format_push(push: &ServiceMessage) -> String {
    match push {
        ServiceMessage::Status(status) => format!("[push] {}", format_status(status)),
        ServiceMessage::StartProgress(progress) => format!("[push] {}", format_progress(progress)),
        other => format!("[push] {:?}", other),
    }
}

/// Runs the console on stdin until `quit`, end of input or Ctrl-C.
pub async fn run_console(client: VpnClient) -> ClientResult<()> {
    let (tx, rx) = mpsc::channel(16);
    // Blocking reads, kept off the runtime.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("{}", HELP);
    run_console_with(client, rx).await
}

/// Runs the console on the given line source.
pub async fn run_console_with(
    mut client: VpnClient,
    lines: mpsc::Receiver<String>,
) -> ClientResult<()> {
    let pushes = client
        .take_pushes()
        .ok_or_else(|| ClientError::Connection("push stream already taken".to_string()))?;
    let client = Arc::new(client);
    let token = CancellationToken::new();

    let result = join_cancellable(
        token,
        [
            ConsoleTask::Input(Arc::clone(&client), lines),
            ConsoleTask::Pushes(pushes),
            ConsoleTask::Interrupt,
        ]
        .map(|task| move |token: CancellationToken| task.run(token)),
    )
    .await;

    client.speaker().dispose().await;

    match result {
        Ok(_) => Ok(()),
        Err(TaskError::Failed(err)) => Err(err),
        Err(TaskError::Panicked(msg)) => Err(ClientError::Io(std::io::Error::other(format!(
            "console task panicked: {}",
            msg
        )))),
        Err(TaskError::Aborted) => Err(ClientError::Connection("console aborted".to_string())),
    }
}

enum ConsoleTask {
    Input(Arc<VpnClient>, mpsc::Receiver<String>),
    Pushes(Inbound<ClientMessage>),
    Interrupt,
}

impl ConsoleTask {
    async fn run(self, token: CancellationToken) -> ClientResult<()> {
        let result = match self {
            Self::Input(client, lines) => read_commands(&client, lines, &token).await,
            Self::Pushes(pushes) => print_pushes(pushes, &token).await,
            Self::Interrupt => wait_interrupt(&token).await,
        };
        token.cancel();
        result
    }
}

async fn read_commands(
    client: &VpnClient,
    mut lines: mpsc::Receiver<String>,
    token: &CancellationToken,
) -> ClientResult<()> {
    loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("console input closed");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(err) => {
                println!("{}", err);
                continue;
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            outcome = execute(client, command) => outcome,
        };
        match outcome {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => return Ok(()),
            Err(ClientError::Speaker(err)) if err.is_terminal() => {
                return Err(ClientError::Speaker(err));
            }
            Err(err) => println!("error: {}", err),
        }
    }
}

/// Runs one command. Returns `None` when the console should exit.
async fn execute(client: &VpnClient, command: ConsoleCommand) -> ClientResult<Option<String>> {
    let output = match command {
        ConsoleCommand::Start { url, token } => {
            client.start(StartRequest::new(url, token)).await?;
            "start: ok".to_string()
        }
        ConsoleCommand::Stop => {
            client.stop().await?;
            "stop: ok".to_string()
        }
        ConsoleCommand::Status => format_status(&client.status().await?),
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => return Ok(None),
    };
    Ok(Some(output))
}

async fn print_pushes(
    mut pushes: Inbound<ClientMessage>,
    token: &CancellationToken,
) -> ClientResult<()> {
    loop {
        let push = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            push = pushes.recv() => push,
        };
        match push {
            Some(push) => println!("{}", format_push(push.message())),
            None => {
                warn!("service closed the connection");
                return Err(ClientError::Connection(
                    "service closed the connection".to_string(),
                ));
            }
        }
    }
}

async fn wait_interrupt(token: &CancellationToken) -> ClientResult<()> {
    tokio::select! {
        _ = token.cancelled() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            debug!("interrupted");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use codervpn_protocol::{DownloadProgress, Lifecycle, PeerUpdate, StartResponse};

    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(
            "start https://coder.example.com abc".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Start {
                url: "https://coder.example.com".to_string(),
                token: "abc".to_string(),
            })
        );
        assert_eq!("  STOP ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Stop));
        assert_eq!("status".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Status));
        assert_eq!("?".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Help));
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn parse_errors() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!(
            "start https://x"
                .parse::<ConsoleCommand>()
                .unwrap_err()
                .contains("usage")
        );
        assert!(
            "stop now"
                .parse::<ConsoleCommand>()
                .unwrap_err()
                .contains("no arguments")
        );
        assert!(
            "launch"
                .parse::<ConsoleCommand>()
                .unwrap_err()
                .contains("unknown command")
        );
    }

    #[test]
    fn status_rendering() {
        assert_eq!(format_status(&Status::new(Lifecycle::Stopped)), "status: stopped");

        let status = Status {
            lifecycle: Lifecycle::Started,
            error_message: None,
            peer_update: Some(PeerUpdate::default()),
        };
        assert_eq!(
            format_status(&status),
            "status: started, 0 workspaces, 0 agents"
        );

        let failed = Status {
            lifecycle: Lifecycle::Stopped,
            error_message: Some("boom".to_string()),
            peer_update: None,
        };
        assert_eq!(format_status(&failed), "status: stopped (error: boom)");
    }

    #[test]
    fn push_rendering() {
        let progress = StartProgress {
            stage: StartProgressStage::Downloading,
            download: Some(DownloadProgress {
                bytes_written: 10,
                bytes_total: Some(100),
            }),
        };
        assert_eq!(
            format_push(&ServiceMessage::StartProgress(progress)),
            "[push] progress: downloading 10/100 bytes"
        );
        assert_eq!(
            format_push(&ServiceMessage::StartProgress(StartProgress::stage(
                StartProgressStage::Finalizing
            ))),
            "[push] progress: finalizing"
        );
        assert!(format_push(&ServiceMessage::Start(StartResponse::ok())).starts_with("[push] "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn console_runs_commands_until_quit() {
        use std::time::Duration;

        use codervpn_server::{LoopbackService, ServerConfig, ServiceHost, SocketServer};
        use codervpn_speaker::SpeakerConfig;

        use crate::transport::Endpoint;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpn.sock");
        let listener = SocketServer::new(ServerConfig::new(&path)).await.unwrap();
        let service = LoopbackService::new().with_step_delay(Duration::from_millis(1));
        let host = Arc::new(ServiceHost::new(service, SpeakerConfig::default()));
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let server = tokio::spawn(async move {
            host.serve(&listener, stop.cancelled_owned()).await.unwrap();
        });

        let client = VpnClient::connect(&Endpoint::UnixSocket(path), Duration::from_secs(5))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(8);
        for line in ["status", "bogus", "start https://coder.example.com t", "stop", "quit"] {
            tx.send(line.to_string()).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), run_console_with(client, rx))
            .await
            .unwrap()
            .unwrap();

        shutdown.cancel();
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn console_ends_when_input_closes() {
        use std::time::Duration;

        use codervpn_server::{LoopbackService, ServerConfig, ServiceHost, SocketServer};
        use codervpn_speaker::SpeakerConfig;

        use crate::transport::Endpoint;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpn.sock");
        let listener = SocketServer::new(ServerConfig::new(&path)).await.unwrap();
        let host = Arc::new(ServiceHost::new(
            LoopbackService::new(),
            SpeakerConfig::default(),
        ));
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let server = tokio::spawn(async move {
            host.serve(&listener, stop.cancelled_owned()).await.unwrap();
        });

        let client = VpnClient::connect(&Endpoint::UnixSocket(path), Duration::from_secs(5))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), run_console_with(client, rx))
            .await
            .unwrap()
            .unwrap();

        shutdown.cancel();
        server.await.unwrap();
    }
}
