//! Header exchange performed once when a connection opens.
//!
//! Both sides write their header straight away and read the peer's header
//! at the same time, so neither side waits for the other to go first.

use std::time::Duration;

use codervpn_protocol::{Header, MAX_HEADER_LEN, ProtocolError, Role, RpcVersion};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{SpeakerError, SpeakerResult};

/// Writes `local` and reads the peer header, both within `timeout`.
pub async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    local: &Header,
    timeout: Duration,
) -> SpeakerResult<Header>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(local.to_line().as_bytes()).await?;
        writer.flush().await?;
        Ok::<_, SpeakerError>(())
    };
    let read = read_header(reader);

    match tokio::time::timeout(timeout, async { tokio::try_join!(write, read) }).await {
        Ok(Ok(((), remote))) => Ok(remote),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(SpeakerError::HandshakeTimeout { timeout }),
    }
}

/// Reads one header line, refusing lines longer than [`MAX_HEADER_LEN`].
pub async fn read_header<R>(reader: &mut R) -> SpeakerResult<Header>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let read = (&mut *reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if line.last() != Some(&b'\n') {
        if read >= MAX_HEADER_LEN {
            return Err(SpeakerError::HeaderTooLong {
                max: MAX_HEADER_LEN,
            });
        }
        return Err(SpeakerError::ConnectionClosed);
    }

    Header::from_bytes(&line).map_err(|err| SpeakerError::Protocol(ProtocolError::Format(err)))
}

/// Checks the peer header and picks the version to speak.
pub fn negotiate(local: &Header, remote: &Header, expected: Role) -> SpeakerResult<RpcVersion> {
    if remote.role() != expected {
        return Err(SpeakerError::IncompatibleRole {
            expected,
            found: remote.role(),
        });
    }

    local
        .versions()
        .is_compatible_with(remote.versions())
        .ok_or_else(|| SpeakerError::IncompatibleVersion {
            local: local.versions().clone(),
            remote: remote.versions().clone(),
        })
}
