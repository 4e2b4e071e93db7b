//! Windows named pipe listener.
//!
//! Every pipe instance is created with a DACL granting all users full
//! access, so the desktop app can reach a service running as SYSTEM. The
//! first instance is created with `first_pipe_instance`, which makes a second
//! server on the same name fail instead of silently sharing it.

use std::ffi::c_void;
use std::io;
use std::ptr;
use std::sync::Arc;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};
use windows_sys::Win32::Foundation::{HLOCAL, LocalFree};
use windows_sys::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows_sys::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::listener::Listener;

/// Generic-all access for Everyone.
const ALL_USERS_SDDL: &str = "D:(A;;GA;;;WD)";

/// Named pipe server for handling client connections.
pub struct PipeServer {
    config: ServerConfig,
    /// Instance waiting for the next client.
    next: Mutex<NamedPipeServer>,
    connection_semaphore: Arc<Semaphore>,
}

impl PipeServer {
    /// Creates the first pipe instance.
    ///
    /// Fails with [`ServerError::SocketInUse`] if another server already
    /// owns the pipe name.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let first = create_instance(&config.pipe_name, true).map_err(|err| {
            if err.kind() == io::ErrorKind::PermissionDenied {
                ServerError::socket_in_use(config.pipe_name.clone())
            } else {
                ServerError::Io(err)
            }
        })?;
        info!(pipe = %config.pipe_name, "pipe server listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            next: Mutex::new(first),
            connection_semaphore,
        })
    }

    /// Returns the pipe name.
    pub fn pipe_name(&self) -> &str {
        &self.config.pipe_name
    }
}

impl Listener for PipeServer {
    async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let mut next = self.next.lock().await;
        next.connect().await?;

        // Have the next instance ready before handing this one out so
        // clients never see the pipe missing.
        let replacement = create_instance(&self.config.pipe_name, false)?;
        let connected = std::mem::replace(&mut *next, replacement);
        debug!("accepted new pipe connection");

        Ok(Connection::new(Box::new(connected), permit))
    }
}

fn create_instance(name: &str, first: bool) -> io::Result<NamedPipeServer> {
    let descriptor = SecurityDescriptor::from_sddl(ALL_USERS_SDDL)?;
    let mut attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: descriptor.0,
        bInheritHandle: 0,
    };

    // SAFETY: `attributes` and the descriptor it points to outlive the call.
    unsafe {
        ServerOptions::new()
            .first_pipe_instance(first)
            .create_with_security_attributes_raw(
                name,
                &mut attributes as *mut SECURITY_ATTRIBUTES as *mut c_void,
            )
    }
}

/// A self-relative security descriptor owned by this process.
struct SecurityDescriptor(PSECURITY_DESCRIPTOR);

impl SecurityDescriptor {
    fn from_sddl(sddl: &str) -> io::Result<Self> {
        let wide: Vec<u16> = sddl.encode_utf16().chain(std::iter::once(0)).collect();
        let mut descriptor: PSECURITY_DESCRIPTOR = ptr::null_mut();

        // SAFETY: `wide` is NUL-terminated and `descriptor` is a valid out pointer.
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(descriptor))
    }
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        // SAFETY: the descriptor was allocated by
        // ConvertStringSecurityDescriptorToSecurityDescriptorW.
        unsafe {
            LocalFree(self.0 as HLOCAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::windows::named_pipe::ClientOptions;

    fn unique_pipe(test: &str) -> String {
        format!(r"\\.\pipe\codervpn-test-{}-{}", test, std::process::id())
    }

    #[tokio::test]
    async fn second_server_is_refused() {
        let config = ServerConfig::default().with_pipe_name(unique_pipe("dup"));
        let _server = PipeServer::new(config.clone()).unwrap();
        assert!(PipeServer::new(config).is_err());
    }

    #[tokio::test]
    async fn accepted_pipe_carries_bytes() {
        let name = unique_pipe("bytes");
        let server = PipeServer::new(ServerConfig::default().with_pipe_name(&name)).unwrap();

        let client = tokio::spawn(async move {
            let mut pipe = ClientOptions::new().open(&name).unwrap();
            pipe.write_all(b"ping").await.unwrap();
            let mut reply = [0u8; 4];
            pipe.read_exact(&mut reply).await.unwrap();
            reply
        });

        let mut conn = tokio::time::timeout(Duration::from_secs(5), server.accept())
            .await
            .unwrap()
            .unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        conn.write_all(b"pong").await.unwrap();
        assert_eq!(&client.await.unwrap(), b"pong");
    }
}
