//! Connection sources for the gRPC server.

use super::config::ServerConfig;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio_stream::wrappers::UnixListenerStream;

/// A bound listener, chosen by [`ServerConfig::uds`].
pub enum Listener {
    Tcp(TcpListenerStream),
    #[cfg(unix)]
    Uds(UnixListenerStream, SocketFile),
}

impl Listener {
    /// Binds `config.server_addr` as a TCP address, or as a Unix socket path
    /// when `config.uds` is set.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound, or if a Unix socket is
    /// requested on a platform without them.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        if config.uds {
            #[cfg(unix)]
            {
                let path = PathBuf::from(&config.server_addr);
                let uds = tokio::net::UnixListener::bind(&path)?;
                Ok(Self::Uds(UnixListenerStream::new(uds), SocketFile(path)))
            }
            #[cfg(not(unix))]
            {
                anyhow::bail!("Unix domain sockets are not supported on this platform");
            }
        } else {
            let tcp = TcpListener::bind(&config.server_addr).await?;
            Ok(Self::Tcp(TcpListenerStream::new(tcp)))
        }
    }

    /// The address clients should dial, with the OS-assigned port for TCP.
    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(incoming) => incoming
                .as_ref()
                .local_addr()
                .map_or_else(|e| format!("<unknown: {e}>"), |addr| addr.to_string()),
            #[cfg(unix)]
            Self::Uds(_, socket) => socket.0.display().to_string(),
        }
    }
}

/// Removes the socket file once the listener is done with it, including when
/// the server unwinds.
#[cfg(unix)]
pub struct SocketFile(PathBuf);

#[cfg(unix)]
impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(_e) = std::fs::remove_file(&self.0) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to remove socket file {}: {_e}", self.0.display());
        }
    }
}
