//! Single-client TCP listener (spec §4.5: only one IRC client may be
//! attached at a time). Grounded on the teacher's `ipc::server` accept loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::irc::proto::IrcCodec;
use crate::{AppError, Result};

/// Binds one TCP port and admits exactly one client connection at a time,
/// refusing and closing any further connection attempts while attached.
pub struct Listener {
    tcp: TcpListener,
    attached: Arc<AtomicBool>,
}

impl Listener {
    /// Bind `addr`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Config(format!("failed to bind irc listener on {addr}: {err}")))?;
        Ok(Self {
            tcp,
            attached: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Accept the next connection, transparently refusing any connection
    /// that arrives while a client is already attached. Resolves only once
    /// a connection has been admitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the underlying accept fails.
    pub async fn accept(&self) -> Result<(Framed<TcpStream, IrcCodec>, SocketAddr)> {
        loop {
            let (stream, peer) = self
                .tcp
                .accept()
                .await
                .map_err(|err| AppError::Io(format!("irc accept failed: {err}")))?;

            if self.attached.swap(true, Ordering::SeqCst) {
                warn!(%peer, "refused second irc client; one is already attached");
                let mut framed = Framed::new(stream, IrcCodec);
                let _ = framed
                    .send("ERROR :Closing Link: (another client is already attached)".to_owned())
                    .await;
                continue;
            }

            info!(%peer, "irc client attached");
            return Ok((Framed::new(stream, IrcCodec), peer));
        }
    }

    /// Release the attached-client slot; call once the sole client
    /// disconnects so the bridge can return to `DORMANT` and admit another.
    pub fn release(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_connection_is_refused_while_first_attached() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.tcp.local_addr().unwrap();

        let first = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (framed_first, _) = listener.accept().await.unwrap();
        drop(framed_first);
        drop(first);

        listener.release();
        let second = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_framed_second, _) = listener.accept().await.unwrap();
        drop(second);
    }
}
