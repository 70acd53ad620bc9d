//! Line-oriented TCP transport.
//!
//! One task per connection; each request line gets exactly one reply line.
//! `EXIT` closes the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use crate::router::RequestRouter;

/// Accept connections until `shutdown` flips to `true` or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    router: Arc<RequestRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, peer, router).await {
                            warn!(%peer, reason = %e, "connection failed");
                        }
                    });
                }
                Err(e) => warn!(reason = %e, "failed to accept connection"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("server stopped");
    Ok(())
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    router: Arc<RequestRouter>,
) -> io::Result<()> {
    info!(%peer, "client connected");
    let (read, mut write) = socket.into_split();
    let mut lines = LinesStream::new(BufReader::new(read).lines());

    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("EXIT") {
            write.write_all(b"SUCCESS|bye\n").await?;
            break;
        }

        // handled synchronously; no store guard outlives this call
        let reply = router.handle_line(line).to_string();
        debug!(%peer, request = line, reply = %reply, "handled");
        write.write_all(reply.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }

    info!(%peer, "client disconnected");
    Ok(())
}
