use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::protocol::message::Message;
use crate::protocol::text;
use crate::transport::{Inbound, SendOutcome, Transport, TransportKind};

/// Stream transport: one CRLF-terminated textual frame per line. Delivery is
///  delegated to the ordered, lossless stream - `send` succeeds once the line
///  is flushed.
pub struct TcpTransport {
    lines: Mutex<Lines<BufReader<OwnedReadHalf>>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    pub async fn connect(server: SocketAddr) -> anyhow::Result<TcpTransport> {
        let stream = TcpStream::connect(server).await?;
        debug!("connected to {}", server);
        let (read_half, write_half) = stream.into_split();

        Ok(TcpTransport {
            lines: Mutex::new(BufReader::new(read_half).lines()),
            writer: Mutex::new(write_half),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn send(&self, msg: &Message) -> anyhow::Result<SendOutcome> {
        let line = text::ser(msg)?;
        trace!("sending {:?}", line);

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(SendOutcome::Delivered)
    }

    async fn receive(&self) -> Inbound {
        match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => {
                trace!("received {:?}", line);
                match text::deser(&line) {
                    Ok(msg) => Inbound::Message(msg),
                    Err(e) => {
                        warn!("received malformed line: {}", e);
                        Inbound::Malformed(e)
                    }
                }
            }
            Ok(None) => {
                debug!("peer closed the stream");
                Inbound::Closed
            }
            Err(e) => {
                warn!("stream error: {}", e);
                Inbound::Closed
            }
        }
    }
}
