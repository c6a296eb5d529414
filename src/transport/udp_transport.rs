use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::BytesMut;
use rustc_hash::FxHashSet;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::protocol::datagram;
use crate::protocol::datagram::HEADER_LEN;
use crate::protocol::message::{Message, MessageType};
use crate::transport::{Inbound, SendOutcome, Transport, TransportKind};

/// Datagram transport with an application-level reliability layer.
///
/// All raw socket reads happen in one spawned reader task. It classifies
///  every inbound frame: CONFIRM frames are routed to the waiter registered
///  by an in-flight [`Transport::send`], everything else is confirmed back
///  immediately, deduplicated by message id and queued for [`Transport::receive`].
///  No other component ever reads the socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    pending_confirm: Arc<Mutex<Option<PendingConfirm>>>,
    deliveries: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    conf_timeout: Duration,
    max_retries: u32,
    reader: JoinHandle<()>,
}

/// a reliable send waiting for the CONFIRM matching its message id
struct PendingConfirm {
    id: u16,
    notify: oneshot::Sender<()>,
}

impl UdpTransport {
    pub async fn connect(server: SocketAddr, conf_timeout: Duration, max_retries: u32) -> anyhow::Result<UdpTransport> {
        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        socket.connect(server).await?;
        debug!("bound to {}, peer is {}", socket.local_addr()?, server);

        let pending_confirm: Arc<Mutex<Option<PendingConfirm>>> = Default::default();
        // unbounded: backpressure here would block the reader away from the
        // socket while CONFIRMs for an in-flight send are still arriving
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(recv_loop(socket.clone(), pending_confirm.clone(), deliveries_tx));

        Ok(UdpTransport {
            socket,
            pending_confirm,
            deliveries: Mutex::new(deliveries_rx),
            conf_timeout,
            max_retries,
            reader,
        })
    }

    async fn send_with_retries(&self, frame: &[u8], id: u16, confirmed: &mut oneshot::Receiver<()>) -> anyhow::Result<SendOutcome> {
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                debug!("no CONFIRM for id {} within {:?}, retransmitting", id, self.conf_timeout);
            }
            self.socket.send(frame).await?;

            match timeout(self.conf_timeout, &mut *confirmed).await {
                Ok(Ok(())) => {
                    trace!("id {} confirmed after {} transmission(s)", id, attempt + 1);
                    return Ok(SendOutcome::Delivered);
                }
                Ok(Err(_)) => bail!("receive path shut down while waiting for CONFIRM"),
                Err(_elapsed) => {}
            }
        }
        warn!("giving up on id {} after {} transmissions", id, self.max_retries);
        Ok(SendOutcome::Failed)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn send(&self, msg: &Message) -> anyhow::Result<SendOutcome> {
        let mut buf = BytesMut::new();
        datagram::ser(msg, &mut buf);

        if let Message::Confirm { .. } = msg {
            // confirmations are fire-and-forget, they are never themselves confirmed
            self.socket.send(&buf).await?;
            return Ok(SendOutcome::Delivered);
        }

        let id = msg.id();
        let (notify, mut confirmed) = oneshot::channel();
        {
            let mut slot = self.pending_confirm.lock().await;
            if slot.is_some() {
                // single outstanding request: the state machine never overlaps sends
                bail!("reliable send of id {} while a previous send is still in flight", id);
            }
            *slot = Some(PendingConfirm { id, notify });
        }

        let result = self.send_with_retries(&buf, id, &mut confirmed).await;
        *self.pending_confirm.lock().await = None;
        result
    }

    async fn receive(&self) -> Inbound {
        match self.deliveries.lock().await.recv().await {
            Some(inbound) => inbound,
            None => Inbound::Closed,
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// The exclusive reader: dispatches CONFIRM frames to the waiting sender and
///  everything else to the delivery queue.
async fn recv_loop(
    socket: Arc<UdpSocket>,
    pending_confirm: Arc<Mutex<Option<PendingConfirm>>>,
    deliveries: mpsc::UnboundedSender<Inbound>,
) {
    let mut seen_ids: FxHashSet<u16> = Default::default();
    let mut buf = [0u8; 65535];

    loop {
        let num_read = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };
        let frame = &buf[..num_read];

        if frame.len() < HEADER_LEN {
            warn!("received runt datagram of {} bytes", frame.len());
            let runt = Inbound::Malformed(anyhow!("datagram shorter than the {} byte header", HEADER_LEN));
            if deliveries.send(runt).is_err() {
                return;
            }
            continue;
        }
        let id = u16::from_be_bytes([frame[1], frame[2]]);

        if frame[0] == u8::from(MessageType::Confirm) {
            let mut slot = pending_confirm.lock().await;
            match slot.take() {
                Some(pending) if pending.id == id => {
                    let _ = pending.notify.send(());
                }
                other => {
                    debug!("stray CONFIRM for id {}, ignoring", id);
                    *slot = other;
                }
            }
            continue;
        }

        // everything else is confirmed before parsing - duplicates and
        // malformed frames included
        send_confirm(&socket, id).await;

        if !seen_ids.insert(id) {
            debug!("duplicate message id {}, suppressing redelivery", id);
            continue;
        }

        let inbound = match datagram::deser(&mut &frame[..]) {
            Ok(msg) => {
                trace!("received {:?}", msg);
                Inbound::Message(msg)
            }
            Err(e) => {
                warn!("received malformed datagram: {}", e);
                Inbound::Malformed(e)
            }
        };
        if deliveries.send(inbound).is_err() {
            // the transport was dropped
            return;
        }
    }
}

async fn send_confirm(socket: &UdpSocket, ref_id: u16) {
    let mut buf = BytesMut::new();
    datagram::ser(&Message::Confirm { ref_id }, &mut buf);
    if let Err(e) = socket.send(&buf).await {
        error!("error sending CONFIRM for id {}: {}", ref_id, e);
    }
}
