use std::net::SocketAddr;
use std::time::Duration;

use crate::transport::tcp_transport::TcpTransport;
use crate::transport::udp_transport::UdpTransport;
use crate::transport::{Transport, TransportKind};

/// The fixed parameter set supplied by the command line.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportKind,
    pub server: SocketAddr,
    /// how long a reliable datagram send waits for its CONFIRM before retransmitting
    pub conf_timeout: Duration,
    /// total number of transmissions per reliable datagram send
    pub max_retries: u32,
}

impl ClientConfig {
    pub async fn connect(&self) -> anyhow::Result<Box<dyn Transport>> {
        let transport: Box<dyn Transport> = match self.transport {
            TransportKind::Tcp => Box::new(TcpTransport::connect(self.server).await?),
            TransportKind::Udp => {
                Box::new(UdpTransport::connect(self.server, self.conf_timeout, self.max_retries).await?)
            }
        };
        Ok(transport)
    }
}
