use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::UdpSocket;

/// Where datagram payloads come from.
#[async_trait]
pub trait PacketSource: Send {
    /// Copy the next payload into `buf`, returning its length and sender.
    /// `None` means the source is exhausted.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

pub struct UdpPacketSource {
    socket: UdpSocket,
}

impl UdpPacketSource {
    pub async fn bind(
        listen: SocketAddr,
        receive_buffer_bytes: Option<usize>,
    ) -> io::Result<UdpPacketSource> {
        let socket = UdpSocket::bind(listen).await?;

        if let Some(receive_buffer_bytes) = receive_buffer_bytes
            && let Err(err) = SockRef::from(&socket).set_recv_buffer_size(receive_buffer_bytes)
        {
            warn!(
                message = "Failed configure receive buffer size on UDP socket",
                %err
            );
        }

        Ok(UdpPacketSource { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl PacketSource for UdpPacketSource {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.socket.recv_from(buf).await.map(Some)
    }
}

/// Replays payloads held in memory, all from the same peer.
pub struct MemorySource {
    peer: SocketAddr,
    payloads: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new(peer: SocketAddr, payloads: impl IntoIterator<Item = Vec<u8>>) -> Self {
        MemorySource {
            peer,
            payloads: payloads.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PacketSource for MemorySource {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some(payload) = self.payloads.pop_front() else {
            return Ok(None);
        };

        // truncated like a UDP socket does with a short buffer
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);

        Ok(Some((len, self.peer)))
    }
}
