//! Q-mode: UDP datagrams carrying the Query/Response handshake,
//! encapsulated with the Router Alert Option so on-path nodes can
//! intercept them (spec §4.2).
//!
//! Setting IP_ROUTER_ALERT is platform- and privilege-dependent (it needs
//! a raw socket on most kernels), so the concrete mechanics live behind
//! [`QueryEncapSource`] — production binds use [`Socket2RaoSource`],
//! tests use a plain UDP socket and exercise only the framing.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::error::GistError;
use crate::wire::pdu::Pdu;
use crate::wire::Q_MODE_MAGIC_NUMBER;

/// Seam between the Q-mode transport and however the Router Alert Option
/// actually gets attached to outgoing datagrams on this platform.
pub trait QueryEncapSource: Send + Sync {
    fn bind(&self, addr: SocketAddr) -> io::Result<Socket>;
}

/// Best-effort `IP_ROUTER_ALERT` source for Linux. Falls back to a plain
/// UDP socket (logged, not failed) when the option or the required
/// capability isn't available — a node that can't set RAO can still send
/// and receive Q-mode datagrams, it just won't be intercepted by an
/// on-path GIST node that isn't the addressed destination.
pub struct Socket2RaoSource;

impl QueryEncapSource for Socket2RaoSource {
    fn bind(&self, addr: SocketAddr) -> io::Result<Socket> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        #[cfg(target_os = "linux")]
        {
            if let Err(err) = set_ip_router_alert(&socket) {
                tracing::warn!(%err, "could not set IP_ROUTER_ALERT, Q-mode datagrams will not carry RAO");
            }
        }

        socket.bind(&addr.into())?;
        Ok(socket)
    }
}

#[cfg(target_os = "linux")]
fn set_ip_router_alert(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    // IPOPT_RA: a 4-byte IP option (type 0x94, length 4, value 0),
    // prepended to outgoing datagrams by the kernel when IP_OPTIONS is set
    // this way. There is no portable `setsockopt` wrapper for this in
    // socket2, so the raw call stays narrowly scoped to Linux.
    const IPOPT_RA: [u8; 4] = [0x94, 0x04, 0x00, 0x00];
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_OPTIONS,
            IPOPT_RA.as_ptr() as *const libc::c_void,
            IPOPT_RA.len() as libc::socklen_t,
        )
    };
    if ret != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Q-mode sender/receiver.
pub struct QModeTransport {
    socket: UdpSocket,
}

impl QModeTransport {
    pub async fn bind(addr: SocketAddr, source: &dyn QueryEncapSource) -> crate::Result<Self> {
        let raw = source.bind(addr).map_err(GistError::Io)?;
        raw.set_nonblocking(true).map_err(GistError::Io)?;
        let socket = UdpSocket::from_std(raw.into()).map_err(GistError::Io)?;
        Ok(Self { socket })
    }

    /// Sends a PDU Q-mode encapsulated: 4-byte magic number, then the
    /// common header and object sequence (spec §6).
    pub async fn send(&self, pdu: &Pdu, dest: SocketAddr) -> crate::Result<()> {
        let mut buf = Vec::with_capacity(4);
        buf.extend_from_slice(&Q_MODE_MAGIC_NUMBER.to_be_bytes());
        buf.extend_from_slice(&pdu.encode()?);
        self.socket.send_to(&buf, dest).await.map_err(GistError::Io)?;
        Ok(())
    }

    /// Receives and decodes one Q-mode datagram, validating the magic
    /// number (spec §4.2: a datagram without it is not a GIST message and
    /// is silently dropped by the caller, not treated as a parse error).
    pub async fn recv(&self) -> crate::Result<Option<(Pdu, SocketAddr)>> {
        let mut buf = vec![0u8; crate::wire::MAX_MESSAGE_SIZE + 4];
        let (len, from) = self.socket.recv_from(&mut buf).await.map_err(GistError::Io)?;
        buf.truncate(len);

        if buf.len() < 4 || u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) != Q_MODE_MAGIC_NUMBER {
            return Ok(None);
        }

        let pdu = Pdu::decode(&buf[4..])?;
        Ok(Some((pdu, from)))
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.socket.local_addr().map_err(GistError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainUdpSource;

    impl QueryEncapSource for PlainUdpSource {
        fn bind(&self, addr: SocketAddr) -> io::Result<Socket> {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            Ok(socket)
        }
    }

    #[tokio::test]
    async fn send_and_receive_round_trips_a_query() {
        use crate::common::SessionId;
        use crate::wire::header::Flags;
        use crate::wire::mri::{Direction, PathCoupledMri};
        use crate::wire::objects::Object;
        use crate::wire::pdu::PduType;
        use crate::wire::Mri;

        let source = PlainUdpSource;
        let a = QModeTransport::bind("127.0.0.1:0".parse().unwrap(), &source).await.unwrap();
        let b = QModeTransport::bind("127.0.0.1:0".parse().unwrap(), &source).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        let pdu = Pdu::new(
            PduType::Query,
            32,
            Flags { s: true, r: true, e: false },
            vec![
                Object::Mri(Mri::PathCoupled(PathCoupledMri {
                    src_addr: "10.0.0.1".parse().unwrap(),
                    dst_addr: "10.0.0.2".parse().unwrap(),
                    src_prefix: 32,
                    dst_prefix: 32,
                    protocol: 17,
                    ds_field: 0,
                    flow_label: 0,
                    spi: 0,
                    src_port: 1,
                    dst_port: 2,
                    direction: Direction::Downstream,
                    nat_traversed: false,
                })),
                Object::SessionId(SessionId::random()),
            ],
        );

        a.send(&pdu, b_addr).await.unwrap();
        let (received, _from) = b.recv().await.unwrap().expect("a valid Q-mode datagram");
        assert_eq!(received.header.pdu_type, PduType::Query);
    }

    #[tokio::test]
    async fn datagram_without_magic_number_is_ignored() {
        let source = PlainUdpSource;
        let a = QModeTransport::bind("127.0.0.1:0".parse().unwrap(), &source).await.unwrap();
        let b = QModeTransport::bind("127.0.0.1:0".parse().unwrap(), &source).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.socket.send_to(&[0u8; 16], b_addr).await.unwrap();
        assert!(b.recv().await.unwrap().is_none());
    }
}
