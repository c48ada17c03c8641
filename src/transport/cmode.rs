//! C-mode: a messaging association carrying framed GIST PDUs over a
//! reliable, congestion-controlled transport (spec §4.5).
//!
//! Adapted from the teacher's `networking::transport::tcp` module:
//! `TcpConfig`/`TcpTransport`/`TcpConnection` renamed to the GIST MA
//! vocabulary, same bind/accept/connect-with-retry shape. TLS and SCTP
//! are two further profiles a `StackProposal` can select (spec §4.5);
//! this crate implements the TCP profile concretely and recognises but
//! does not originate the other two (see `DESIGN.md`).

use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::GistError;
use crate::wire::pdu::Pdu;

#[derive(Debug, Clone)]
pub struct CModeConfig {
    pub bind_addr: SocketAddr,
    pub nodelay: bool,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

impl Default for CModeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4116".parse().unwrap(),
            nodelay: true,
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_initial_backoff: Duration::from_millis(100),
            reconnect_max_backoff: Duration::from_secs(10),
        }
    }
}

pub struct CModeTransport {
    config: CModeConfig,
    listener: Option<TcpListener>,
}

impl CModeTransport {
    pub fn new(config: CModeConfig) -> Self {
        Self { config, listener: None }
    }

    pub async fn bind(&mut self) -> crate::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| GistError::Network(format!("failed to bind C-mode listener: {e}")))?;
        tracing::info!(addr = %self.config.bind_addr, "C-mode transport listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// The listener's bound address, including the OS-assigned port when
    /// `bind_addr` specified port 0.
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or_else(|| GistError::Network("C-mode listener not initialized".into()))?
            .local_addr()
            .map_err(GistError::Io)
    }

    pub async fn accept(&self) -> crate::Result<CModeConnection> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| GistError::Network("C-mode listener not initialized".into()))?;
        let (stream, peer_addr) = listener
            .accept()
            .await
            .map_err(|e| GistError::Network(format!("failed to accept C-mode connection: {e}")))?;
        configure_socket(&stream, &self.config)?;
        tracing::debug!(%peer_addr, "accepted C-mode connection");
        Ok(CModeConnection::new(stream, peer_addr))
    }

    pub async fn connect(&self, addr: SocketAddr) -> crate::Result<CModeConnection> {
        let mut attempt = 0;
        let mut backoff = self.config.reconnect_initial_backoff;
        loop {
            let outcome = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await;
            let detail = match outcome {
                Ok(Ok(stream)) => {
                    configure_socket(&stream, &self.config)?;
                    tracing::info!(%addr, attempt = attempt + 1, "established C-mode connection");
                    return Ok(CModeConnection::new(stream, addr));
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connection attempt timed out".to_string(),
            };

            attempt += 1;
            if attempt >= self.config.max_reconnect_attempts {
                return Err(GistError::Network(format!(
                    "could not establish C-mode connection to {addr} after {attempt} attempts: {detail}"
                )));
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
        }
    }
}

fn configure_socket(stream: &TcpStream, config: &CModeConfig) -> crate::Result<()> {
    stream.set_nodelay(config.nodelay).map_err(GistError::Io)
}

/// A single C-mode connection. PDUs are length-prefix-free on the wire:
/// the common header's `length_words` field is itself the frame length
/// (spec §4.1), so framing just means reading exactly that many bytes.
pub struct CModeConnection {
    stream: Arc<Mutex<TcpStream>>,
    peer_addr: SocketAddr,
    read_buf: Arc<Mutex<BytesMut>>,
}

impl CModeConnection {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            peer_addr,
            read_buf: Arc::new(Mutex::new(BytesMut::with_capacity(4096))),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&self, pdu: &Pdu) -> crate::Result<()> {
        let encoded = pdu.encode()?;
        let mut stream = self.stream.lock().await;
        stream.write_all(&encoded).await.map_err(GistError::Io)?;
        Ok(())
    }

    /// Reads and decodes the next PDU from the connection. Returns `None`
    /// on clean EOF (peer closed the MA, spec §4.6: torn down, not an
    /// error).
    pub async fn recv(&self) -> crate::Result<Option<Pdu>> {
        let mut stream = self.stream.lock().await;
        let mut buf = self.read_buf.lock().await;

        loop {
            if let Some(pdu) = try_decode_one(&mut buf)? {
                return Ok(Some(pdu));
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.map_err(GistError::Io)?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(GistError::Network("connection closed mid-message".into()));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn try_decode_one(buf: &mut BytesMut) -> crate::Result<Option<Pdu>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let length_words = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = length_words * 4;
    if total < 12 || buf.len() < total {
        return Ok(None);
    }
    let pdu = Pdu::decode(&buf[..total])?;
    buf.advance(total);
    Ok(Some(pdu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SessionId;
    use crate::wire::header::Flags;
    use crate::wire::mri::{Direction, PathCoupledMri};
    use crate::wire::objects::Object;
    use crate::wire::pdu::PduType;
    use crate::wire::Mri;

    fn sample_pdu() -> Pdu {
        Pdu::new(
            PduType::Data,
            32,
            Flags::default(),
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
        )
    }

    #[tokio::test]
    async fn connection_round_trips_a_pdu() {
        let mut server = CModeTransport::new(CModeConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        });
        server.bind().await.unwrap();
        let addr = server.listener.as_ref().unwrap().local_addr().unwrap();

        let client = CModeTransport::new(CModeConfig::default());
        let connect = client.connect(addr);
        let accept = server.accept();
        let (client_conn, server_conn) = tokio::join!(connect, accept);
        let client_conn = client_conn.unwrap();
        let server_conn = server_conn.unwrap();

        let pdu = sample_pdu();
        client_conn.send(&pdu).await.unwrap();
        let received = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(received.header.pdu_type, PduType::Data);
    }

    #[tokio::test]
    async fn clean_close_yields_none() {
        let mut server = CModeTransport::new(CModeConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        });
        server.bind().await.unwrap();
        let addr = server.listener.as_ref().unwrap().local_addr().unwrap();

        let client = CModeTransport::new(CModeConfig::default());
        let connect = client.connect(addr);
        let accept = server.accept();
        let (client_conn, server_conn) = tokio::join!(connect, accept);
        drop(client_conn.unwrap());
        assert!(server_conn.unwrap().recv().await.unwrap().is_none());
    }
}
