//! UDS transport: the local control-plane boundary between GIST and its
//! NSLPs (spec §4.7, §6). Frames are self-delimiting (see
//! `crate::api::frame::ApiFrame::encode`'s length prefix), so this
//! transport just shuttles raw bytes.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::error::GistError;

pub struct UdsTransport {
    listener: UnixListener,
}

impl UdsTransport {
    pub fn bind(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path).map_err(GistError::Io)?;
        }
        let listener = UnixListener::bind(path).map_err(GistError::Io)?;
        tracing::info!(path = %path.display(), "UDS API transport listening");
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> crate::Result<UdsConnection> {
        let (stream, _addr) = self.listener.accept().await.map_err(GistError::Io)?;
        Ok(UdsConnection { stream })
    }
}

pub struct UdsConnection {
    stream: UnixStream,
}

impl UdsConnection {
    pub async fn connect(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await.map_err(GistError::Io)?;
        Ok(Self { stream })
    }

    pub async fn send_frame(&mut self, frame: &[u8]) -> crate::Result<()> {
        self.stream.write_all(frame).await.map_err(GistError::Io)
    }

    /// Reads exactly one length-prefixed API frame (see `ApiFrame::encode`:
    /// 4-byte length, 4-byte crc32, then the body).
    pub async fn recv_frame(&mut self) -> crate::Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; 8];
        if let Err(e) = self.stream.read_exact(&mut prefix).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(GistError::Io(e));
        }
        let body_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let mut body = vec![0u8; body_len];
        self.stream.read_exact(&mut body).await.map_err(GistError::Io)?;

        let mut full = Vec::with_capacity(8 + body_len);
        full.extend_from_slice(&prefix);
        full.extend_from_slice(&body);
        Ok(Some(full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::frame::{ApiFrame, MessageStatusFrame};

    #[tokio::test]
    async fn frame_round_trips_over_a_socket_pair() {
        let dir = tempfile_dir();
        let path = dir.join("gist.sock");
        let server = UdsTransport::bind(&path).unwrap();

        let path_for_client = path.clone();
        let client_task = tokio::spawn(async move {
            let mut conn = UdsConnection::connect(&path_for_client).await.unwrap();
            let frame = ApiFrame::MessageStatus(MessageStatusFrame {
                reliability: true,
                security: false,
                error_type: 0,
                nslp_message_handle: [3u8; 16],
            });
            conn.send_frame(&frame.encode()).await.unwrap();
        });

        let mut server_conn = server.accept().await.unwrap();
        let received = server_conn.recv_frame().await.unwrap().unwrap();
        let decoded = ApiFrame::decode(&received).unwrap();
        assert_eq!(
            decoded,
            ApiFrame::MessageStatus(MessageStatusFrame {
                reliability: true,
                security: false,
                error_type: 0,
                nslp_message_handle: [3u8; 16],
            })
        );
        client_task.await.unwrap();
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("gist-ntlp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
