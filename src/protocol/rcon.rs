//! RCON 세션 (Minecraft 호환)
//!
//! RCON 프로토콜 명세:
//! - TCP 기반 통신
//! - 모든 패킷은 4바이트 패킷 크기 + [ID][타입][페이로드][0x00 0x00]
//! - 인증 후 명령어 송수신

use super::RemoteError;
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::router::{RemoteConsole, RemoteSessionConfig};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type + two terminating NULs
const MIN_PACKET_LEN: usize = 10;
/// Minecraft fragments responses at 4096 bytes of payload
const MAX_PACKET_LEN: usize = 4096 + MIN_PACKET_LEN;
/// Largest command body Minecraft accepts in one packet
const MAX_COMMAND_LEN: usize = 1446;

const AUTH_REQUEST_ID: i32 = 1;
const COMMAND_REQUEST_ID: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: &str) -> Self {
        Self { id, kind, body: body.to_string() }
    }

    /// 전송용 바이트: [크기][ID][타입][페이로드][패딩]
    pub fn encode(&self) -> Result<Vec<u8>, RemoteError> {
        if self.body.as_bytes().contains(&0) {
            return Err(RemoteError::ProtocolError("payload contains a NUL byte".to_string()));
        }
        let len = MIN_PACKET_LEN + self.body.len();
        if len > MAX_PACKET_LEN {
            return Err(RemoteError::ProtocolError(format!("packet too large: {} bytes", len)));
        }

        let mut packet = vec![0u8; 12];
        LittleEndian::write_i32(&mut packet[0..4], len as i32);
        LittleEndian::write_i32(&mut packet[4..8], self.id);
        LittleEndian::write_i32(&mut packet[8..12], self.kind);
        packet.extend_from_slice(self.body.as_bytes());
        packet.extend_from_slice(&[0, 0]);
        Ok(packet)
    }

    /// Parse the part of a packet that follows the size field.
    pub fn decode(frame: &[u8]) -> Result<Self, RemoteError> {
        if frame.len() < MIN_PACKET_LEN {
            return Err(RemoteError::ProtocolError(format!("packet too short: {} bytes", frame.len())));
        }
        let id = LittleEndian::read_i32(&frame[0..4]);
        let kind = LittleEndian::read_i32(&frame[4..8]);
        let payload = &frame[8..];
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(&payload[..end]).into_owned(),
        })
    }
}

pub(crate) async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), RemoteError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = packet.encode()?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| RemoteError::ProtocolError(format!("failed to send packet: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| RemoteError::ProtocolError(format!("failed to send packet: {}", e)))
}

pub(crate) async fn read_packet<R>(reader: &mut R) -> Result<Packet, RemoteError>
where
    R: AsyncRead + Unpin,
{
    let mut size = [0u8; 4];
    reader
        .read_exact(&mut size)
        .await
        .map_err(|e| RemoteError::ProtocolError(format!("failed to read packet size: {}", e)))?;
    let len = LittleEndian::read_i32(&size);
    if len < MIN_PACKET_LEN as i32 || len > MAX_PACKET_LEN as i32 {
        return Err(RemoteError::ProtocolError(format!("invalid packet size: {}", len)));
    }

    let mut frame = vec![0u8; len as usize];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| RemoteError::ProtocolError(format!("failed to read packet data: {}", e)))?;
    Packet::decode(&frame)
}

/// One-shot RCON client.
///
/// Every [`command`](Self::command) call opens its own connection and drops
/// it before returning, whatever the outcome.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    timeout: Duration,
}

impl RemoteSession {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Connect, authenticate, run `text` and return the server's response body.
    pub async fn command(
        &self,
        host: &str,
        port: u16,
        password: &str,
        text: &str,
    ) -> Result<String, RemoteError> {
        if text.len() > MAX_COMMAND_LEN {
            return Err(RemoteError::ProtocolError(format!(
                "command too long: {} bytes (max {})",
                text.len(),
                MAX_COMMAND_LEN
            )));
        }
        match tokio::time::timeout(self.timeout, exchange(host, port, password, text)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.timeout)),
        }
    }
}

impl Default for RemoteSession {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn exchange(host: &str, port: u16, password: &str, text: &str) -> Result<String, RemoteError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| RemoteError::ConnectFailed(format!("{}:{}: {}", host, port, e)))?;
    tracing::debug!("RCON connected to {}:{}", host, port);

    // 인증
    write_packet(&mut stream, &Packet::new(AUTH_REQUEST_ID, SERVERDATA_AUTH, password)).await?;
    loop {
        let packet = read_packet(&mut stream).await?;
        match (packet.kind, packet.id) {
            // some servers send an empty RESPONSE_VALUE before the auth result
            (SERVERDATA_RESPONSE_VALUE, _) => continue,
            (SERVERDATA_AUTH_RESPONSE, -1) => return Err(RemoteError::AuthFailed),
            (SERVERDATA_AUTH_RESPONSE, AUTH_REQUEST_ID) => break,
            (kind, id) => {
                return Err(RemoteError::ProtocolError(format!(
                    "unexpected auth reply (type {}, id {})",
                    kind, id
                )))
            }
        }
    }

    write_packet(&mut stream, &Packet::new(COMMAND_REQUEST_ID, SERVERDATA_EXECCOMMAND, text)).await?;
    loop {
        let packet = read_packet(&mut stream).await?;
        if packet.id == -1 {
            return Err(RemoteError::AuthFailed);
        }
        if packet.id == COMMAND_REQUEST_ID && packet.kind == SERVERDATA_RESPONSE_VALUE {
            tracing::debug!("RCON {}:{} answered '{}'", host, port, text);
            return Ok(packet.body);
        }
        tracing::debug!("Skipping uncorrelated RCON packet (type {}, id {})", packet.kind, packet.id);
    }
}

#[async_trait]
impl RemoteConsole for RemoteSession {
    async fn command(&self, config: &RemoteSessionConfig, text: &str) -> Result<String, RemoteError> {
        RemoteSession::command(self, &config.host, config.port, &config.password, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_packet_layout() {
        let bytes = Packet::new(1, SERVERDATA_AUTH, "pw").encode().unwrap();
        assert_eq!(bytes, vec![12, 0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 0, b'p', b'w', 0, 0]);

        let decoded = Packet::decode(&bytes[4..]).unwrap();
        assert_eq!(decoded, Packet::new(1, SERVERDATA_AUTH, "pw"));
    }

    #[test]
    fn test_packet_rejects_nul_payload() {
        assert!(matches!(
            Packet::new(1, SERVERDATA_EXECCOMMAND, "say \0").encode(),
            Err(RemoteError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_decode_short_frame() {
        assert!(matches!(Packet::decode(&[1, 0, 0, 0]), Err(RemoteError::ProtocolError(_))));
    }

    /// Minimal Minecraft-like RCON server. Reports, per connection, whether the
    /// client closed it after the exchange.
    async fn fake_server(password: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let closed_tx = closed_tx.clone();
                tokio::spawn(async move {
                    let auth = read_packet(&mut socket).await.unwrap();
                    assert_eq!(auth.kind, SERVERDATA_AUTH);
                    if auth.body == password {
                        write_packet(&mut socket, &Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "")).await.unwrap();
                        write_packet(&mut socket, &Packet::new(auth.id, SERVERDATA_AUTH_RESPONSE, "")).await.unwrap();
                        let cmd = read_packet(&mut socket).await.unwrap();
                        let reply = format!("echo: {}", cmd.body);
                        write_packet(&mut socket, &Packet::new(cmd.id, SERVERDATA_RESPONSE_VALUE, &reply)).await.unwrap();
                    } else {
                        write_packet(&mut socket, &Packet::new(-1, SERVERDATA_AUTH_RESPONSE, "")).await.unwrap();
                    }
                    // the client must hang up now
                    let mut rest = Vec::new();
                    let closed = tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut rest))
                        .await
                        .is_ok();
                    let _ = closed_tx.send(closed);
                });
            }
        });
        (addr, closed_rx)
    }

    #[tokio::test]
    async fn test_command_roundtrip() {
        let (addr, mut closed) = fake_server("secret").await;
        let session = RemoteSession::new(Duration::from_secs(5));

        let response = session
            .command("127.0.0.1", addr.port(), "secret", "list")
            .await
            .unwrap();
        assert_eq!(response, "echo: list");
        assert!(closed.recv().await.unwrap());
    }

    #[tokio::test]
    async fn test_auth_failure_releases_connection_every_time() {
        let (addr, mut closed) = fake_server("secret").await;
        let session = RemoteSession::new(Duration::from_secs(5));

        for _ in 0..3 {
            let result = session.command("127.0.0.1", addr.port(), "wrong", "stop").await;
            assert!(matches!(result, Err(RemoteError::AuthFailed)));
            assert!(closed.recv().await.unwrap(), "connection left open after auth failure");
        }
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = RemoteSession::new(Duration::from_secs(5));
        let result = session.command("127.0.0.1", port, "secret", "list").await;
        assert!(matches!(result, Err(RemoteError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let session = RemoteSession::new(Duration::from_millis(200));
        let result = session.command("127.0.0.1", port, "secret", "list").await;
        assert!(matches!(result, Err(RemoteError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_packet(&mut socket).await;
            // size field below the minimum
            socket.write_all(&[3, 0, 0, 0, 1, 2, 3]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let session = RemoteSession::new(Duration::from_secs(5));
        let result = session.command("127.0.0.1", port, "secret", "list").await;
        assert!(matches!(result, Err(RemoteError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_oversized_command_is_rejected_without_connecting() {
        let session = RemoteSession::new(Duration::from_secs(5));
        let text = "a".repeat(MAX_COMMAND_LEN + 1);
        // port 9 (discard) is never contacted
        let result = session.command("127.0.0.1", 9, "secret", &text).await;
        assert!(matches!(result, Err(RemoteError::ProtocolError(_))));
    }
}
