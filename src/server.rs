//! The TCP listener and the per-connection pipeline:
//! legacy sniff, then frame decoding, then the state machine.
//!
//! Every accepted connection gets its own task and owns its whole session
//! state; the only thing shared between connections is the read-only
//! properties snapshot.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config_loader::PingProperties;
use crate::error::PingError;
use crate::framing::{frame, FrameDecoder};
use crate::handler::{Action, Session};
use crate::legacy;

/// Connections that go quiet for this long are dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(20);

const READ_BUFFER_SIZE: usize = 2048;

/// Binds the configured address and serves list pings until the process
/// exits.
pub async fn run(properties: Arc<PingProperties>) -> io::Result<()> {
    let listener = TcpListener::bind(properties.bind_address()?).await?;
    info!("Successfully bound to: {}", listener.local_addr()?);
    serve(listener, properties).await
}

/// The accept loop. A connection's fault is logged by its own task and
/// never takes this loop down.
pub async fn serve(listener: TcpListener, properties: Arc<PingProperties>) -> io::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to disable Nagle for {}: {}", peer, e);
        }
        let properties = properties.clone();
        tokio::spawn(async move {
            info!("{} connected to the server.", peer);
            match handle_connection(stream, properties).await {
                Ok(()) => info!("{} disconnected from the server.", peer),
                Err(e) => error!("{} dropped: {}", peer, e),
            }
        });
    }
}

async fn read_chunk(stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize, PingError> {
    match timeout(READ_TIMEOUT, stream.read(buf)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PingError::Timeout),
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    properties: Arc<PingProperties>,
) -> Result<(), PingError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let n = read_chunk(&mut stream, &mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    // Only the very first chunk can be a legacy probe; on a mismatch the
    // untouched bytes fall through to the framed path below.
    if let Some(reply) = legacy::inspect(&buf[..n], &properties) {
        stream.write_all(&reply).await?;
        stream.flush().await?;
        return Ok(());
    }

    let mut decoder = FrameDecoder::new();
    decoder.extend(&buf[..n]);
    let mut session = Session::new(properties);

    loop {
        while let Some(packet) = decoder.next_frame()? {
            match session.handle(&packet)? {
                Action::Continue => {}
                Action::Reply(payload) => {
                    stream.write_all(&frame(&payload)).await?;
                    stream.flush().await?;
                }
                Action::ReplyAndClose(payload) => {
                    // Write first, then let the connection drop.
                    stream.write_all(&frame(&payload)).await?;
                    stream.flush().await?;
                    return Ok(());
                }
            }
        }
        let n = read_chunk(&mut stream, &mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::{write_byte_array, write_varint};
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    async fn spawn_responder(tweak: impl FnOnce(&mut PingProperties)) -> SocketAddr {
        let mut properties = PingProperties::default();
        tweak(&mut properties);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(properties)));
        addr
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        frame(payload)
    }

    fn handshake(next: i32) -> Vec<u8> {
        let mut payload = Vec::new();
        write_varint(0x00, &mut payload);
        write_varint(47, &mut payload);
        write_byte_array(b"localhost", &mut payload);
        payload.extend_from_slice(&25565u16.to_be_bytes());
        write_varint(next, &mut payload);
        framed(&payload)
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut length: usize = 0;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            length |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    fn status_json(payload: &[u8]) -> Value {
        assert_eq!(payload[0], 0x00);
        let mut cursor = std::io::Cursor::new(&payload[1..]);
        let data = crate::varint::read_byte_array(&mut cursor, usize::MAX).unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn status_exchange_over_a_socket() {
        let addr = spawn_responder(|p| {
            p.message_of_the_day = Value::String("hi".into());
        })
        .await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&handshake(1)).await.unwrap();
        stream.write_all(&framed(&[0x00])).await.unwrap();

        let document = status_json(&read_frame(&mut stream).await);
        assert_eq!(document["version"]["protocol"], -1);
        assert_eq!(document["description"], json!(["hi"]));

        // The connection stayed open for the latency ping.
        let mut ping = vec![0x01];
        ping.extend_from_slice(&0x1122334455667788i64.to_be_bytes());
        stream.write_all(&framed(&ping)).await.unwrap();
        assert_eq!(read_frame(&mut stream).await, ping);
    }

    #[tokio::test]
    async fn coalesced_handshake_and_request_still_work() {
        let addr = spawn_responder(|_| {}).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Handshake and status request in one write, like real clients do.
        let mut burst = handshake(1);
        burst.extend_from_slice(&framed(&[0x00]));
        stream.write_all(&burst).await.unwrap();

        let document = status_json(&read_frame(&mut stream).await);
        assert_eq!(document["version"]["protocol"], -1);
    }

    #[tokio::test]
    async fn login_attempt_gets_disconnected() {
        let addr = spawn_responder(|p| {
            p.disconnect_message = Value::String("go away".into());
        })
        .await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&handshake(2)).await.unwrap();
        let payload = read_frame(&mut stream).await;
        assert_eq!(status_json(&payload), json!(["go away"]));

        // Nothing more is accepted; the server closes the connection.
        assert!(read_to_eof(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn legacy_short_ping_is_answered_raw() {
        let addr = spawn_responder(|p| {
            p.legacy_message_of_the_day = "old hello".into();
        })
        .await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0xFE]).await.unwrap();
        let reply = read_to_eof(&mut stream).await;

        assert_eq!(reply[0], 0xFF);
        let units = u16::from_be_bytes([reply[1], reply[2]]) as usize;
        let data: Vec<u16> = reply[3..3 + units * 2]
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(
            String::from_utf16(&data).unwrap(),
            "old hello\u{a7}-1\u{a7}-1"
        );
    }

    #[tokio::test]
    async fn legacy_join_is_kicked_and_closed() {
        let addr = spawn_responder(|p| {
            p.legacy_disconnect_message = "not today".into();
        })
        .await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut chunk = vec![0x02, 61];
        let username: Vec<u8> = "herp".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let host: Vec<u8> = "localhost"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        chunk.extend_from_slice(&4i16.to_be_bytes());
        chunk.extend_from_slice(&username);
        chunk.extend_from_slice(&9i16.to_be_bytes());
        chunk.extend_from_slice(&host);
        chunk.extend_from_slice(&25565u32.to_be_bytes());
        stream.write_all(&chunk).await.unwrap();

        let reply = read_to_eof(&mut stream).await;
        assert_eq!(reply[0], 0xFF);
        let units = u16::from_be_bytes([reply[1], reply[2]]) as usize;
        let data: Vec<u16> = reply[3..3 + units * 2]
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(String::from_utf16(&data).unwrap(), "not today");
    }

    #[tokio::test]
    async fn unknown_message_closes_without_a_reply() {
        let addr = spawn_responder(|_| {}).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&framed(&[0x7F])).await.unwrap();
        assert!(read_to_eof(&mut stream).await.is_empty());
    }
}
