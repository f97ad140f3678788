use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

/// Read a DNS message from a stream which uses the TCP/DoT framing: a
/// big-endian `u16` length prefix followed by that many bytes of
/// wire-format message.
pub async fn read_framed_bytes<S: AsyncRead + Unpin>(stream: &mut S) -> Result<BytesMut, TcpError> {
    let size = stream
        .read_u16()
        .await
        .map_err(|error| TcpError::IO { id: None, error })?;
    let expected = size as usize;
    let mut bytes = BytesMut::with_capacity(expected);
    while bytes.len() < expected {
        match stream.read_buf(&mut bytes).await {
            Ok(0) => {
                let id = id_of(&bytes);
                return Err(TcpError::TooShort {
                    id,
                    expected,
                    actual: bytes.len(),
                });
            }
            Ok(_) => (),
            Err(error) => {
                let id = id_of(&bytes);
                return Err(TcpError::IO { id, error });
            }
        }
    }
    Ok(bytes)
}

fn id_of(bytes: &[u8]) -> Option<u16> {
    if bytes.len() >= 2 {
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    } else {
        None
    }
}

#[derive(Debug)]
pub enum TcpError {
    TooShort {
        id: Option<u16>,
        expected: usize,
        actual: usize,
    },
    IO {
        id: Option<u16>,
        error: io::Error,
    },
}

impl TcpError {
    pub fn id(&self) -> Option<u16> {
        match self {
            TcpError::TooShort { id, .. } | TcpError::IO { id, .. } => *id,
        }
    }
}

/// Write a serialised message to a length-prefixed stream (TCP/DoT),
/// truncating and setting the `TC` bit if it doesn't fit in a `u16`.
pub async fn send_framed_bytes<S: AsyncWrite + Unpin>(
    stream: &mut S,
    bytes: &mut [u8],
) -> io::Result<()> {
    debug_assert!(bytes.len() >= 12, "message too short to have a header");

    let len = if let Ok(len) = u16::try_from(bytes.len()) {
        bytes[2] &= 0b1111_1101;
        len
    } else {
        bytes[2] |= 0b0000_0010;
        u16::MAX
    };

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes[..(len as usize)]).await?;
    Ok(())
}

/// Write a serialised message to a UDP socket, truncating to 512
/// bytes and setting the `TC` bit if the response doesn't fit (RFC
/// 1035 §4.2.1), unless EDNS0 negotiated a larger payload size.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &mut [u8],
    max_payload_size: usize,
) -> io::Result<()> {
    debug_assert!(bytes.len() >= 12, "message too short to have a header");

    if bytes.len() > max_payload_size {
        bytes[2] |= 0b0000_0010;
        sock.send_to(&bytes[..max_payload_size], target).await?;
    } else {
        bytes[2] &= 0b1111_1101;
        sock.send_to(bytes, target).await?;
    }

    Ok(())
}
