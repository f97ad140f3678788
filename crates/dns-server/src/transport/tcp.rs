use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use dns_types::protocol::types::Message;

use crate::metrics::{DNS_REQUESTS_TOTAL, DNS_RESPONSES_TOTAL, DNS_RESPONSE_TIME_SECONDS};
use crate::net_util::{read_framed_bytes, send_framed_bytes};
use crate::transport::{handle_message, Shared};

pub async fn listen(
    shared: Shared,
    socket: TcpListener,
    max_connections: usize,
    idle_timeout: Duration,
) {
    let permits = Arc::new(Semaphore::new(max_connections));
    loop {
        match socket.accept().await {
            Ok((stream, peer)) => {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    tracing::debug!(?peer, "TCP connection limit reached, dropping connection");
                    continue;
                };
                tracing::info!(?peer, "TCP request");
                DNS_REQUESTS_TOTAL.with_label_values(&["tcp"]).inc();
                let shared = shared.clone();
                tokio::spawn(async move {
                    serve_one(shared, stream, peer, idle_timeout).await;
                    drop(permit);
                });
            }
            Err(error) => tracing::debug!(?error, "TCP accept error"),
        }
    }
}

/// Serve one TCP connection, answering every pipelined query on it in
/// the order received (RFC 1035 §4.2.2) until the peer closes the
/// connection or it goes idle for longer than `idle_timeout`.
async fn serve_one(
    shared: Shared,
    mut stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    idle_timeout: Duration,
) {
    loop {
        let timer = DNS_RESPONSE_TIME_SECONDS.with_label_values(&["tcp"]).start_timer();

        let read_result = match tokio::time::timeout(idle_timeout, read_framed_bytes(&mut stream)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?peer, "TCP connection idle timeout");
                timer.observe_duration();
                return;
            }
        };

        let response = match read_result {
            Ok(bytes) => handle_message(&shared, &bytes).await,
            Err(error) => {
                tracing::debug!(?peer, ?error, "TCP read error, closing connection");
                let response = error.id().map(Message::make_format_error_response);
                if let Some(message) = response {
                    respond(&mut stream, peer, message, "tcp").await;
                }
                timer.observe_duration();
                return;
            }
        };

        if let Some(message) = response {
            respond(&mut stream, peer, message, "tcp").await;
        }

        timer.observe_duration();
    }
}

/// Serialise and send a response over a framed stream (shared between
/// the plain-TCP and DoT transports).
pub async fn respond<S: tokio::io::AsyncWrite + Unpin>(
    stream: &mut S,
    peer: std::net::SocketAddr,
    message: Message,
    transport: &str,
) {
    match message.clone().to_octets() {
        Ok(mut serialised) => {
            DNS_RESPONSES_TOTAL
                .with_label_values(&[
                    transport,
                    &message.header.is_authoritative.to_string(),
                    &message.header.is_truncated.to_string(),
                    &message.header.rcode.to_string(),
                ])
                .inc();
            if let Err(error) = send_framed_bytes(stream, &mut serialised).await {
                tracing::debug!(?peer, ?error, "send error");
            }
        }
        Err(error) => tracing::warn!(?peer, ?error, "could not serialise response"),
    }
}
