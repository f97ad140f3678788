use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;

use dns_types::protocol::types::Message;

use crate::metrics::{DNS_REQUESTS_TOTAL, DNS_RESPONSE_TIME_SECONDS};
use crate::net_util::read_framed_bytes;
use crate::transport::tcp::respond;
use crate::transport::{handle_message, Shared};

/// DNS-over-TLS (RFC 7858): the same length-prefixed framing as plain
/// TCP, carried inside a TLS session instead of a bare socket.
pub async fn listen(
    shared: Shared,
    socket: TcpListener,
    acceptor: TlsAcceptor,
    max_connections: usize,
    idle_timeout: Duration,
) {
    let permits = Arc::new(Semaphore::new(max_connections));
    loop {
        match socket.accept().await {
            Ok((stream, peer)) => {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    tracing::debug!(?peer, "DoT connection limit reached, dropping connection");
                    continue;
                };
                tracing::info!(?peer, "DoT request");
                DNS_REQUESTS_TOTAL.with_label_values(&["dot"]).inc();
                let shared = shared.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_one(shared, tls_stream, peer, idle_timeout).await,
                        Err(error) => tracing::debug!(?peer, ?error, "TLS handshake failed"),
                    }
                    drop(permit);
                });
            }
            Err(error) => tracing::debug!(?error, "DoT accept error"),
        }
    }
}

/// Serve one DoT connection, answering every pipelined query on it in
/// the order received until the peer closes the connection or it goes
/// idle for longer than `idle_timeout`.
async fn serve_one(
    shared: Shared,
    mut stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    peer: std::net::SocketAddr,
    idle_timeout: Duration,
) {
    loop {
        let timer = DNS_RESPONSE_TIME_SECONDS.with_label_values(&["dot"]).start_timer();

        let read_result = match tokio::time::timeout(idle_timeout, read_framed_bytes(&mut stream)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?peer, "DoT connection idle timeout");
                timer.observe_duration();
                return;
            }
        };

        let response = match read_result {
            Ok(bytes) => handle_message(&shared, &bytes).await,
            Err(error) => {
                tracing::debug!(?peer, ?error, "DoT read error, closing connection");
                let response = error.id().map(Message::make_format_error_response);
                if let Some(message) = response {
                    respond(&mut stream, peer, message, "dot").await;
                }
                timer.observe_duration();
                return;
            }
        };

        if let Some(message) = response {
            respond(&mut stream, peer, message, "dot").await;
        }

        timer.observe_duration();
    }
}

/// Build a `TlsAcceptor` from a PEM certificate chain and private key.
pub fn load_acceptor(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> std::io::Result<TlsAcceptor> {
    let config = crate::transport::doh::load_tls_config(cert_path, key_path)?;
    Ok(TlsAcceptor::from(std::sync::Arc::new(config)))
}
