use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::metrics::{DNS_REQUESTS_TOTAL, DNS_RESPONSES_TOTAL, DNS_RESPONSE_TIME_SECONDS};
use crate::net_util::send_udp_bytes_to;
use crate::transport::{handle_message, Shared};

/// The UDP payload size we accept and reply with when the requestor
/// didn't negotiate anything bigger via EDNS0 (RFC 1035 §4.2.1).
const DEFAULT_UDP_PAYLOAD_SIZE: usize = 512;

pub async fn listen(shared: Shared, socket: UdpSocket, edns_udp_max: u16) {
    let (tx, mut rx) = mpsc::channel(32);
    let mut buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            Ok((size, peer)) = socket.recv_from(&mut buf) => {
                tracing::info!(?peer, "UDP request");
                DNS_REQUESTS_TOTAL.with_label_values(&["udp"]).inc();
                let bytes = buf[..size].to_vec();
                let shared = shared.clone();
                let reply = tx.clone();
                tokio::spawn(async move {
                    let timer = DNS_RESPONSE_TIME_SECONDS.with_label_values(&["udp"]).start_timer();
                    if let Some(response) = handle_message(&shared, &bytes).await {
                        let _ = reply.send((response, peer, timer)).await;
                    }
                });
            }

            Some((message, peer, timer)) = rx.recv() => {
                match message.clone().to_octets() {
                    Ok(mut serialised) => {
                        let payload_size = message
                            .edns()
                            .map_or(DEFAULT_UDP_PAYLOAD_SIZE, |e| e.udp_payload_size as usize)
                            .min(edns_udp_max as usize);

                        DNS_RESPONSES_TOTAL
                            .with_label_values(&[
                                "udp",
                                &message.header.is_authoritative.to_string(),
                                &message.header.is_truncated.to_string(),
                                &message.header.rcode.to_string(),
                            ])
                            .inc();

                        if let Err(error) =
                            send_udp_bytes_to(&socket, peer, &mut serialised, payload_size).await
                        {
                            tracing::debug!(?peer, ?error, "UDP send error");
                        }
                    }
                    Err(error) => tracing::warn!(?peer, ?error, "could not serialise response"),
                }
                timer.observe_duration();
            }
        }
    }
}
