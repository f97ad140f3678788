pub mod doh;
pub mod dot;
pub mod tcp;
pub mod udp;

use std::sync::Arc;

use dns_types::protocol::types::{Message, Opcode, Rcode};
use dns_types::zones::types::ZoneStore;
use tokio::sync::RwLock;

/// Shared state handed to every transport task.
#[derive(Clone)]
pub struct Shared {
    pub zones: Arc<RwLock<ZoneStore>>,
}

/// Parse a raw query, resolve it, and serialise the response. Shared
/// by every transport regardless of how the bytes arrived.
pub async fn handle_message(shared: &Shared, buf: &[u8]) -> Option<Message> {
    match Message::from_octets(buf) {
        Ok(msg) => {
            if msg.header.is_response {
                Some(Message::make_format_error_response(msg.header.id))
            } else if msg.header.opcode != Opcode::Standard {
                let mut response = msg.make_response();
                response.header.rcode = Rcode::NotImplemented;
                Some(response)
            } else {
                let zones = shared.zones.read().await;
                Some(dns_resolver::resolve(&msg, &zones))
            }
        }
        Err(error) => {
            tracing::debug!(?error, "could not parse message");
            error.id().map(Message::make_format_error_response)
        }
    }
}
