use std::net::SocketAddr;
use std::time::Duration;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::web::{Bytes, Query};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use base64::Engine;
use serde::Deserialize;

use dns_types::protocol::types::{Message, RecordType};

use crate::metrics::{DNS_REQUESTS_TOTAL, DNS_RESPONSES_TOTAL, DNS_RESPONSE_TIME_SECONDS};
use crate::transport::{handle_message, Shared};

const MIME_DNS_MESSAGE: &str = "application/dns-message";

/// Maximum size of a DoH request body (RFC 8484 places no hard cap,
/// but an unbounded POST body is a denial-of-service vector); matches
/// the largest message any of our TCP-class transports will carry.
const MAX_REQUEST_BODY_BYTES: usize = 65535;

#[derive(Deserialize)]
struct GetQuery {
    dns: String,
}

#[derive(Clone)]
struct DohConfig {
    request_timeout: Duration,
}

/// DNS-over-HTTPS (RFC 8484). Accepts a query either as a base64url
/// `dns` parameter on GET, or as a raw `application/dns-message` body
/// on POST, and replies with the wire-format response.
pub async fn serve(
    address: SocketAddr,
    shared: Shared,
    tls_config: tokio_rustls::rustls::ServerConfig,
    path: String,
    request_timeout: Duration,
) -> std::io::Result<()> {
    let config = DohConfig { request_timeout };
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(shared.clone()))
            .app_data(web::Data::new(config.clone()))
            .route(&path, web::get().to(get_handler))
            .route(&path, web::post().to(post_handler))
            .route(&path, web::method(actix_web::http::Method::OPTIONS).to(preflight_handler))
    })
    .bind_rustls_0_22(address, tls_config)?
    .run()
    .await
}

/// CORS preflight (RFC 8484 §9 recommends allowing browser-based
/// clients). Responds to `OPTIONS` with the headers a `fetch()` call
/// needs before it will send the real GET/POST.
async fn preflight_handler() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header(("Access-Control-Allow-Origin", "*"))
        .insert_header(("Access-Control-Allow-Methods", "GET, POST"))
        .insert_header(("Access-Control-Allow-Headers", "Content-Type"))
        .insert_header(("Access-Control-Max-Age", "86400"))
        .finish()
}

async fn get_handler(
    shared: web::Data<Shared>,
    config: web::Data<DohConfig>,
    query: Query<GetQuery>,
) -> HttpResponse {
    DNS_REQUESTS_TOTAL.with_label_values(&["doh"]).inc();
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&query.dns) {
        Ok(bytes) => respond(&shared, &bytes, config.request_timeout).await,
        Err(error) => {
            tracing::debug!(?error, "bad base64 in DoH dns= parameter");
            HttpResponse::BadRequest().finish()
        }
    }
}

async fn post_handler(
    shared: web::Data<Shared>,
    config: web::Data<DohConfig>,
    req: HttpRequest,
    body: Bytes,
) -> HttpResponse {
    DNS_REQUESTS_TOTAL.with_label_values(&["doh"]).inc();

    let content_type = req
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(MIME_DNS_MESSAGE) {
        tracing::debug!(?content_type, "DoH POST with wrong content-type");
        return HttpResponse::UnsupportedMediaType().finish();
    }

    if body.len() > MAX_REQUEST_BODY_BYTES {
        tracing::debug!(len = body.len(), "DoH POST body too large");
        return HttpResponse::PayloadTooLarge().finish();
    }

    respond(&shared, &body, config.request_timeout).await
}

async fn respond(shared: &Shared, buf: &[u8], request_timeout: Duration) -> HttpResponse {
    let timer = DNS_RESPONSE_TIME_SECONDS.with_label_values(&["doh"]).start_timer();

    let message = match tokio::time::timeout(request_timeout, handle_message(shared, buf)).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            timer.observe_duration();
            return HttpResponse::BadRequest().finish();
        }
        Err(_) => {
            tracing::debug!("DoH request timed out");
            timer.observe_duration();
            return HttpResponse::GatewayTimeout().finish();
        }
    };

    let result = match message.clone().to_octets() {
        Ok(serialised) => {
            DNS_RESPONSES_TOTAL
                .with_label_values(&[
                    "doh",
                    &message.header.is_authoritative.to_string(),
                    &message.header.is_truncated.to_string(),
                    &message.header.rcode.to_string(),
                ])
                .inc();

            let mut response = HttpResponse::Ok();
            response.content_type(MIME_DNS_MESSAGE);
            if let Some(max_age) = min_ttl(&message) {
                if let Ok(value) = HeaderValue::from_str(&format!("max-age={max_age}")) {
                    response.insert_header((HeaderName::from_static("cache-control"), value));
                }
            }
            response.body(serialised.to_vec())
        }
        Err(error) => {
            tracing::warn!(?error, "could not serialise DoH response");
            HttpResponse::InternalServerError().finish()
        }
    };

    timer.observe_duration();
    result
}

/// The lowest TTL among the real (non-`OPT`) records in a response, to
/// use as the `Cache-Control: max-age` on a successful DoH reply.
/// `None` if the response carries no cacheable records (e.g. REFUSED).
fn min_ttl(message: &Message) -> Option<u32> {
    message
        .answers
        .iter()
        .chain(&message.authority)
        .chain(&message.additional)
        .filter(|rr| rr.rtype_with_data.rtype() != RecordType::OPT)
        .map(|rr| rr.ttl)
        .min()
}

/// Build a rustls `ServerConfig` from a PEM certificate chain and
/// private key, shared between the DoH listener and the DoT acceptor.
pub fn load_tls_config(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> std::io::Result<tokio_rustls::rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(
        cert_path,
    )?))
    .collect::<Result<Vec<_>, _>>()?;

    let key = rustls_pemfile::pkcs8_private_keys(&mut std::io::BufReader::new(
        std::fs::File::open(key_path)?,
    ))
    .next()
    .ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found in key file")
    })??;

    tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key.into())
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::{QueryClass, QueryType, Question, RecordClass};

    use super::*;

    #[test]
    fn message_mime_type_is_standard() {
        assert_eq!(MIME_DNS_MESSAGE, "application/dns-message");
    }

    #[test]
    fn min_ttl_ignores_opt_and_picks_the_lowest() {
        let mut message = Message::from_question(
            1,
            Question {
                name: domain("example.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        message.answers.push(a_record("example.com.", Ipv4Addr::new(192, 0, 2, 1)));
        let mut low_ttl = a_record("example.com.", Ipv4Addr::new(192, 0, 2, 2));
        low_ttl.ttl = 60;
        message.additional.push(low_ttl);

        assert_eq!(Some(60), min_ttl(&message));
    }

    #[test]
    fn min_ttl_is_none_without_records() {
        let message = Message::from_question(
            1,
            Question {
                name: domain("example.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        assert_eq!(None, min_ttl(&message));
    }
}
