use actix_web::{App, HttpResponse, HttpServer};
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::LazyLock;

pub const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.0010, 0.0025, 0.0050, 0.0075, 0.0100, 0.0250, 0.0500, 0.0750, 0.1000,
    0.2500, 0.5000, 0.7500, 1.0000,
];

pub static DNS_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "dns_requests_total",
            "Total number of DNS requests received, whether valid or invalid."
        ),
        &["transport"]
    )
    .unwrap()
});

pub static DNS_RESPONSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!("dns_responses_total", "Total number of DNS responses sent."),
        &["transport", "aa", "tc", "rcode"]
    )
    .unwrap()
});

pub static DNS_RESPONSE_TIME_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "dns_response_time_seconds",
            "Response time of DNS requests, whether valid or invalid.",
            RESPONSE_TIME_BUCKETS.to_vec()
        ),
        &["transport"]
    )
    .unwrap()
});

pub static DNS_QUESTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "dns_questions_total",
            "Total number of DNS questions received (a request may have multiple questions)."
        ),
        &["qtype", "qclass"]
    )
    .unwrap()
});

async fn get_metrics() -> HttpResponse {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(body) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(body),
        Err(error) => HttpResponse::InternalServerError().body(error.to_string()),
    }
}

pub async fn serve(address: SocketAddr) -> std::io::Result<()> {
    HttpServer::new(|| App::new().route("/metrics", actix_web::web::get().to(get_metrics)))
        .bind(address)?
        .run()
        .await
}
