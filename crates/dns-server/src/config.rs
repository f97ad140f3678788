use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// A minimal, authoritative-only DNS server speaking UDP, TCP, DNS-over-TLS,
/// and DNS-over-HTTPS.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Address to listen for UDP and TCP queries on.
    #[arg(long, env, default_value = "0.0.0.0")]
    pub address: Ipv4Addr,

    /// Port for plain UDP and TCP DNS.
    #[arg(long, env, default_value_t = 53)]
    pub port: u16,

    /// Zone file(s) to load. Can be given multiple times.
    #[arg(long, env)]
    pub zone_file: Vec<PathBuf>,

    /// Directory of zone files to load (all files in it, non-recursively).
    #[arg(long, env)]
    pub zones_dir: Vec<PathBuf>,

    /// Poll interval, in seconds, for checking zone files for changes.
    /// Set to 0 to disable hot-reload.
    #[arg(long, env, default_value_t = 30)]
    pub zone_reload_interval_seconds: u64,

    /// Enable DNS-over-TLS on `dot_port`. Requires `tls_cert`/`tls_key`.
    #[arg(long, env, default_value_t = false)]
    pub enable_dot: bool,

    /// Port for DNS-over-TLS.
    #[arg(long, env, default_value_t = 853)]
    pub dot_port: u16,

    /// Enable DNS-over-HTTPS on `doh_port`. Requires `tls_cert`/`tls_key`.
    #[arg(long, env, default_value_t = false)]
    pub enable_doh: bool,

    /// Port for DNS-over-HTTPS.
    #[arg(long, env, default_value_t = 443)]
    pub doh_port: u16,

    /// URL path the DoH endpoint is served on.
    #[arg(long, env, default_value = "/dns-query")]
    pub doh_path: String,

    /// Maximum number of simultaneous TCP-class (TCP/DoT) connections.
    #[arg(long, env, default_value_t = 256)]
    pub max_connections: usize,

    /// Idle timeout, in seconds, for a plain TCP connection between
    /// pipelined queries before it is closed.
    #[arg(long, env, default_value_t = 30)]
    pub tcp_idle_timeout_secs: u64,

    /// Idle timeout, in seconds, for a DNS-over-TLS connection between
    /// pipelined queries before it is closed.
    #[arg(long, env, default_value_t = 300)]
    pub dot_idle_timeout_secs: u64,

    /// Timeout, in seconds, for a single DNS-over-HTTPS request.
    #[arg(long, env, default_value_t = 10)]
    pub doh_request_timeout_secs: u64,

    /// Maximum UDP payload size we advertise in our own EDNS0 OPT
    /// records, and the ceiling we apply to a requestor's advertised
    /// size when deciding whether a UDP response must be truncated.
    #[arg(long, env, default_value_t = 1232)]
    pub edns_udp_max: u16,

    /// PEM-encoded certificate chain, required by `--enable-dot`/`--enable-doh`.
    #[arg(long, env)]
    pub tls_cert: Option<PathBuf>,

    /// PEM-encoded private key, required by `--enable-dot`/`--enable-doh`.
    #[arg(long, env)]
    pub tls_key: Option<PathBuf>,

    /// Address to serve Prometheus metrics on. Set to disable.
    #[arg(long, env)]
    pub metrics_address: Option<std::net::SocketAddr>,
}

impl Args {
    /// Whether any TLS-backed transport was requested, in which case
    /// `tls_cert`/`tls_key` must both be present.
    pub fn needs_tls(&self) -> bool {
        self.enable_dot || self.enable_doh
    }
}
