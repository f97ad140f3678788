use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use dns_types::protocol::types::{
    DomainName, Message, QueryClass, QueryType, Question, RecordClass, RecordType, ResourceRecord,
};
use dns_types::zones::types::Zone;

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Send a single DNS query and print the response.
struct Args {
    /// Domain name to query
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Server to query
    #[clap(short, long, default_value = "127.0.0.1")]
    server: Ipv4Addr,

    /// Server port
    #[clap(short, long, default_value_t = 53)]
    port: u16,

    /// Use TCP instead of UDP
    #[clap(long, action(clap::ArgAction::SetTrue))]
    tcp: bool,

    /// How long to wait for a response
    #[clap(long, default_value_t = 5)]
    timeout_seconds: u64,
}

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        let rdata = Zone::default().serialise_rdata(&rr.rtype_with_data);
        println!("{}\t{}\t{}\t{}\t{}", rr.name, rr.ttl, rr.rclass, rr.rtype_with_data.rtype(), rdata);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let target = SocketAddr::from((args.server, args.port));
    let timeout = Duration::from_secs(args.timeout_seconds);

    let question = Question {
        name: args.domain,
        qtype: args.qtype,
        qclass: QueryClass::Record(RecordClass::IN),
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.qclass, question.qtype);

    let id = rand::thread_rng().gen();
    let query = Message::from_question(id, question);
    let wire = match query.to_octets() {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("could not serialise query: {error}");
            process::exit(1);
        }
    };

    let response = if args.tcp {
        tokio::time::timeout(timeout, query_tcp(target, &wire)).await
    } else {
        tokio::time::timeout(timeout, query_udp(target, &wire)).await
    };

    let response = match response {
        Ok(Ok(message)) => message,
        Ok(Err(error)) => {
            eprintln!("query failed: {error}");
            process::exit(1);
        }
        Err(_) => {
            eprintln!("query timed out after {}s", args.timeout_seconds);
            process::exit(1);
        }
    };

    if response.header.is_truncated && !args.tcp {
        eprintln!(";; response truncated, retrying over TCP");
        match tokio::time::timeout(timeout, query_tcp(target, &wire)).await {
            Ok(Ok(message)) => return print_response(&message),
            Ok(Err(error)) => {
                eprintln!("TCP retry failed: {error}");
                process::exit(1);
            }
            Err(_) => {
                eprintln!("TCP retry timed out");
                process::exit(1);
            }
        }
    }

    print_response(&response);
}

fn print_response(response: &Message) {
    println!(
        "\n;; opcode: {:?}, status: {:?}, id: {}",
        response.header.opcode, response.header.rcode, response.header.id
    );
    println!(";; flags: aa={} tc={}", response.header.is_authoritative, response.header.is_truncated);

    print_section("ANSWER", &response.answers);
    print_section("AUTHORITY", &response.authority);
    print_section("ADDITIONAL", &response.additional);
}

async fn query_udp(target: SocketAddr, wire: &[u8]) -> std::io::Result<Message> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(target).await?;
    socket.send(wire).await?;

    let mut buf = vec![0u8; 65536];
    let size = socket.recv(&mut buf).await?;
    Message::from_octets(&buf[..size])
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
}

async fn query_tcp(target: SocketAddr, wire: &[u8]) -> std::io::Result<Message> {
    let mut stream = TcpStream::connect(target).await?;

    let len = u16::try_from(wire.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "query too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(wire).await?;

    let size = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; size];
    stream.read_exact(&mut buf).await?;
    Message::from_octets(&buf)
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
}
