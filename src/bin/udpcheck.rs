//! udpcheck: resolve one name over DNS through a SOCKS5 server's UDP relay.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use socksrelay::client::Socks5Client;
use socksrelay::config::ClientConfig;

/// A query for the A record of `txthinking.com`.
const DNS_QUERY: [u8; 32] = [
    0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a, b't', b'x',
    b't', b'h', b'i', b'n', b'k', b'i', b'n', b'g', 0x03, b'c', b'o', b'm', 0x00, 0x00, 0x01,
    0x00, 0x01,
];

#[derive(Parser, Debug)]
#[command(name = "udpcheck")]
#[command(about = "Check a SOCKS5 server's UDP relay with a DNS query")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:1080", help = "SOCKS5 server address")]
    addr: String,

    #[arg(long, default_value = "8.8.8.8:53", help = "DNS server reached through the relay")]
    target: String,

    #[arg(long, default_value = "", help = "SOCKS5 username")]
    username: String,

    #[arg(long, default_value = "", help = "SOCKS5 password")]
    password: String,

    #[arg(long, default_value_t = 5, help = "Timeout in seconds")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let config = ClientConfig {
        tcp_timeout: timeout,
        udp_timeout: timeout,
        ..ClientConfig::new(args.addr.as_str()).with_credentials(args.username, args.password)
    };

    let client = Socks5Client::new(config);
    let conn = client
        .udp_associate(&args.target)
        .await
        .with_context(|| format!("UDP associate via {}", args.addr))?;

    conn.send(&DNS_QUERY).await.context("send query")?;

    let mut buf = [0u8; 512];
    let n = conn.recv(&mut buf).await.context("read answer")?;
    if n < DNS_QUERY.len() + 4 {
        bail!("short DNS answer ({} bytes)", n);
    }

    let ip = Ipv4Addr::new(buf[n - 4], buf[n - 3], buf[n - 2], buf[n - 1]);
    println!("{}", ip);
    Ok(())
}
