//! socksrelay server binary

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use socksrelay::config::{CliOverrides, ConfigManager};
use socksrelay::{ConnectionManager, ShutdownCoordinator};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "socksrelay")]
#[command(about = "SOCKS4/4a and SOCKS5 proxy server with UDP relay")]
#[command(version)]
#[command(long_about = "
SOCKS4/4a and SOCKS5 proxy server with UDP relay.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file (.toml or .json)
4. Built-in defaults

Environment variables:
  SOCKS5_LISTEN_PORT, SOCKS5_TCP_LISTEN, SOCKS5_UDP_LISTEN,
  SOCKS5_UDP_ADVERTISED_IP, SOCKS5_USERNAME, SOCKS5_PASSWORD,
  SOCKS5_TCP_TIMEOUT, SOCKS5_UDP_TIMEOUT, SOCKS5_DIAL_TIMEOUT (e.g. 90s),
  SOCKS5_LOG_LEVEL
")]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(long, help = "TCP listen address (e.g. 0.0.0.0:1080)")]
    pub tcp_listen: Option<SocketAddr>,

    #[arg(long, help = "UDP relay listen address (e.g. 0.0.0.0:1080)")]
    pub udp_listen: Option<SocketAddr>,

    #[arg(short, long, help = "Port used when a listen address is not given")]
    pub port: Option<u16>,

    #[arg(long, help = "IP advertised to UDP ASSOCIATE clients")]
    pub udp_advertised_ip: Option<IpAddr>,

    #[arg(long, help = "Username required from SOCKS5 clients")]
    pub username: Option<String>,

    #[arg(long, help = "Password required from SOCKS5 clients")]
    pub password: Option<String>,

    #[arg(long, help = "Relay idle timeout in seconds, 0 disables it")]
    pub tcp_timeout: Option<u64>,

    #[arg(long, help = "UDP session idle timeout in seconds")]
    pub udp_timeout: Option<u64>,

    #[arg(long, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

impl CliArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            tcp_listen: self.tcp_listen,
            udp_listen: self.udp_listen,
            port: self.port,
            udp_advertised_ip: self.udp_advertised_ip,
            username: self.username.clone(),
            password: self.password.clone(),
            tcp_timeout_secs: self.tcp_timeout,
            udp_timeout_secs: self.udp_timeout,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = ConfigManager::load_from_file(&args.config)?;
    ConfigManager::apply_env(&mut config)?;
    config.merge_with_cli_args(&args.overrides());
    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&config.logging.level, args.verbose);

    if args.validate_config {
        println!("Configuration is valid");
        println!("  TCP listen:     {}", config.server.tcp_listen_addr());
        println!("  UDP listen:     {}", config.server.udp_listen_addr());
        println!("  TCP timeout:    {:?}", config.server.tcp_timeout);
        println!("  UDP timeout:    {:?}", config.server.udp_timeout);
        println!(
            "  Authentication: {}",
            if config.auth.is_enabled() { "username/password" } else { "none" }
        );
        return Ok(());
    }

    info!("Starting socksrelay v{}", env!("CARGO_PKG_VERSION"));

    let mut manager = ConnectionManager::new(Arc::new(config));
    manager.bind().await?;
    let manager = Arc::new(manager);

    let mut server = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("Server error: {:#}", e);
            }
        })
    };

    let coordinator = ShutdownCoordinator::for_manager(&manager, SHUTDOWN_TIMEOUT);
    let server_done = tokio::select! {
        result = coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
            false
        }
        result = &mut server => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
            true
        }
    };

    coordinator.shutdown_connection_manager(&manager).await;

    if !server_done {
        if let Err(e) = server.await {
            if !e.is_cancelled() {
                error!("Server task failed: {}", e);
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level; `-v` forces debug.
fn init_tracing(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
