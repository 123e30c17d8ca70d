//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socksrelay::config::ClientConfig;
use socksrelay::{Config, ConnectionManager};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

pub struct TestServer {
    pub manager: Arc<ConnectionManager>,
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
}

impl TestServer {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            udp_timeout: Duration::from_secs(3),
            ..ClientConfig::new(self.tcp_addr.to_string())
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.manager.initiate_shutdown();
    }
}

/// Config listening on ephemeral loopback ports.
pub fn local_config() -> Config {
    let mut config = Config::default();
    config.server.tcp_listen = Some("127.0.0.1:0".parse().unwrap());
    config.server.udp_listen = Some("127.0.0.1:0".parse().unwrap());
    config
}

pub async fn start_server(config: Config) -> TestServer {
    let mut manager = ConnectionManager::new(Arc::new(config));
    let (tcp_addr, udp_addr) = manager.bind().await.unwrap();
    let manager = Arc::new(manager);

    let runner = Arc::clone(&manager);
    tokio::spawn(async move { runner.run().await });

    TestServer {
        manager,
        tcp_addr,
        udp_addr,
    }
}

pub async fn tcp_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

pub async fn udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
