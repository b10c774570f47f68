use async_trait::async_trait;
use log::{info, warn};
use std::io;
use std::sync::Arc;

use crate::types::Endpoint;

/// One datagram channel to the relay controller.
/// This is the HAL-level interface; the command vocabulary lives in comms.rs.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to the controller.
    async fn send(&self, data: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram from the controller. Callers bound this
    /// with a timeout.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens transports for an endpoint. Each call yields a fresh handle that is
/// released when its last owner drops it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> io::Result<Arc<dyn DatagramTransport>>;
}

// ============================================================================
// UDP Implementation
// ============================================================================

pub mod udp {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
    use tokio::net::{lookup_host, UdpSocket};

    /// UDP socket connected to the controller, so only its datagrams are read.
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        pub async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
            let peer = lookup_host((endpoint.host.as_str(), endpoint.port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", endpoint))
                })?;

            let local: SocketAddr = if peer.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(peer).await?;
            info!("UDP link to controller at {} (local {})", peer, socket.local_addr()?);

            Ok(Self { socket })
        }
    }

    #[async_trait]
    impl DatagramTransport for UdpTransport {
        async fn send(&self, data: &[u8]) -> io::Result<()> {
            self.socket.send(data).await.map(|_| ())
        }

        async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.socket.recv(buf).await
        }
    }

    pub struct UdpConnector;

    #[async_trait]
    impl Connector for UdpConnector {
        async fn open(&self, endpoint: &Endpoint) -> io::Result<Arc<dyn DatagramTransport>> {
            Ok(Arc::new(UdpTransport::connect(endpoint).await?))
        }
    }
}

// ============================================================================
// Mock Implementation (for development and testing without a controller)
// ============================================================================

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Responder = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

    pub struct MockTransport {
        tx_log: Mutex<Vec<(Instant, String)>>,
        rx_inject: mpsc::UnboundedSender<Vec<u8>>,
        rx_queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        responder: Option<Responder>,
        fail_sends: AtomicBool,
    }

    impl MockTransport {
        /// A controller that never answers.
        pub fn silent() -> Self {
            let (rx_inject, rx_queue) = mpsc::unbounded_channel();
            Self {
                tx_log: Mutex::new(Vec::new()),
                rx_inject,
                rx_queue: tokio::sync::Mutex::new(rx_queue),
                responder: None,
                fail_sends: AtomicBool::new(false),
            }
        }

        /// A controller that answers every datagram with the replies `f` returns.
        pub fn with_responder(f: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
            Self {
                responder: Some(Box::new(f)),
                ..Self::silent()
            }
        }

        /// A controller that acknowledges everything with "success".
        pub fn acknowledging() -> Self {
            Self::with_responder(|cmd| match cmd {
                "ping" => vec!["pong".to_string()],
                _ => vec!["success".to_string()],
            })
        }

        /// Inject a datagram to be received (for testing).
        pub fn inject_rx(&self, data: impl Into<Vec<u8>>) {
            let _ = self.rx_inject.send(data.into());
        }

        /// Make subsequent sends fail with a transport error.
        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        /// Commands sent so far, in order.
        pub fn sent(&self) -> Vec<String> {
            self.tx_log.lock().unwrap().iter().map(|(_, cmd)| cmd.clone()).collect()
        }

        /// Commands sent so far with the instant each left.
        pub fn sent_at(&self) -> Vec<(Instant, String)> {
            self.tx_log.lock().unwrap().clone()
        }

        pub fn clear_sent(&self) {
            self.tx_log.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl DatagramTransport for MockTransport {
        async fn send(&self, data: &[u8]) -> io::Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
            }
            let cmd = String::from_utf8_lossy(data).into_owned();
            info!("[MOCK UDP] TX {:?}", cmd);
            if let Some(responder) = &self.responder {
                for reply in responder(&cmd) {
                    self.inject_rx(reply);
                }
            }
            self.tx_log.lock().unwrap().push((Instant::now(), cmd));
            Ok(())
        }

        async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut queue = self.rx_queue.lock().await;
            match queue.recv().await {
                Some(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "mock closed")),
            }
        }
    }

    /// Hands out scripted transports, one per open; the last one is reused
    /// once the script runs out.
    pub struct MockConnector {
        transports: Vec<Arc<MockTransport>>,
        opens: AtomicUsize,
    }

    impl MockConnector {
        pub fn new(transport: Arc<MockTransport>) -> Self {
            Self::sequence(vec![transport])
        }

        pub fn sequence(transports: Vec<Arc<MockTransport>>) -> Self {
            assert!(!transports.is_empty(), "mock connector needs a transport");
            Self {
                transports,
                opens: AtomicUsize::new(0),
            }
        }

    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, endpoint: &Endpoint) -> io::Result<Arc<dyn DatagramTransport>> {
            info!("[MOCK UDP] Opened link to {}", endpoint);
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            let transport = &self.transports[n.min(self.transports.len() - 1)];
            Ok(transport.clone())
        }
    }
}

// ============================================================================
// Factory function to create appropriate connector
// ============================================================================

pub fn create_connector(simulate: bool) -> Arc<dyn Connector> {
    if simulate {
        warn!("Using MOCK controller link (no datagrams leave this host)");
        Arc::new(mock::MockConnector::new(Arc::new(mock::MockTransport::acknowledging())))
    } else {
        Arc::new(udp::UdpConnector)
    }
}
