//! TCP connect probe
//!
//! Attempts a full TCP connection to one port of the target and
//! classifies the outcome into the result taxonomy. Connecting succeeds,
//! fails with an errno, or is still pending at the deadline - the three
//! branches map to `PortOpen`, the errno table, and `PortInProgress`
//! (the stealth outcome) respectively.
//!
//! A catalog entry with a non-zero special index additionally performs a
//! protocol exchange against the open port; currently the memcached
//! version probe on 11211.

use ipscan_core::{classify_connect_errno, ResultCode};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Special index selecting the memcached version exchange
const SPECIAL_MEMCACHED: u8 = 1;

/// TCP connect prober
///
/// Holds only the per-port deadline; every probe opens and closes its own
/// socket, so concurrent probes share no state.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe one TCP port, returning its classified result
    ///
    /// Never fails: every socket outcome is a legal result. The socket is
    /// closed on every exit path when the stream drops.
    pub async fn probe(&self, target: Ipv6Addr, port: u16, special: u8) -> ResultCode {
        let addr = SocketAddr::new(IpAddr::V6(target), port);
        trace!("TCP probe {}", addr);

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("TCP port {} open on {}", port, target);
                if special == SPECIAL_MEMCACHED {
                    self.memcached_exchange(stream, target, port).await
                } else {
                    ResultCode::PortOpen
                }
            }
            Ok(Err(e)) => {
                let code = match e.raw_os_error() {
                    Some(errno) => classify_connect_errno(errno),
                    None => ResultCode::PortUnexpected,
                };
                debug!("TCP port {} on {} classified {} ({})", port, target, code, e);
                code
            }
            Err(_elapsed) => {
                // Still pending at the deadline - nothing answered
                trace!("TCP port {} on {} gave no response", port, target);
                ResultCode::PortInProgress
            }
        }
    }

    /// Exchange a memcached `version` command with an open port
    ///
    /// The connection-level outcome was a success; only the protocol
    /// classification can still fail, and that failure is recorded as
    /// `PortUnknown` rather than an error.
    async fn memcached_exchange(
        &self,
        mut stream: TcpStream,
        target: Ipv6Addr,
        port: u16,
    ) -> ResultCode {
        let exchange = async {
            stream.write_all(b"version\r\n").await?;
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await?;
            Ok::<_, std::io::Error>(buf[..n].to_vec())
        };

        match timeout(self.timeout, exchange).await {
            Ok(Ok(reply)) if reply.starts_with(b"VERSION") => {
                debug!("memcached on {} port {} answered version probe", target, port);
                ResultCode::PortOpen
            }
            Ok(Ok(_)) => {
                warn!("memcached probe on {} port {} got a non-VERSION reply", target, port);
                ResultCode::PortUnknown
            }
            Ok(Err(e)) => {
                warn!("memcached probe on {} port {} failed: {}", target, port, e);
                ResultCode::PortUnknown
            }
            Err(_elapsed) => {
                warn!("memcached probe on {} port {} timed out", target, port);
                ResultCode::PortUnknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn prober() -> TcpProber {
        TcpProber::new(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_open_port() {
        let listener = TcpListener::bind("[::1]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let code = prober().probe(Ipv6Addr::LOCALHOST, port, 0).await;
        assert_eq!(code, ResultCode::PortOpen);
    }

    #[tokio::test]
    async fn test_closed_port_is_refused() {
        // Bind then drop to find a port that is almost certainly closed
        let listener = TcpListener::bind("[::1]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let code = prober().probe(Ipv6Addr::LOCALHOST, port, 0).await;
        assert_eq!(code, ResultCode::PortRefused);
    }

    #[tokio::test]
    async fn test_unrouted_target_times_out() {
        // Documentation prefix is not routed
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let prober = TcpProber::new(Duration::from_millis(50));
        let code = prober.probe(target, 80, 0).await;
        // Stealth on a quiet network; unreachable when the stack reports
        // the missing route synchronously
        assert!(matches!(
            code,
            ResultCode::PortInProgress | ResultCode::PortUnreachable | ResultCode::PortNoRoute
        ));
    }

    #[tokio::test]
    async fn test_memcached_exchange_success() {
        let listener = TcpListener::bind("[::1]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"version\r\n");
            socket.write_all(b"VERSION 1.6.21\r\n").await.unwrap();
        });

        let code = prober().probe(Ipv6Addr::LOCALHOST, port, SPECIAL_MEMCACHED).await;
        assert_eq!(code, ResultCode::PortOpen);
    }

    #[tokio::test]
    async fn test_memcached_exchange_bad_reply() {
        let listener = TcpListener::bind("[::1]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"ERROR\r\n").await.unwrap();
        });

        let code = prober().probe(Ipv6Addr::LOCALHOST, port, SPECIAL_MEMCACHED).await;
        assert_eq!(code, ResultCode::PortUnknown);
    }

    #[tokio::test]
    async fn test_memcached_exchange_silent_peer() {
        let listener = TcpListener::bind("[::1]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept but never answer; the exchange deadline downgrades the result
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let code = prober().probe(Ipv6Addr::LOCALHOST, port, SPECIAL_MEMCACHED).await;
        assert_eq!(code, ResultCode::PortUnknown);
    }
}
