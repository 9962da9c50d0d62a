//! ICMPv6 echo probe
//!
//! Sends a single echo request to the target over a raw ICMPv6 socket and
//! classifies the exchange. The request's 16-byte payload carries the
//! session identifier and start time, so replies belonging to other
//! tests against the same address are rejected even when several probes
//! share the process.
//!
//! A response from an address other than the target (a router answering
//! on its behalf) is recorded with the indirect-response offset added to
//! the base code, together with the responder's printable address.
//!
//! Raw sockets need CAP_NET_RAW; when the socket cannot be opened the
//! probe reports `PortInterror` rather than faking a clean no-reply.

use ipscan_core::{
    classify_icmpv6_error, ResultCode, SessionKey, INDIRECT_RESPONSE_OFFSET,
};
use ipscan_net::{EchoRequestBuilder, Icmpv6Response};
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// ICMPv6 echo prober
#[derive(Debug, Clone)]
pub struct Icmpv6Prober {
    timeout: Duration,
}

impl Icmpv6Prober {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run the echo exchange against `target`
    ///
    /// Returns the raw result value (possibly carrying the
    /// indirect-response offset) and, for indirect responses, the
    /// printable address of the actual responder.
    pub async fn probe(&self, target: Ipv6Addr, key: &SessionKey) -> (i32, Option<String>) {
        let deadline = self.timeout;
        let key = *key;
        match tokio::task::spawn_blocking(move || blocking_probe(target, key, deadline)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("echo probe task failed: {}", e);
                (ResultCode::PortInterror.as_raw(), None)
            }
        }
    }
}

/// Correlation payload: big-endian session then start time
fn correlation_data(key: &SessionKey) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[..8].copy_from_slice(&key.session.to_be_bytes());
    data[8..].copy_from_slice(&key.start_time.to_be_bytes());
    data
}

/// Whether an ICMPv6 error message quotes our echo request
///
/// Error messages embed the invoking packet; searching for the
/// correlation bytes avoids depending on how much of it the router kept.
fn quotes_correlation(packet: &[u8], data: &[u8; 16]) -> bool {
    packet.windows(data.len()).any(|window| window == data)
}

fn blocking_probe(target: Ipv6Addr, key: SessionKey, deadline: Duration) -> (i32, Option<String>) {
    let socket = match Socket::new(Domain::IPV6, Type::RAW, Some(SockProtocol::ICMPV6)) {
        Ok(socket) => socket,
        Err(e) => {
            warn!(
                "raw ICMPv6 socket unavailable ({}); echo probe not attempted",
                e
            );
            return (ResultCode::PortInterror.as_raw(), None);
        }
    };

    let data = correlation_data(&key);
    let identifier = (key.session & 0xFFFF) as u16;
    let request = match EchoRequestBuilder::new(identifier, 1, data.to_vec())
        .build(Ipv6Addr::UNSPECIFIED, target)
    {
        Ok(packet) => packet,
        Err(e) => {
            warn!("echo request build failed: {}", e);
            return (ResultCode::PortInterror.as_raw(), None);
        }
    };

    let dest = SockAddr::from(SocketAddrV6::new(target, 0, 0, 0));
    if let Err(e) = socket.send_to(&request, &dest) {
        warn!("echo request to {} failed: {}", target, e);
        return (ResultCode::PortInterror.as_raw(), None);
    }
    trace!("echo request sent to {}", target);

    let started = Instant::now();
    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
            return (ResultCode::EchoNoReply.as_raw(), None);
        };
        if let Err(e) = socket.set_read_timeout(Some(remaining)) {
            warn!("echo probe read timeout setup failed: {}", e);
            return (ResultCode::PortInterror.as_raw(), None);
        }

        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return (ResultCode::EchoNoReply.as_raw(), None);
            }
            Err(e) => {
                warn!("echo probe receive failed: {}", e);
                return (ResultCode::PortInterror.as_raw(), None);
            }
        };

        // The kernel wrote `len` bytes into the buffer
        let packet =
            unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        let source = from.as_socket_ipv6().map(|sa| *sa.ip());

        match Icmpv6Response::parse(packet) {
            Some(Icmpv6Response::EchoReply {
                identifier: reply_id,
                data: reply_data,
                ..
            }) => {
                if reply_id != identifier || reply_data != data {
                    // A reply for some other test; keep listening
                    continue;
                }
                debug!("echo reply from {:?} for {}", source, key);
                return match source {
                    Some(src) if src != target => (
                        ResultCode::EchoReply.as_raw() + INDIRECT_RESPONSE_OFFSET,
                        Some(src.to_string()),
                    ),
                    _ => (ResultCode::EchoReply.as_raw(), None),
                };
            }
            Some(Icmpv6Response::Error {
                icmp_type,
                icmp_code,
            }) => {
                if !quotes_correlation(packet, &data) {
                    continue;
                }
                let base = classify_icmpv6_error(icmp_type, icmp_code).as_raw();
                debug!(
                    "ICMPv6 error type {} code {} from {:?} for {}",
                    icmp_type, icmp_code, source, key
                );
                return match source {
                    Some(src) if src != target => {
                        (base + INDIRECT_RESPONSE_OFFSET, Some(src.to_string()))
                    }
                    _ => (base, None),
                };
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("2001:db8::1".parse().unwrap(), 0x0102_0304, 0xAABB_CCDD)
    }

    #[test]
    fn test_correlation_data_layout() {
        let data = correlation_data(&key());
        assert_eq!(&data[..8], &0xAABB_CCDDu64.to_be_bytes());
        assert_eq!(&data[8..], &0x0102_0304u64.to_be_bytes());
    }

    #[test]
    fn test_quotes_correlation() {
        let data = correlation_data(&key());
        let mut packet = vec![1u8, 4, 0, 0, 0, 0, 0, 0];
        packet.extend_from_slice(&[0u8; 44]);
        packet.extend_from_slice(&data);
        assert!(quotes_correlation(&packet, &data));

        let unrelated = vec![0u8; 64];
        assert!(!quotes_correlation(&unrelated, &data));
    }

    #[tokio::test]
    async fn test_loopback_probe_never_indirect() {
        // Without CAP_NET_RAW the probe reports an internal error; with it
        // the loopback answers directly. Either way there is no indirect
        // responder.
        let prober = Icmpv6Prober::new(Duration::from_millis(500));
        let (raw, responder) = prober.probe(Ipv6Addr::LOCALHOST, &key()).await;
        assert!(responder.is_none());
        assert!(
            raw == ResultCode::EchoReply.as_raw()
                || raw == ResultCode::EchoNoReply.as_raw()
                || raw == ResultCode::PortInterror.as_raw(),
            "unexpected raw result {}",
            raw
        );
    }
}
