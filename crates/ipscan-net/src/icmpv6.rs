//! ICMPv6 echo request construction and response parsing
//!
//! Implements the subset of RFC 4443 the echo probe needs: building an
//! Echo Request (type 128) with the pseudo-header checksum, and parsing
//! the packets a raw ICMPv6 socket delivers back - Echo Reply (type 129)
//! or one of the error messages (types 1-4).
//!
//! Packets read from a raw ICMPv6 socket start at the ICMPv6 header; the
//! kernel has already stripped the IPv6 header.

use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Type, MutableIcmpv6Packet};
use pnet::packet::{MutablePacket, Packet};
use std::net::Ipv6Addr;
use thiserror::Error;

const ECHO_REQUEST: u8 = 128;
const ECHO_REPLY: u8 = 129;

/// Errors that can occur during ICMPv6 packet construction
#[derive(Debug, Error)]
pub enum Icmpv6Error {
    #[error("Failed to create ICMPv6 packet: {0}")]
    PacketBuild(String),
}

pub type Result<T> = std::result::Result<T, Icmpv6Error>;

/// Echo Request builder
///
/// The first four payload bytes carry the identifier and sequence; the
/// caller-supplied data follows and is echoed back verbatim by the
/// target, which is what makes reply correlation possible.
#[derive(Debug, Clone)]
pub struct EchoRequestBuilder {
    identifier: u16,
    sequence: u16,
    data: Vec<u8>,
}

impl EchoRequestBuilder {
    pub fn new(identifier: u16, sequence: u16, data: Vec<u8>) -> Self {
        Self {
            identifier,
            sequence,
            data,
        }
    }

    /// Build the Echo Request with its pseudo-header checksum
    ///
    /// The kernel recomputes the checksum for packets sent through a raw
    /// ICMPv6 socket, but a correct value is filled in regardless so the
    /// builder output is valid stand-alone.
    pub fn build(self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(4 + self.data.len());
        payload.extend_from_slice(&self.identifier.to_be_bytes());
        payload.extend_from_slice(&self.sequence.to_be_bytes());
        payload.extend_from_slice(&self.data);

        let packet_len = 8 + self.data.len();
        let mut buffer = vec![0u8; packet_len];

        {
            let mut packet = MutableIcmpv6Packet::new(&mut buffer)
                .ok_or_else(|| Icmpv6Error::PacketBuild("buffer too small".into()))?;
            packet.set_icmpv6_type(Icmpv6Type::new(ECHO_REQUEST));
            packet.set_icmpv6_code(Icmpv6Code(0));
            packet.set_checksum(0);
            let dest = packet.payload_mut();
            dest[..payload.len()].copy_from_slice(&payload);
        }

        let checksum = pseudo_header_checksum(&buffer, src, dst);
        {
            let mut packet = MutableIcmpv6Packet::new(&mut buffer)
                .ok_or_else(|| Icmpv6Error::PacketBuild("buffer too small".into()))?;
            packet.set_checksum(checksum);
        }

        Ok(buffer)
    }
}

/// ICMPv6 checksum over the 40-byte IPv6 pseudo-header plus the packet
///
/// Pseudo-header: source address (16), destination address (16),
/// upper-layer length (4), zero padding (3), next header 58 (1).
fn pseudo_header_checksum(packet: &[u8], src: Ipv6Addr, dst: Ipv6Addr) -> u16 {
    let mut data = Vec::with_capacity(40 + packet.len());
    data.extend_from_slice(&src.octets());
    data.extend_from_slice(&dst.octets());
    data.extend_from_slice(&(packet.len() as u32).to_be_bytes());
    data.extend_from_slice(&[0, 0, 0]);
    data.push(58);
    data.extend_from_slice(packet);
    pnet::util::checksum(&data, 1)
}

/// A parsed inbound ICMPv6 packet relevant to the echo probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Icmpv6Response {
    /// Echo Reply with its correlation fields and echoed data
    EchoReply {
        identifier: u16,
        sequence: u16,
        data: Vec<u8>,
    },
    /// An ICMPv6 error message (destination unreachable, packet too big,
    /// time exceeded, parameter problem)
    Error { icmp_type: u8, icmp_code: u8 },
}

impl Icmpv6Response {
    /// Parse a packet read from a raw ICMPv6 socket
    ///
    /// Returns `None` for packet types the probe does not care about
    /// (neighbour discovery chatter, router advertisements, ...).
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let icmpv6 = Icmpv6Packet::new(packet)?;
        let icmp_type = icmpv6.get_icmpv6_type().0;
        match icmp_type {
            ECHO_REPLY => {
                let payload = icmpv6.payload();
                if payload.len() < 4 {
                    return None;
                }
                Some(Icmpv6Response::EchoReply {
                    identifier: u16::from_be_bytes([payload[0], payload[1]]),
                    sequence: u16::from_be_bytes([payload[2], payload[3]]),
                    data: payload[4..].to_vec(),
                })
            }
            1..=4 => Some(Icmpv6Response::Error {
                icmp_type,
                icmp_code: icmpv6.get_icmpv6_code().0,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (Ipv6Addr, Ipv6Addr) {
        ("2001:db8::1".parse().unwrap(), "2001:db8::2".parse().unwrap())
    }

    #[test]
    fn test_echo_request_layout() {
        let (src, dst) = addrs();
        let packet = EchoRequestBuilder::new(0x1234, 1, vec![0xDE, 0xAD])
            .build(src, dst)
            .unwrap();

        assert_eq!(packet.len(), 8 + 2);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[1], 0);
        // Identifier and sequence are big-endian after the checksum
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0x00, 0x01]);
        assert_eq!(&packet[8..], &[0xDE, 0xAD]);
    }

    #[test]
    fn test_echo_request_checksum_nonzero() {
        let (src, dst) = addrs();
        let packet = EchoRequestBuilder::new(7, 7, vec![0; 16])
            .build(src, dst)
            .unwrap();
        let checksum = u16::from_be_bytes([packet[2], packet[3]]);
        assert_ne!(checksum, 0);
    }

    #[test]
    fn test_checksum_depends_on_addresses() {
        let (src, dst) = addrs();
        let other: Ipv6Addr = "2001:db8::ff".parse().unwrap();
        let a = EchoRequestBuilder::new(1, 1, vec![0xAB]).build(src, dst).unwrap();
        let b = EchoRequestBuilder::new(1, 1, vec![0xAB]).build(other, dst).unwrap();
        assert_ne!(
            u16::from_be_bytes([a[2], a[3]]),
            u16::from_be_bytes([b[2], b[3]])
        );
    }

    #[test]
    fn test_parse_echo_reply_round_trip() {
        let (src, dst) = addrs();
        let mut packet = EchoRequestBuilder::new(42, 3, vec![1, 2, 3, 4])
            .build(src, dst)
            .unwrap();
        packet[0] = 129; // flip request into reply

        match Icmpv6Response::parse(&packet) {
            Some(Icmpv6Response::EchoReply {
                identifier,
                sequence,
                data,
            }) => {
                assert_eq!(identifier, 42);
                assert_eq!(sequence, 3);
                assert_eq!(data, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_message() {
        // Destination unreachable, administratively prohibited
        let packet = [1u8, 1, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            Icmpv6Response::parse(&packet),
            Some(Icmpv6Response::Error {
                icmp_type: 1,
                icmp_code: 1
            })
        );
    }

    #[test]
    fn test_parse_ignores_unrelated_types() {
        // Neighbour solicitation is not a probe response
        let packet = [135u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(Icmpv6Response::parse(&packet), None);
    }

    #[test]
    fn test_parse_truncated_reply() {
        let packet = [129u8, 0, 0, 0, 0, 0];
        assert_eq!(Icmpv6Response::parse(&packet), None);
    }
}
