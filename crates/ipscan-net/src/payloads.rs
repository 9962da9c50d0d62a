//! Protocol-specific payloads for UDP probing
//!
//! Each supported UDP target has a canonical request payload crafted to
//! elicit a service-native response. Payloads are dispatched by
//! `(port, special)`: the special index selects between semantic variants
//! of the same numeric port (e.g. a plain DNS query vs. a version.bind
//! query against port 53).

/// Get the probe payload for a `(port, special)` pair
///
/// Returns `None` for ports without a crafted payload; the probe then
/// sends an empty datagram, which still elicits ICMPv6 errors from
/// closed ports.
pub fn udp_payload(port: u16, special: u8) -> Option<Vec<u8>> {
    match (port, special) {
        (53, 0) => Some(dns_query()),
        (53, 1) => Some(dns_version_bind_query()),
        (69, 0) => Some(tftp_read_request()),
        (111, 0) => Some(rpc_null_call()),
        (123, 0) => Some(ntp_request()),
        (137, 0) => Some(netbios_name_query()),
        (161, 0) => Some(snmp_get_request(0)),
        (161, 1) => Some(snmp_get_request(1)),
        (500, 0) => Some(ike_handshake()),
        (1900, 0) => Some(ssdp_discover()),
        (5353, 0) => Some(mdns_query()),
        (5355, 0) => Some(llmnr_query()),
        _ => None,
    }
}

// Transaction identifiers are free-choice under the wire protocols; a
// fixed value keeps probe packets reproducible in captures.
const DNS_TRANSACTION_ID: [u8; 2] = [0x69, 0x70];
const NETBIOS_TRANSACTION_ID: [u8; 2] = [0x4E, 0x42];
const RPC_XID: u32 = 0x6970_7363;

/// DNS standard query for the root domain
fn dns_query() -> Vec<u8> {
    let mut payload = Vec::with_capacity(17);
    payload.extend_from_slice(&DNS_TRANSACTION_ID);
    payload.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, recursion desired
    payload.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    payload.extend_from_slice(&[0x00, 0x00]); // Answer RRs: 0
    payload.extend_from_slice(&[0x00, 0x00]); // Authority RRs: 0
    payload.extend_from_slice(&[0x00, 0x00]); // Additional RRs: 0
    payload.push(0x00); // Name: root
    payload.extend_from_slice(&[0x00, 0x01]); // Type: A
    payload.extend_from_slice(&[0x00, 0x01]); // Class: IN
    payload
}

/// DNS TXT CHAOS query for version.bind
fn dns_version_bind_query() -> Vec<u8> {
    vec![
        0x12, 0x35, // Transaction ID
        0x00, 0x00, // Flags: standard query
        0x00, 0x01, // Questions: 1
        0x00, 0x00, // Answer RRs: 0
        0x00, 0x00, // Authority RRs: 0
        0x00, 0x00, // Additional RRs: 0
        0x07, b'v', b'e', b'r', b's', b'i', b'o', b'n', // "version"
        0x04, b'b', b'i', b'n', b'd', // "bind"
        0x00, // Null terminator
        0x00, 0x10, // Type: TXT
        0x00, 0x03, // Class: CH
    ]
}

/// TFTP read request for an innocuous filename
fn tftp_read_request() -> Vec<u8> {
    let mut payload = vec![0x00, 0x01]; // Opcode: RRQ
    payload.extend_from_slice(b"remotefile\0octet\0");
    payload
}

/// Sun RPC NULL call (portmapper query)
fn rpc_null_call() -> Vec<u8> {
    let mut payload = Vec::with_capacity(40);
    payload.extend_from_slice(&RPC_XID.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // Message type: Call
    payload.extend_from_slice(&2u32.to_be_bytes()); // RPC version: 2
    payload.extend_from_slice(&100u32.to_be_bytes()); // Program: portmapper
    payload.extend_from_slice(&2u32.to_be_bytes()); // Program version: 2
    payload.extend_from_slice(&0u32.to_be_bytes()); // Procedure: NULL
    payload.extend_from_slice(&[0u8; 16]); // Credentials and verifier: AUTH_NULL
    payload
}

/// NTP version 3 client request
fn ntp_request() -> Vec<u8> {
    let mut payload = vec![0x1B]; // LI=0, VN=3, Mode=3 (client)
    payload.resize(48, 0); // NTP packets are 48 bytes
    payload
}

/// NetBIOS Name Service query for the wildcard name `*`
///
/// Names are first-level encoded: each octet splits into two nibbles,
/// each offset by b'A', and the name pads to 16 octets with nulls.
fn netbios_name_query() -> Vec<u8> {
    let mut payload = Vec::with_capacity(50);
    payload.extend_from_slice(&NETBIOS_TRANSACTION_ID);
    payload.extend_from_slice(&[0x01, 0x00]); // Flags: query
    payload.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    payload.extend_from_slice(&[0x00, 0x00]); // Answer RRs: 0
    payload.extend_from_slice(&[0x00, 0x00]); // Authority RRs: 0
    payload.extend_from_slice(&[0x00, 0x00]); // Additional RRs: 0

    payload.push(0x20); // Encoded name length: 32
    let mut name = [0u8; 16];
    name[0] = b'*';
    for octet in name {
        payload.push(b'A' + (octet >> 4));
        payload.push(b'A' + (octet & 0xF));
    }
    payload.push(0x00); // Null terminator

    payload.extend_from_slice(&[0x00, 0x21]); // Type: NBSTAT
    payload.extend_from_slice(&[0x00, 0x01]); // Class: IN
    payload
}

/// SNMP GetRequest for sysDescr.0 with community "public"
///
/// `version` 0 is SNMPv1, 1 is SNMPv2c; the PDU layout is identical.
fn snmp_get_request(version: u8) -> Vec<u8> {
    vec![
        0x30, 0x26, // SEQUENCE, length 38
        0x02, 0x01, version, // INTEGER version
        0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', // OCTET STRING "public"
        0xA0, 0x19, // GetRequest PDU
        0x02, 0x01, 0x01, // Request ID: 1
        0x02, 0x01, 0x00, // Error status: 0
        0x02, 0x01, 0x00, // Error index: 0
        0x30, 0x0E, // Variable bindings
        0x30, 0x0C, // Variable binding
        0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01,
        0x00, // OID: 1.3.6.1.2.1.1.1.0 (sysDescr.0)
        0x05, 0x00, // NULL value
    ]
}

/// IKE Main Mode SA proposal header
fn ike_handshake() -> Vec<u8> {
    vec![
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // Initiator cookie
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // Responder cookie: 0
        0x01, // Next payload: SA
        0x10, // Version: 1.0
        0x02, // Exchange type: Identity Protection (Main Mode)
        0x00, // Flags
        0x00, 0x00, 0x00, 0x00, // Message ID
        0x00, 0x00, 0x00, 0x28, // Length: 40
        // SA payload
        0x00, 0x00, 0x00, 0x0C, // Payload length
        0x00, 0x00, 0x00, 0x01, // DOI: IPsec
        0x00, 0x00, 0x00, 0x01, // Situation: Identity Only
    ]
}

/// SSDP M-SEARCH discovery
fn ssdp_discover() -> Vec<u8> {
    b"M-SEARCH * HTTP/1.1\r\n\
      HOST: [ff02::c]:1900\r\n\
      MAN: \"ssdp:discover\"\r\n\
      MX: 3\r\n\
      ST: ssdp:all\r\n\
      \r\n"
        .to_vec()
}

/// mDNS query for the service-discovery meta-service
fn mdns_query() -> Vec<u8> {
    vec![
        0x00, 0x00, // Transaction ID: 0
        0x00, 0x00, // Flags: standard query
        0x00, 0x01, // Questions: 1
        0x00, 0x00, // Answer RRs: 0
        0x00, 0x00, // Authority RRs: 0
        0x00, 0x00, // Additional RRs: 0
        0x09, b'_', b's', b'e', b'r', b'v', b'i', b'c', b'e', b's', // "_services"
        0x07, b'_', b'd', b'n', b's', b'-', b's', b'd', // "_dns-sd"
        0x04, b'_', b'u', b'd', b'p', // "_udp"
        0x05, b'l', b'o', b'c', b'a', b'l', // "local"
        0x00, // Null terminator
        0x00, 0x0C, // Type: PTR
        0x00, 0x01, // Class: IN
    ]
}

/// LLMNR query for the "wpad" name
fn llmnr_query() -> Vec<u8> {
    vec![
        0x12, 0x36, // Transaction ID
        0x00, 0x00, // Flags: standard query
        0x00, 0x01, // Questions: 1
        0x00, 0x00, // Answer RRs: 0
        0x00, 0x00, // Authority RRs: 0
        0x00, 0x00, // Additional RRs: 0
        0x04, b'w', b'p', b'a', b'd', // "wpad"
        0x00, // Null terminator
        0x00, 0x01, // Type: A
        0x00, 0x01, // Class: IN
    ]
}
