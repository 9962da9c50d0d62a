//! Port-probe result taxonomy
//!
//! Every probe outcome - TCP connect, UDP exchange, or ICMPv6 echo - is
//! classified into one `ResultCode`. The raw integer values are stable:
//! they are written to the result store and consumed by the polling
//! client, so they must never be renumbered.
//!
//! An ICMPv6 response that arrives from a router other than the target is
//! stored as `base + INDIRECT_RESPONSE_OFFSET`; presentation subtracts the
//! offset to recover the base code and reports the responding router.

use std::fmt;
use tracing::warn;

/// Offset added to a result code when the ICMPv6 response originated from
/// a router other than the target host.
pub const INDIRECT_RESPONSE_OFFSET: i32 = 256;

/// Classified outcome of a single port or echo probe
///
/// Raw values are stable storage/wire values. The ordering is
/// monotonically increasing and terminated by the `PortEol` sentinel,
/// which exists only to bound table scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ResultCode {
    /// TCP connection established
    PortOpen = 0,
    /// Connection aborted (ECONNABORTED)
    PortAbort = 1,
    /// Connection refused (TCP RST/ACK or ICMPv6 type 1 code 4)
    PortRefused = 2,
    /// Connection reset (ECONNRESET)
    PortCreset = 3,
    /// Network reset (ENETRESET)
    PortNreset = 4,
    /// No response within the probe deadline - the stealth outcome
    PortInProgress = 5,
    /// Administratively prohibited (ICMPv6 type 1 code 1)
    PortProhibited = 6,
    /// Network unreachable (ICMPv6 type 1 code 0)
    PortUnreachable = 7,
    /// No route to host (ICMPv6 type 1 code 3)
    PortNoRoute = 8,
    /// Packet too big (ICMPv6 type 2)
    PortPktTooBig = 9,
    /// Parameter problem (ICMPv6 type 4)
    PortParamProb = 10,
    /// No ICMPv6 echo reply received
    EchoNoReply = 11,
    /// ICMPv6 echo reply received
    EchoReply = 12,
    /// A service-native UDP response was received
    UdpOpen = 13,
    /// No UDP response within the probe deadline
    UdpStealth = 14,
    /// Unexpected socket outcome
    PortUnexpected = 15,
    /// Unknown result, or the port has not been tested yet
    PortUnknown = 16,
    /// Internal error (e.g. the probe could not be attempted)
    PortInterror = 17,
    /// End-of-table sentinel
    PortEol = 18,
}

impl ResultCode {
    /// Stable integer value as stored in the result store
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Recover a code from its stored value
    pub fn from_raw(raw: i32) -> Option<Self> {
        RESULTS_TABLE
            .iter()
            .find(|info| info.code.as_raw() == raw)
            .map(|info| info.code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", lookup_result(self.as_raw()).label)
    }
}

/// One row of the presentation table for a result code
#[derive(Debug, Clone, Copy)]
pub struct ResultInfo {
    pub code: ResultCode,
    /// connect() return value that produces this code (-1 for errors)
    pub connect_rc: i32,
    /// errno that produces this code, 0 where not applicable
    pub errno: i32,
    /// Short label shown in result cells
    pub label: &'static str,
    /// Colour class used by the results table
    pub colour: &'static str,
    /// Human-readable explanation shown to the user
    pub description: &'static str,
}

/// Result table in monotonically increasing raw-value order, terminated
/// by the `PortEol` sentinel.
pub static RESULTS_TABLE: &[ResultInfo] = &[
    ResultInfo {
        code: ResultCode::PortOpen,
        connect_rc: 0,
        errno: 0,
        label: "OPEN",
        colour: "red",
        description: "An IPv6 TCP connection was successfully established to this port. \
                      Check that this is expected: an attacker may be able to reach your \
                      machine via this address/port combination.",
    },
    ResultInfo {
        code: ResultCode::PortAbort,
        connect_rc: -1,
        errno: libc::ECONNABORTED,
        label: "ABRT",
        colour: "yellow",
        description: "An abort indication was received when attempting to open this port. \
                      Your machine is visible on this address/port, but no TCP connection \
                      can be established.",
    },
    ResultInfo {
        code: ResultCode::PortRefused,
        connect_rc: -1,
        errno: libc::ECONNREFUSED,
        label: "RFSD",
        colour: "yellow",
        description: "A refused indication (TCP RST/ACK or ICMPv6 type 1 code 4) was \
                      received. Your machine is visible on this address/port, but no \
                      connection can be established.",
    },
    ResultInfo {
        code: ResultCode::PortCreset,
        connect_rc: -1,
        errno: libc::ECONNRESET,
        label: "CRST",
        colour: "yellow",
        description: "A connection reset was received when attempting to open this port. \
                      Your machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortNreset,
        connect_rc: -1,
        errno: libc::ENETRESET,
        label: "NRST",
        colour: "yellow",
        description: "A network reset was received when attempting to open this port. \
                      Your machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortInProgress,
        connect_rc: -1,
        errno: libc::EINPROGRESS,
        label: "STLTH",
        colour: "green",
        description: "No response was received in the allocated time. This is the ideal \
                      outcome: nobody can ascertain your machine's presence at this \
                      address/port combination.",
    },
    ResultInfo {
        code: ResultCode::PortProhibited,
        connect_rc: -1,
        errno: libc::EACCES,
        label: "PHBTD",
        colour: "yellow",
        description: "An administratively prohibited response (ICMPv6 type 1 code 1) was \
                      received. Your machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortUnreachable,
        connect_rc: -1,
        errno: libc::ENETUNREACH,
        label: "NUNRCH",
        colour: "yellow",
        description: "An unreachable response (ICMPv6 type 1 code 0) was received. Your \
                      machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortNoRoute,
        connect_rc: -1,
        errno: libc::EHOSTUNREACH,
        label: "HUNRCH",
        colour: "yellow",
        description: "A no-route-to-host response (ICMPv6 type 1 code 3 or type 3) was \
                      received. Your machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortPktTooBig,
        connect_rc: -1,
        errno: libc::EMSGSIZE,
        label: "TOOBIG",
        colour: "yellow",
        description: "A packet-too-big response (ICMPv6 type 2) was received. Your \
                      machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::PortParamProb,
        connect_rc: -1,
        errno: libc::EPROTO,
        label: "PRMPRB",
        colour: "yellow",
        description: "A parameter-problem response (ICMPv6 type 4) was received. Your \
                      machine is visible on this address/port.",
    },
    ResultInfo {
        code: ResultCode::EchoNoReply,
        connect_rc: -96,
        errno: -96,
        label: "ECHO NO REPLY",
        colour: "green",
        description: "No ICMPv6 ECHO_REPLY was received in response to the ECHO_REQUEST. \
                      This is the ideal outcome: nobody can ascertain your machine's \
                      presence at this address.",
    },
    ResultInfo {
        code: ResultCode::EchoReply,
        connect_rc: -97,
        errno: -97,
        label: "ECHO REPLY",
        colour: "yellow",
        description: "An ICMPv6 ECHO_REPLY was received in response to the ECHO_REQUEST. \
                      Your machine is visible at this address.",
    },
    ResultInfo {
        code: ResultCode::UdpOpen,
        connect_rc: -95,
        errno: -95,
        label: "UDPOPEN",
        colour: "red",
        description: "A valid response was received from this UDP port. Check that this \
                      is expected: an attacker may be able to reach your machine via this \
                      address/port combination.",
    },
    ResultInfo {
        code: ResultCode::UdpStealth,
        connect_rc: -1,
        errno: libc::EAGAIN,
        label: "UDPSTEALTH",
        colour: "green",
        description: "No UDP response was received in the allocated time. This is the \
                      ideal outcome: nobody can ascertain your machine's presence at this \
                      address/port combination.",
    },
    // Unexpected and unknown error cases
    ResultInfo {
        code: ResultCode::PortUnexpected,
        connect_rc: -98,
        errno: -98,
        label: "UNXPCT",
        colour: "white",
        description: "An unexpected response was received to the connect attempt.",
    },
    ResultInfo {
        code: ResultCode::PortUnknown,
        connect_rc: -99,
        errno: -99,
        label: "UNKWN",
        colour: "white",
        description: "An unknown error response was received, or the port is yet to be \
                      tested.",
    },
    ResultInfo {
        code: ResultCode::PortInterror,
        connect_rc: -100,
        errno: -100,
        label: "INTERR",
        colour: "white",
        description: "An internal error occurred.",
    },
    // End-of-table marker
    ResultInfo {
        code: ResultCode::PortEol,
        connect_rc: -101,
        errno: -101,
        label: "EOL",
        colour: "black",
        description: "End of list marker.",
    },
];

/// Whether a raw stored value carries the indirect-response offset
pub fn is_indirect(raw: i32) -> bool {
    raw >= INDIRECT_RESPONSE_OFFSET
}

/// Strip the indirect-response offset, returning the base value
pub fn strip_indirect(raw: i32) -> i32 {
    if is_indirect(raw) {
        raw - INDIRECT_RESPONSE_OFFSET
    } else {
        raw
    }
}

/// Look up the presentation row for a raw result value
///
/// Scans the table until the `PortEol` sentinel. A value with no matching
/// row should never have been stored; it falls back to the `PortUnknown`
/// row and is logged.
pub fn lookup_result(raw: i32) -> &'static ResultInfo {
    for info in RESULTS_TABLE {
        if info.code == ResultCode::PortEol {
            break;
        }
        if info.code.as_raw() == raw {
            return info;
        }
    }
    warn!("no result table entry for raw value {}, reporting UNKWN", raw);
    RESULTS_TABLE
        .iter()
        .find(|info| info.code == ResultCode::PortUnknown)
        .expect("results table contains PortUnknown")
}

/// Classify a connect/send errno into a result code
///
/// Shared by the TCP and UDP probes: ICMPv6 errors against a connected
/// UDP socket surface as the same errno values the TCP connect path sees.
/// Timeout outcomes are classified by the probes themselves and never
/// reach this function.
pub fn classify_connect_errno(errno: i32) -> ResultCode {
    match errno {
        libc::ECONNABORTED => ResultCode::PortAbort,
        libc::ECONNREFUSED => ResultCode::PortRefused,
        libc::ECONNRESET => ResultCode::PortCreset,
        libc::ENETRESET => ResultCode::PortNreset,
        libc::EINPROGRESS | libc::ETIMEDOUT => ResultCode::PortInProgress,
        libc::EACCES => ResultCode::PortProhibited,
        libc::ENETUNREACH => ResultCode::PortUnreachable,
        libc::EHOSTUNREACH => ResultCode::PortNoRoute,
        libc::EMSGSIZE => ResultCode::PortPktTooBig,
        libc::EPROTO => ResultCode::PortParamProb,
        _ => ResultCode::PortUnexpected,
    }
}

/// Classify an ICMPv6 error message `(type, code)` into a result code
///
/// Used by the echo probe, which sees raw ICMPv6 error messages rather
/// than errnos. Types follow RFC 4443.
pub fn classify_icmpv6_error(icmp_type: u8, icmp_code: u8) -> ResultCode {
    match (icmp_type, icmp_code) {
        (1, 0) => ResultCode::PortUnreachable,
        (1, 1) => ResultCode::PortProhibited,
        (1, 3) => ResultCode::PortNoRoute,
        (1, 4) => ResultCode::PortRefused,
        (2, _) => ResultCode::PortPktTooBig,
        (3, _) => ResultCode::PortNoRoute,
        (4, _) => ResultCode::PortParamProb,
        _ => ResultCode::PortUnexpected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_is_monotonic() {
        let mut prev = -1;
        for info in RESULTS_TABLE {
            assert!(info.code.as_raw() > prev, "table out of order at {}", info.label);
            prev = info.code.as_raw();
        }
    }

    #[test]
    fn test_table_terminated_by_sentinel() {
        assert_eq!(RESULTS_TABLE.last().unwrap().code, ResultCode::PortEol);
    }

    #[test]
    fn test_lookup_known_codes() {
        assert_eq!(lookup_result(0).label, "OPEN");
        assert_eq!(lookup_result(ResultCode::UdpStealth.as_raw()).label, "UDPSTEALTH");
        assert_eq!(lookup_result(ResultCode::EchoReply.as_raw()).colour, "yellow");
    }

    #[test]
    fn test_lookup_unmatched_falls_back_to_unknown() {
        assert_eq!(lookup_result(12345).code, ResultCode::PortUnknown);
        // The sentinel itself is not a presentable result
        assert_eq!(lookup_result(ResultCode::PortEol.as_raw()).code, ResultCode::PortUnknown);
    }

    #[test]
    fn test_from_raw_round_trip() {
        for info in RESULTS_TABLE {
            assert_eq!(ResultCode::from_raw(info.code.as_raw()), Some(info.code));
        }
        assert_eq!(ResultCode::from_raw(-5), None);
    }

    #[test]
    fn test_indirect_offset() {
        let raw = ResultCode::EchoReply.as_raw() + INDIRECT_RESPONSE_OFFSET;
        assert!(is_indirect(raw));
        assert_eq!(strip_indirect(raw), ResultCode::EchoReply.as_raw());
        assert!(!is_indirect(ResultCode::EchoReply.as_raw()));
        assert_eq!(strip_indirect(3), 3);
    }

    #[test]
    fn test_classify_tcp_errnos() {
        assert_eq!(classify_connect_errno(libc::ECONNABORTED), ResultCode::PortAbort);
        assert_eq!(classify_connect_errno(libc::ECONNREFUSED), ResultCode::PortRefused);
        assert_eq!(classify_connect_errno(libc::ECONNRESET), ResultCode::PortCreset);
        assert_eq!(classify_connect_errno(libc::ENETRESET), ResultCode::PortNreset);
        assert_eq!(classify_connect_errno(libc::EINPROGRESS), ResultCode::PortInProgress);
        assert_eq!(classify_connect_errno(libc::ETIMEDOUT), ResultCode::PortInProgress);
        assert_eq!(classify_connect_errno(libc::EACCES), ResultCode::PortProhibited);
        assert_eq!(classify_connect_errno(libc::ENETUNREACH), ResultCode::PortUnreachable);
        assert_eq!(classify_connect_errno(libc::EHOSTUNREACH), ResultCode::PortNoRoute);
        assert_eq!(classify_connect_errno(libc::EMSGSIZE), ResultCode::PortPktTooBig);
        assert_eq!(classify_connect_errno(libc::EPROTO), ResultCode::PortParamProb);
    }

    #[test]
    fn test_classify_unexpected_errno() {
        assert_eq!(classify_connect_errno(libc::EBADF), ResultCode::PortUnexpected);
        assert_eq!(classify_connect_errno(0), ResultCode::PortUnexpected);
    }

    #[test]
    fn test_display_uses_label() {
        assert_eq!(ResultCode::PortOpen.to_string(), "OPEN");
        assert_eq!(ResultCode::PortInProgress.to_string(), "STLTH");
    }

    #[test]
    fn test_classify_icmpv6_errors() {
        assert_eq!(classify_icmpv6_error(1, 0), ResultCode::PortUnreachable);
        assert_eq!(classify_icmpv6_error(1, 1), ResultCode::PortProhibited);
        assert_eq!(classify_icmpv6_error(1, 3), ResultCode::PortNoRoute);
        assert_eq!(classify_icmpv6_error(1, 4), ResultCode::PortRefused);
        assert_eq!(classify_icmpv6_error(2, 0), ResultCode::PortPktTooBig);
        assert_eq!(classify_icmpv6_error(3, 1), ResultCode::PortNoRoute);
        assert_eq!(classify_icmpv6_error(4, 2), ResultCode::PortParamProb);
        assert_eq!(classify_icmpv6_error(1, 7), ResultCode::PortUnexpected);
    }
}
