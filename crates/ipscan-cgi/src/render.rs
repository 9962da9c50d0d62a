//! HTML and JSON rendering
//!
//! Every response the dispatcher produces is assembled here: the
//! introductory form, the terms reminder, the javascript start page, the
//! text-mode results page with its key table, the small acknowledgement
//! pages, and the JSON dump the polling client consumes.
//!
//! Failure is always rendered as a successfully served page; nothing in
//! here produces an HTTP error status.

use chrono::{TimeZone, Utc};
use ipscan_core::{
    decode_port_key, is_indirect, lookup_result, strip_indirect, PortEntry, ResultCode,
    RESULTS_TABLE,
};
use ipscan_scanner::StoredRow;
use serde::Serialize;
use std::fmt::Write;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One element of the JSON dump
#[derive(Debug, Serialize)]
struct JsonRow {
    port_num: u16,
    special: u8,
    protocol: String,
    result_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    indirect_host: Option<String>,
}

/// Render the stored rows as the JSON array the polling client consumes
pub fn json_dump(rows: &[StoredRow]) -> String {
    let out: Vec<JsonRow> = rows
        .iter()
        .map(|row| {
            let (port_num, special, proto) = decode_port_key(row.portid);
            JsonRow {
                port_num,
                special,
                protocol: proto
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                result_code: row.result,
                indirect_host: if row.indirect_host.is_empty() {
                    None
                } else {
                    Some(row.indirect_host.clone())
                },
            }
        })
        .collect();
    // Serializing plain structs cannot fail
    serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
}

fn page_open(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"UTF-8\">\n\
         <title>{}</title>\n</head>\n<body>\n",
        title
    )
}

fn page_close() -> &'static str {
    "</body>\n</html>\n"
}

/// Title + single paragraph page, used for acknowledgements and errors
pub fn simple_page(title: &str, message: &str) -> String {
    let mut html = page_open(title);
    let _ = write!(html, "<p>{}</p>\n", message);
    html.push_str(page_close());
    html
}

/// Headers-only output for a HEAD request
pub fn head_only() -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"UTF-8\">\n\
         <title>IPv6 Port Scanner Version {}</title>\n</head>\n</html>\n",
        VERSION
    )
}

/// The introductory form served for an empty query string
pub fn form_page(tcp_ports: &[PortEntry], udp_ports: &[PortEntry]) -> String {
    let mut html = page_open(&format!("IPv6 Port Scanner Version {}", VERSION));
    let _ = write!(
        html,
        "<h3>IPv6 Port Scanner</h3>\n\
         <p>This scanner probes {} TCP ports, {} UDP ports and ICMPv6 echo \
         reachability of the address you connect from. Nothing else is ever \
         scanned.</p>\n",
        tcp_ports.len(),
        udp_ports.len()
    );
    html.push_str(
        "<form method=\"get\">\n\
         <p><label><input type=\"checkbox\" name=\"termsaccepted\" value=\"1\"> \
         I accept the terms and conditions of use</label></p>\n\
         <p><label><input type=\"radio\" name=\"includeexisting\" value=\"1\" checked> \
         Append my custom ports to the default list</label><br>\n\
         <label><input type=\"radio\" name=\"includeexisting\" value=\"-1\"> \
         Scan only my custom ports</label></p>\n",
    );
    for slot in 0..ipscan_core::NUM_USER_DEF_PORTS {
        let _ = write!(
            html,
            "<p><label>Custom port {}: <input type=\"text\" name=\"customport{}\"></label></p>\n",
            slot, slot
        );
    }
    html.push_str("<p><input type=\"submit\" value=\"Begin scan\"></p>\n</form>\n");
    html.push_str(page_close());
    html
}

/// Reminder page served when the terms have not been accepted
pub fn terms_page() -> String {
    let mut html = page_open("IPv6 Port Scanner - Terms and Conditions MUST be accepted BEFORE use");
    html.push_str(
        "<h3 style=\"color:red\">Terms and Conditions MUST be accepted BEFORE use</h3>\n\
         <p>Testing cannot continue until the terms and conditions of use have been \
         accepted. You seem to have presented an incomplete or unexpected query \
         string. If you are automating scans you may just be missing an \
         \"&amp;termsaccepted=1\" term.</p>\n",
    );
    html.push_str(page_close());
    html
}

/// The javascript start page
///
/// Carries the reconstituted query string for the browser-side controller,
/// which generates its own start time and session before calling back with
/// `beginscan` and the polling fetches.
pub fn start_page(recon_query: &str, num_tcp: usize, num_udp: usize) -> String {
    let mut html = page_open(&format!("IPv6 Port Scanner Version {}", VERSION));
    let _ = write!(
        html,
        "<h3>IPv6 Port Scan</h3>\n\
         <p>Testing {} TCP ports, {} UDP ports and ICMPv6 echo.</p>\n\
         <div id=\"results\" data-query=\"{}\">Results will appear here as the \
         scan progresses; leave this page open until it completes.</div>\n",
        num_tcp, num_udp, recon_query
    );
    html.push_str(page_close());
    html
}

/// Acknowledgement body for a scan-initiation request
pub fn initiate_scan_page() -> String {
    simple_page(
        &format!("IPv6 Port Scanner Version {}", VERSION),
        "Initiate scan.",
    )
}

/// Acknowledgement body for a completion report
pub fn end_of_test_page() -> String {
    simple_page(
        &format!("IPv6 Port Scanner Version {}", VERSION),
        "End of test - dummy response.",
    )
}

/// Guard page for unusable query strings
pub fn nothing_useful_page() -> String {
    simple_page(
        &format!("IPv6 Port Scanner Version {}", VERSION),
        "Nothing useful to report. You seem to have presented an incomplete or \
         unexpected query string.",
    )
}

fn result_cell(entry: &PortEntry, raw: i32) -> String {
    let info = lookup_result(strip_indirect(raw));
    if entry.special != 0 {
        format!(
            "<td title=\"{}\" style=\"background-color:{}\">Port {}[{}] = {}</td>",
            entry.desc, info.colour, entry.port, entry.special, info.label
        )
    } else {
        format!(
            "<td title=\"{}\" style=\"background-color:{}\">Port {} = {}</td>",
            entry.desc, info.colour, entry.port, info.label
        )
    }
}

fn results_table(entries: &[PortEntry], results: &[i32]) -> String {
    const MAX_COLS: usize = 4;
    let mut html = String::from("<table border=\"1\">\n");
    for (index, (entry, &raw)) in entries.iter().zip(results).enumerate() {
        if index % MAX_COLS == 0 {
            html.push_str("<tr>");
        }
        html.push_str(&result_cell(entry, raw));
        if index % MAX_COLS == MAX_COLS - 1 || index == entries.len() - 1 {
            html.push_str("</tr>\n");
        }
    }
    html.push_str("</table>\n");
    html
}

/// Key table explaining every presentable result label
pub fn results_key_table() -> String {
    let mut html = String::from("<p>Result key:</p>\n<table border=\"1\">\n");
    for info in RESULTS_TABLE {
        if info.code == ResultCode::PortEol {
            break;
        }
        let _ = write!(
            html,
            "<tr><td style=\"background-color:{}\">{}</td><td>{}</td></tr>\n",
            info.colour, info.label, info.description
        );
    }
    html.push_str("</table>\n");
    html
}

/// The single synchronous results page served in text mode
#[allow(clippy::too_many_arguments)]
pub fn text_results_page(
    client: &str,
    start_time: u64,
    ping_raw: i32,
    ping_responder: &str,
    udp_ports: &[PortEntry],
    udp_results: &[i32],
    tcp_ports: &[PortEntry],
    tcp_results: &[i32],
) -> String {
    let mut html = page_open(&format!("IPv6 Port Scanner Version {}", VERSION));
    let _ = write!(
        html,
        "<h3 style=\"color:red\">IPv6 Port Scan Results for host {}</h3>\n",
        client
    );
    if let Some(started) = Utc.timestamp_opt(start_time as i64, 0).single() {
        let _ = write!(html, "<p>Scan started at: {}</p>\n", started.to_rfc2822());
    }

    let ping_info = lookup_result(strip_indirect(ping_raw));
    html.push_str("<p>ICMPv6 ECHO-Request:</p>\n<table border=\"1\">\n<tr>\n");
    if is_indirect(ping_raw) {
        let _ = write!(
            html,
            "<td title=\"IPv6 ping\">ICMPv6 ECHO REQUEST returned : </td>\
             <td style=\"background-color:{}\">INDIRECT-{} (from {})</td>\n",
            ping_info.colour, ping_info.label, ping_responder
        );
    } else {
        let _ = write!(
            html,
            "<td title=\"IPv6 ping\">ICMPv6 ECHO REQUEST returned : </td>\
             <td style=\"background-color:{}\">{}</td>\n",
            ping_info.colour, ping_info.label
        );
    }
    html.push_str("</tr>\n</table>\n");

    html.push_str("<p>Individual UDP port scan results:</p>\n");
    html.push_str(&results_table(udp_ports, udp_results));
    html.push_str("<p>Individual TCP port scan results:</p>\n");
    html.push_str(&results_table(tcp_ports, tcp_results));

    let _ = write!(
        html,
        "<p>Scan of {} ports complete at: {}.</p>\n",
        udp_ports.len() + tcp_ports.len(),
        Utc::now().to_rfc2822()
    );
    html.push_str(&results_key_table());
    html.push_str(page_close());
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipscan_core::{encode_port_key, Protocol};

    #[test]
    fn test_json_dump_shape() {
        let rows = vec![
            StoredRow {
                portid: encode_port_key(443, 0, Protocol::Tcp),
                result: ResultCode::PortOpen.as_raw(),
                indirect_host: String::new(),
            },
            StoredRow {
                portid: encode_port_key(0, 0, Protocol::Icmpv6),
                result: ResultCode::EchoReply.as_raw() + 256,
                indirect_host: "fe80::1".to_string(),
            },
        ];

        let json = json_dump(&rows);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 2);

        assert_eq!(array[0]["port_num"], 443);
        assert_eq!(array[0]["protocol"], "TCP");
        assert_eq!(array[0]["result_code"], 0);
        assert!(array[0].get("indirect_host").is_none());

        assert_eq!(array[1]["protocol"], "ICMPv6");
        assert_eq!(array[1]["indirect_host"], "fe80::1");
    }

    #[test]
    fn test_json_dump_empty() {
        assert_eq!(json_dump(&[]), "[]");
    }

    #[test]
    fn test_form_page_lists_custom_slots() {
        let html = form_page(&ipscan_core::default_tcp_ports(), &ipscan_core::default_udp_ports());
        for slot in 0..ipscan_core::NUM_USER_DEF_PORTS {
            assert!(html.contains(&format!("customport{}", slot)));
        }
        assert!(html.contains("termsaccepted"));
    }

    #[test]
    fn test_start_page_embeds_recon_query() {
        let html = start_page("includeexisting=1&termsaccepted=1", 10, 5);
        assert!(html.contains("includeexisting=1&termsaccepted=1"));
    }

    #[test]
    fn test_results_key_table_skips_sentinel() {
        let html = results_key_table();
        assert!(html.contains("UDPSTEALTH"));
        assert!(!html.contains("End of list marker"));
    }

    #[test]
    fn test_text_results_page_indirect_ping() {
        let ports = vec![PortEntry {
            port: 80,
            special: 0,
            desc: "HTTP".to_string(),
        }];
        let results = vec![ResultCode::PortRefused.as_raw()];
        let html = text_results_page(
            "2001:db8::1",
            1_700_000_000,
            ResultCode::EchoReply.as_raw() + 256,
            "fe80::1",
            &ports,
            &results,
            &ports,
            &results,
        );
        assert!(html.contains("INDIRECT-ECHO REPLY (from fe80::1)"));
        assert!(html.contains("Port 80 = RFSD"));
    }

    #[test]
    fn test_result_cell_marks_special() {
        let entry = PortEntry {
            port: 11211,
            special: 1,
            desc: "memcached".to_string(),
        };
        let cell = result_cell(&entry, ResultCode::PortOpen.as_raw());
        assert!(cell.contains("Port 11211[1] = OPEN"));
    }
}
