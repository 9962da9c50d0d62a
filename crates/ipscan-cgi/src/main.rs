//! ipscan CGI binary
//!
//! Reads the CGI environment (`REQUEST_METHOD`, `QUERY_STRING`,
//! `REMOTE_ADDR`), hands a request context to the dispatcher, and prints
//! the response. The process always exits successfully: every failure,
//! from an oversized header to an internal error, is rendered as a
//! served page so the web server never surfaces a CGI error to the
//! network and its logs stay clean.
//!
//! Suspiciously oversized inputs are logged with an `ATTACK?` marker.

use anyhow::{Context, Result};
use ipscan_cgi::query::{parse_query_string, MAX_QUERY_STR_LEN, MAX_REQ_METHOD_LEN};
use ipscan_cgi::{render, Dispatcher, RequestContext};
use ipscan_core::Config;
use ipscan_scanner::ScanStore;
use std::net::Ipv6Addr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Longest printable IPv6 address (matches INET6_ADDRSTRLEN)
const MAX_REMOTE_ADDR_LEN: usize = 46;

fn print_response(content_type: &str, body: &str) {
    print!("Content-Type: {}\r\n\r\n{}", content_type, body);
}

fn print_error_page(message: &str) {
    print_response(
        "text/html; charset=UTF-8",
        &render::simple_page("IPv6 Port Scanner", message),
    );
}

#[tokio::main]
async fn main() {
    // Log to stderr; stdout belongs to the response body
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("IPSCAN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!("internal error: {:#}", e);
        print_error_page("An internal error occurred. That is very disappointing.");
    }
}

async fn run() -> Result<()> {
    let Some(method) = read_method() else {
        return Ok(());
    };

    match method.as_str() {
        "HEAD" => {
            info!("HEAD request method, sending headers only");
            print_response("text/html; charset=UTF-8", &render::head_only());
            return Ok(());
        }
        "GET" => {}
        other => {
            warn!("called with an unsupported request method: {}", other);
            print_error_page(
                "I was called with an unsupported request-method. That is very disappointing.",
            );
            return Ok(());
        }
    }

    let Some(query_string) = read_query_string() else {
        return Ok(());
    };
    let Some(remote_addr) = read_remote_addr() else {
        return Ok(());
    };

    // Raw ICMPv6 needs CAP_NET_RAW. A scan still runs without it, but
    // every echo probe will record an internal error, so say why up front.
    if let Err(e) = ipscan_net::check_privileges() {
        warn!("{}; ICMPv6 echo probes will report INTERR", e);
    }

    let config = load_config()?;
    let store = Arc::new(
        ScanStore::new(&config.database_path)
            .await
            .context("opening result store")?,
    );
    let dispatcher = Dispatcher::new(config, store);

    let ctx = RequestContext {
        remote_addr,
        params: parse_query_string(&query_string),
    };
    let response = dispatcher.handle(&ctx).await;
    print_response(response.content_type, &response.body);
    Ok(())
}

/// REQUEST_METHOD, uppercased; `None` means a page was already served
fn read_method() -> Option<String> {
    match std::env::var("REQUEST_METHOD") {
        Ok(method) if method.len() > MAX_REQ_METHOD_LEN => {
            warn!(
                "ATTACK?: REQUEST_METHOD is longer than the allocated buffer ({} > {})",
                method.len(),
                MAX_REQ_METHOD_LEN
            );
            print_error_page(
                "I was called with a REQUEST_METHOD longer than my allocated buffer. \
                 That is very disappointing.",
            );
            None
        }
        Ok(method) => Some(method.to_ascii_uppercase()),
        Err(_) => {
            error!("REQUEST_METHOD variable lookup returned nothing");
            print_error_page("I was called without a REQUEST_METHOD. That is very disappointing.");
            None
        }
    }
}

/// QUERY_STRING; absent reads as empty (the form page case)
fn read_query_string() -> Option<String> {
    match std::env::var("QUERY_STRING") {
        Ok(query) if query.len() > MAX_QUERY_STR_LEN => {
            warn!(
                "ATTACK?: QUERY_STRING is longer than the allocated buffer ({} > {})",
                query.len(),
                MAX_QUERY_STR_LEN
            );
            print_error_page(
                "I was called with a QUERY_STRING longer than my allocated buffer. \
                 That is very disappointing.",
            );
            None
        }
        Ok(query) => Some(query),
        Err(_) => {
            info!("QUERY_STRING variable lookup returned nothing");
            Some(String::new())
        }
    }
}

/// REMOTE_ADDR as an IPv6 address; `None` means a page was already served
fn read_remote_addr() -> Option<Ipv6Addr> {
    let raw = match std::env::var("REMOTE_ADDR") {
        Ok(raw) if raw.len() > MAX_REMOTE_ADDR_LEN => {
            warn!(
                "ATTACK?: REMOTE_ADDR exceeds the allocated buffer ({} > {})",
                raw.len(),
                MAX_REMOTE_ADDR_LEN
            );
            print_error_page(
                "I was called with a REMOTE_ADDR that exceeds the supported size. \
                 That is very disappointing.",
            );
            return None;
        }
        Ok(raw) => raw,
        Err(_) => {
            error!("REMOTE_ADDR variable lookup returned nothing");
            print_error_page("I was called without a REMOTE_ADDR. That is very disappointing.");
            return None;
        }
    };

    match raw.parse::<Ipv6Addr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            error!("unparseable IPv6 host address: {}", raw);
            print_error_page(
                "I was called with an unparseable IPv6 host address. That is very disappointing.",
            );
            None
        }
    }
}

/// Configuration from IPSCAN_CONFIG when set, defaults otherwise
fn load_config() -> Result<Config> {
    match std::env::var("IPSCAN_CONFIG") {
        Ok(path) => Config::load_from_file(Path::new(&path))
            .with_context(|| format!("loading config from {}", path)),
        Err(_) => Ok(Config::default()),
    }
}
