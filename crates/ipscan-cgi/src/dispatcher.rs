//! Request dispatcher and test lifecycle
//!
//! Takes one parsed CGI request and decides what it is: the introductory
//! form, a terms reminder, a completion report, a JSON poll, a scan
//! initiation, the javascript start page, a synchronous text-mode scan,
//! or nothing useful. The precedence of those checks is fixed and
//! deliberate - a completion report must win over a plain fetch, and a
//! fetch over scan initiation.
//!
//! The dispatcher owns the server side of the test lifecycle: it writes
//! the RUNNING state when a scan starts, waits for the client to signal
//! completion (or for the timeout), and deletes the session's rows at the
//! end. Every request, whatever its mode, finishes by tidying expired
//! rows out of the store.

use crate::query::{self, QueryParam};
use crate::render;
use ipscan_core::{
    build_port_list, default_tcp_ports, default_udp_ports, encode_port_key, Config, FetchEvent,
    Mode, Protocol, ResultCode, SessionKey, TestState, MAGIC_BEGIN, MAX_FETCHNUM, MAX_VALID_PORT,
    MIN_VALID_PORT, NUM_USER_DEF_PORTS, SUCCESSFUL_COMPLETION,
};
use ipscan_scanner::{ScanEngine, ScanStore};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The server-visible inputs of one CGI request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client address from REMOTE_ADDR; also the scan target
    pub remote_addr: Ipv6Addr,
    /// Parsed query parameters
    pub params: Vec<QueryParam>,
}

/// A fully rendered response
#[derive(Debug)]
pub struct Response {
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn html(body: String) -> Self {
        Self {
            content_type: "text/html; charset=UTF-8",
            body,
        }
    }

    fn json(body: String) -> Self {
        Self {
            content_type: "application/json",
            body,
        }
    }
}

/// What one request asks for, in selection-precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Form,
    Terms,
    CompletionEvent,
    FetchJson,
    BeginScan,
    StartPage,
    TextScan,
    NothingUseful,
}

/// The recognised parameters of a request, extracted and validated
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub include_existing: i32,
    pub terms_accepted: bool,
    /// Client-supplied Unix second, -1 when absent or negative
    pub start_time: i64,
    /// Client-supplied session value, -1 when absent or negative
    pub session: i64,
    pub begin_scan: bool,
    pub fetch: bool,
    pub fetchnum: i64,
    /// Accepted custom ports as (slot, port), in slot order
    pub custom_ports: Vec<(usize, u16)>,
    /// Slots that were present at all, valid or not
    pub num_custom_ports: usize,
    pub num_queries: usize,
}

impl ParsedRequest {
    pub fn from_params(params: &[QueryParam]) -> Self {
        let include_existing = match query::lookup_valid(params, "includeexisting") {
            Some(v) if v.abs() == 1 => v as i32,
            _ => 0,
        };
        let terms_accepted = query::lookup_valid(params, "termsaccepted") == Some(1);
        let start_time = query::lookup_valid(params, "starttime")
            .filter(|v| *v >= 0)
            .unwrap_or(-1);
        let session = query::lookup_valid(params, "session")
            .filter(|v| *v >= 0)
            .unwrap_or(-1);
        let begin_scan = query::lookup_valid(params, "beginscan") == Some(MAGIC_BEGIN);
        let fetch = matches!(query::lookup_valid(params, "fetch"), Some(v) if v > 0);
        let fetchnum = query::lookup_valid(params, "fetchnum")
            .filter(|v| (0..MAX_FETCHNUM).contains(v))
            .unwrap_or(0);

        let mut custom_ports = Vec::new();
        let mut num_custom_ports = 0;
        for slot in 0..NUM_USER_DEF_PORTS {
            let name = format!("customport{}", slot);
            if query::is_present(params, &name) {
                num_custom_ports += 1;
            }
            if let Some(v) = query::lookup_valid(params, &name) {
                if (i64::from(MIN_VALID_PORT)..=i64::from(MAX_VALID_PORT)).contains(&v) {
                    custom_ports.push((slot, v as u16));
                }
            }
        }

        Self {
            include_existing,
            terms_accepted,
            start_time,
            session,
            begin_scan,
            fetch,
            fetchnum,
            custom_ports,
            num_custom_ports,
            num_queries: params.len(),
        }
    }

    fn has_session_tuple(&self) -> bool {
        self.start_time >= 0 && self.session >= 0
    }

    /// Port numbers of the accepted custom slots
    fn custom_port_numbers(&self) -> Vec<u16> {
        self.custom_ports.iter().map(|&(_, port)| port).collect()
    }

    /// Whether the request carries everything a results page needs
    fn has_page_params(&self) -> bool {
        self.num_queries >= NUM_USER_DEF_PORTS + 2
            && self.num_custom_ports == NUM_USER_DEF_PORTS
            && self.include_existing != 0
            && !self.begin_scan
            && !self.fetch
    }

    /// Select the request mode, in fixed precedence order
    pub fn select_mode(&self, server_mode: Mode) -> RequestMode {
        if self.num_queries == 0 {
            return RequestMode::Form;
        }
        if !self.terms_accepted {
            return RequestMode::Terms;
        }
        if self.include_existing == 0 {
            // includeexisting must be exactly +1 or -1
            return RequestMode::Form;
        }
        let db_params = self.num_queries >= 5 && self.has_session_tuple();
        if self.fetch && db_params && !self.begin_scan && self.fetchnum >= SUCCESSFUL_COMPLETION {
            return RequestMode::CompletionEvent;
        }
        if self.fetch && db_params && !self.begin_scan {
            return RequestMode::FetchJson;
        }
        if self.begin_scan && !self.fetch && db_params {
            return RequestMode::BeginScan;
        }
        if self.has_page_params() {
            return match server_mode {
                Mode::Javascript => RequestMode::StartPage,
                Mode::Text => RequestMode::TextScan,
            };
        }
        RequestMode::NothingUseful
    }
}

fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs(),
        Err(e) => {
            warn!("system clock is before the epoch: {}", e);
            0
        }
    }
}

fn teststate_portid() -> u32 {
    encode_port_key(0, 0, Protocol::TestState)
}

/// The request dispatcher
pub struct Dispatcher {
    config: Config,
    store: Arc<ScanStore>,
}

impl Dispatcher {
    pub fn new(config: Config, store: Arc<ScanStore>) -> Self {
        Self { config, store }
    }

    /// Handle one request end to end, returning the rendered response
    ///
    /// Never fails: every internal error is logged and rendered as a
    /// served page.
    pub async fn handle(&self, ctx: &RequestContext) -> Response {
        let parsed = ParsedRequest::from_params(&ctx.params);
        let mode = parsed.select_mode(self.config.mode);
        debug!(
            "client {} selected mode {:?} ({} queries)",
            ctx.remote_addr, mode, parsed.num_queries
        );

        let response = match mode {
            RequestMode::Form => {
                Response::html(render::form_page(&default_tcp_ports(), &default_udp_ports()))
            }
            RequestMode::Terms => {
                self.log_rejected(ctx, &parsed);
                Response::html(render::terms_page())
            }
            RequestMode::CompletionEvent => self.handle_completion(ctx, &parsed).await,
            RequestMode::FetchJson => self.handle_fetch(ctx, &parsed).await,
            RequestMode::BeginScan => self.handle_begin_scan(ctx, &parsed).await,
            RequestMode::StartPage => self.handle_start_page(&parsed),
            RequestMode::TextScan => self.handle_text_scan(ctx, &parsed).await,
            RequestMode::NothingUseful => {
                self.log_rejected(ctx, &parsed);
                Response::html(render::nothing_useful_page())
            }
        };

        // Purge expired rows whatever the request was
        if let Err(e) = self.store.tidy(unix_now(), self.config.retention_secs).await {
            warn!("tidy failed: {}", e);
        }

        response
    }

    fn log_rejected(&self, ctx: &RequestContext, parsed: &ParsedRequest) {
        info!(
            "nothing to do for client {}: {} queries, includeexisting = {}, \
             beginscan = {}, fetch = {}, termsaccepted = {}, custom ports = {}",
            ctx.remote_addr,
            parsed.num_queries,
            parsed.include_existing,
            parsed.begin_scan,
            parsed.fetch,
            parsed.terms_accepted,
            parsed.num_custom_ports
        );
    }

    fn session_key(&self, ctx: &RequestContext, parsed: &ParsedRequest) -> SessionKey {
        SessionKey::new(
            ctx.remote_addr,
            parsed.start_time as u64,
            parsed.session as u64,
        )
    }

    /// Client reported the end of the test (cleanly or otherwise)
    async fn handle_completion(&self, ctx: &RequestContext, parsed: &ParsedRequest) -> Response {
        let key = self.session_key(ctx, parsed);
        let state_id = teststate_portid();

        let state = match self.store.read(&key, state_id).await {
            Ok(raw) if raw == ResultCode::PortUnknown.as_raw() => {
                // No row where one was expected; make the anomaly visible
                // post-mortem before applying the event
                warn!("test-state row missing for {}", key);
                let state = TestState::RUNNING.insert(TestState::DATABASE_ERROR);
                if let Err(e) = self.store.write(&key, state_id, state.bits(), "").await {
                    warn!("test-state rewrite failed for {}: {}", key, e);
                }
                state
            }
            Ok(raw) => TestState::from_bits(raw),
            Err(e) => {
                warn!("test-state read failed for {}: {}", key, e);
                return Response::html(render::end_of_test_page());
            }
        };

        let state = match FetchEvent::from_fetchnum(parsed.fetchnum) {
            Some(event) => {
                info!("client reported {:?} for {}", event, key);
                state.apply(event)
            }
            None => {
                warn!(
                    "fetch included unexpected completion value {} for {}",
                    parsed.fetchnum, key
                );
                state.insert(TestState::OTHERERROR)
            }
        };

        if let Err(e) = self.store.update(&key, state_id, state.bits()).await {
            warn!("test-state update failed for {}: {}", key, e);
        }
        Response::html(render::end_of_test_page())
    }

    /// Incremental JSON poll
    async fn handle_fetch(&self, ctx: &RequestContext, parsed: &ParsedRequest) -> Response {
        let key = self.session_key(ctx, parsed);
        match self.store.dump(&key).await {
            Ok(rows) => Response::json(render::json_dump(&rows)),
            Err(e) => {
                warn!("dump failed for {}: {}", key, e);
                Response::json("[]".to_string())
            }
        }
    }

    /// Initiate a scan in javascript mode, then wait out the lifecycle
    async fn handle_begin_scan(&self, ctx: &RequestContext, parsed: &ParsedRequest) -> Response {
        let key = self.session_key(ctx, parsed);
        let state_id = teststate_portid();

        if let Err(e) = self
            .store
            .write(&key, state_id, TestState::RUNNING.bits(), "")
            .await
        {
            warn!("RUNNING test-state write failed for {}: {}", key, e);
        }
        let scan_start = unix_now();
        info!("client {} beginning scan", key);

        let tcp_ports = build_port_list(parsed.include_existing, &parsed.custom_port_numbers());
        let udp_ports = default_udp_ports();

        let engine = ScanEngine::new(self.config.clone(), Arc::clone(&self.store));
        let rc = engine
            .run(ctx.remote_addr, key, tcp_ports, udp_ports)
            .await;
        if rc != 0 {
            warn!("scan workers for {} retired with ORed status {:#x}", key, rc);
        }

        self.log_result_stats(&key).await;
        self.completion_wait(&key, scan_start).await;

        // Let errant or delayed JSON polls subside before deleting
        tokio::time::sleep(Duration::from_secs(self.config.delete_wait_secs)).await;
        if let Err(e) = self.store.delete(&key).await {
            warn!("result deletion failed for {}: {}", key, e);
        }

        Response::html(render::initiate_scan_page())
    }

    /// Render the start page whose embedded controller drives the scan
    fn handle_start_page(&self, parsed: &ParsedRequest) -> Response {
        let recon = query::reconstitute(
            parsed.include_existing,
            parsed.terms_accepted,
            &parsed.custom_ports,
        );
        let tcp_ports = build_port_list(parsed.include_existing, &parsed.custom_port_numbers());
        Response::html(render::start_page(
            &recon,
            tcp_ports.len(),
            default_udp_ports().len(),
        ))
    }

    /// Single-shot synchronous scan and results page (text mode)
    async fn handle_text_scan(&self, ctx: &RequestContext, parsed: &ParsedRequest) -> Response {
        let start_time = unix_now();
        let session = ipscan_core::generate_session();
        let key = SessionKey::new(ctx.remote_addr, start_time, session);
        info!("client {} beginning text-mode scan", key);

        let tcp_ports = build_port_list(parsed.include_existing, &parsed.custom_port_numbers());
        let udp_ports = default_udp_ports();

        let engine = ScanEngine::new(self.config.clone(), Arc::clone(&self.store));
        let rc = engine
            .run(ctx.remote_addr, key, tcp_ports.clone(), udp_ports.clone())
            .await;
        if rc != 0 {
            warn!("scan workers for {} retired with ORed status {:#x}", key, rc);
        }

        // Read everything back in catalog order for the page
        let ping_id = encode_port_key(0, 0, Protocol::Icmpv6);
        let ping_raw = self
            .store
            .read(&key, ping_id)
            .await
            .unwrap_or_else(|e| {
                warn!("echo result read failed for {}: {}", key, e);
                ResultCode::PortInterror.as_raw()
            });
        let ping_responder = match self.store.dump(&key).await {
            Ok(rows) => rows
                .iter()
                .find(|row| row.portid == ping_id)
                .map(|row| row.indirect_host.clone())
                .unwrap_or_default(),
            Err(_) => String::new(),
        };

        let udp_results = self.read_results(&key, &udp_ports, Protocol::Udp).await;
        let tcp_results = self.read_results(&key, &tcp_ports, Protocol::Tcp).await;

        let body = render::text_results_page(
            &ctx.remote_addr.to_string(),
            start_time,
            ping_raw,
            &ping_responder,
            &udp_ports,
            &udp_results,
            &tcp_ports,
            &tcp_results,
        );

        self.log_result_stats(&key).await;

        // Text mode is strictly single-shot: no polling contract exists,
        // so the rows go as soon as the page is rendered
        if let Err(e) = self.store.delete(&key).await {
            warn!("result deletion failed for {}: {}", key, e);
        }

        Response::html(body)
    }

    async fn read_results(
        &self,
        key: &SessionKey,
        entries: &[ipscan_core::PortEntry],
        proto: Protocol,
    ) -> Vec<i32> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let portid = encode_port_key(entry.port, entry.special, proto);
            let raw = self.store.read(key, portid).await.unwrap_or_else(|e| {
                warn!("result read failed for {} port {}: {}", key, entry.port, e);
                ResultCode::PortUnknown.as_raw()
            });
            if raw == ResultCode::PortUnknown.as_raw() {
                warn!(
                    "store returned UNKNOWN for {} {} port {}",
                    key, proto, entry.port
                );
            }
            results.push(raw);
        }
        results
    }

    /// Log a per-code summary of everything stored for this session
    async fn log_result_stats(&self, key: &SessionKey) {
        let rows = match self.store.dump(key).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("stats dump failed for {}: {}", key, e);
                return;
            }
        };

        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for row in &rows {
            let (_, _, proto) = ipscan_core::decode_port_key(row.portid);
            if proto == Some(Protocol::TestState) {
                continue;
            }
            let info = ipscan_core::lookup_result(ipscan_core::strip_indirect(row.result));
            *counts.entry(info.label).or_default() += 1;
        }

        let mut summary: Vec<String> = counts
            .iter()
            .map(|(label, count)| format!("{} {}", count, label))
            .collect();
        summary.sort();
        info!("found for {}: {}", key, summary.join(", "));
    }

    /// Poll the test-state row until the client signals the end of the
    /// test or the timeout elapses
    async fn completion_wait(&self, key: &SessionKey, scan_start: u64) {
        let deadline = scan_start + self.config.delete_timeout_secs;
        let state_id = teststate_portid();

        while unix_now() < deadline {
            match self.store.read(key, state_id).await {
                Ok(raw) if raw == ResultCode::PortUnknown.as_raw() => {
                    // Row vanished under us; keep waiting, the timeout
                    // bounds the damage
                    warn!("test-state row missing while waiting for {}", key);
                }
                Ok(raw) => {
                    let state = TestState::from_bits(raw);
                    debug!("test state for {} is {}", key, state);
                    if state.is_finished() {
                        info!("client signalled test end for {}", key);
                        return;
                    }
                }
                Err(e) => warn!("test-state poll failed for {}: {}", key, e),
            }
            tokio::time::sleep(Duration::from_secs(self.config.teststate_poll_secs)).await;
        }
        info!("completion wait timed out for {}", key);
    }
}
