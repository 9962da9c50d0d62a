//! ipscan CGI front end
//!
//! Everything between the web server and the probe engine: query-string
//! parsing, mode selection, test-state transitions, the completion wait,
//! and HTML/JSON rendering. The binary in `main.rs` is a thin shell that
//! reads the CGI environment and hands a [`dispatcher::RequestContext`]
//! to the [`dispatcher::Dispatcher`].

pub mod dispatcher;
pub mod query;
pub mod render;

pub use dispatcher::{Dispatcher, RequestContext, Response};
pub use query::{parse_query_string, QueryParam};
