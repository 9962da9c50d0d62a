//! Query-string parsing
//!
//! The query grammar is `name1=value1&name2=value2...` with ASCII names
//! and signed 64-bit integer values (signed because `includeexisting=-1`
//! is meaningful). Parsing is deliberately forgiving: an entry whose
//! value fails to parse is kept with its valid flag cleared - its
//! presence still matters for counting `customportN` slots - while
//! unknown names are simply never looked up.
//!
//! Hard caps bound everything a client can send: the number of entries,
//! the name length, and the value length. Overruns are logged and
//! truncated rather than rejected.

use tracing::warn;

/// Maximum number of recognised name/value pairs per request
pub const MAX_QUERIES: usize = 16;
/// Maximum accepted length of the whole query string
pub const MAX_QUERY_STR_LEN: usize = 255;
/// Maximum length of one parameter name
pub const MAX_QUERY_NAME_LEN: usize = 32;
/// Maximum length of one parameter value
pub const MAX_QUERY_VAL_LEN: usize = 64;
/// Maximum length of the REQUEST_METHOD value
pub const MAX_REQ_METHOD_LEN: usize = 8;

/// One parsed name/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub value: i64,
    /// Whether the value parsed as an integer
    pub valid: bool,
}

/// Parse a raw query string into bounded name/value pairs
///
/// Names are lowercased. A pair without an `=` contributes nothing; a
/// pair whose value does not parse is recorded invalid with value 0.
pub fn parse_query_string(raw: &str) -> Vec<QueryParam> {
    let lowered = raw.to_ascii_lowercase();
    let mut params = Vec::new();

    for pair in lowered.split('&') {
        if params.len() >= MAX_QUERIES {
            warn!("query string has more than {} parameters, ignoring the rest", MAX_QUERIES);
            break;
        }
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name.is_empty() || !name.is_ascii() {
            continue;
        }

        let name = if name.len() > MAX_QUERY_NAME_LEN {
            warn!("query parameter name too long, truncating: {}", name);
            &name[..MAX_QUERY_NAME_LEN]
        } else {
            name
        };

        let value = if !value.is_ascii() {
            ""
        } else if value.len() > MAX_QUERY_VAL_LEN {
            warn!("query parameter value too long, truncating: {}", name);
            &value[..MAX_QUERY_VAL_LEN]
        } else {
            value
        };

        match parse_leading_i64(value) {
            Some(parsed) => params.push(QueryParam {
                name: name.to_string(),
                value: parsed,
                valid: true,
            }),
            None => params.push(QueryParam {
                name: name.to_string(),
                value: 0,
                valid: false,
            }),
        }
    }

    params
}

/// Parse a leading signed decimal integer, ignoring trailing junk
///
/// Mirrors scanf semantics: `"123abc"` parses as 123, `"abc"` does not
/// parse at all.
fn parse_leading_i64(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    let mut index = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        index = 1;
    }
    let digits_end = bytes[index..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count()
        + index;
    if digits_end == index {
        return None;
    }
    s[..digits_end].parse().ok()
}

/// Look up a parameter by name, returning it only when present and valid
pub fn lookup_valid(params: &[QueryParam], name: &str) -> Option<i64> {
    params
        .iter()
        .find(|p| p.name == name)
        .filter(|p| p.valid)
        .map(|p| p.value)
}

/// Whether a parameter name is present at all, valid or not
pub fn is_present(params: &[QueryParam], name: &str) -> bool {
    params.iter().any(|p| p.name == name)
}

/// Reconstitute the canonical query string embedded in the start page
///
/// Contains `includeexisting`, `termsaccepted`, and every accepted
/// custom port in slot order.
pub fn reconstitute(
    include_existing: i32,
    terms_accepted: bool,
    custom_ports: &[(usize, u16)],
) -> String {
    use std::fmt::Write;

    let mut query = format!(
        "includeexisting={}&termsaccepted={}",
        include_existing,
        i32::from(terms_accepted)
    );
    for (slot, port) in custom_ports {
        // The slots are few and the ports bounded, so this cannot overrun
        // any receiver honouring MAX_QUERY_STR_LEN
        let _ = write!(query, "&customport{}={}", slot, port);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_pairs() {
        let params = parse_query_string("includeexisting=1&termsaccepted=1");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "includeexisting");
        assert_eq!(params[0].value, 1);
        assert!(params[0].valid);
    }

    #[test]
    fn test_negative_value() {
        let params = parse_query_string("includeexisting=-1");
        assert_eq!(params[0].value, -1);
        assert!(params[0].valid);
    }

    #[test]
    fn test_names_are_lowercased() {
        let params = parse_query_string("TermsAccepted=1");
        assert_eq!(params[0].name, "termsaccepted");
    }

    #[test]
    fn test_invalid_value_still_counted() {
        let params = parse_query_string("customport0=abc&customport1=80");
        assert_eq!(params.len(), 2);
        assert!(!params[0].valid);
        assert_eq!(params[0].value, 0);
        assert!(params[1].valid);
    }

    #[test]
    fn test_bare_name_ignored() {
        let params = parse_query_string("beginscan&fetch=1");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "fetch");
    }

    #[test]
    fn test_leading_integer_with_trailing_junk() {
        let params = parse_query_string("session=123abc");
        assert!(params[0].valid);
        assert_eq!(params[0].value, 123);
    }

    #[test]
    fn test_query_count_cap() {
        let raw: Vec<String> = (0..MAX_QUERIES + 5).map(|i| format!("q{}={}", i, i)).collect();
        let params = parse_query_string(&raw.join("&"));
        assert_eq!(params.len(), MAX_QUERIES);
    }

    #[test]
    fn test_long_name_truncated() {
        let name = "n".repeat(MAX_QUERY_NAME_LEN + 10);
        let params = parse_query_string(&format!("{}=1", name));
        assert_eq!(params[0].name.len(), MAX_QUERY_NAME_LEN);
        assert!(params[0].valid);
    }

    #[test]
    fn test_long_value_truncated_but_parsed() {
        let value = "1".repeat(MAX_QUERY_VAL_LEN + 10);
        let params = parse_query_string(&format!("session={}", value));
        // The truncated digit run still exceeds i64 range, so it is invalid
        assert!(!params[0].valid);
    }

    #[test]
    fn test_non_ascii_value_is_invalid() {
        let params = parse_query_string("session=1\u{00e9}2");
        assert_eq!(params.len(), 1);
        assert!(!params[0].valid);
    }

    #[test]
    fn test_lookup_valid_skips_invalid() {
        let params = parse_query_string("session=abc&starttime=17");
        assert_eq!(lookup_valid(&params, "session"), None);
        assert_eq!(lookup_valid(&params, "starttime"), Some(17));
        assert_eq!(lookup_valid(&params, "missing"), None);
        assert!(is_present(&params, "session"));
        assert!(!is_present(&params, "missing"));
    }

    #[test]
    fn test_reconstitute_round_trip() {
        let query = reconstitute(1, true, &[(0, 1234), (2, 8080)]);
        assert_eq!(
            query,
            "includeexisting=1&termsaccepted=1&customport0=1234&customport2=8080"
        );

        // Reparsing yields semantically identical entries in slot order
        let params = parse_query_string(&query);
        assert_eq!(lookup_valid(&params, "includeexisting"), Some(1));
        assert_eq!(lookup_valid(&params, "customport0"), Some(1234));
        assert_eq!(lookup_valid(&params, "customport2"), Some(8080));
        let reparsed: Vec<&str> = params
            .iter()
            .filter(|p| p.name.starts_with("customport"))
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(reparsed, vec!["customport0", "customport2"]);
    }

    #[test]
    fn test_empty_query() {
        assert!(parse_query_string("").is_empty());
    }
}
