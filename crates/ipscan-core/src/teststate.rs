//! Per-session test-state bitfield
//!
//! A scan's lifecycle is tracked in a single store row keyed with
//! `(port 0, protocol TESTSTATE)` whose result value is this bitfield.
//! The browser-side controller reports progress through completion-class
//! `fetchnum` values; each maps to one flag here. A successful completion
//! is absolute: it overwrites every other flag.

use std::fmt;

/// `fetchnum` values at or above this threshold report a completion or
/// error event rather than requesting incremental results.
pub const SUCCESSFUL_COMPLETION: i64 = 990;
/// Upper bound on accepted `fetchnum` values
pub const MAX_FETCHNUM: i64 = 4096;

/// Completion-class events reported by the polling client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchEvent {
    /// Clean completion
    SuccessfulCompletion,
    /// Client HTTP poll timed out
    HttpTimeout,
    /// Client failed to parse fetched JSON
    EvalError,
    /// Client reported an unspecified error
    OtherError,
    /// Client signalled a failed completion
    UnsuccessfulCompletion,
    /// Client navigated away mid-test
    NavigateAway,
    /// Client received unparseable JSON
    BadJson,
    /// Client observed an unexpected state change
    UnexpectedChange,
}

impl FetchEvent {
    /// Map a completion-class `fetchnum` to its event
    pub fn from_fetchnum(fetchnum: i64) -> Option<Self> {
        match fetchnum {
            990 => Some(FetchEvent::SuccessfulCompletion),
            991 => Some(FetchEvent::HttpTimeout),
            992 => Some(FetchEvent::EvalError),
            993 => Some(FetchEvent::OtherError),
            994 => Some(FetchEvent::UnsuccessfulCompletion),
            995 => Some(FetchEvent::NavigateAway),
            996 => Some(FetchEvent::BadJson),
            997 => Some(FetchEvent::UnexpectedChange),
            _ => None,
        }
    }
}

/// Lifecycle flags for one test, stored as the result value of the
/// test-state row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestState(i32);

impl TestState {
    pub const RUNNING: TestState = TestState(0x1);
    pub const COMPLETE: TestState = TestState(0x2);
    pub const HTTPTIMEOUT: TestState = TestState(0x4);
    pub const EVALERROR: TestState = TestState(0x8);
    pub const OTHERERROR: TestState = TestState(0x10);
    pub const BADCOMPLETE: TestState = TestState(0x20);
    pub const NAVAWAY: TestState = TestState(0x40);
    pub const UNEXPCHANGE: TestState = TestState(0x80);
    pub const DATABASE_ERROR: TestState = TestState(0x100);

    /// Reconstruct a state from its stored value
    pub fn from_bits(bits: i32) -> Self {
        TestState(bits)
    }

    /// Stored value
    pub fn bits(self) -> i32 {
        self.0
    }

    /// Whether every flag in `other` is set
    pub fn contains(self, other: TestState) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Set the flags in `other`
    pub fn insert(self, other: TestState) -> TestState {
        TestState(self.0 | other.0)
    }

    /// Whether the client has signalled the end of the test, cleanly or not
    pub fn is_finished(self) -> bool {
        self.contains(TestState::COMPLETE) || self.contains(TestState::BADCOMPLETE)
    }

    /// Apply a client-reported completion event
    ///
    /// A clean completion overwrites every other flag; any other event is
    /// OR-ed into the existing state.
    pub fn apply(self, event: FetchEvent) -> TestState {
        match event {
            FetchEvent::SuccessfulCompletion => TestState::COMPLETE,
            FetchEvent::HttpTimeout => self.insert(TestState::HTTPTIMEOUT),
            FetchEvent::EvalError | FetchEvent::BadJson => self.insert(TestState::EVALERROR),
            FetchEvent::OtherError => self.insert(TestState::OTHERERROR),
            FetchEvent::UnsuccessfulCompletion => self.insert(TestState::BADCOMPLETE),
            FetchEvent::NavigateAway => self.insert(TestState::NAVAWAY),
            FetchEvent::UnexpectedChange => self.insert(TestState::UNEXPCHANGE),
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        static NAMES: &[(TestState, &str)] = &[
            (TestState::RUNNING, "RUNNING"),
            (TestState::COMPLETE, "COMPLETE"),
            (TestState::HTTPTIMEOUT, "HTTPTIMEOUT"),
            (TestState::EVALERROR, "EVALERROR"),
            (TestState::OTHERERROR, "OTHERERROR"),
            (TestState::BADCOMPLETE, "BADCOMPLETE"),
            (TestState::NAVAWAY, "NAVAWAY"),
            (TestState::UNEXPCHANGE, "UNEXPCHANGE"),
            (TestState::DATABASE_ERROR, "DATABASE-ERROR"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_only_at_start() {
        let state = TestState::RUNNING;
        assert_eq!(state.bits(), 0x1);
        assert!(!state.is_finished());
    }

    #[test]
    fn test_successful_completion_overwrites() {
        let state = TestState::RUNNING
            .insert(TestState::HTTPTIMEOUT)
            .insert(TestState::DATABASE_ERROR);
        let after = state.apply(FetchEvent::SuccessfulCompletion);
        assert_eq!(after, TestState::COMPLETE);
        assert!(!after.contains(TestState::RUNNING));
        assert!(!after.contains(TestState::HTTPTIMEOUT));
        assert!(after.is_finished());
    }

    #[test]
    fn test_error_events_accumulate() {
        let state = TestState::RUNNING
            .apply(FetchEvent::HttpTimeout)
            .apply(FetchEvent::NavigateAway);
        assert!(state.contains(TestState::RUNNING));
        assert!(state.contains(TestState::HTTPTIMEOUT));
        assert!(state.contains(TestState::NAVAWAY));
        assert!(!state.is_finished());
    }

    #[test]
    fn test_bad_json_maps_to_evalerror() {
        let state = TestState::RUNNING.apply(FetchEvent::BadJson);
        assert!(state.contains(TestState::EVALERROR));
    }

    #[test]
    fn test_bad_complete_finishes() {
        let state = TestState::RUNNING.apply(FetchEvent::UnsuccessfulCompletion);
        assert!(state.is_finished());
    }

    #[test]
    fn test_fetchnum_mapping() {
        assert_eq!(
            FetchEvent::from_fetchnum(SUCCESSFUL_COMPLETION),
            Some(FetchEvent::SuccessfulCompletion)
        );
        assert_eq!(FetchEvent::from_fetchnum(996), Some(FetchEvent::BadJson));
        assert_eq!(FetchEvent::from_fetchnum(989), None);
        assert_eq!(FetchEvent::from_fetchnum(998), None);
    }

    #[test]
    fn test_display_flags() {
        let state = TestState::RUNNING.insert(TestState::DATABASE_ERROR);
        assert_eq!(state.to_string(), "RUNNING|DATABASE-ERROR");
        assert_eq!(TestState::from_bits(0).to_string(), "NONE");
    }
}
