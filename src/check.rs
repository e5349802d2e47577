//! In-program equality checks
//!
//! Practice programs verify themselves with [`expect_equal!`](crate::expect_equal).
//! Each check writes one report line to the session output, between snapshots:
//!
//! ```text
//! [TEST:PASS] reverse_of("stop") == "pots"
//! [TEST:FAIL] twice(2) == 5 Expected: 5 Actual: 4
//! [TEST:FAIL] reverse_of("no") == "no" Expected: no Actual: on
//! ```
//!
//! Expected and actual values are written in their `Display` form, unquoted.

/// Compare two values and report the outcome through a session
///
/// Evaluates to `Result<bool, DebugError>`: whether the check passed, or the
/// output error if the report could not be written.
#[macro_export]
macro_rules! expect_equal {
    ($session:expr, $actual:expr, $expected:expr $(,)?) => {{
        let actual = $actual;
        let expected = $expected;
        let passed = actual == expected;
        $session.report_check(
            passed,
            stringify!($actual),
            stringify!($expected),
            &::std::string::ToString::to_string(&actual),
            &::std::string::ToString::to_string(&expected),
        )
    }};
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::driver::AutoDriver;
    use crate::session::DebugSession;
    use crate::snapshot::CapturedOutput;

    fn session() -> (DebugSession, CapturedOutput) {
        let out = CapturedOutput::new();
        let session = DebugSession::new(SessionConfig::default(), AutoDriver::new(), out.clone());
        (session, out)
    }

    #[test]
    fn test_passing_check() {
        let (session, out) = session();
        let passed = crate::expect_equal!(session, 2 + 2, 4).unwrap();
        assert!(passed);
        assert_eq!(out.lines(), ["[TEST:PASS] 2 + 2 == 4"]);
    }

    #[test]
    fn test_failing_check_reports_both_values() {
        let (session, out) = session();
        let word = String::from("stop");
        let passed = crate::expect_equal!(session, word.clone(), "pots").unwrap();
        assert!(!passed);
        assert_eq!(
            out.lines(),
            ["[TEST:FAIL] word.clone() == \"pots\" Expected: pots Actual: stop"]
        );
    }
}
