//! Circuit breaker: stop healing when attempts stop making progress.
//!
//! Non-convergence compares attempts only: the failure that opened the
//! session does not count as a repeat. Alternation does count it, so an
//! initial A followed by B, A, B oscillates within three attempts.

use crate::model::{Attempt, StopReason, Trend};

/// Window for alternation: A, B, A, B.
const OSCILLATION_WINDOW: usize = 4;

/// Whether the attempts so far trip the breaker. `initial_fingerprint`
/// identifies the failure that opened the session.
pub fn evaluate(initial_fingerprint: &str, attempts: &[Attempt]) -> Option<(StopReason, String)> {
    let failed: Vec<&Attempt> = attempts
        .iter()
        .rev()
        .take_while(|a| !a.passed)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if let [.., previous, last] = failed.as_slice()
        && !last.fingerprint.is_empty()
        && previous.fingerprint == last.fingerprint
    {
        return Some((
            StopReason::NonConvergent,
            format!(
                "attempts {} and {} failed identically ({}): {}",
                previous.number,
                last.number,
                last.fingerprint,
                last.message.as_deref().unwrap_or_default()
            ),
        ));
    }

    // (label, fingerprint), oldest first.
    let mut sequence: Vec<(String, &str)> = Vec::with_capacity(failed.len() + 1);
    if failed.len() == attempts.len() && !initial_fingerprint.is_empty() {
        sequence.push(("the initial run".to_string(), initial_fingerprint));
    }
    sequence.extend(
        failed
            .iter()
            .map(|a| (format!("attempt {}", a.number), a.fingerprint.as_str())),
    );

    if sequence.len() >= OSCILLATION_WINDOW {
        let window = &sequence[sequence.len() - OSCILLATION_WINDOW..];
        let (a, b) = (window[0].1, window[1].1);
        if a != b && window[2].1 == a && window[3].1 == b {
            return Some((
                StopReason::Oscillating,
                format!(
                    "failures alternate between {a} and {b} from {} to {}",
                    window[0].0, window[3].0
                ),
            ));
        }
    }

    None
}

/// Direction of the failure count across the last two data points, the
/// initial run included.
pub fn trend(initial_failures: usize, attempts: &[Attempt]) -> Trend {
    let counts: Vec<usize> = std::iter::once(initial_failures)
        .chain(attempts.iter().map(|a| a.failures))
        .collect();
    match counts.as_slice() {
        [.., before, after] if after < before => Trend::Improving,
        [.., before, after] if after > before => Trend::Worsening,
        [_, _, ..] => Trend::Stable,
        _ => Trend::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    use crate::model::{AppliedFix, FixFamily};

    fn attempt(number: u32, fingerprint: &str, failures: usize) -> Attempt {
        Attempt {
            number,
            fix: AppliedFix {
                family: FixFamily::UpgradeSelector,
                target: "step-1".into(),
                detail: String::new(),
            },
            passed: fingerprint.is_empty(),
            fingerprint: fingerprint.into(),
            category: None,
            message: Some(format!("message {fingerprint}")),
            failures,
            cost_ms: 10,
            at: Timestamp::now(),
        }
    }

    #[test]
    fn repeated_fingerprint_is_non_convergent() {
        assert!(evaluate("", &[attempt(1, "aa", 1)]).is_none());
        let (reason, detail) = evaluate("", &[attempt(1, "aa", 1), attempt(2, "aa", 1)]).unwrap();
        assert_eq!(reason, StopReason::NonConvergent);
        assert_eq!(detail, "attempts 1 and 2 failed identically (aa): message aa");
    }

    #[test]
    fn initial_failure_is_not_a_repeat() {
        assert!(evaluate("aa", &[attempt(1, "aa", 1)]).is_none());
    }

    #[test]
    fn alternating_fingerprints_oscillate() {
        let attempts = [
            attempt(1, "aa", 1),
            attempt(2, "bb", 1),
            attempt(3, "aa", 1),
            attempt(4, "bb", 1),
        ];
        assert!(evaluate("", &attempts[..3]).is_none());
        let (reason, detail) = evaluate("", &attempts).unwrap();
        assert_eq!(reason, StopReason::Oscillating);
        assert_eq!(
            detail,
            "failures alternate between aa and bb from attempt 1 to attempt 4"
        );
    }

    #[test]
    fn alternation_counts_the_initial_failure() {
        let attempts = [attempt(1, "bb", 1), attempt(2, "aa", 1), attempt(3, "bb", 1)];
        assert!(evaluate("aa", &attempts[..2]).is_none());
        let (reason, detail) = evaluate("aa", &attempts).unwrap();
        assert_eq!(reason, StopReason::Oscillating);
        assert_eq!(
            detail,
            "failures alternate between aa and bb from the initial run to attempt 3"
        );
    }

    #[test]
    fn changing_failures_keep_the_circuit_closed() {
        let attempts = [attempt(1, "aa", 3), attempt(2, "bb", 2), attempt(3, "cc", 1)];
        assert!(evaluate("zz", &attempts).is_none());
    }

    #[test]
    fn trend_follows_the_failure_count() {
        assert_eq!(trend(2, &[]), Trend::Unknown);
        assert_eq!(trend(2, &[attempt(1, "aa", 1)]), Trend::Improving);
        assert_eq!(trend(2, &[attempt(1, "aa", 3)]), Trend::Worsening);
        assert_eq!(trend(1, &[attempt(1, "aa", 1)]), Trend::Stable);
    }
}
