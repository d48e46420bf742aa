//! Pure token-bucket rate-limit math. No I/O.
//!
//! This module is the most test-sensitive part of the crate: the refill
//! algorithm deliberately discards sub-interval remainder (it resets
//! `last_refilled` to "now" rather than to `last_refilled + refills *
//! interval`), and every faithful reimplementation must preserve that
//! rounding behavior exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A duration expressed as milliseconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Millis(pub i64);

impl Millis {
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.0.max(0))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

/// Configuration half of a rate-limit block: capacity and refill cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: i64,
    pub refill_rate: i64,
    pub refill_interval: Millis,
}

impl RateLimitConfig {
    /// A rate-limit is configured iff `limit > 0` and both `refill_rate`
    /// and `refill_interval` are positive. Refill is a no-op whenever this
    /// is false.
    pub fn configured(&self) -> bool {
        self.limit > 0 && self.refill_rate > 0 && self.refill_interval.is_positive()
    }
}

/// State half of a rate-limit block: current budget and accounting clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub remaining: i64,
    pub last_refilled: DateTime<Utc>,
}

/// The result of running the refill algorithm: the (possibly unchanged)
/// new state, and whether it actually changed.
pub struct Refilled {
    pub state: RateLimitState,
    pub updated: bool,
}

/// Refill `state` up to `now`, per `config`.
///
/// ```text
/// elapsed  = now - state.last_refilled                 (nanoseconds)
/// refills  = floor(elapsed / refill_interval)
/// new_r    = min(state.remaining + refills * refill_rate, limit)
/// updated  = new_r != state.remaining
/// if updated: last_refilled := now   (NOT last_refilled + refills*interval)
/// ```
///
/// The implementation discards sub-interval remainder by design: once any
/// refill happens, the accounting clock jumps to `now`, not to the exact
/// moment the last whole interval elapsed. This matches established
/// behavior and must not be "fixed" to a more precise accounting scheme.
pub fn refill(config: &RateLimitConfig, state: &RateLimitState, now: DateTime<Utc>) -> Refilled {
    if !config.configured() {
        return Refilled { state: *state, updated: false };
    }

    let elapsed = now - state.last_refilled;
    if elapsed.num_milliseconds() < 0 {
        return Refilled { state: *state, updated: false };
    }

    let interval_ms = config.refill_interval.0.max(1);
    let refills = elapsed.num_milliseconds() / interval_ms;
    if refills <= 0 {
        return Refilled { state: *state, updated: false };
    }

    let new_remaining = (state.remaining.saturating_add(refills.saturating_mul(config.refill_rate)))
        .min(config.limit);
    let updated = new_remaining != state.remaining;

    let new_state = if updated {
        RateLimitState { remaining: new_remaining, last_refilled: now }
    } else {
        *state
    };

    Refilled { state: new_state, updated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(limit: i64, rate: i64, interval_ms: i64) -> RateLimitConfig {
        RateLimitConfig { limit, refill_rate: rate, refill_interval: Millis(interval_ms) }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn unconfigured_is_a_no_op() {
        let cfg = RateLimitConfig::default();
        let state = RateLimitState { remaining: 3, last_refilled: at(0) };
        let result = refill(&cfg, &state, at(1_000_000));
        assert!(!result.updated);
        assert_eq!(result.state.remaining, 3);
    }

    // Scenario S3 from the spec: limit=10, refill_rate=1, refill_interval=60s,
    // remaining=5, last_refilled=T.
    #[test]
    fn scenario_s3_refill_math() {
        let cfg = config(10, 1, 60_000);
        let t0 = at(0);
        let state = RateLimitState { remaining: 5, last_refilled: t0 };

        let r1 = refill(&cfg, &state, t0 + chrono::Duration::seconds(60));
        assert_eq!(r1.state.remaining, 6);
        assert!(r1.updated);

        let r2 = refill(&cfg, &r1.state, r1.state.last_refilled + chrono::Duration::seconds(120));
        assert_eq!(r2.state.remaining, 8);

        let r3 = refill(&cfg, &r2.state, r2.state.last_refilled + chrono::Duration::seconds(300));
        assert_eq!(r3.state.remaining, 10);
    }

    #[test]
    fn last_refilled_jumps_to_now_not_to_elapsed_boundary() {
        let cfg = config(100, 1, 10_000);
        let t0 = at(0);
        let state = RateLimitState { remaining: 0, last_refilled: t0 };
        // 25 seconds elapsed = 2 whole refills, 5s sub-interval remainder.
        let observed_at = t0 + chrono::Duration::seconds(25);
        let result = refill(&cfg, &state, observed_at);
        assert_eq!(result.state.remaining, 2);
        // last_refilled resets to "now", discarding the 5s remainder -
        // it is NOT t0 + 20s.
        assert_eq!(result.state.last_refilled, observed_at);
    }

    #[test]
    fn sub_interval_elapsed_does_not_refill() {
        let cfg = config(10, 1, 60_000);
        let state = RateLimitState { remaining: 5, last_refilled: at(0) };
        let result = refill(&cfg, &state, at(30));
        assert!(!result.updated);
        assert_eq!(result.state.remaining, 5);
    }

    proptest::proptest! {
        /// Property 2 from the spec: after any sequence of refills,
        /// remaining is always bounded by limit.
        #[test]
        fn prop_refill_never_exceeds_limit(
            limit in 1i64..10_000,
            rate in 1i64..1_000,
            interval_ms in 1i64..100_000,
            initial_remaining in 0i64..10_000,
            elapsed_secs in 0i64..10_000_000,
        ) {
            let cfg = config(limit, rate, interval_ms);
            let state = RateLimitState {
                remaining: initial_remaining.min(limit),
                last_refilled: at(0),
            };
            let result = refill(&cfg, &state, at(elapsed_secs));
            proptest::prop_assert!(result.state.remaining <= limit);
        }
    }
}
