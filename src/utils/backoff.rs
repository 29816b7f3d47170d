// Retry schedules and jittered exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Default retry schedule in seconds for temp-fail and rate-limited work.
pub const DEFAULT_RETRY_SCHEDULE: [u64; 5] = [5, 15, 45, 90, 180];

/// Backoff ceiling; nothing waits longer than 24 hours.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay for the given zero-based attempt from a fixed schedule. Attempts
/// beyond the schedule reuse the last entry.
pub fn schedule_delay(schedule: &[u64], attempt: u32) -> Duration {
    if schedule.is_empty() {
        return Duration::from_secs(0);
    }
    let idx = (attempt as usize).min(schedule.len() - 1);
    Duration::from_secs(schedule[idx]).min(MAX_BACKOFF)
}

/// Full-jitter exponential backoff: uniform(0, min(cap, base * 2^attempt)).
pub fn full_jitter(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base
        .saturating_mul(2u32.saturating_pow(attempt.min(32)))
        .min(cap)
        .min(MAX_BACKOFF);
    if exp.is_zero() {
        return exp;
    }
    let micros = rand::thread_rng().gen_range(0..=exp.as_micros() as u64);
    Duration::from_micros(micros)
}

/// Apply ±`pct` percent jitter to a duration (e.g. 0.15 for ±15%).
pub fn with_jitter(d: Duration, pct: f64) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-pct..=pct);
    Duration::from_secs_f64((d.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_delay_follows_schedule() {
        let sched = DEFAULT_RETRY_SCHEDULE;
        assert_eq!(schedule_delay(&sched, 0), Duration::from_secs(5));
        assert_eq!(schedule_delay(&sched, 1), Duration::from_secs(15));
        assert_eq!(schedule_delay(&sched, 4), Duration::from_secs(180));
        // Beyond the schedule we stay at the last entry
        assert_eq!(schedule_delay(&sched, 40), Duration::from_secs(180));
    }

    #[test]
    fn test_schedule_delay_empty() {
        assert_eq!(schedule_delay(&[], 3), Duration::from_secs(0));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        for attempt in 0..10 {
            let d = full_jitter(base, attempt, cap);
            assert!(d <= cap, "attempt {} produced {:?}", attempt, d);
        }
    }

    #[test]
    fn test_full_jitter_overflow_safe() {
        let d = full_jitter(Duration::from_secs(60), u32::MAX, MAX_BACKOFF);
        assert!(d <= MAX_BACKOFF);
    }

    #[test]
    fn test_with_jitter_range() {
        let base = Duration::from_secs(100);
        for _ in 0..50 {
            let d = with_jitter(base, 0.15);
            assert!(d >= Duration::from_secs(84) && d <= Duration::from_secs(116));
        }
    }
}
