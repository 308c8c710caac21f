use chrono::Duration;

/// Interval until the next poll after `error_count` consecutive failures.
///
/// `base * 2^error_count`, capped at `max`. Zero failures yields `base`
/// untouched, even when it exceeds `max`.
pub fn next_interval(base: Duration, max: Duration, error_count: u32) -> Duration {
    if error_count == 0 {
        return base;
    }
    if base <= Duration::zero() || base >= max {
        return max;
    }

    let mut interval = base;
    for _ in 0..error_count {
        interval = interval * 2;
        if interval >= max {
            return max;
        }
    }
    interval
}
