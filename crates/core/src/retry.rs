//! Backoff computation for the reschedule path (§4.5 Reporting, §4.6):
//! exponential delay with jitter. Error classification is no longer
//! meaningful here since the job body is an external black box (§1), so this
//! module keeps only the delay math.

use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 900,
            jitter_pct: 0.20,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff `base * 2^(attempt_no - 1)`, capped at
    /// `max_seconds`, with up to `jitter_pct` of the capped value added or
    /// subtracted at random. `attempt_no` is 1-indexed (the attempt about to
    /// be made).
    pub fn next_delay_seconds(&self, attempt_no: i32, rng: &mut impl Rng) -> u64 {
        let exponent = attempt_no.saturating_sub(1).max(0) as u32;
        let raw = 1u64
            .checked_shl(exponent.min(62))
            .unwrap_or(u64::MAX)
            .saturating_mul(self.base_seconds);
        let capped = raw.min(self.max_seconds);

        if self.jitter_pct <= 0.0 || capped == 0 {
            return capped;
        }

        let jitter_range = (capped as f64 * self.jitter_pct) as i64;
        if jitter_range == 0 {
            return capped;
        }
        let offset = rng.gen_range(-jitter_range..=jitter_range);
        (capped as i64 + offset).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let cfg = RetryConfig { jitter_pct: 0.0, ..Default::default() };
        let mut rng = rand::thread_rng();
        assert_eq!(cfg.next_delay_seconds(1, &mut rng), 2);
        assert_eq!(cfg.next_delay_seconds(2, &mut rng), 4);
        assert_eq!(cfg.next_delay_seconds(3, &mut rng), 8);
        assert_eq!(cfg.next_delay_seconds(20, &mut rng), cfg.max_seconds);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let cfg = RetryConfig { base_seconds: 100, max_seconds: 100, jitter_pct: 0.5, ..Default::default() };
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let d = cfg.next_delay_seconds(1, &mut rng);
            assert!((50..=150).contains(&d), "delay {d} out of expected jitter band");
        }
    }
}
