//! Reconnect backoff policy: capped exponential delay with jitter.

use rand::Rng;
use std::time::Duration;

const BASE_MS: u64 = 250;
const JITTER_MAX_MS: u64 = 200;
const DEFAULT_CAP_MS: u64 = 5000;

/// Computes `min(cap, 250ms * 2^attempt) + uniform_jitter(0, 200ms)`.
///
/// `attempt` is zero-based. `cap` defaults to 5000ms via [`delay`].
pub fn delay_with_cap(attempt: u32, cap: Duration) -> Duration {
	let exponential = BASE_MS.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
	let capped = exponential.min(cap.as_millis() as u64);
	let jitter = rand::thread_rng().gen_range(0..=JITTER_MAX_MS);
	Duration::from_millis(capped + jitter)
}

/// Computes the retry delay for `attempt` using the default 5000ms cap.
pub fn delay(attempt: u32) -> Duration {
	delay_with_cap(attempt, Duration::from_millis(DEFAULT_CAP_MS))
}

/// Tracks reconnect attempts and produces delays, resetting to zero on
/// success.
#[derive(Debug)]
pub struct Backoff {
	attempt: u32,
	cap: Duration,
}

impl Backoff {
	pub fn new(cap: Duration) -> Self {
		Self { attempt: 0, cap }
	}

	/// Returns the delay for the current attempt, then increments it.
	pub fn next_delay(&mut self) -> Duration {
		let delay = delay_with_cap(self.attempt, self.cap);
		self.attempt = self.attempt.saturating_add(1);
		delay
	}

	/// Resets the attempt counter to zero after a successful connection.
	pub fn reset(&mut self) {
		self.attempt = 0;
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self::new(Duration::from_millis(DEFAULT_CAP_MS))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delays_fall_within_documented_bounds() {
		let cap = Duration::from_millis(5000);
		let bounds = [
			(250u64, 450u64),
			(500, 700),
			(1000, 1200),
			(2000, 2200),
			(4000, 4200),
			(5000, 5200),
			(5000, 5200),
		];
		for (attempt, (lo, hi)) in bounds.into_iter().enumerate() {
			for _ in 0..50 {
				let d = delay_with_cap(attempt as u32, cap).as_millis() as u64;
				assert!(d >= lo && d <= hi, "attempt {attempt} delay {d}ms out of [{lo},{hi}]");
			}
		}
	}

	#[test]
	fn reset_returns_to_first_delay_bounds() {
		let mut backoff = Backoff::new(Duration::from_millis(5000));
		let _ = backoff.next_delay();
		let _ = backoff.next_delay();
		backoff.reset();
		let d = backoff.next_delay().as_millis() as u64;
		assert!((250..=450).contains(&d));
	}
}
