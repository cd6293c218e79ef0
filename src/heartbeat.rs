//! Heartbeat: periodic liveness probes and silent-failure detection.
//!
//! While the connection is open, emits a `heartbeat` frame every
//! `heartbeat_ms` and watches for silent failure: if no inbound traffic of
//! any kind has been observed for `2 * heartbeat_ms`, the connection is
//! presumed dead and the caller should tear it down and reconnect.

use std::time::Duration;
use tokio::time::{Instant, Interval};

pub struct Heartbeat {
	interval_duration: Duration,
	tick: Interval,
	last_inbound: Instant,
}

impl Heartbeat {
	pub fn new(interval_duration: Duration) -> Self {
		let mut tick = tokio::time::interval(interval_duration);
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		Self {
			interval_duration,
			tick,
			last_inbound: Instant::now(),
		}
	}

	/// Resolves on the next heartbeat tick; call
	/// [`Self::note_inbound_traffic`] separately whenever a frame arrives.
	pub async fn tick(&mut self) {
		self.tick.tick().await;
	}

	/// Records that inbound traffic (of any kind) was just observed,
	/// resetting the silence window.
	pub fn note_inbound_traffic(&mut self) {
		self.last_inbound = Instant::now();
	}

	/// `true` once `2 * heartbeat_ms` has elapsed since the last inbound
	/// traffic of any kind.
	pub fn is_silent(&self) -> bool {
		self.last_inbound.elapsed() >= self.interval_duration * 2
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn silence_is_detected_after_two_intervals() {
		let mut heartbeat = Heartbeat::new(Duration::from_millis(10));
		assert!(!heartbeat.is_silent());
		tokio::time::advance(Duration::from_millis(21)).await;
		assert!(heartbeat.is_silent());
	}

	#[tokio::test(start_paused = true)]
	async fn inbound_traffic_resets_the_silence_window() {
		let mut heartbeat = Heartbeat::new(Duration::from_millis(10));
		tokio::time::advance(Duration::from_millis(15)).await;
		heartbeat.note_inbound_traffic();
		assert!(!heartbeat.is_silent());
	}
}
