#![forbid(unsafe_code)]

/// Fixed-window event counter. Up to `max` events pass per window;
/// further events in the same window are rejected without side effects.
///
/// The window boundary is rolled lazily on access, in whole multiples
/// of `window_ms`, so windows stay aligned to the first event rather
/// than drifting with traffic.
#[derive(Debug, Clone)]
pub struct EventLimiter {
	max: u32,
	window_ms: u64,
	count: u32,
	window_start_ms: u64,
}

impl EventLimiter {
	pub const DEFAULT_WINDOW_MS: u64 = 1_000;

	pub const MAX_CHAT: u32 = 10;
	pub const MAX_PROFILE: u32 = 5;
	pub const MAX_CURSOR: u32 = 20;

	pub fn new(max: u32, window_ms: u64, now_ms: u64) -> Self {
		Self {
			max: max.max(1),
			window_ms: window_ms.max(1),
			count: 0,
			window_start_ms: now_ms,
		}
	}

	/// Scale the per-window maximum by a multiplier, keeping at least 1.
	pub fn scaled(max: u32, multiplier: f64, now_ms: u64) -> Self {
		let scaled = ((max as f64 * multiplier).floor() as u32).max(1);
		Self::new(scaled, Self::DEFAULT_WINDOW_MS, now_ms)
	}

	fn roll_window(&mut self, now_ms: u64) {
		let elapsed = now_ms.saturating_sub(self.window_start_ms);
		if elapsed >= self.window_ms {
			self.window_start_ms += (elapsed / self.window_ms) * self.window_ms;
			self.count = 0;
		}
	}

	/// Record one event. Returns `false` when the current window is full.
	pub fn emit_at(&mut self, now_ms: u64) -> bool {
		self.roll_window(now_ms);
		if self.count >= self.max {
			return false;
		}

		self.count += 1;
		true
	}

	pub fn max(&self) -> u32 {
		self.max
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allows_exactly_max_per_window() {
		let mut l = EventLimiter::new(5, 1_000, 0);
		for _ in 0..5 {
			assert!(l.emit_at(10));
		}
		assert!(!l.emit_at(10));
		assert!(!l.emit_at(999));
	}

	#[test]
	fn window_resets_after_interval() {
		let mut l = EventLimiter::new(2, 1_000, 0);
		assert!(l.emit_at(0));
		assert!(l.emit_at(0));
		assert!(!l.emit_at(500));

		assert!(l.emit_at(1_000));
		assert!(l.emit_at(1_001));
		assert!(!l.emit_at(1_002));
	}

	#[test]
	fn window_boundaries_stay_aligned() {
		let mut l = EventLimiter::new(1, 1_000, 0);
		assert!(l.emit_at(0));

		// a long idle gap rolls forward in whole windows, so the next
		// boundary remains a multiple of window_ms
		assert!(l.emit_at(3_700));
		assert!(!l.emit_at(3_999));
		assert!(l.emit_at(4_000));
	}

	#[test]
	fn scaled_floors_and_keeps_minimum_of_one() {
		let l = EventLimiter::scaled(10, 0.25, 0);
		assert_eq!(l.max(), 2);
		let l = EventLimiter::scaled(10, 0.01, 0);
		assert_eq!(l.max(), 1);
		let l = EventLimiter::scaled(10, 2.0, 0);
		assert_eq!(l.max(), 20);
	}

	#[test]
	fn rejection_has_no_side_effects() {
		let mut l = EventLimiter::new(1, 1_000, 0);
		assert!(l.emit_at(0));
		for t in 1..100 {
			assert!(!l.emit_at(t));
		}
		assert!(l.emit_at(1_000));
	}
}
