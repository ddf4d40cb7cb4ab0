#![forbid(unsafe_code)]

use rondo_protocol::QuotaParams;

/// Continuously regenerating cost budget for note events.
///
/// The pool holds up to `max` points and refills linearly at
/// `max / WINDOW_MS` points per millisecond, so fractional accounting
/// is exact regardless of how often it is polled. A short-lived read
/// cache absorbs bursts of reads within one processing tick; it is
/// invalidated on any reset and re-primed on spend.
#[derive(Debug, Clone)]
pub struct NoteQuota {
	max: f64,
	points: f64,
	regen_rate: f64,
	last_update_ms: u64,
	cached_points: f64,
	cache_timestamp_ms: Option<u64>,
}

impl NoteQuota {
	/// Refill window: an empty pool regenerates to full in 6 seconds.
	pub const WINDOW_MS: f64 = 6_000.0;
	pub const CACHE_DURATION_MS: u64 = 10;

	pub const MAX_LOBBY: f64 = 600.0;
	pub const MAX_NORMAL: f64 = 1_200.0;
	pub const MAX_CROWN: f64 = 1_800.0;
	pub const MAX_OFFLINE: f64 = 24_000.0;
	pub const MAX_UNLIMITED: f64 = 3_000_000.0;

	pub fn new(max: f64, now_ms: u64) -> Self {
		let max = if max > 0.0 { max } else { Self::MAX_OFFLINE };
		Self {
			max,
			points: max,
			regen_rate: max / Self::WINDOW_MS,
			last_update_ms: now_ms,
			cached_points: max,
			cache_timestamp_ms: None,
		}
	}

	fn recalc(&self, now_ms: u64) -> f64 {
		let elapsed = now_ms.saturating_sub(self.last_update_ms) as f64;
		(self.points + elapsed * self.regen_rate).min(self.max)
	}

	/// Current points, served from the cache when it is fresh.
	pub fn points_at(&mut self, now_ms: u64) -> f64 {
		if let Some(stamp) = self.cache_timestamp_ms
			&& now_ms.saturating_sub(stamp) < Self::CACHE_DURATION_MS
		{
			return self.cached_points;
		}

		let current = self.recalc(now_ms);
		self.cached_points = current;
		self.cache_timestamp_ms = Some(now_ms);
		current
	}

	/// Change the pool capacity. Unchanged capacity is a no-op returning
	/// `false`; a changed capacity refills the pool and returns `true`.
	pub fn set_params_at(&mut self, max: f64, now_ms: u64) -> bool {
		let max = if max > 0.0 { max } else { Self::MAX_OFFLINE };
		if max == self.max {
			return false;
		}

		self.max = max;
		self.regen_rate = max / Self::WINDOW_MS;
		self.reset_points_at(now_ms);
		true
	}

	/// Refill to capacity and invalidate the cache. Returns the new
	/// point count so the caller can push updated parameters to the peer.
	pub fn reset_points_at(&mut self, now_ms: u64) -> f64 {
		self.points = self.max;
		self.last_update_ms = now_ms;
		self.cache_timestamp_ms = None;
		self.points
	}

	/// Deduct `cost` if the freshly recomputed pool covers it; a short
	/// pool rejects without any mutation.
	pub fn spend_at(&mut self, cost: f64, now_ms: u64) -> bool {
		let current = self.recalc(now_ms);
		if current < cost {
			return false;
		}

		self.points = current - cost;
		self.last_update_ms = now_ms;
		self.cached_points = self.points;
		self.cache_timestamp_ms = Some(now_ms);
		true
	}

	/// Wire parameters (`nq`) for this pool.
	pub fn params(&self) -> QuotaParams {
		QuotaParams {
			allowance: self.max / 3.0,
			max: self.max,
			max_hist_len: 3,
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn pool_starts_full_and_regenerates_linearly() {
		let mut q = NoteQuota::new(NoteQuota::MAX_NORMAL, 0);
		assert_eq!(q.points_at(0), 1_200.0);

		assert!(q.spend_at(1_200.0, 0));
		// 1200 / 6000ms = 0.2 points per ms
		assert_eq!(q.points_at(100), 20.0);
		assert_eq!(q.points_at(3_000 + NoteQuota::CACHE_DURATION_MS), 600.0 + 2.0);
		// never exceeds capacity
		assert_eq!(q.points_at(1_000_000), 1_200.0);
	}

	#[test]
	fn spend_rejects_without_mutation_when_short() {
		let mut q = NoteQuota::new(100.0, 0);
		assert!(q.spend_at(100.0, 0));
		assert!(!q.spend_at(1.0, 0));
		assert_eq!(q.points_at(NoteQuota::CACHE_DURATION_MS), 100.0 / NoteQuota::WINDOW_MS * NoteQuota::CACHE_DURATION_MS as f64);
	}

	#[test]
	fn set_params_noop_when_capacity_unchanged() {
		let mut q = NoteQuota::new(NoteQuota::MAX_NORMAL, 0);
		assert!(q.spend_at(600.0, 0));

		assert!(!q.set_params_at(NoteQuota::MAX_NORMAL, 0));
		// no reset happened
		assert_eq!(q.points_at(NoteQuota::CACHE_DURATION_MS * 2), 600.0 + 0.2 * (NoteQuota::CACHE_DURATION_MS * 2) as f64);

		assert!(q.set_params_at(NoteQuota::MAX_CROWN, 100));
		assert_eq!(q.points_at(100), 1_800.0);
	}

	#[test]
	fn read_cache_absorbs_reads_within_a_tick() {
		let mut q = NoteQuota::new(NoteQuota::MAX_NORMAL, 0);
		assert!(q.spend_at(1_200.0, 0));

		// spend primes the cache at t=0; reads within CACHE_DURATION_MS
		// serve the cached value even though time has advanced
		assert_eq!(q.points_at(5), 0.0);
		// past the cache window the real value shows up
		assert_eq!(q.points_at(NoteQuota::CACHE_DURATION_MS), 2.0);
	}

	#[test]
	fn spend_primes_the_cache_even_at_time_zero() {
		// the clock is an explicit parameter, so t=0 is a legal instant
		// and must prime the cache like any other spend time
		let mut q = NoteQuota::new(NoteQuota::MAX_NORMAL, 0);
		assert!(q.spend_at(1_200.0, 0));
		assert_eq!(q.points_at(5), 0.0);
	}

	#[test]
	fn reset_invalidates_cache_and_reports_new_value() {
		let mut q = NoteQuota::new(NoteQuota::MAX_NORMAL, 0);
		assert!(q.spend_at(1_000.0, 0));

		assert_eq!(q.reset_points_at(1), 1_200.0);
		assert_eq!(q.points_at(2), 1_200.0);
	}

	proptest! {
		// points(t) == min(C, t * C / W) from an empty pool
		#[test]
		fn regeneration_law(capacity in 1.0f64..100_000.0, elapsed in 0u64..60_000) {
			let mut q = NoteQuota::new(capacity, 0);
			prop_assert!(q.spend_at(capacity, 0));

			let expected = (elapsed as f64 * capacity / NoteQuota::WINDOW_MS).min(capacity);
			let got = q.recalc_for_test(elapsed);
			prop_assert!((got - expected).abs() < 1e-6);
		}

		// the pool never leaves [0, C] across arbitrary spend sequences
		#[test]
		fn pool_stays_bounded(
			capacity in 1.0f64..10_000.0,
			spends in proptest::collection::vec((0u64..5_000, 0.0f64..20_000.0), 1..50),
		) {
			let mut q = NoteQuota::new(capacity, 0);
			let mut now = 0u64;
			for (dt, cost) in spends {
				now += dt;
				let _ = q.spend_at(cost, now);
				let points = q.recalc_for_test(now);
				prop_assert!((0.0..=capacity).contains(&points));
			}
		}
	}

	impl NoteQuota {
		// cache-bypassing read for deterministic property checks
		fn recalc_for_test(&self, now_ms: u64) -> f64 {
			self.recalc(now_ms)
		}
	}
}
