use std::time::Duration;

use crate::TransactionId;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff with a stable per record jitter.
///
/// The jitter fraction is derived from the record id instead of being drawn
/// on every call: terminals reconnecting together still spread their retries
/// out, while the delay of a single record never shrinks as attempts grow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
	pub base: Duration,
	pub cap: Duration,
	/// Fraction of the delay, in `[0, 1]`, that may be shaved off.
	pub jitter: f64,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(2),
			cap: Duration::from_secs(5 * 60),
			jitter: 0.5,
		}
	}
}

impl Backoff {
	/// Delay to wait after the `attempts`-th failed attempt of `id`.
	#[must_use]
	pub fn delay(&self, attempts: u32, id: &TransactionId) -> Duration {
		self.delay_with_seed(attempts, id.jitter_seed())
	}

	#[must_use]
	pub fn delay_with_seed(&self, attempts: u32, seed: u64) -> Duration {
		if attempts == 0 {
			return Duration::ZERO;
		}

		let exponent = (attempts - 1).min(31);
		let raw = self.base.saturating_mul(1 << exponent).min(self.cap);

		// 53 significant bits map exactly onto an f64 in [0, 1)
		#[allow(clippy::cast_precision_loss)]
		let fraction = (seed >> 11) as f64 / (1_u64 << 53) as f64;
		let factor = 1.0 - self.jitter.clamp(0.0, 1.0) * fraction;

		raw.mul_f64(factor).max(MIN_DELAY)
	}
}
