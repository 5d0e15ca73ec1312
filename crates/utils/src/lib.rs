use chrono::{DateTime, TimeZone, Utc};

pub mod error;
pub mod fs;

/// Milliseconds since the unix epoch, the unit every persisted timestamp uses.
#[must_use]
pub fn to_millis(time: DateTime<Utc>) -> i64 {
	time.timestamp_millis()
}

/// Inverse of [`to_millis`], saturating to the epoch on out of range values.
#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
	Utc.timestamp_millis_opt(millis)
		.single()
		.unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn millis_round_trip_keeps_millisecond_precision() {
		let now = Utc::now();
		let back = from_millis(to_millis(now));

		assert_eq!(back.timestamp_millis(), now.timestamp_millis());
	}

	#[test]
	fn out_of_range_millis_saturate_to_epoch() {
		assert_eq!(from_millis(i64::MAX), DateTime::UNIX_EPOCH);
	}
}
