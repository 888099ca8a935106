//! Sliding-window admission control.
//!
//! Three axes, checked in order: per-IP count within the window, global
//! count within the window, and minimum spacing between requests from one
//! source. Counters are plain timestamp vectors pruned on every admission;
//! at the configured limits (tens of requests per window) that beats any
//! cleverer structure. Applied as middleware before authentication so
//! unauthenticated floods stay cheap to reject.

use crate::config::RateSettings;
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	net::IpAddr,
	time::{Duration, Instant},
};

/// Why a request was turned away. Carries the seconds a client should wait.
#[derive(Debug, PartialEq, Eq)]
pub struct Rejection {
	pub detail: &'static str,
	pub retry_after: u64,
}

pub struct RateLimiter {
	settings: RateSettings,
	state: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
	per_ip: HashMap<IpAddr, Vec<Instant>>,
	global: Vec<Instant>,
}

impl RateLimiter {
	pub fn new(settings: RateSettings) -> RateLimiter {
		RateLimiter {
			settings,
			state: Mutex::new(Counters::default()),
		}
	}

	/// Admit or reject a request from `ip` arriving now.
	pub fn check(&self, ip: IpAddr) -> Result<(), Rejection> {
		self.check_at(ip, Instant::now())
	}

	fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), Rejection> {
		let window = self.settings.window;
		let retry_after = window.as_secs().max(1);
		let mut state = self.state.lock();

		let entries = state.per_ip.entry(ip).or_default();
		prune(entries, now, window);
		if self.settings.min_interval > Duration::ZERO {
			if let Some(last) = entries.last() {
				if now.duration_since(*last) < self.settings.min_interval {
					return Err(Rejection {
						detail: "requests too closely spaced",
						retry_after: self.settings.min_interval.as_secs().max(1),
					});
				}
			}
		}
		if entries.len() >= self.settings.per_ip {
			return Err(Rejection {
				detail: "per-client request limit reached",
				retry_after,
			});
		}

		prune(&mut state.global, now, window);
		if state.global.len() >= self.settings.global {
			return Err(Rejection {
				detail: "global request limit reached",
				retry_after,
			});
		}

		state.per_ip.entry(ip).or_default().push(now);
		state.global.push(now);

		// Addresses that went quiet would otherwise pin empty vectors forever.
		if state.per_ip.len() > 1024 {
			state.per_ip.retain(|_, entries| !entries.is_empty());
		}
		Ok(())
	}
}

fn prune(entries: &mut Vec<Instant>, now: Instant, window: Duration) {
	entries.retain(|t| now.duration_since(*t) <= window);
}

#[cfg(test)]
mod tests {
	use super::*;

	fn limiter(per_ip: usize, global: usize, window: Duration, min_interval: Duration) -> RateLimiter {
		RateLimiter::new(RateSettings {
			enabled: true,
			per_ip,
			window,
			global,
			min_interval,
		})
	}

	fn ip(last: u8) -> IpAddr {
		IpAddr::from([127, 0, 0, last])
	}

	#[test]
	fn third_request_in_window_is_rejected() {
		let limiter = limiter(2, 100, Duration::from_secs(10), Duration::ZERO);
		let start = Instant::now();
		assert!(limiter.check_at(ip(1), start).is_ok());
		assert!(limiter.check_at(ip(1), start + Duration::from_secs(1)).is_ok());
		assert!(limiter.check_at(ip(1), start + Duration::from_secs(2)).is_err());
		// After the window has passed the source is admitted again.
		assert!(limiter.check_at(ip(1), start + Duration::from_secs(12)).is_ok());
	}

	#[test]
	fn per_ip_limits_are_independent() {
		let limiter = limiter(1, 100, Duration::from_secs(10), Duration::ZERO);
		let start = Instant::now();
		assert!(limiter.check_at(ip(1), start).is_ok());
		assert!(limiter.check_at(ip(2), start).is_ok());
		assert!(limiter.check_at(ip(1), start).is_err());
	}

	#[test]
	fn global_limit_caps_all_sources() {
		let limiter = limiter(10, 2, Duration::from_secs(10), Duration::ZERO);
		let start = Instant::now();
		assert!(limiter.check_at(ip(1), start).is_ok());
		assert!(limiter.check_at(ip(2), start).is_ok());
		let rejection = limiter.check_at(ip(3), start).unwrap_err();
		assert_eq!(rejection.detail, "global request limit reached");
	}

	#[test]
	fn minimum_interval_rejects_bursts() {
		let limiter = limiter(100, 100, Duration::from_secs(10), Duration::from_millis(500));
		let start = Instant::now();
		assert!(limiter.check_at(ip(1), start).is_ok());
		assert!(limiter.check_at(ip(1), start + Duration::from_millis(100)).is_err());
		assert!(limiter.check_at(ip(1), start + Duration::from_millis(700)).is_ok());
	}

	#[test]
	fn rejected_requests_do_not_consume_budget() {
		let limiter = limiter(2, 100, Duration::from_secs(10), Duration::ZERO);
		let start = Instant::now();
		assert!(limiter.check_at(ip(1), start).is_ok());
		assert!(limiter.check_at(ip(1), start).is_ok());
		for _ in 0..5 {
			assert!(limiter.check_at(ip(1), start + Duration::from_secs(1)).is_err());
		}
		// Still only two admitted entries; the source recovers on schedule.
		assert!(limiter.check_at(ip(1), start + Duration::from_secs(11)).is_ok());
	}
}
