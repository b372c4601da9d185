// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry with exponential backoff for transiently failing operations.
//!
//! The combinator is deliberately agnostic about what it retries: the error
//! type decides, through [`RetryableError`], whether a failure belongs to the
//! transient class. Everything else is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Delay before the second attempt. Doubles for every further attempt.
	pub base_delay: Duration,
	pub max_delay: Duration,
	/// Scale each delay by a random factor in `[0.5, 1.5)`.
	pub jitter: bool,
}

impl RetryConfig {
	/// Backoff tuned for local storage engines. Jittered so processes
	/// contending for the same files do not retry in lockstep.
	pub fn storage() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(2),
			jitter: true,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for std::io::Error {
	fn is_retryable(&self) -> bool {
		matches!(
			self.kind(),
			std::io::ErrorKind::WouldBlock
				| std::io::ErrorKind::Interrupted
				| std::io::ErrorKind::TimedOut
		)
	}
}

/// Delay before retry number `attempt + 1`: `base_delay * 2^attempt`, capped.
fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let factor = 2u32.saturating_pow(attempt);
	let delay = cfg.base_delay.saturating_mul(factor).min(cfg.max_delay);

	if cfg.jitter {
		delay.mul_f64(0.5 + fastrand::f64())
	} else {
		delay
	}
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Display,
{
	let max_attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		let err = match f().await {
			Ok(value) => {
				if attempt > 0 {
					debug!(attempts = attempt + 1, "operation succeeded after retry");
				}
				return Ok(value);
			}
			Err(err) => err,
		};

		attempt += 1;

		if !err.is_retryable() {
			debug!(error = %err, attempt, "non-retryable error encountered");
			return Err(err);
		}

		if attempt >= max_attempts {
			warn!(
				error = %err,
				attempt,
				max_attempts,
				"max retry attempts exhausted"
			);
			return Err(err);
		}

		let delay = calculate_delay(cfg, attempt - 1);
		warn!(
			error = %err,
			attempt,
			max_attempts,
			delay_ms = delay.as_millis() as u64,
			"retrying after transient error"
		);

		tokio::time::sleep(delay).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	#[derive(Debug)]
	enum FakeError {
		Busy,
		Broken,
	}

	impl std::fmt::Display for FakeError {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			match self {
				FakeError::Busy => write!(f, "busy"),
				FakeError::Broken => write!(f, "broken"),
			}
		}
	}

	impl RetryableError for FakeError {
		fn is_retryable(&self) -> bool {
			matches!(self, FakeError::Busy)
		}
	}

	fn fast() -> RetryConfig {
		RetryConfig {
			max_attempts: 3,
			base_delay: Duration::from_millis(10),
			max_delay: Duration::from_millis(100),
			jitter: false,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn permanent_error_is_returned_without_retry() {
		let calls = Arc::new(AtomicU32::new(0));

		let result: Result<(), FakeError> = retry(&fast(), || {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(FakeError::Broken)
			}
		})
		.await;

		assert!(matches!(result, Err(FakeError::Broken)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn transient_error_stops_at_max_attempts() {
		let calls = Arc::new(AtomicU32::new(0));

		let result: Result<(), FakeError> = retry(&fast(), || {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(FakeError::Busy)
			}
		})
		.await;

		assert!(matches!(result, Err(FakeError::Busy)));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn recovers_on_third_attempt() {
		let calls = Arc::new(AtomicU32::new(0));

		let result: Result<&str, FakeError> = retry(&fast(), || {
			let calls = Arc::clone(&calls);
			async move {
				if calls.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(FakeError::Busy)
				} else {
					Ok("opened")
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), "opened");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn zero_attempts_still_runs_once() {
		let cfg = RetryConfig {
			max_attempts: 0,
			..fast()
		};
		let calls = Arc::new(AtomicU32::new(0));

		let _: Result<(), FakeError> = retry(&cfg, || {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(FakeError::Busy)
			}
		})
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn delay_doubles_per_attempt() {
		let cfg = fast();
		assert_eq!(calculate_delay(&cfg, 0), Duration::from_millis(10));
		assert_eq!(calculate_delay(&cfg, 1), Duration::from_millis(20));
		assert_eq!(calculate_delay(&cfg, 2), Duration::from_millis(40));
	}

	#[test]
	fn delay_is_capped() {
		let cfg = fast();
		assert_eq!(calculate_delay(&cfg, 10), Duration::from_millis(100));
		assert_eq!(calculate_delay(&cfg, 40), Duration::from_millis(100));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let cfg = RetryConfig {
			jitter: true,
			..fast()
		};

		for _ in 0..50 {
			let delay = calculate_delay(&cfg, 1);
			assert!(delay >= Duration::from_millis(10));
			assert!(delay < Duration::from_millis(30));
		}
	}

	#[test]
	fn storage_preset_is_jittered_and_bounded() {
		let cfg = RetryConfig::storage();
		assert!(cfg.jitter);
		for attempt in 0..5 {
			assert!(calculate_delay(&cfg, attempt) < cfg.max_delay.mul_f64(1.5));
		}
	}

	#[test]
	fn io_errors_classified_by_kind() {
		let busy = std::io::Error::new(std::io::ErrorKind::WouldBlock, "locked");
		let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
		assert!(busy.is_retryable());
		assert!(!denied.is_retryable());
	}
}
