//! Single-flight, key-serialized task scheduler.
//!
//! Every task submitted under the same key runs strictly after the previously submitted
//! one has finished, in submission order. Tasks under different keys run independently.
//! A task is registered on its lane at the moment [`Scheduler::schedule`] is called, so
//! submission order is call order even before the returned future is polled.
//!
//! Timeouts only release the caller: the task keeps running to completion and its result
//! is discarded. Failures that the caller did not ask to have forwarded are also logged
//! and published on the failure channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{Instrument, error, info_span};

/// A failed task as published on the scheduler's failure channel.
#[derive(Debug, Clone)]
pub struct TaskFailure {
	pub key: String,
	pub correlation_id: String,
	pub message: String,
	pub timed_out: bool,
}

/// Per-call options for [`Scheduler::schedule`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
	/// Id attached to logs for this task; defaults to `<key>#<sequence>`.
	pub correlation_id: Option<String>,
	/// How long the caller waits before giving up on the result.
	pub timeout: Option<Duration>,
	/// Return failures to the caller only, without publishing them.
	pub forward_error: bool,
}

impl ScheduleOptions {
	pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
		self.correlation_id = Some(id.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn forward_error(mut self) -> Self {
		self.forward_error = true;
		self
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError<E> {
	#[error("Task {correlation_id} on {key} timed out after {after:?}")]
	Timeout {
		key: String,
		correlation_id: String,
		after: Duration,
	},

	#[error("Task failed: {0}")]
	Failed(E),

	#[error("Task {correlation_id} on {key} panicked")]
	Panicked { key: String, correlation_id: String },
}

impl<E> SchedulerError<E> {
	pub fn is_timeout(&self) -> bool {
		matches!(self, SchedulerError::Timeout { .. })
	}
}

pub struct Scheduler {
	/// Completion signal of the most recently submitted task per key.
	lanes: Mutex<HashMap<String, oneshot::Receiver<()>>>,
	sequence: AtomicU64,
	failures: broadcast::Sender<TaskFailure>,
}

impl Scheduler {
	pub fn new() -> Self {
		let (failures, _) = broadcast::channel(64);
		Self {
			lanes: Mutex::new(HashMap::new()),
			sequence: AtomicU64::new(0),
			failures,
		}
	}

	/// Subscribe to failures of tasks that were not scheduled with `forward_error`.
	pub fn failures(&self) -> broadcast::Receiver<TaskFailure> {
		self.failures.subscribe()
	}

	/// Queue `task` behind every task already submitted under `key`.
	///
	/// Must be called from within a tokio runtime. The task is spawned immediately; the
	/// returned future only waits for (or times out on) its result.
	pub fn schedule<T, E, Fut>(
		&self,
		key: &str,
		task: Fut,
		options: ScheduleOptions,
	) -> impl Future<Output = Result<T, SchedulerError<E>>> + Send + 'static
	where
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: Display + Send + 'static,
	{
		let key = key.to_string();
		let correlation_id = options.correlation_id.clone().unwrap_or_else(|| {
			format!("{}#{}", key, self.sequence.fetch_add(1, Ordering::Relaxed))
		});

		let (done_tx, done_rx) = oneshot::channel::<()>();
		let previous = self.lanes.lock().insert(key.clone(), done_rx);

		let span = info_span!("scheduled", key = %key, correlation_id = %correlation_id);
		let handle = tokio::spawn(
			async move {
				if let Some(previous) = previous {
					// Err only means the previous task dropped its sender, i.e. it is done
					let _ = previous.await;
				}
				let result = task.await;
				drop(done_tx);
				result
			}
			.instrument(span),
		);

		let failures = self.failures.clone();
		async move {
			let joined = match options.timeout {
				Some(after) => match tokio::time::timeout(after, handle).await {
					Ok(joined) => joined,
					Err(_) => {
						if !options.forward_error {
							publish(
								&failures,
								TaskFailure {
									key: key.clone(),
									correlation_id: correlation_id.clone(),
									message: format!("timed out after {:?}", after),
									timed_out: true,
								},
							);
						}
						return Err(SchedulerError::Timeout {
							key,
							correlation_id,
							after,
						});
					}
				},
				None => handle.await,
			};

			let failure = match joined {
				Ok(Ok(value)) => return Ok(value),
				Ok(Err(e)) => {
					let message = e.to_string();
					(SchedulerError::Failed(e), message)
				}
				Err(join_error) => (
					SchedulerError::Panicked {
						key: key.clone(),
						correlation_id: correlation_id.clone(),
					},
					join_error.to_string(),
				),
			};

			let (err, message) = failure;
			if !options.forward_error {
				publish(
					&failures,
					TaskFailure {
						key,
						correlation_id,
						message,
						timed_out: false,
					},
				);
			}
			Err(err)
		}
	}
}

impl Default for Scheduler {
	fn default() -> Self {
		Self::new()
	}
}

fn publish(failures: &broadcast::Sender<TaskFailure>, failure: TaskFailure) {
	error!(
		"Scheduled task {} on {} failed: {}",
		failure.correlation_id, failure.key, failure.message
	);
	// No subscribers is fine; the failure has been logged
	let _ = failures.send(failure);
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::AtomicBool;

	#[derive(Debug)]
	struct Boom;

	impl Display for Boom {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.write_str("boom")
		}
	}

	#[tokio::test(start_paused = true)]
	async fn same_key_runs_in_submission_order() {
		let scheduler = Scheduler::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		let mut pending = Vec::new();
		for (i, delay) in [(1u32, 30u64), (2, 20), (3, 10)] {
			let order = order.clone();
			pending.push(scheduler.schedule(
				"ledger",
				async move {
					tokio::time::sleep(Duration::from_millis(delay)).await;
					order.lock().push(i);
					Ok::<_, Boom>(i)
				},
				ScheduleOptions::default(),
			));
		}
		for (i, task) in pending.into_iter().enumerate() {
			assert_eq!(task.await.unwrap(), i as u32 + 1);
		}
		assert_eq!(*order.lock(), vec![1, 2, 3]);
	}

	#[tokio::test]
	async fn different_keys_interleave() {
		let scheduler = Scheduler::new();
		let (tx, rx) = oneshot::channel::<()>();

		let waiting = scheduler.schedule(
			"a",
			async move { rx.await.map_err(|_| Boom) },
			ScheduleOptions::default(),
		);
		let signalling = scheduler.schedule(
			"b",
			async move { tx.send(()).map_err(|_| Boom) },
			ScheduleOptions::default(),
		);

		signalling.await.unwrap();
		tokio::time::timeout(Duration::from_secs(5), waiting)
			.await
			.expect("key a must not wait for key b")
			.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_releases_caller_but_work_completes() {
		let scheduler = Scheduler::new();
		let finished = Arc::new(AtomicBool::new(false));
		let mut failures = scheduler.failures();

		let flag = finished.clone();
		let slow = scheduler.schedule(
			"ledger",
			async move {
				tokio::time::sleep(Duration::from_millis(200)).await;
				flag.store(true, Ordering::SeqCst);
				Ok::<_, Boom>(())
			},
			ScheduleOptions::default().with_timeout(Some(Duration::from_millis(10))),
		);
		let err = slow.await.unwrap_err();
		assert!(err.is_timeout());
		assert!(failures.recv().await.unwrap().timed_out);

		// the next task on the lane only runs once the timed-out one has finished
		let flag = finished.clone();
		let observed = scheduler
			.schedule(
				"ledger",
				async move { Ok::<_, Boom>(flag.load(Ordering::SeqCst)) },
				ScheduleOptions::default(),
			)
			.await
			.unwrap();
		assert!(observed);
	}

	#[tokio::test]
	async fn unforwarded_errors_reach_the_failure_channel() {
		let scheduler = Scheduler::new();
		let mut failures = scheduler.failures();

		let err = scheduler
			.schedule(
				"ledger",
				async { Err::<(), _>(Boom) },
				ScheduleOptions::default().with_correlation_id("reset-1"),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, SchedulerError::Failed(Boom)));
		let failure = failures.recv().await.unwrap();
		assert_eq!(failure.correlation_id, "reset-1");
		assert_eq!(failure.message, "boom");

		let forwarded = scheduler
			.schedule(
				"ledger",
				async { Err::<(), _>(Boom) },
				ScheduleOptions::default().forward_error(),
			)
			.await;
		assert!(forwarded.is_err());
		assert!(matches!(
			failures.try_recv(),
			Err(broadcast::error::TryRecvError::Empty)
		));
	}

	#[tokio::test]
	async fn panicking_task_releases_its_lane() {
		let scheduler = Scheduler::new();
		let panicked = scheduler
			.schedule(
				"ledger",
				async {
					if true {
						panic!("task blew up");
					}
					Ok::<(), Boom>(())
				},
				ScheduleOptions::default().forward_error(),
			)
			.await;
		assert!(matches!(panicked, Err(SchedulerError::Panicked { .. })));

		let next = scheduler
			.schedule("ledger", async { Ok::<_, Boom>(7) }, ScheduleOptions::default())
			.await;
		assert_eq!(next.unwrap(), 7);
	}
}
