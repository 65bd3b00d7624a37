use crate::error::{Result, ScheduleError};
use crate::gate::{AdmissionGate, WeightPermit};
use crate::heap::TaskHeap;
use crate::task::{Arrival, Task};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Priority- and weight-aware admission scheduler.
///
/// Handlers push a [`Task`] and then wait on its [`crate::TaskHandle`];
/// a single loop task admits the highest-priority waiter whenever its weight
/// fits in the shared budget, and a per-admission watcher returns the weight
/// when the task signals completion.
pub struct Scheduler {
	arrivals: mpsc::Sender<Arrival>,
	state: Mutex<Lifecycle>,
}

enum Lifecycle {
	Idle { arrivals: mpsc::Receiver<Arrival>, gate: AdmissionGate, max_tasks: usize },
	Running { worker: JoinHandle<()> },
	Stopped,
}

impl Scheduler {
	/// `max_tasks` bounds the arrival channel (pushes beyond it block);
	/// `max_weight` is the total admission budget.
	#[must_use]
	pub fn new(max_tasks: usize, max_weight: i64) -> Self {
		let (tx, rx) = mpsc::channel(max_tasks);

		Self {
			arrivals: tx,
			state: Mutex::new(Lifecycle::Idle {
				arrivals: rx,
				gate: AdmissionGate::new(max_weight),
				max_tasks,
			}),
		}
	}

	/// Spawn the scheduler loop. Errors if called more than once.
	pub async fn start(&self) -> Result<()> {
		let mut state = self.state.lock().await;

		match std::mem::replace(&mut *state, Lifecycle::Stopped) {
			Lifecycle::Idle { arrivals, gate, max_tasks } => {
				info!("starting scheduler with budget {}", gate.capacity());
				let worker = tokio::spawn(
					SchedulerLoop {
						arrivals,
						arrivals_open: true,
						heap: TaskHeap::with_capacity(max_tasks),
						gate,
					}
					.run(),
				);
				*state = Lifecycle::Running { worker };
				Ok(())
			}
			running @ Lifecycle::Running { .. } => {
				*state = running;
				Err(ScheduleError::AlreadyRunning)
			}
			Lifecycle::Stopped => Err(ScheduleError::Closed),
		}
	}

	/// Enqueue a task. Blocks while the arrival channel is full, which is how
	/// backpressure reaches the HTTP front. Succeeds only once the channel has
	/// accepted the task.
	pub async fn push(&self, task: Task) -> Result<()> {
		self.arrivals.send(Arrival::Task(task)).await.map_err(|_| ScheduleError::Closed)
	}

	/// Graceful shutdown: queue the sentinel behind every accepted push, then
	/// wait for the loop to exit and for all admitted weight to drain.
	/// A second `stop` after completion is a no-op.
	pub async fn stop(&self) -> Result<()> {
		let mut state = self.state.lock().await;

		match std::mem::replace(&mut *state, Lifecycle::Stopped) {
			Lifecycle::Running { worker } => {
				// A failed send means the loop is already gone; the join below
				// reports why.
				let _ = self.arrivals.send(Arrival::Shutdown).await;
				worker.await?;
				info!("scheduler stopped");
				Ok(())
			}
			Lifecycle::Stopped => Ok(()),
			idle @ Lifecycle::Idle { .. } => {
				*state = idle;
				Err(ScheduleError::NotRunning)
			}
		}
	}
}

struct SchedulerLoop {
	arrivals: mpsc::Receiver<Arrival>,
	arrivals_open: bool,
	heap: TaskHeap,
	gate: AdmissionGate,
}

impl SchedulerLoop {
	async fn run(mut self) {
		loop {
			self.drain_arrivals();

			if self.heap.is_empty() {
				if !self.arrivals_open {
					// Every sender is gone; nothing can arrive anymore.
					break;
				}
				match self.arrivals.recv().await {
					Some(arrival) => {
						self.heap.push(arrival);
						continue;
					}
					None => {
						self.arrivals_open = false;
						break;
					}
				}
			}

			let weight = match self.heap.peek() {
				Some(Arrival::Shutdown) => break,
				Some(Arrival::Task(task)) => task.weight,
				None => continue,
			};

			// Race the head's admission against the next arrival: a newcomer
			// may outrank the current head, so a win on the arrival side sends
			// us back to re-select. `biased` keeps a completed admission over a
			// simultaneously ready arrival; the newcomer waits in the heap for
			// the next decision.
			let admitted = if self.arrivals_open {
				tokio::select! {
					biased;
					admitted = self.gate.acquire(weight) => Some(admitted),
					arrival = self.arrivals.recv() => {
						match arrival {
							Some(arrival) => self.heap.push(arrival),
							None => self.arrivals_open = false,
						}
						None
					}
				}
			} else {
				Some(self.gate.acquire(weight).await)
			};

			match admitted {
				Some(Ok(permit)) => self.dispatch(permit),
				Some(Err(err)) => {
					// Soft failure: only the head task is dropped, the loop
					// keeps serving.
					error!("admission gate failed: {}; dropping head task", err);
					drop(self.heap.pop());
				}
				None => {}
			}
		}

		// Wait for every admitted task to hand its weight back before
		// reporting the drain complete.
		match self.gate.drain().await {
			Ok(_budget) => info!("scheduler drained, all admitted work complete"),
			Err(err) => error!("scheduler drain failed: {}", err),
		}
	}

	fn drain_arrivals(&mut self) {
		loop {
			match self.arrivals.try_recv() {
				Ok(arrival) => self.heap.push(arrival),
				Err(TryRecvError::Empty) => break,
				Err(TryRecvError::Disconnected) => {
					self.arrivals_open = false;
					break;
				}
			}
		}
	}

	/// Pop the head we just acquired weight for, notify it, and hand the
	/// permit to a watcher that releases on the task's completion signal.
	/// The head cannot have changed since `peek`: only this loop touches the
	/// heap, and the arrival branch never runs in the same iteration as a
	/// successful acquire.
	fn dispatch(&mut self, permit: WeightPermit) {
		let Some(Arrival::Task(task)) = self.heap.pop() else {
			error!("admission raced an empty heap; returning weight");
			return;
		};

		let Task { priority, weight, ready, done } = task;

		if ready.send(()).is_ok() {
			debug!("admitted task priority={} weight={}", priority, weight);
		} else {
			// Submitter is gone; its done signal already fired, so the watcher
			// returns the weight immediately.
			debug!("admitted task priority={} weight={} was abandoned before ready", priority, weight);
		}

		tokio::spawn(async move {
			done.cancelled().await;
			debug!("task released weight {}", permit.weight());
			drop(permit);
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_start_twice_errors() {
		let scheduler = Scheduler::new(4, 1);
		scheduler.start().await.unwrap();
		assert!(matches!(scheduler.start().await, Err(ScheduleError::AlreadyRunning)));
		scheduler.stop().await.unwrap();
	}

	#[tokio::test]
	async fn test_stop_before_start_errors() {
		let scheduler = Scheduler::new(4, 1);
		assert!(matches!(scheduler.stop().await, Err(ScheduleError::NotRunning)));
	}

	#[tokio::test]
	async fn test_stop_is_idempotent() {
		let scheduler = Scheduler::new(4, 1);
		scheduler.start().await.unwrap();
		scheduler.stop().await.unwrap();
		scheduler.stop().await.unwrap();
	}

	#[tokio::test]
	async fn test_push_after_stop_errors() {
		let scheduler = Scheduler::new(4, 1);
		scheduler.start().await.unwrap();
		scheduler.stop().await.unwrap();

		let (task, _handle) = Task::new(0, 1);
		assert!(matches!(scheduler.push(task).await, Err(ScheduleError::Closed)));
	}
}
