use crate::error::ScheduleError;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

/// One pending request waiting for admission.
///
/// Built by the front-end via [`Task::new`], which also hands back the
/// [`TaskHandle`] the submitting side keeps. The scheduler fires `ready`
/// exactly once when the task is admitted and watches `done` to reclaim the
/// task's weight.
pub struct Task {
	pub priority: i64,
	pub weight: i64,
	pub(crate) ready: oneshot::Sender<()>,
	pub(crate) done: CancellationToken,
}

impl Task {
	/// Create a task and the handle its submitter holds on to.
	///
	/// Dropping the handle (or its `done` guard) marks the task finished on
	/// every exit path, which is what releases the task's weight once it has
	/// been admitted.
	#[must_use]
	pub fn new(priority: i64, weight: i64) -> (Self, TaskHandle) {
		let (ready_tx, ready_rx) = oneshot::channel();
		let done = CancellationToken::new();

		let task = Self {
			priority,
			weight,
			ready: ready_tx,
			done: done.clone(),
		};

		let handle = TaskHandle {
			ready: ready_rx,
			done: done.drop_guard(),
		};

		(task, handle)
	}
}

/// Submitter-side half of a [`Task`].
pub struct TaskHandle {
	/// Fires once the scheduler has admitted the task.
	pub ready: oneshot::Receiver<()>,
	/// Completion signal; dropping it tells the scheduler the task is done.
	pub done: DropGuard,
}

impl TaskHandle {
	/// Wait until the scheduler admits the task.
	///
	/// Errors only when the scheduler shut down before the task was admitted,
	/// in which case `ready` will never fire.
	pub async fn admitted(&mut self) -> Result<(), ScheduleError> {
		(&mut self.ready).await.map_err(|_| ScheduleError::Closed)
	}
}

/// Queue element: a real task, or the shutdown sentinel that terminates the
/// scheduler loop. The sentinel is identified by variant, not by priority.
pub enum Arrival {
	Task(Task),
	Shutdown,
}

impl Arrival {
	fn priority(&self) -> Option<i64> {
		match self {
			Self::Task(task) => Some(task.priority),
			// Sorts below every real task so queued work drains first.
			Self::Shutdown => None,
		}
	}

	pub(crate) fn outranks(&self, other: &Self) -> bool {
		self.priority() > other.priority()
	}
}
