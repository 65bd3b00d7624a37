use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScheduleError>;

#[derive(Error, Debug)]
pub enum ScheduleError {
	#[error("scheduler is already running")]
	AlreadyRunning,

	#[error("scheduler is not running")]
	NotRunning,

	#[error("scheduler is shut down and no longer accepts tasks")]
	Closed,

	#[error("scheduler task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}
