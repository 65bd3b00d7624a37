use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The admission gate never closes its semaphore in normal operation, so this
/// error only surfaces if the runtime tears the gate down underneath an
/// in-flight acquire.
#[derive(Error, Debug)]
#[error("admission gate is closed")]
pub struct GateClosed;

/// Weighted counting semaphore guarding the shared resource budget.
///
/// `acquire` suspends until the requested weight fits and returns an RAII
/// [`WeightPermit`]; dropping the permit is the one and only release.
/// Cancellation is structural: dropping an unfinished `acquire` future (for
/// example from the losing branch of a `select!`) consumes nothing.
pub struct AdmissionGate {
	semaphore: Arc<Semaphore>,
	capacity: u32,
}

impl AdmissionGate {
	#[must_use]
	pub fn new(max_weight: i64) -> Self {
		let capacity = u32::try_from(max_weight.max(1)).unwrap_or(u32::MAX);
		Self {
			semaphore: Arc::new(Semaphore::new(capacity as usize)),
			capacity,
		}
	}

	/// Weights above capacity degrade to exclusive admission instead of
	/// suspending forever; non-positive weights cost a single unit. Callers
	/// are expected to validate weights upstream.
	fn permits_for(&self, weight: i64) -> u32 {
		u32::try_from(weight.max(1)).unwrap_or(self.capacity).min(self.capacity)
	}

	pub async fn acquire(&self, weight: i64) -> Result<WeightPermit, GateClosed> {
		let permits = self.permits_for(weight);
		let permit = self.semaphore.clone().acquire_many_owned(permits).await.map_err(|_| GateClosed)?;

		Ok(WeightPermit { _permit: permit, weight })
	}

	/// Acquire the entire budget. Succeeds only once every outstanding permit
	/// has been dropped, which makes it the drain barrier for shutdown.
	pub async fn drain(&self) -> Result<WeightPermit, GateClosed> {
		self.acquire(i64::from(self.capacity)).await
	}

	#[must_use]
	pub fn available(&self) -> usize {
		self.semaphore.available_permits()
	}

	#[must_use]
	pub fn capacity(&self) -> i64 {
		i64::from(self.capacity)
	}
}

/// Outstanding admission for one task; dropping it returns the weight.
pub struct WeightPermit {
	_permit: OwnedSemaphorePermit,
	weight: i64,
}

impl WeightPermit {
	#[must_use]
	pub fn weight(&self) -> i64 {
		self.weight
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::time::{sleep, timeout, Duration};

	#[tokio::test]
	async fn test_acquire_and_release_restore_budget() {
		let gate = AdmissionGate::new(10);
		assert_eq!(gate.available(), 10);

		let permit = gate.acquire(6).await.unwrap();
		assert_eq!(permit.weight(), 6);
		assert_eq!(gate.available(), 4);

		drop(permit);
		assert_eq!(gate.available(), 10);
	}

	#[tokio::test]
	async fn test_acquire_waits_for_capacity() {
		let gate = AdmissionGate::new(4);
		let held = gate.acquire(3).await.unwrap();

		assert!(timeout(Duration::from_millis(50), gate.acquire(2)).await.is_err());

		drop(held);
		let permit = timeout(Duration::from_secs(1), gate.acquire(2)).await.unwrap().unwrap();
		assert_eq!(gate.available(), 2);
		drop(permit);
	}

	#[tokio::test]
	async fn test_cancelled_acquire_consumes_nothing() {
		let gate = AdmissionGate::new(4);
		let held = gate.acquire(4).await.unwrap();

		// The losing acquire is dropped mid-wait by the select.
		tokio::select! {
			biased;
			_ = gate.acquire(1) => panic!("no capacity should be available"),
			() = sleep(Duration::from_millis(50)) => {}
		}

		drop(held);
		let drained = timeout(Duration::from_secs(1), gate.drain()).await.unwrap().unwrap();
		assert_eq!(drained.weight(), 4);
	}

	#[tokio::test]
	async fn test_drain_waits_for_outstanding_weight() {
		let gate = AdmissionGate::new(8);
		let held = gate.acquire(1).await.unwrap();

		assert!(timeout(Duration::from_millis(50), gate.drain()).await.is_err());

		drop(held);
		assert!(timeout(Duration::from_secs(1), gate.drain()).await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn test_oversized_weight_degrades_to_exclusive() {
		let gate = AdmissionGate::new(4);
		let permit = gate.acquire(100).await.unwrap();
		assert_eq!(gate.available(), 0);
		drop(permit);
		assert_eq!(gate.available(), 4);
	}
}
