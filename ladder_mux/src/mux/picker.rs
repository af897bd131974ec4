/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

use super::{
	client::{ClientStrategy, ClientWorker, IDLE_CHECK_INTERVAL, MIN_CHECK_INTERVAL},
	Error,
};
use crate::{prelude::*, transport::Dialer};
use std::time::Duration;
use tokio::time::Instant;

/// How often closed workers are removed from an [`IncrementalWorkerPicker`].
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Hands out client workers that can take a new session.
#[async_trait]
pub trait WorkerPicker: Send + Sync {
	/// # Errors
	///
	/// Returns an [`Error`] if no worker is available and none can be created.
	async fn pick_available(&self) -> Result<Arc<ClientWorker>, Error>;
}

/// Creates client workers, each with a new physical link.
#[async_trait]
pub trait ClientWorkerFactory: Send + Sync {
	/// # Errors
	///
	/// Returns an [`Error`] if the physical link cannot be established.
	async fn create(&self) -> Result<Arc<ClientWorker>, Error>;
}

/// Creates workers over links opened by a [`Dialer`].
pub struct DialingWorkerFactory<D> {
	dialer: D,
	strategy: ClientStrategy,
	idle_check: Duration,
}

impl<D: Dialer> DialingWorkerFactory<D> {
	#[must_use]
	pub fn new(dialer: D, strategy: ClientStrategy) -> Self {
		Self {
			dialer,
			strategy,
			idle_check: IDLE_CHECK_INTERVAL,
		}
	}

	#[must_use]
	pub fn with_idle_check(mut self, idle_check: Duration) -> Self {
		self.idle_check = idle_check;
		self
	}
}

#[async_trait]
impl<D: Dialer> ClientWorkerFactory for DialingWorkerFactory<D> {
	async fn create(&self) -> Result<Arc<ClientWorker>, Error> {
		let stream = self.dialer.dial().await?;
		let (r, w) = stream.split();
		debug!("new mux client worker created");
		Ok(ClientWorker::with_idle_check(
			r,
			w,
			self.strategy,
			self.idle_check,
		))
	}
}

#[derive(Default)]
struct PoolState {
	workers: Vec<Arc<ClientWorker>>,
	cleanup_running: bool,
}

impl PoolState {
	fn remove_closed(&mut self) {
		self.workers.retain(|w| !w.closed());
	}
}

/// Reuses workers while they have room and creates new ones on demand.
pub struct IncrementalWorkerPicker<F> {
	factory: F,
	state: Arc<AsyncMutex<PoolState>>,
	cleanup_interval: Duration,
}

impl<F: ClientWorkerFactory> IncrementalWorkerPicker<F> {
	#[must_use]
	pub fn new(factory: F) -> Self {
		Self {
			factory,
			state: Arc::default(),
			cleanup_interval: CLEANUP_INTERVAL,
		}
	}

	/// Periods shorter than [`MIN_CHECK_INTERVAL`] are raised to it.
	#[must_use]
	pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
		self.cleanup_interval = interval.max(MIN_CHECK_INTERVAL);
		self
	}

	/// Number of workers in the pool, closed ones included.
	pub async fn worker_count(&self) -> usize {
		self.state.lock().await.workers.len()
	}
}

#[async_trait]
impl<F: ClientWorkerFactory> WorkerPicker for IncrementalWorkerPicker<F> {
	async fn pick_available(&self) -> Result<Arc<ClientWorker>, Error> {
		let mut state = self.state.lock().await;
		if let Some(pos) = state.workers.iter().position(|w| !w.is_full()) {
			// Keep the list ordered by last use.
			let worker = state.workers.remove(pos);
			state.workers.push(worker.clone());
			return Ok(worker);
		}

		state.remove_closed();
		let worker = self.factory.create().await?;
		state.workers.push(worker.clone());
		if !state.cleanup_running {
			state.cleanup_running = true;
			tokio::spawn(run_cleanup(self.state.clone(), self.cleanup_interval));
		}
		Ok(worker)
	}
}

async fn run_cleanup(state: Arc<AsyncMutex<PoolState>>, period: Duration) {
	let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
	loop {
		ticker.tick().await;
		let mut state = state.lock().await;
		state.remove_closed();
		if state.workers.is_empty() {
			trace!("mux worker pool is empty, stopping cleanup");
			state.cleanup_running = false;
			return;
		}
	}
}
