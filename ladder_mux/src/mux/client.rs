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
	frame::{FrameMetadata, SessionStatus},
	picker::WorkerPicker,
	reader::{check_fatal, drain_data, handle_end, handle_keep},
	session::{Session, SessionTable},
	writer::{FrameWriter, LinkWriter},
	Error,
};
use crate::{
	prelude::*,
	protocol::{BoxRead, BoxWrite, Destination},
	transport::Link,
	utils::Done,
};
use std::{
	io,
	sync::atomic::{AtomicBool, Ordering},
	time::Duration,
};
use tokio::{io::BufReader, time::Instant};

/// How often a client worker checks whether it is idle.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(16);
/// How long a new session waits for data to put into its first frame.
/// Shortest period accepted for periodic checks.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);
const FIRST_PAYLOAD_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_PICK_ATTEMPTS: usize = 16;

/// Limits of a single client worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use_serde", derive(serde::Deserialize), serde(default))]
pub struct ClientStrategy {
	/// Max number of live sessions. 0 means unlimited.
	pub max_concurrency: u32,
	/// Max number of sessions over the worker's lifetime. 0 means unlimited.
	pub max_connection: u32,
}

impl Default for ClientStrategy {
	fn default() -> Self {
		Self {
			max_concurrency: 8,
			max_connection: 128,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	/// Accepting new sessions.
	Active,
	/// Waiting for existing sessions to finish.
	Draining,
	/// Physical link torn down.
	Closed,
}

/// Carries local links over a single physical link to a mux server.
pub struct ClientWorker {
	sessions: Arc<SessionTable>,
	link: LinkWriter,
	done: Done,
	draining: AtomicBool,
	strategy: ClientStrategy,
	dispatch_lock: parking_lot::Mutex<()>,
}

impl ClientWorker {
	/// Starts a worker over the physical link (`r`, `w`).
	///
	/// This must be called inside a tokio runtime.
	#[must_use]
	pub fn new(r: BoxRead, w: BoxWrite, strategy: ClientStrategy) -> Arc<Self> {
		Self::with_idle_check(r, w, strategy, IDLE_CHECK_INTERVAL)
	}

	/// Same as [`Self::new`], but checks for idleness every `idle_check`.
	///
	/// Periods shorter than [`MIN_CHECK_INTERVAL`] are raised to it.
	#[must_use]
	pub fn with_idle_check(
		r: BoxRead,
		w: BoxWrite,
		strategy: ClientStrategy,
		idle_check: Duration,
	) -> Arc<Self> {
		let worker = Arc::new(Self {
			sessions: SessionTable::new(),
			link: LinkWriter::new(w),
			done: Done::new(),
			draining: AtomicBool::new(false),
			strategy,
			dispatch_lock: parking_lot::Mutex::new(()),
		});
		tokio::spawn(worker.clone().fetch_output(r));
		tokio::spawn(worker.clone().monitor(idle_check.max(MIN_CHECK_INTERVAL)));
		worker
	}

	/// Opens a new session carrying `link` to `dst`.
	///
	/// Data read from `link.reader` is sent to the server,
	/// and data from the server is written into `link.writer`.
	///
	/// Returns `false` if this worker cannot take more sessions.
	pub fn dispatch(self: &Arc<Self>, dst: &Destination, link: &Link) -> bool {
		let session = {
			// Limits are checked and applied under the same lock.
			let _guard = self.dispatch_lock.lock();
			if self.is_full() {
				return false;
			}
			match self.sessions.allocate(
				link.reader.clone(),
				link.writer.clone(),
				dst.network.into(),
			) {
				Some(s) => s,
				None => return false,
			}
		};
		debug!("dispatching {} over mux session {}", dst, session.id());
		tokio::spawn(self.clone().fetch_input(session, dst.clone()));
		true
	}

	/// Returns `true` if no more session can be dispatched on this worker.
	#[must_use]
	pub fn is_full(&self) -> bool {
		if self.state() != WorkerState::Active || self.sessions.is_closed() {
			return true;
		}
		let ClientStrategy {
			max_concurrency,
			max_connection,
		} = self.strategy;
		let too_many_live =
			max_concurrency > 0 && self.sessions.size() >= max_concurrency as usize;
		let too_many_total =
			max_connection > 0 && self.sessions.count() >= u64::from(max_connection);
		too_many_live || too_many_total
	}

	#[inline]
	#[must_use]
	pub fn closed(&self) -> bool {
		self.done.is_done()
	}

	#[must_use]
	pub fn state(&self) -> WorkerState {
		if self.closed() {
			WorkerState::Closed
		} else if self.draining.load(Ordering::Acquire) {
			WorkerState::Draining
		} else {
			WorkerState::Active
		}
	}

	/// Stops accepting sessions and closes the worker once all
	/// existing sessions are finished.
	pub fn close(&self) {
		if self.draining.swap(true, Ordering::AcqRel) {
			return;
		}
		debug!(
			"draining mux client worker with {} sessions",
			self.sessions.size()
		);
		self.close_if_idle();
	}

	/// Number of live sessions.
	#[inline]
	#[must_use]
	pub fn active_connections(&self) -> usize {
		self.sessions.size()
	}

	/// Number of sessions ever dispatched.
	#[inline]
	#[must_use]
	pub fn total_connections(&self) -> u64 {
		self.sessions.count()
	}

	fn close_if_idle(&self) {
		if self.sessions.close_if_no_session() {
			self.done.close();
		}
	}

	async fn fetch_input(self: Arc<Self>, session: Arc<Session>, dst: Destination) {
		let mut writer = FrameWriter::new_request(session.id(), dst, self.link.clone());
		if let Err(e) = forward_input(&session, &mut writer).await {
			debug!("mux session {} cannot send data ({})", session.id(), e);
			writer.set_error();
			session.input().interrupt();
		}
		writer.close().await;
		session.close();
		if self.draining.load(Ordering::Acquire) {
			self.close_if_idle();
		}
	}

	async fn fetch_output(self: Arc<Self>, r: BoxRead) {
		let mut r = BufReader::new(r);
		let res = tokio::select! {
			res = self.demux(&mut r) => res,
			_ = self.done.wait() => Ok(()),
		};
		match res {
			Ok(()) => trace!("mux client worker stops reading"),
			Err(Error::Io(e)) => debug!("mux client link error ({})", e),
			Err(e) => warn!("mux client worker stopped by protocol error ({})", e),
		}
		self.done.close();
	}

	async fn demux<R: AsyncRead + Unpin>(&self, r: &mut R) -> Result<(), Error> {
		let mut buf = BytesMut::new();
		while let Some(meta) = FrameMetadata::read_from(r).await? {
			let res = match meta.status {
				SessionStatus::Keep => {
					handle_keep(&meta, r, &self.sessions, &mut buf, &self.link).await
				}
				SessionStatus::End => handle_end(&meta, r, &self.sessions).await,
				SessionStatus::KeepAlive => drain_data(&meta, r).await.map_err(Error::from),
				SessionStatus::New => {
					// Servers never open sessions.
					warn!(
						"unexpected New frame for session {} from mux server",
						meta.session_id
					);
					drain_data(&meta, r).await.map_err(Error::from)
				}
			};
			check_fatal(res)?;
		}
		Ok(())
	}

	async fn monitor(self: Arc<Self>, period: Duration) {
		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		loop {
			tokio::select! {
				_ = self.done.wait() => break,
				_ = ticker.tick() => {
					if self.sessions.close_if_no_session() {
						debug!("closing idle mux client worker");
						self.done.close();
					}
				}
			}
		}
		self.sessions.close();
		self.link.close().await;
	}
}

async fn forward_input(session: &Session, writer: &mut FrameWriter) -> Result<(), Error> {
	match session.input().read_buf_timeout(FIRST_PAYLOAD_TIMEOUT).await {
		Ok(Some(data)) => writer.write_data(&data).await?,
		Ok(None) => return Ok(()),
		Err(e) if e.kind() == io::ErrorKind::TimedOut => writer.write_meta_only().await?,
		Err(e) => return Err(e.into()),
	}
	writer.copy_from(session.input()).await
}

/// Dispatches links through workers handed out by a [`WorkerPicker`].
pub struct ClientManager<P> {
	picker: P,
}

impl<P: WorkerPicker> ClientManager<P> {
	#[must_use]
	pub fn new(picker: P) -> Self {
		Self { picker }
	}

	/// Dispatches `link` to `dst` on the first worker that accepts it.
	///
	/// # Errors
	///
	/// Returns an [`Error`] if no worker can be created,
	/// or if no worker accepts the session after several attempts.
	pub async fn dispatch(&self, dst: &Destination, link: &Link) -> Result<(), Error> {
		for _ in 0..MAX_PICK_ATTEMPTS {
			let worker = self.picker.pick_available().await?;
			if worker.dispatch(dst, link) {
				return Ok(());
			}
		}
		Err(Error::NoAvailableWorker)
	}
}
