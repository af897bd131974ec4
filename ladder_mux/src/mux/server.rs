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
	reader::{check_fatal, drain_data, handle_end, handle_keep, send_end, write_to_session},
	session::{Session, SessionTable, TransferType},
	writer::{FrameWriter, LinkWriter},
	Error,
};
use crate::{
	prelude::*,
	protocol::{BoxRead, BoxWrite, Destination, DispatchError, Dispatcher},
	transport::{pipe::DEFAULT_SIZE_LIMIT, Link},
	utils::Done,
};
use tokio::io::BufReader;

/// Domain name of the virtual destination that carries mux links.
pub const MUX_COOL_DOMAIN: &str = "v1.mux.cool";
/// Port of the virtual destination that carries mux links.
pub const MUX_COOL_PORT: u16 = 9527;

/// Returns `true` if `dst` is the virtual mux destination.
///
/// Only the domain name is compared.
#[must_use]
pub fn is_mux_cool(dst: &Destination) -> bool {
	match &dst.addr.dest {
		SocksDestination::Name(name) => name.as_str() == MUX_COOL_DOMAIN,
		SocksDestination::Ip(_) => false,
	}
}

/// Serves a single physical link from a mux client.
///
/// Each session opened by the client is handed to a [`Dispatcher`].
pub struct ServerWorker {
	dispatcher: Arc<dyn Dispatcher>,
	sessions: Arc<SessionTable>,
	link: LinkWriter,
	done: Done,
}

impl ServerWorker {
	/// Starts serving the physical link (`r`, `w`).
	///
	/// This must be called inside a tokio runtime.
	#[must_use]
	pub fn new(dispatcher: Arc<dyn Dispatcher>, r: BoxRead, w: BoxWrite) -> Arc<Self> {
		let worker = Arc::new(Self {
			dispatcher,
			sessions: SessionTable::new(),
			link: LinkWriter::new(w),
			done: Done::new(),
		});
		tokio::spawn(worker.clone().run(r));
		worker
	}

	/// Number of live sessions.
	#[inline]
	#[must_use]
	pub fn active_connections(&self) -> usize {
		self.sessions.size()
	}

	/// Number of sessions ever opened by the client.
	#[inline]
	#[must_use]
	pub fn total_connections(&self) -> u64 {
		self.sessions.count()
	}

	#[inline]
	#[must_use]
	pub fn closed(&self) -> bool {
		self.sessions.is_closed()
	}

	/// Stops serving and closes all sessions.
	pub fn close(&self) {
		self.done.close();
	}

	/// Waits until the worker stops.
	pub async fn wait(&self) {
		self.done.wait().await;
	}

	async fn run(self: Arc<Self>, r: BoxRead) {
		let mut r = BufReader::new(r);
		let res = tokio::select! {
			res = self.demux(&mut r) => res,
			_ = self.done.wait() => Ok(()),
		};
		match res {
			Ok(()) => trace!("mux server worker stops reading"),
			Err(Error::Io(e)) => debug!("mux server link error ({})", e),
			Err(e) => warn!("mux server worker stopped by protocol error ({})", e),
		}
		self.done.close();
		self.sessions.close();
		self.link.close().await;
	}

	async fn demux<R: AsyncRead + Unpin>(&self, r: &mut R) -> Result<(), Error> {
		let mut buf = BytesMut::new();
		while let Some(meta) = FrameMetadata::read_from(r).await? {
			let res = match meta.status {
				SessionStatus::New => self.handle_new(&meta, r, &mut buf).await,
				SessionStatus::Keep => {
					handle_keep(&meta, r, &self.sessions, &mut buf, &self.link).await
				}
				SessionStatus::End => handle_end(&meta, r, &self.sessions).await,
				SessionStatus::KeepAlive => drain_data(&meta, r).await.map_err(Error::from),
			};
			check_fatal(res)?;
		}
		Ok(())
	}

	async fn handle_new<R: AsyncRead + Unpin>(
		&self,
		meta: &FrameMetadata,
		r: &mut R,
		buf: &mut BytesMut,
	) -> Result<(), Error> {
		let id = meta.session_id;
		let dst = meta
			.target
			.as_ref()
			.ok_or_else(|| Error::malformed("New frame without target"))?;
		debug!("mux session {} requests {}", id, dst);

		let link = match self.dispatcher.dispatch(dst).await {
			Ok(link) => link,
			Err(err) => {
				drain_data(meta, r).await?;
				send_end(id, &self.link, true).await;
				return Err(Error::Dispatch { id, err });
			}
		};

		let transfer_type = TransferType::from(dst.network);
		let session = Session::new(
			id,
			link.reader.clone(),
			link.writer.clone(),
			transfer_type,
			&self.sessions,
		);
		if !self.sessions.add(session.clone()) {
			link.interrupt();
			drain_data(meta, r).await?;
			return Ok(());
		}
		tokio::spawn(handle_response(
			session.clone(),
			FrameWriter::new_response(id, self.link.clone(), transfer_type),
		));
		write_to_session(meta, &session, r, buf, &self.link).await
	}
}

/// Sends everything from the destination back to the client.
async fn handle_response(session: Arc<Session>, mut writer: FrameWriter) {
	if let Err(e) = writer.copy_from(session.input()).await {
		debug!("mux session {} ends ({})", session.id(), e);
		writer.set_error();
	}
	writer.close().await;
	session.close();
}

/// A [`Dispatcher`] that serves mux links sent to [`MUX_COOL_DOMAIN`]
/// and passes everything else to another dispatcher.
pub struct MuxServer {
	dispatcher: Arc<dyn Dispatcher>,
	buffer_limit: Option<usize>,
}

impl MuxServer {
	#[must_use]
	pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
		Self {
			dispatcher,
			buffer_limit: Some(DEFAULT_SIZE_LIMIT),
		}
	}

	/// Sets the buffer limit of links created for mux workers.
	/// `None` removes the limit.
	#[must_use]
	pub fn with_buffer_limit(mut self, limit: Option<usize>) -> Self {
		self.buffer_limit = limit;
		self
	}
}

#[async_trait]
impl Dispatcher for MuxServer {
	async fn dispatch(&self, dst: &Destination) -> Result<Link, DispatchError> {
		if !is_mux_cool(dst) {
			return self.dispatcher.dispatch(dst).await;
		}
		let (outer, inner) = Link::pair(self.buffer_limit);
		let worker = ServerWorker::new(
			self.dispatcher.clone(),
			Box::new(inner.reader.clone()),
			Box::new(inner.writer),
		);
		let reader = inner.reader;
		tokio::spawn(async move {
			worker.wait().await;
			// Unblock anyone still writing into the worker.
			reader.close();
		});
		Ok(outer)
	}
}
