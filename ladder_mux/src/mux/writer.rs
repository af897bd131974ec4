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
	frame::{FrameMetadata, FrameOption, SessionStatus, MAX_CHUNK_SIZE},
	session::TransferType,
	Error,
};
use crate::{
	prelude::*,
	protocol::{BoxWrite, Destination},
	transport::pipe::PipeReader,
};
use std::{
	io,
	sync::atomic::{AtomicBool, Ordering},
	time::Duration,
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

struct LinkWriterInner {
	w: AsyncMutex<Option<BoxWrite>>,
	closed: AtomicBool,
}

/// Writing half of a physical link shared by all sessions.
///
/// Each frame is written and flushed while holding the lock,
/// so frames of different sessions never interleave.
#[derive(Clone)]
pub struct LinkWriter(Arc<LinkWriterInner>);

impl LinkWriter {
	#[must_use]
	pub fn new(w: BoxWrite) -> Self {
		Self(Arc::new(LinkWriterInner {
			w: AsyncMutex::new(Some(w)),
			closed: AtomicBool::new(false),
		}))
	}

	/// Writes a complete frame.
	///
	/// # Errors
	///
	/// Returns an [`io::Error`] if the link is closed or writing fails.
	pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
		if self.is_closed() {
			return Err(link_closed());
		}
		let mut w = self.0.w.lock().await;
		let w = w.as_mut().ok_or_else(link_closed)?;
		w.write_all(frame).await?;
		w.flush().await
	}

	#[inline]
	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.0.closed.load(Ordering::Acquire)
	}

	/// Shuts down the link.
	///
	/// Gives up after a while if another frame write is stuck.
	pub async fn close(&self) {
		if self.0.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		let task = async {
			let w = self.0.w.lock().await.take();
			if let Some(mut w) = w {
				if let Err(e) = w.shutdown().await {
					debug!("error when shutting down mux link ({})", e);
				}
			}
		};
		if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
			debug!(
				"cannot shut down mux link in {} ms",
				CLOSE_TIMEOUT.as_millis()
			);
		}
	}
}

fn link_closed() -> io::Error {
	io::Error::new(io::ErrorKind::BrokenPipe, "mux link closed")
}

/// Turns the data of one session into frames.
pub struct FrameWriter {
	id: u16,
	target: Option<Destination>,
	link: LinkWriter,
	/// Whether a New frame has been sent or is not needed.
	followup: bool,
	has_error: bool,
	transfer_type: TransferType,
	buf: BytesMut,
}

impl FrameWriter {
	/// Writer for a session opened by this side.
	///
	/// The first frame carries `target`.
	#[must_use]
	pub fn new_request(id: u16, target: Destination, link: LinkWriter) -> Self {
		let transfer_type = target.network.into();
		Self {
			id,
			target: Some(target),
			link,
			followup: false,
			has_error: false,
			transfer_type,
			buf: BytesMut::new(),
		}
	}

	/// Writer for a session opened by the peer.
	#[must_use]
	pub fn new_response(id: u16, link: LinkWriter, transfer_type: TransferType) -> Self {
		Self {
			id,
			target: None,
			link,
			followup: true,
			has_error: false,
			transfer_type,
			buf: BytesMut::new(),
		}
	}

	/// Makes [`Self::close`] tell the peer that the session failed.
	#[inline]
	pub fn set_error(&mut self) {
		self.has_error = true;
	}

	fn next_metadata(&mut self) -> FrameMetadata {
		if self.followup {
			FrameMetadata::new(self.id, SessionStatus::Keep)
		} else {
			self.followup = true;
			let mut meta = FrameMetadata::new(self.id, SessionStatus::New);
			meta.target = self.target.clone();
			meta
		}
	}

	/// Sends a frame without data.
	///
	/// # Errors
	///
	/// Returns an [`Error`] if the frame cannot be written into the link.
	pub async fn write_meta_only(&mut self) -> Result<(), Error> {
		let meta = self.next_metadata();
		self.buf.clear();
		meta.write_to(&mut self.buf)?;
		self.link.write_frame(&self.buf).await?;
		Ok(())
	}

	/// Sends `data` as one or more frames.
	///
	/// # Errors
	///
	/// Returns [`Error::PacketTooLarge`] if a datagram is too large for a chunk,
	/// or another [`Error`] if the link fails.
	pub async fn write_data(&mut self, data: &[u8]) -> Result<(), Error> {
		if data.is_empty() {
			return self.write_meta_only().await;
		}
		match self.transfer_type {
			TransferType::Stream => {
				for chunk in data.chunks(MAX_CHUNK_SIZE) {
					self.write_chunk(chunk).await?;
				}
				Ok(())
			}
			TransferType::Packet => self.write_chunk(data).await,
		}
	}

	async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Error> {
		let len = u16::try_from(chunk.len()).map_err(|_| Error::PacketTooLarge(chunk.len()))?;
		let mut meta = self.next_metadata();
		meta.option.set(FrameOption::DATA);
		self.buf.clear();
		meta.write_to(&mut self.buf)?;
		self.buf.put_u16(len);
		self.buf.put_slice(chunk);
		trace!(
			"sending {:?} frame with {} bytes for session {}",
			meta.status,
			len,
			self.id
		);
		self.link.write_frame(&self.buf).await?;
		Ok(())
	}

	/// Sends everything read from `input` until EOF.
	///
	/// # Errors
	///
	/// Returns an [`Error`] if `input` is interrupted or the link fails.
	pub async fn copy_from(&mut self, input: &PipeReader) -> Result<(), Error> {
		while let Some(data) = input.read_buf().await? {
			self.write_data(&data).await?;
		}
		Ok(())
	}

	/// Sends an End frame, with the Error option if [`Self::set_error`] was called.
	///
	/// Failures are only logged as the session is over anyway.
	pub async fn close(&mut self) {
		let mut meta = FrameMetadata::new(self.id, SessionStatus::End);
		if self.has_error {
			meta.option.set(FrameOption::ERROR);
		}
		self.buf.clear();
		let res = match meta.write_to(&mut self.buf) {
			Ok(()) => self.link.write_frame(&self.buf).await.map_err(Error::from),
			Err(e) => Err(e),
		};
		if let Err(e) = res {
			debug!("cannot send End frame for mux session {} ({})", self.id, e);
		}
	}
}
