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

//! Frame handling shared by client and server workers.

use super::{
	frame::{FrameMetadata, FrameOption, MAX_CHUNK_SIZE},
	session::{Session, SessionTable, TransferType},
	writer::{FrameWriter, LinkWriter},
	Error,
};
use crate::prelude::*;
use std::io;

/// Reads the chunk following a frame with the `Data` option.
pub(super) async fn read_chunk<R>(r: &mut R, buf: &mut BytesMut) -> io::Result<Bytes>
where
	R: AsyncRead + Unpin,
{
	let len = usize::from(r.read_u16().await?);
	buf.reserve(len.max(MAX_CHUNK_SIZE));
	buf.resize(len, 0);
	r.read_exact(&mut buf[..]).await?;
	Ok(buf.split().freeze())
}

/// Skips the chunk following a frame with the `Data` option.
pub(super) async fn drain_chunk<R>(r: &mut R) -> io::Result<()>
where
	R: AsyncRead + Unpin,
{
	let len = u64::from(r.read_u16().await?);
	let n = tokio::io::copy(&mut (&mut *r).take(len), &mut tokio::io::sink()).await?;
	if n < len {
		return Err(io::ErrorKind::UnexpectedEof.into());
	}
	Ok(())
}

/// Skips the chunk of `meta` if there is one.
pub(super) async fn drain_data<R>(meta: &FrameMetadata, r: &mut R) -> io::Result<()>
where
	R: AsyncRead + Unpin,
{
	if meta.has_data() {
		drain_chunk(r).await?;
	}
	Ok(())
}

/// Tells the peer to stop sending frames for session `id`.
pub(super) async fn send_end(id: u16, link: &LinkWriter, has_error: bool) {
	let mut w = FrameWriter::new_response(id, link.clone(), TransferType::Stream);
	if has_error {
		w.set_error();
	}
	w.close().await;
}

/// Writes the chunk of `meta` into the output of `session`.
///
/// Only the session is closed if its output is broken.
pub(super) async fn write_to_session<R>(
	meta: &FrameMetadata,
	session: &Session,
	r: &mut R,
	buf: &mut BytesMut,
	link: &LinkWriter,
) -> Result<(), Error>
where
	R: AsyncRead + Unpin,
{
	if !meta.has_data() {
		return Ok(());
	}
	let chunk = read_chunk(r, buf).await?;
	// May block the whole link until the local side catches up.
	if let Err(err) = session.output().write_buf(chunk).await {
		send_end(session.id(), link, true).await;
		session.input().interrupt();
		session.close();
		return Err(Error::LocalWrite {
			id: session.id(),
			err,
		});
	}
	Ok(())
}

/// Handles a Keep frame.
pub(super) async fn handle_keep<R>(
	meta: &FrameMetadata,
	r: &mut R,
	sessions: &SessionTable,
	buf: &mut BytesMut,
	link: &LinkWriter,
) -> Result<(), Error>
where
	R: AsyncRead + Unpin,
{
	if !meta.has_data() {
		return Ok(());
	}
	if let Some(session) = sessions.get(meta.session_id) {
		return write_to_session(meta, &session, r, buf, link).await;
	}
	drain_chunk(r).await?;
	send_end(meta.session_id, link, false).await;
	Err(Error::SessionNotFound(meta.session_id))
}

/// Handles an End frame.
pub(super) async fn handle_end<R>(
	meta: &FrameMetadata,
	r: &mut R,
	sessions: &SessionTable,
) -> Result<(), Error>
where
	R: AsyncRead + Unpin,
{
	let found = if let Some(session) = sessions.get(meta.session_id) {
		if meta.option.has(FrameOption::ERROR) {
			session.abort();
		} else {
			session.close();
		}
		true
	} else {
		false
	};
	drain_data(meta, r).await?;
	if found {
		Ok(())
	} else {
		Err(Error::SessionNotFound(meta.session_id))
	}
}

/// Passes fatal errors through and logs the others.
pub(super) fn check_fatal(res: Result<(), Error>) -> Result<(), Error> {
	match res {
		Err(e) if e.is_fatal() => Err(e),
		Err(e) => {
			debug!("mux session error ({})", e);
			Ok(())
		}
		Ok(()) => Ok(()),
	}
}
