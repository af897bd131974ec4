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

use crate::{
	prelude::*,
	protocol::Network,
	transport::pipe::{PipeReader, PipeWriter},
};
use parking_lot::RwLock;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Weak,
	},
};

/// How data of a session is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
	/// Bytes may be split into chunks of at most
	/// [`MAX_CHUNK_SIZE`](super::MAX_CHUNK_SIZE) bytes.
	Stream,
	/// Every buffer is a datagram and is carried in exactly one chunk.
	Packet,
}

impl From<Network> for TransferType {
	#[inline]
	fn from(n: Network) -> Self {
		match n {
			Network::Tcp => TransferType::Stream,
			Network::Udp => TransferType::Packet,
		}
	}
}

/// A single virtual stream carried by a physical link.
pub struct Session {
	id: u16,
	/// Data to be sent to the peer.
	input: PipeReader,
	/// Data received from the peer.
	output: PipeWriter,
	transfer_type: TransferType,
	parent: Weak<SessionTable>,
	closed: AtomicBool,
}

impl Session {
	/// Creates a session belonging to `table`.
	///
	/// The session still needs to be [added](SessionTable::add) to `table`.
	#[must_use]
	pub fn new(
		id: u16,
		input: PipeReader,
		output: PipeWriter,
		transfer_type: TransferType,
		table: &Arc<SessionTable>,
	) -> Arc<Self> {
		Arc::new(Self {
			id,
			input,
			output,
			transfer_type,
			parent: Arc::downgrade(table),
			closed: AtomicBool::new(false),
		})
	}

	#[inline]
	#[must_use]
	pub fn id(&self) -> u16 {
		self.id
	}

	#[inline]
	#[must_use]
	pub fn input(&self) -> &PipeReader {
		&self.input
	}

	#[inline]
	#[must_use]
	pub fn output(&self) -> &PipeWriter {
		&self.output
	}

	#[inline]
	#[must_use]
	pub fn transfer_type(&self) -> TransferType {
		self.transfer_type
	}

	#[inline]
	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Closes input and output, then removes this session from its table.
	///
	/// Only the first call has any effect.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		trace!("closing mux session {}", self.id);
		self.input.close();
		self.output.close();
		if let Some(table) = self.parent.upgrade() {
			table.remove_session(self);
		}
	}

	/// Interrupts input and output, then closes the session.
	///
	/// Both local ends see an error instead of EOF.
	pub fn abort(&self) {
		trace!("aborting mux session {}", self.id);
		self.input.interrupt();
		self.output.interrupt();
		self.close();
	}
}

#[derive(Default)]
struct TableInner {
	sessions: HashMap<u16, Arc<Session>>,
	/// Number of sessions ever added.
	count: u64,
	last_id: u16,
	closed: bool,
}

/// All live sessions of a physical link.
#[derive(Default)]
pub struct SessionTable {
	inner: RwLock<TableInner>,
}

impl SessionTable {
	#[must_use]
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Creates and adds a session with an unused ID.
	///
	/// Returns `None` if the table is closed or every ID is taken.
	pub fn allocate(
		self: &Arc<Self>,
		input: PipeReader,
		output: PipeWriter,
		transfer_type: TransferType,
	) -> Option<Arc<Session>> {
		let mut inner = self.inner.write();
		if inner.closed || inner.sessions.len() >= usize::from(u16::MAX) {
			return None;
		}
		// ID 0 is never used.
		let mut id = inner.last_id;
		loop {
			id = id.wrapping_add(1);
			if id != 0 && !inner.sessions.contains_key(&id) {
				break;
			}
		}
		inner.last_id = id;
		let session = Session::new(id, input, output, transfer_type, self);
		inner.sessions.insert(id, session.clone());
		inner.count += 1;
		Some(session)
	}

	/// Adds `session` into the table.
	///
	/// A live session with the same ID is replaced and closed.
	/// Returns `false` without doing anything if the table is closed.
	pub fn add(&self, session: Arc<Session>) -> bool {
		let replaced = {
			let mut inner = self.inner.write();
			if inner.closed {
				return false;
			}
			inner.count += 1;
			inner.sessions.insert(session.id(), session)
		};
		if let Some(old) = replaced {
			debug!("mux session {} replaced by a new one", old.id());
			old.close();
		}
		true
	}

	/// Returns `None` if there is no such session or the table is closed.
	#[must_use]
	pub fn get(&self, id: u16) -> Option<Arc<Session>> {
		let inner = self.inner.read();
		if inner.closed {
			return None;
		}
		inner.sessions.get(&id).cloned()
	}

	pub fn remove(&self, id: u16) {
		let mut inner = self.inner.write();
		if !inner.closed {
			inner.sessions.remove(&id);
		}
	}

	/// Removes `session` only if it is still the one registered under its ID.
	fn remove_session(&self, session: &Session) {
		let mut inner = self.inner.write();
		if inner.closed {
			return;
		}
		let is_same = inner
			.sessions
			.get(&session.id())
			.map_or(false, |s| std::ptr::eq(Arc::as_ptr(s), session));
		if is_same {
			inner.sessions.remove(&session.id());
		}
	}

	/// Number of sessions ever added.
	#[must_use]
	pub fn count(&self) -> u64 {
		self.inner.read().count
	}

	/// Number of live sessions.
	#[must_use]
	pub fn size(&self) -> usize {
		self.inner.read().sessions.len()
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.inner.read().closed
	}

	/// Closes the table and every live session in it.
	pub fn close(&self) {
		let sessions = {
			let mut inner = self.inner.write();
			if inner.closed {
				return;
			}
			inner.closed = true;
			std::mem::take(&mut inner.sessions)
		};
		for s in sessions.values() {
			s.input.close();
			s.output.close();
		}
	}

	/// Closes the table if there is no live session.
	///
	/// Returns `true` if the table is closed by this call.
	pub fn close_if_no_session(&self) -> bool {
		let mut inner = self.inner.write();
		if inner.closed || !inner.sessions.is_empty() {
			return false;
		}
		inner.closed = true;
		true
	}
}
