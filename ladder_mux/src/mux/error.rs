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

use crate::protocol::{DispatchError, ReadError};
use std::{borrow::Cow, io};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("malformed frame ({0})")]
	MalformedFrame(Cow<'static, str>),
	#[error("unknown session status {0:#04x}")]
	UnknownStatus(u8),
	#[error("unknown target network {0:#04x}")]
	UnknownNetwork(u8),
	#[error("invalid target address ({0})")]
	InvalidAddress(#[from] ReadError),
	#[error("packet of {0} bytes does not fit in a single chunk")]
	PacketTooLarge(usize),
	#[error("session {0} not found")]
	SessionNotFound(u16),
	#[error("cannot write into session {id} ({err})")]
	LocalWrite { id: u16, err: io::Error },
	#[error("cannot dispatch session {id} ({err})")]
	Dispatch { id: u16, err: DispatchError },
	#[error("no available mux worker")]
	NoAvailableWorker,
	#[error("physical link error ({0})")]
	Io(#[from] io::Error),
}

impl Error {
	/// Returns `true` if the physical link cannot be used after this error.
	#[must_use]
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::MalformedFrame(_)
				| Error::UnknownStatus(_)
				| Error::UnknownNetwork(_)
				| Error::InvalidAddress(_)
				| Error::Io(_)
		)
	}

	#[inline]
	pub(super) fn malformed(msg: impl Into<Cow<'static, str>>) -> Self {
		Error::MalformedFrame(msg.into())
	}
}
