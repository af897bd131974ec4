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

use super::Error;
use crate::{
	prelude::*,
	protocol::{Destination, Network},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Max payload of a single chunk of a stream session.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024;
/// Max length of frame metadata.
pub const MAX_METADATA_LEN: usize = 512;

const MIN_METADATA_LEN: usize = 4;
const MIN_NEW_METADATA_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SessionStatus {
	New = 1,
	Keep = 2,
	End = 3,
	KeepAlive = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TargetNetwork {
	Tcp = 1,
	Udp = 2,
}

impl From<Network> for TargetNetwork {
	#[inline]
	fn from(n: Network) -> Self {
		match n {
			Network::Tcp => TargetNetwork::Tcp,
			Network::Udp => TargetNetwork::Udp,
		}
	}
}

impl From<TargetNetwork> for Network {
	#[inline]
	fn from(n: TargetNetwork) -> Self {
		match n {
			TargetNetwork::Tcp => Network::Tcp,
			TargetNetwork::Udp => Network::Udp,
		}
	}
}

/// Option bit set of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOption(u8);

impl FrameOption {
	/// A data chunk follows the metadata.
	pub const DATA: u8 = 0x01;
	/// The session ended abnormally.
	pub const ERROR: u8 = 0x02;

	#[inline]
	#[must_use]
	pub fn new(bits: u8) -> Self {
		Self(bits)
	}

	#[inline]
	pub fn set(&mut self, bit: u8) {
		self.0 |= bit;
	}

	#[inline]
	#[must_use]
	pub fn has(self, bit: u8) -> bool {
		self.0 & bit == bit
	}

	#[inline]
	#[must_use]
	pub fn bits(self) -> u8 {
		self.0
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
	pub session_id: u16,
	pub status: SessionStatus,
	pub option: FrameOption,
	/// Only present when `status` is [`SessionStatus::New`].
	pub target: Option<Destination>,
}

impl FrameMetadata {
	#[inline]
	#[must_use]
	pub fn new(session_id: u16, status: SessionStatus) -> Self {
		Self {
			session_id,
			status,
			option: FrameOption::default(),
			target: None,
		}
	}

	#[inline]
	#[must_use]
	pub fn has_data(&self) -> bool {
		self.option.has(FrameOption::DATA)
	}

	/// Appends the length prefix and the metadata to `buf`.
	///
	/// # Errors
	///
	/// Returns [`Error::MalformedFrame`] if a New frame has no target.
	pub fn write_to(&self, buf: &mut BytesMut) -> Result<(), Error> {
		let start = buf.len();
		buf.put_u16(0);
		buf.put_u16(self.session_id);
		buf.put_u8(self.status.into());
		buf.put_u8(self.option.bits());
		if self.status == SessionStatus::New {
			let target = self
				.target
				.as_ref()
				.ok_or_else(|| Error::malformed("New frame without target"))?;
			buf.put_u8(TargetNetwork::from(target.network).into());
			target.addr.write_to(buf);
		}
		let len = buf.len() - start - 2;
		debug_assert!(len <= MAX_METADATA_LEN);
		#[allow(clippy::cast_possible_truncation)]
		let len = len as u16;
		buf[start..start + 2].copy_from_slice(&len.to_be_bytes());
		Ok(())
	}

	/// Decodes metadata without the length prefix.
	///
	/// Bytes after the known fields are ignored.
	///
	/// # Errors
	///
	/// - [`Error::MalformedFrame`] if `buf` is too short.
	/// - [`Error::UnknownStatus`] or [`Error::UnknownNetwork`] on unknown values.
	/// - [`Error::InvalidAddress`] if the target cannot be parsed.
	pub fn decode(mut buf: &[u8]) -> Result<Self, Error> {
		let total = buf.len();
		if total < MIN_METADATA_LEN {
			return Err(Error::malformed(format!(
				"metadata of {} bytes is shorter than {}",
				total, MIN_METADATA_LEN
			)));
		}
		let session_id = buf.get_u16();
		let status = buf.get_u8();
		let status = SessionStatus::try_from(status).map_err(|_| Error::UnknownStatus(status))?;
		let option = FrameOption(buf.get_u8());

		let target = if status == SessionStatus::New {
			if total < MIN_NEW_METADATA_LEN {
				return Err(Error::malformed(format!(
					"New metadata of {} bytes is shorter than {}",
					total, MIN_NEW_METADATA_LEN
				)));
			}
			let network = buf.get_u8();
			let network =
				TargetNetwork::try_from(network).map_err(|_| Error::UnknownNetwork(network))?;
			let addr = SocksAddr::read_from(&mut buf)?;
			Some(Destination::new(network.into(), addr))
		} else {
			None
		};

		Ok(Self {
			session_id,
			status,
			option,
			target,
		})
	}

	/// Reads the next frame metadata from `r`.
	///
	/// Returns `Ok(None)` if `r` reaches EOF before a new frame starts.
	///
	/// # Errors
	///
	/// Same as [`Self::decode`], plus [`Error::Io`] for read failures or
	/// EOF in the middle of a frame.
	pub async fn read_from<R>(r: &mut R) -> Result<Option<Self>, Error>
	where
		R: AsyncRead + Unpin,
	{
		let mut len_buf = [0_u8; 2];
		match r.read(&mut len_buf).await? {
			0 => return Ok(None),
			1 => {
				r.read_exact(&mut len_buf[1..]).await?;
			}
			_ => {}
		}
		let len = usize::from(u16::from_be_bytes(len_buf));
		if len > MAX_METADATA_LEN {
			return Err(Error::malformed(format!(
				"metadata length {} is larger than {}",
				len, MAX_METADATA_LEN
			)));
		}
		let mut buf = [0_u8; MAX_METADATA_LEN];
		let buf = &mut buf[..len];
		r.read_exact(buf).await?;
		let meta = Self::decode(buf)?;
		trace!(
			"received mux frame {:?} for session {}",
			meta.status,
			meta.session_id
		);
		Ok(Some(meta))
	}
}
