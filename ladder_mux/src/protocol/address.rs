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

use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smol_str::SmolStr;
use std::fmt::{self, Display};

const EMPTY_STRING: &str = "empty string";
const MAX_DOMAIN_LEN: usize = 255;

/// Address type tag as it appears in mux frame metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AddrType {
	Ipv4 = 1_u8,
	Name = 2_u8,
	Ipv6 = 3_u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
	#[error("str is not utf8 ({0})")]
	StrNotUtf8(std::str::Utf8Error),
	#[error("unknown address type {0}")]
	UnknownAddressType(u8),
	#[error("invalid domain ({0})")]
	InvalidDomain(BoxStdErr),
	#[error("invalid port ({0})")]
	InvalidPort(BoxStdErr),
	#[error("invalid address ({0})")]
	InvalidAddress(BoxStdErr),
	#[error("buffer of {buf_len} bytes is too small, which required at least {exp_len} bytes")]
	BufferTooSmall { buf_len: usize, exp_len: usize },
}

fn ensure_remaining(buf: &impl Buf, exp_len: usize) -> Result<(), ReadError> {
	let buf_len = buf.remaining();
	if buf_len < exp_len {
		return Err(ReadError::BufferTooSmall { buf_len, exp_len });
	}
	Ok(())
}

// -------------------------------------------------------
//                     SocksDestination
// -------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocksDestination {
	/// Must be a valid domain name.
	Name(DomainName),
	Ip(IpAddr),
}

impl SocksDestination {
	/// Create a new `SocksDestination` from [`str`].
	///
	/// # Errors
	///
	/// Return a [`ReadError`] if `value` is not a valid domain name.
	#[inline]
	pub fn new_domain(value: impl AsRef<str>) -> Result<Self, ReadError> {
		DomainName::from_str(value.as_ref()).map(SocksDestination::Name)
	}

	#[inline]
	#[must_use]
	pub fn atyp(&self) -> AddrType {
		match self {
			SocksDestination::Name(_) => AddrType::Name,
			SocksDestination::Ip(IpAddr::V4(_)) => AddrType::Ipv4,
			SocksDestination::Ip(IpAddr::V6(_)) => AddrType::Ipv6,
		}
	}

	/// Reads a tagged destination from `buf`.
	///
	/// The layout after the 1 byte tag is:
	/// - [`AddrType::Ipv4`]: | 4 bytes |
	/// - [`AddrType::Ipv6`]: | 16 bytes |
	/// - [`AddrType::Name`]: | n, 1 byte | n bytes |
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if `buf` is too short or holds an invalid address.
	pub fn read_from(buf: &mut impl Buf) -> Result<Self, ReadError> {
		ensure_remaining(buf, 1)?;
		let atyp = buf.get_u8();
		let atyp = AddrType::try_from(atyp).map_err(|_| ReadError::UnknownAddressType(atyp))?;
		Ok(match atyp {
			AddrType::Ipv4 => {
				let mut octets = [0_u8; 4];
				ensure_remaining(buf, octets.len())?;
				buf.copy_to_slice(&mut octets);
				Ipv4Addr::from(octets).into()
			}
			AddrType::Ipv6 => {
				let mut octets = [0_u8; 16];
				ensure_remaining(buf, octets.len())?;
				buf.copy_to_slice(&mut octets);
				Ipv6Addr::from(octets).into()
			}
			AddrType::Name => {
				ensure_remaining(buf, 1)?;
				let len = usize::from(buf.get_u8());
				if len == 0 {
					return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
				}
				ensure_remaining(buf, len)?;
				let mut name = [0_u8; MAX_DOMAIN_LEN];
				let name = &mut name[..len];
				buf.copy_to_slice(name);
				let name = std::str::from_utf8(name).map_err(ReadError::StrNotUtf8)?;
				Self::new_domain(name)?
			}
		})
	}

	/// Writes the address type tag followed by the address.
	pub fn write_to(&self, buf: &mut impl BufMut) {
		buf.put_u8(self.atyp().into());
		match self {
			SocksDestination::Name(name) => {
				buf.put_u8(name.len());
				buf.put_slice(name.as_bytes());
			}
			SocksDestination::Ip(IpAddr::V4(ip)) => buf.put_slice(&ip.octets()),
			SocksDestination::Ip(IpAddr::V6(ip)) => buf.put_slice(&ip.octets()),
		}
	}

	/// Number of bytes written by [`Self::write_to`].
	#[must_use]
	pub fn serialized_len(&self) -> usize {
		1 + match self {
			SocksDestination::Name(name) => 1 + name.as_str().len(),
			SocksDestination::Ip(IpAddr::V4(_)) => 4,
			SocksDestination::Ip(IpAddr::V6(_)) => 16,
		}
	}
}

impl FromStr for SocksDestination {
	type Err = ReadError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Ok(ip) = IpAddr::from_str(s) {
			return Ok(ip.into());
		}
		Self::new_domain(s)
	}
}

impl From<DomainName> for SocksDestination {
	#[inline]
	fn from(domain: DomainName) -> Self {
		Self::Name(domain)
	}
}

impl From<IpAddr> for SocksDestination {
	#[inline]
	fn from(ip: IpAddr) -> Self {
		Self::Ip(ip)
	}
}

impl From<Ipv4Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv4Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl From<Ipv6Addr> for SocksDestination {
	#[inline]
	fn from(ip: Ipv6Addr) -> Self {
		Self::Ip(ip.into())
	}
}

impl Display for SocksDestination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SocksDestination::Name(name) => name.fmt(f),
			SocksDestination::Ip(ip) => ip.fmt(f),
		}
	}
}

// -------------------------------------------------------
//                     SocksAddr
// -------------------------------------------------------

/// A destination with a port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocksAddr {
	pub dest: SocksDestination,
	pub port: u16,
}

impl SocksAddr {
	#[inline]
	#[must_use]
	pub fn new(dest: SocksDestination, port: u16) -> Self {
		Self { dest, port }
	}

	/// Reads a tagged destination followed by a 2 bytes big endian port.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if `buf` is too short or holds an invalid address.
	pub fn read_from(buf: &mut impl Buf) -> Result<Self, ReadError> {
		let dest = SocksDestination::read_from(buf)?;
		ensure_remaining(buf, 2)?;
		let port = buf.get_u16();
		Ok(Self { dest, port })
	}

	/// Writes the tagged destination, then the port.
	#[inline]
	pub fn write_to(&self, buf: &mut impl BufMut) {
		self.dest.write_to(buf);
		buf.put_u16(self.port);
	}

	#[inline]
	#[must_use]
	pub fn serialized_len(&self) -> usize {
		self.dest.serialized_len() + 2
	}

	/// Parses `host:port`, or `host` alone if `default_port` is given.
	///
	/// IPv6 addresses with a port must be wrapped in brackets, like `[::1]:80`.
	///
	/// # Errors
	///
	/// Returns a [`ReadError`] if there is no port and no `default_port`,
	/// or if any part of `s` is invalid.
	pub fn parse_str(s: &str, default_port: Option<u16>) -> Result<Self, ReadError> {
		if let Ok(addr) = s.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		if s.is_empty() {
			return Err(ReadError::InvalidAddress(EMPTY_STRING.into()));
		}
		let (host, port) = match s.rsplit_once(':') {
			Some((host, port)) => {
				if port.is_empty() {
					return Err(ReadError::InvalidPort(EMPTY_STRING.into()));
				}
				let port = port
					.parse::<u16>()
					.map_err(|e| ReadError::InvalidPort(e.into()))?;
				(host, port)
			}
			None => (
				s,
				default_port.ok_or_else(|| ReadError::InvalidAddress("missing port".into()))?,
			),
		};
		Ok(Self {
			dest: host.parse()?,
			port,
		})
	}
}

impl FromStr for SocksAddr {
	type Err = ReadError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_str(s, None)
	}
}

impl Display for SocksAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.dest {
			SocksDestination::Name(name) => write!(f, "{}:{}", name, self.port),
			SocksDestination::Ip(ip) => SocketAddr::new(*ip, self.port).fmt(f),
		}
	}
}

impl From<SocketAddr> for SocksAddr {
	#[inline]
	fn from(addr: SocketAddr) -> Self {
		Self {
			dest: addr.ip().into(),
			port: addr.port(),
		}
	}
}

impl<T: Into<SocksDestination>> From<(T, u16)> for SocksAddr {
	#[inline]
	fn from((dest, port): (T, u16)) -> Self {
		Self {
			dest: dest.into(),
			port,
		}
	}
}

#[cfg(feature = "use_serde")]
impl<'de> serde::Deserialize<'de> for SocksAddr {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = <Cow<'de, str> as serde::Deserialize<'de>>::deserialize(deserializer)?;
		SocksAddr::from_str(&s).map_err(serde::de::Error::custom)
	}
}

// -------------------------------------------------------
//                     DomainName
// -------------------------------------------------------

/// An ASCII domain name of at most 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(SmolStr);

impl DomainName {
	#[inline]
	#[must_use]
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	#[inline]
	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}

	#[allow(clippy::cast_possible_truncation)]
	#[inline]
	#[must_use]
	pub fn len(&self) -> u8 {
		// Checked on creation.
		self.0.len() as u8
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl FromStr for DomainName {
	type Err = ReadError;

	fn from_str(v: &str) -> Result<Self, ReadError> {
		let v = v.strip_suffix('.').unwrap_or(v);
		if v.is_empty() {
			return Err(ReadError::InvalidDomain(EMPTY_STRING.into()));
		}
		let name =
			idna::domain_to_ascii_strict(v).map_err(|e| ReadError::InvalidDomain(e.into()))?;
		if name.len() > MAX_DOMAIN_LEN {
			return Err(ReadError::InvalidDomain("too long".into()));
		}
		Ok(Self(SmolStr::new(name)))
	}
}

impl Display for DomainName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}
