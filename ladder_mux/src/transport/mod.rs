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

pub mod pipe;

use crate::{prelude::*, protocol::AsyncReadWrite};
use pipe::{PipeReader, PipeWriter};
use std::{io, time::Duration};
use tokio::net::TcpStream;

/// One side of a local virtual link.
///
/// Data written into `writer` can be read from the `reader` of the other side.
#[derive(Clone)]
pub struct Link {
	pub reader: PipeReader,
	pub writer: PipeWriter,
}

impl Link {
	/// Creates two links connected to each other.
	#[must_use]
	pub fn pair(limit: Option<usize>) -> (Link, Link) {
		let (a_reader, b_writer) = pipe::new(limit);
		let (b_reader, a_writer) = pipe::new(limit);
		(
			Link {
				reader: a_reader,
				writer: a_writer,
			},
			Link {
				reader: b_reader,
				writer: b_writer,
			},
		)
	}

	/// Creates two links connected to each other, each direction buffering
	/// at most [`pipe::DEFAULT_SIZE_LIMIT`] bytes.
	#[must_use]
	pub fn bounded_pair() -> (Link, Link) {
		Self::pair(Some(pipe::DEFAULT_SIZE_LIMIT))
	}

	/// Closes both directions gracefully.
	pub fn close(&self) {
		self.writer.close();
		self.reader.close();
	}

	/// Aborts both directions.
	pub fn interrupt(&self) {
		self.writer.interrupt();
		self.reader.interrupt();
	}
}

/// Opens physical links for mux clients.
#[async_trait]
pub trait Dialer: Send + Sync {
	/// # Errors
	///
	/// Returns an [`io::Error`] if the connection cannot be established.
	async fn dial(&self) -> io::Result<Box<dyn AsyncReadWrite>>;
}

/// Dials a fixed TCP address.
pub struct TcpDialer {
	addr: SocksAddr,
	timeout: Duration,
}

impl TcpDialer {
	pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

	#[must_use]
	pub fn new(addr: SocksAddr) -> Self {
		Self {
			addr,
			timeout: Self::DEFAULT_TIMEOUT,
		}
	}

	#[must_use]
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

#[async_trait]
impl Dialer for TcpDialer {
	async fn dial(&self) -> io::Result<Box<dyn AsyncReadWrite>> {
		let stream = tokio::time::timeout(self.timeout, connect_tcp(&self.addr))
			.await
			.map_err(|_| {
				io::Error::new(
					io::ErrorKind::TimedOut,
					format!("cannot connect to {} in {} ms", self.addr, self.timeout.as_millis()),
				)
			})??;
		trace!("dialed mux server {}", self.addr);
		Ok(Box::new(stream))
	}
}

/// Connects to `addr`, resolving domain names with the system resolver.
///
/// # Errors
///
/// Returns an [`io::Error`] if resolving or connecting fails.
pub async fn connect_tcp(addr: &SocksAddr) -> io::Result<TcpStream> {
	let stream = match &addr.dest {
		SocksDestination::Name(name) => TcpStream::connect((name.as_str(), addr.port)).await?,
		SocksDestination::Ip(ip) => TcpStream::connect((*ip, addr.port)).await?,
	};
	stream.set_nodelay(true)?;
	Ok(stream)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_link_pair() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (a, b) = Link::pair(None);
			a.writer.write_buf(Bytes::from_static(b"ping")).await.unwrap();
			assert_eq!(b.reader.read_buf().await.unwrap().unwrap(), "ping");
			b.writer.write_buf(Bytes::from_static(b"pong")).await.unwrap();
			assert_eq!(a.reader.read_buf().await.unwrap().unwrap(), "pong");

			a.close();
			assert!(b.reader.read_buf().await.unwrap().is_none());
			assert!(b.writer.write_buf(Bytes::from_static(b"x")).await.is_err());
		});
	}

	#[test]
	fn test_bounded_pair() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (a, b) = Link::bounded_pair();
			let chunk = Bytes::from(vec![0_u8; 64 * 1024]);
			for _ in 0..pipe::DEFAULT_SIZE_LIMIT / chunk.len() {
				a.writer.write_buf(chunk.clone()).await.unwrap();
			}
			// Full, so writers have to wait for the reader.
			let blocked = tokio::time::timeout(
				Duration::from_millis(50),
				a.writer.write_buf(chunk.clone()),
			)
			.await;
			assert!(blocked.is_err());
			assert_eq!(b.reader.read_buf().await.unwrap().unwrap().len(), chunk.len());
			a.writer.write_buf(chunk).await.unwrap();
		});
	}
}
