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
	protocol::{Destination, DispatchError, Dispatcher, Network},
	transport::{connect_tcp, pipe::DEFAULT_SIZE_LIMIT, Link},
	utils::relay::Relay,
};
use std::{io, time::Duration};
use tokio::net::UdpSocket;

pub const PROTOCOL_NAME: &str = "freedom";

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Connects directly to the requested destination.
pub struct Freedom {
	dial_timeout: Duration,
	udp_idle_timeout: Duration,
	buffer_limit: Option<usize>,
}

impl Default for Freedom {
	fn default() -> Self {
		Self {
			dial_timeout: DEFAULT_DIAL_TIMEOUT,
			udp_idle_timeout: DEFAULT_UDP_IDLE_TIMEOUT,
			buffer_limit: Some(DEFAULT_SIZE_LIMIT),
		}
	}
}

impl Freedom {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
		self.dial_timeout = timeout;
		self
	}

	/// Sets how long a UDP association lives without any response.
	#[must_use]
	pub fn with_udp_idle_timeout(mut self, timeout: Duration) -> Self {
		self.udp_idle_timeout = timeout;
		self
	}

	/// Sets how many bytes each direction of a link buffers before
	/// writers have to wait. `None` removes the limit.
	#[must_use]
	pub fn with_buffer_limit(mut self, limit: Option<usize>) -> Self {
		self.buffer_limit = limit;
		self
	}
}

#[async_trait]
impl Dispatcher for Freedom {
	async fn dispatch(&self, dst: &Destination) -> Result<Link, DispatchError> {
		let (outer, inner) = Link::pair(self.buffer_limit);
		let addr = dst.addr.clone();
		match dst.network {
			Network::Tcp => {
				tokio::spawn(relay_tcp(addr, inner, self.dial_timeout));
			}
			Network::Udp => {
				tokio::spawn(relay_udp(addr, inner, self.udp_idle_timeout));
			}
		}
		Ok(outer)
	}
}

async fn relay_tcp(addr: SocksAddr, link: Link, dial_timeout: Duration) {
	let conn_id = format!("{}/tcp:{}", PROTOCOL_NAME, addr);
	let stream = match tokio::time::timeout(dial_timeout, connect_tcp(&addr)).await {
		Ok(Ok(stream)) => stream,
		Ok(Err(e)) => {
			debug!("[{}] cannot connect ({})", conn_id, e);
			link.interrupt();
			return;
		}
		Err(_) => {
			debug!(
				"[{}] cannot connect in {} ms",
				conn_id,
				dial_timeout.as_millis()
			);
			link.interrupt();
			return;
		}
	};
	trace!("[{}] connected", conn_id);
	match Relay::new(&conn_id).relay_link(Box::new(stream), link).await {
		Ok(()) => trace!("[{}] finished", conn_id),
		Err(e) => debug!("[{}] relay error ({})", conn_id, e),
	}
}

async fn relay_udp(addr: SocksAddr, link: Link, idle_timeout: Duration) {
	let conn_id = format!("{}/udp:{}", PROTOCOL_NAME, addr);
	match relay_udp_inner(&addr, &link, idle_timeout).await {
		Ok(()) => {
			trace!("[{}] finished", conn_id);
			link.close();
		}
		Err(e) => {
			debug!("[{}] relay error ({})", conn_id, e);
			link.interrupt();
		}
	}
}

async fn relay_udp_inner(addr: &SocksAddr, link: &Link, idle_timeout: Duration) -> io::Result<()> {
	let target = resolve(addr).await?;
	let bind_addr: SocketAddr = if target.is_ipv4() {
		(Ipv4Addr::UNSPECIFIED, 0).into()
	} else {
		(Ipv6Addr::UNSPECIFIED, 0).into()
	};
	let socket = UdpSocket::bind(bind_addr).await?;
	socket.connect(target).await?;

	// Each message on the link is one datagram.
	let uplink = async {
		while let Some(data) = link.reader.read_buf().await? {
			socket.send(&data).await?;
		}
		Ok::<_, io::Error>(())
	};
	let downlink = async {
		let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
		loop {
			let n = match tokio::time::timeout(idle_timeout, socket.recv(&mut buf)).await {
				Ok(res) => res?,
				Err(_) => return Ok::<_, io::Error>(()),
			};
			link.writer
				.write_buf(Bytes::copy_from_slice(&buf[..n]))
				.await?;
		}
	};
	tokio::select! {
		res = uplink => res,
		res = downlink => res,
	}
}

async fn resolve(addr: &SocksAddr) -> io::Result<SocketAddr> {
	match &addr.dest {
		SocksDestination::Ip(ip) => Ok(SocketAddr::new(*ip, addr.port)),
		SocksDestination::Name(name) => tokio::net::lookup_host((name.as_str(), addr.port))
			.await?
			.next()
			.ok_or_else(|| {
				io::Error::new(
					io::ErrorKind::NotFound,
					format!("cannot resolve domain '{}'", name.as_str()),
				)
			}),
	}
}
