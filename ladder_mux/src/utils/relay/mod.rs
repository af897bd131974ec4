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

//! Moving bytes between a network stream and a [`Link`].

mod copier;
mod counter;

pub use counter::Counter;

use crate::{prelude::*, protocol::AsyncReadWrite, transport::Link};
use copier::Copier;
use counter::ActivityFlag;
use futures::future::{self, Either};
use std::{future::Future, io, time::Duration};
use tokio::{io::BufReader, time::timeout};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
const OTHER_TASK_TIMEOUT: Duration = Duration::from_millis(2000);

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const MAX_IDLE_TICKS: usize = 300;

pub struct Relay<'a> {
	pub conn_id: &'a str,
	/// Bytes moved from the link into the stream.
	pub recv: Option<Counter>,
	/// Bytes moved from the stream into the link.
	pub send: Option<Counter>,
	pub buffer_size: usize,
}

impl<'a> Relay<'a> {
	#[inline]
	#[must_use]
	pub fn new(conn_id: &'a str) -> Self {
		Self {
			conn_id,
			recv: None,
			send: None,
			buffer_size: DEFAULT_BUFFER_SIZE,
		}
	}

	#[inline]
	pub fn set_recv(&mut self, recv: Counter) -> &mut Self {
		self.recv = Some(recv);
		self
	}

	#[inline]
	pub fn set_send(&mut self, send: Counter) -> &mut Self {
		self.send = Some(send);
		self
	}
}

impl Relay<'_> {
	/// Relays data between `stream` and `link` until both directions are done.
	///
	/// `link` is interrupted if anything goes wrong, so that whoever is on
	/// the other side of the link sees an abort rather than a clean EOF.
	///
	/// # Errors
	///
	/// Returns an [`io::Error`] if either direction fails, or if nothing
	/// is transferred for 300 seconds.
	pub async fn relay_link(&self, stream: Box<dyn AsyncReadWrite>, link: Link) -> io::Result<()> {
		let res = self.relay_link_inner(stream, &link).await;
		if res.is_err() {
			link.interrupt();
		}
		res
	}

	async fn relay_link_inner(
		&self,
		stream: Box<dyn AsyncReadWrite>,
		link: &Link,
	) -> io::Result<()> {
		let (stream_r, stream_w) = stream.split();
		let send_tag = Arc::<str>::from(format!("[{} send]", self.conn_id));
		let recv_tag = Arc::<str>::from(format!("[{} recv]", self.conn_id));
		let activity = ActivityFlag::default();

		// stream ---> link
		let send_task = Copier {
			r: BufReader::with_capacity(self.buffer_size, stream_r),
			w: link.writer.clone(),
			count: self.send.clone().unwrap_or_default(),
			tag: send_tag.clone(),
			activity: activity.clone(),
		}
		.run();
		// stream <--- link
		let recv_task = Copier {
			r: BufReader::with_capacity(self.buffer_size, link.reader.clone()),
			w: stream_w,
			count: self.recv.clone().unwrap_or_default(),
			tag: recv_tag.clone(),
			activity: activity.clone(),
		}
		.run();

		let relay_task = async move {
			futures::pin_mut!(send_task);
			futures::pin_mut!(recv_task);
			match future::select(send_task, recv_task).await {
				Either::Left((res, other)) => {
					finish_other(res, &send_tag, &recv_tag, other).await
				}
				Either::Right((res, other)) => {
					finish_other(res, &recv_tag, &send_tag, other).await
				}
			}
		};

		tokio::select! {
			res = relay_task => res,
			_ = guard_inactivity(activity) => Err(io::Error::new(
				io::ErrorKind::TimedOut,
				format!("{} not active for {} secs", self.conn_id, MAX_IDLE_TICKS),
			)),
		}
	}
}

/// Waits a limited time for the remaining direction once the first one is done.
async fn finish_other(
	res: io::Result<()>,
	tag: &str,
	other_tag: &str,
	other: impl Future<Output = io::Result<()>>,
) -> io::Result<()> {
	trace!("{} task finished", tag);
	res?;
	match timeout(OTHER_TASK_TIMEOUT, other).await {
		Ok(res) => res,
		Err(_) => {
			debug!(
				"{} cannot finish in {} ms",
				other_tag,
				OTHER_TASK_TIMEOUT.as_millis()
			);
			Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"other direction did not finish in time",
			))
		}
	}
}

async fn guard_inactivity(activity: ActivityFlag) {
	let mut idle_ticks = 0_usize;
	loop {
		tokio::time::sleep(TICK_INTERVAL).await;
		if activity.take() {
			idle_ticks = 0;
		} else {
			idle_ticks += 1;
			if idle_ticks >= MAX_IDLE_TICKS {
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::init_log;

	#[test]
	fn test_relay_link() {
		init_log();
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (stream, mut peer) = tokio::io::duplex(1024);
			let (near, far) = Link::pair(None);

			let send = Counter::new(0);
			let recv = Counter::new(0);
			let task = {
				let (send, recv) = (send.clone(), recv.clone());
				tokio::spawn(async move {
					Relay::new("test")
						.set_send(send)
						.set_recv(recv)
						.relay_link(Box::new(stream), near)
						.await
				})
			};

			peer.write_all(b"request").await.unwrap();
			peer.shutdown().await.unwrap();
			let mut request = Vec::new();
			let mut far_reader = far.reader.clone();
			far_reader.read_to_end(&mut request).await.unwrap();
			assert_eq!(request, b"request");

			far.writer
				.write_buf(Bytes::from_static(b"response"))
				.await
				.unwrap();
			far.writer.close();
			let mut response = Vec::new();
			peer.read_to_end(&mut response).await.unwrap();
			assert_eq!(response, b"response");

			task.await.unwrap().unwrap();
			assert_eq!(send.get(), 7);
			assert_eq!(recv.get(), 8);
		});
	}

	#[test]
	fn test_relay_link_abort() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (stream, _peer) = tokio::io::duplex(1024);
			let (near, far) = Link::pair(None);
			let task = tokio::spawn(async move {
				Relay::new("test").relay_link(Box::new(stream), near).await
			});
			far.writer.interrupt();
			assert!(task.await.unwrap().is_err());
			assert!(far.reader.read_buf().await.is_err());
		});
	}
}
