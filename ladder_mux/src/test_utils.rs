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
	mux::{FrameMetadata, FrameOption, SessionStatus},
	prelude::*,
	protocol::{Destination, DispatchError, Dispatcher},
	transport::Link,
};
use std::time::Duration;

pub const TIMEOUT_DUR: Duration = Duration::from_millis(1000);

pub fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// A frame as seen on the wire.
#[derive(Debug)]
pub struct RawFrame {
	pub meta: FrameMetadata,
	pub data: Option<Bytes>,
}

/// Reads a frame from `r`, returns `None` on EOF.
///
/// Panics if nothing arrives in [`TIMEOUT_DUR`].
pub async fn read_raw_frame<R: AsyncRead + Unpin>(r: &mut R) -> Option<RawFrame> {
	tokio::time::timeout(TIMEOUT_DUR, async {
		let meta = FrameMetadata::read_from(r).await.unwrap()?;
		let data = if meta.has_data() {
			let len = usize::from(r.read_u16().await.unwrap());
			let mut data = vec![0_u8; len];
			r.read_exact(&mut data).await.unwrap();
			Some(Bytes::from(data))
		} else {
			None
		};
		Some(RawFrame { meta, data })
	})
	.await
	.expect("timeout when reading frame")
}

pub fn encode_frame(meta: &FrameMetadata, data: Option<&[u8]>) -> BytesMut {
	let mut meta = meta.clone();
	if data.is_some() {
		meta.option.set(FrameOption::DATA);
	}
	let mut buf = BytesMut::new();
	meta.write_to(&mut buf).unwrap();
	if let Some(data) = data {
		buf.put_u16(u16::try_from(data.len()).unwrap());
		buf.put_slice(data);
	}
	buf
}

pub async fn write_raw_frame<W: AsyncWrite + Unpin>(
	w: &mut W,
	id: u16,
	status: SessionStatus,
	option: u8,
	data: Option<&[u8]>,
) {
	let mut meta = FrameMetadata::new(id, status);
	meta.option.set(option);
	w.write_all(&encode_frame(&meta, data)).await.unwrap();
}

pub async fn write_new_frame<W: AsyncWrite + Unpin>(
	w: &mut W,
	id: u16,
	target: Destination,
	data: Option<&[u8]>,
) {
	let mut meta = FrameMetadata::new(id, SessionStatus::New);
	meta.target = Some(target);
	w.write_all(&encode_frame(&meta, data)).await.unwrap();
}

/// Hands out links and keeps the other sides for the test to drive.
pub struct RecordingDispatcher {
	pub links: parking_lot::Mutex<Vec<(Destination, Link)>>,
	pub notify: tokio::sync::Notify,
}

impl RecordingDispatcher {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			links: parking_lot::Mutex::new(Vec::new()),
			notify: tokio::sync::Notify::new(),
		})
	}

	/// Waits until the `n`-th (0 based) link has been dispatched.
	pub async fn wait_link(&self, n: usize) -> (Destination, Link) {
		tokio::time::timeout(TIMEOUT_DUR, async {
			loop {
				let notified = self.notify.notified();
				if let Some(item) = self.links.lock().get(n) {
					return item.clone();
				}
				notified.await;
			}
		})
		.await
		.expect("timeout when waiting for dispatched link")
	}
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
	async fn dispatch(&self, dst: &Destination) -> Result<Link, DispatchError> {
		if dst.addr.port == 0 {
			return Err(DispatchError::NotAllowed(dst.clone()));
		}
		let (outer, inner) = Link::pair(None);
		self.links.lock().push((dst.clone(), inner));
		self.notify.notify_waiters();
		Ok(outer)
	}
}

/// Polls `cond` until it holds.
///
/// Panics if it does not hold in [`TIMEOUT_DUR`].
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
	tokio::time::timeout(TIMEOUT_DUR, async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not met in time");
}
