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

//! In-memory, single direction channel of byte buffers.
//!
//! A pipe preserves write boundaries when read with [`PipeReader::read_buf`],
//! so it can carry datagrams as well as streams.

use crate::prelude::*;
use futures::ready;
use parking_lot::Mutex;
use std::{
	collections::VecDeque,
	io,
	task::{Context, Poll, Waker},
	time::Duration,
};
use tokio::io::ReadBuf;

/// Default number of bytes a pipe buffers before writers have to wait.
pub const DEFAULT_SIZE_LIMIT: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Open,
	WriterClosed,
	Interrupted,
}

struct Inner {
	queue: VecDeque<Bytes>,
	buffered: usize,
	limit: Option<usize>,
	state: State,
	reader_closed: bool,
	/// Every handle may be cloned, so any number of tasks can be waiting.
	read_wakers: Vec<Waker>,
	write_wakers: Vec<Waker>,
}

fn register(wakers: &mut Vec<Waker>, waker: &Waker) {
	if !wakers.iter().any(|w| w.will_wake(waker)) {
		wakers.push(waker.clone());
	}
}

fn wake_all(wakers: &mut Vec<Waker>) {
	for w in wakers.drain(..) {
		w.wake();
	}
}

impl Inner {
	fn wake_reader(&mut self) {
		wake_all(&mut self.read_wakers);
	}

	fn wake_writer(&mut self) {
		wake_all(&mut self.write_wakers);
	}

	/// Returns `Ok(None)` on EOF.
	fn poll_pop(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Option<Bytes>>> {
		if self.state == State::Interrupted {
			return Poll::Ready(Err(interrupted()));
		}
		if self.reader_closed {
			return Poll::Ready(Ok(None));
		}
		if let Some(data) = self.queue.pop_front() {
			self.buffered -= data.len();
			self.wake_writer();
			return Poll::Ready(Ok(Some(data)));
		}
		if self.state == State::WriterClosed {
			return Poll::Ready(Ok(None));
		}
		register(&mut self.read_wakers, cx.waker());
		Poll::Pending
	}

	fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		if self.state == State::Interrupted {
			return Poll::Ready(Err(interrupted()));
		}
		if self.reader_closed || self.state == State::WriterClosed {
			return Poll::Ready(Err(io::Error::new(
				io::ErrorKind::BrokenPipe,
				"pipe closed",
			)));
		}
		if let Some(limit) = self.limit {
			// An oversized buffer is still accepted by an empty pipe.
			if self.buffered > 0 && self.buffered >= limit {
				register(&mut self.write_wakers, cx.waker());
				return Poll::Pending;
			}
		}
		Poll::Ready(Ok(()))
	}

	fn push(&mut self, data: Bytes) {
		if data.is_empty() {
			return;
		}
		self.buffered += data.len();
		self.queue.push_back(data);
		self.wake_reader();
	}

	fn interrupt(&mut self) {
		if self.state != State::Interrupted {
			self.state = State::Interrupted;
			self.queue.clear();
			self.buffered = 0;
			self.wake_reader();
			self.wake_writer();
		}
	}
}

fn interrupted() -> io::Error {
	io::Error::new(io::ErrorKind::ConnectionAborted, "pipe interrupted")
}

/// Creates a new pipe.
///
/// Writers wait while at least `limit` bytes are buffered.
/// There is no limit if `limit` is `None`.
#[must_use]
pub fn new(limit: Option<usize>) -> (PipeReader, PipeWriter) {
	let inner = Arc::new(Mutex::new(Inner {
		queue: VecDeque::new(),
		buffered: 0,
		limit,
		state: State::Open,
		reader_closed: false,
		read_wakers: Vec::new(),
		write_wakers: Vec::new(),
	}));
	(
		PipeReader {
			inner: inner.clone(),
		},
		PipeWriter { inner },
	)
}

/// Reading end of a pipe.
#[derive(Clone)]
pub struct PipeReader {
	inner: Arc<Mutex<Inner>>,
}

impl PipeReader {
	/// Reads the next buffer exactly as it was written.
	///
	/// Returns `Ok(None)` once the writer is closed and everything
	/// has been read, or once this reader is closed.
	///
	/// # Errors
	///
	/// Returns an error with kind `ConnectionAborted` if the pipe is interrupted.
	pub async fn read_buf(&self) -> io::Result<Option<Bytes>> {
		futures::future::poll_fn(|cx| self.inner.lock().poll_pop(cx)).await
	}

	/// Same as [`Self::read_buf`], but gives up after `dur`.
	///
	/// # Errors
	///
	/// Returns an error with kind `TimedOut` if nothing arrives in time.
	/// Nothing is consumed in that case.
	pub async fn read_buf_timeout(&self, dur: Duration) -> io::Result<Option<Bytes>> {
		match tokio::time::timeout(dur, self.read_buf()).await {
			Ok(res) => res,
			Err(_) => Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"pipe read timeout",
			)),
		}
	}

	/// Stops reading. Buffered data is dropped and writers fail from now on.
	pub fn close(&self) {
		let mut inner = self.inner.lock();
		if !inner.reader_closed {
			inner.reader_closed = true;
			inner.queue.clear();
			inner.buffered = 0;
			inner.wake_reader();
			inner.wake_writer();
		}
	}

	/// Aborts the pipe. Both ends fail from now on.
	pub fn interrupt(&self) {
		self.inner.lock().interrupt();
	}
}

impl AsyncRead for PipeReader {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		if buf.remaining() == 0 {
			return Poll::Ready(Ok(()));
		}
		let mut inner = self.inner.lock();
		let mut data = match ready!(inner.poll_pop(cx))? {
			Some(data) => data,
			None => return Poll::Ready(Ok(())),
		};
		let len = data.len().min(buf.remaining());
		buf.put_slice(&data[..len]);
		if len < data.len() {
			data.advance(len);
			inner.buffered += data.len();
			inner.queue.push_front(data);
		}
		Poll::Ready(Ok(()))
	}
}

/// Writing end of a pipe.
#[derive(Clone)]
pub struct PipeWriter {
	inner: Arc<Mutex<Inner>>,
}

impl PipeWriter {
	/// Writes `data` as a single buffer, waiting for room if the pipe is full.
	///
	/// Empty buffers are dropped.
	///
	/// # Errors
	///
	/// Returns an error if either end is closed or the pipe is interrupted.
	pub async fn write_buf(&self, data: Bytes) -> io::Result<()> {
		let mut data = Some(data);
		futures::future::poll_fn(|cx| {
			let mut inner = self.inner.lock();
			ready!(inner.poll_writable(cx))?;
			if let Some(data) = data.take() {
				inner.push(data);
			}
			Poll::Ready(Ok(()))
		})
		.await
	}

	/// Finishes writing. The reader sees EOF after draining buffered data.
	pub fn close(&self) {
		let mut inner = self.inner.lock();
		if inner.state == State::Open {
			inner.state = State::WriterClosed;
			inner.wake_reader();
			inner.wake_writer();
		}
	}

	/// Aborts the pipe. Both ends fail from now on.
	pub fn interrupt(&self) {
		self.inner.lock().interrupt();
	}
}

impl AsyncWrite for PipeWriter {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let mut inner = self.inner.lock();
		ready!(inner.poll_writable(cx))?;
		inner.push(Bytes::copy_from_slice(buf));
		Poll::Ready(Ok(buf.len()))
	}

	fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.close();
		Poll::Ready(Ok(()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tokio::time::timeout;

	const TIMEOUT_DUR: Duration = Duration::from_millis(200);

	#[test]
	fn test_message_boundaries() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(None);
			w.write_buf(Bytes::from_static(b"first")).await.unwrap();
			w.write_buf(Bytes::new()).await.unwrap();
			w.write_buf(Bytes::from_static(b"second")).await.unwrap();
			w.close();
			assert_eq!(r.read_buf().await.unwrap().unwrap(), "first");
			assert_eq!(r.read_buf().await.unwrap().unwrap(), "second");
			assert!(r.read_buf().await.unwrap().is_none());
			assert!(w.write_buf(Bytes::from_static(b"late")).await.is_err());
		});
	}

	#[test]
	fn test_stream_read() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (mut r, mut w) = new(None);
			w.write_all(b"hello world").await.unwrap();
			w.shutdown().await.unwrap();
			let mut buf = [0_u8; 5];
			r.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"hello");
			let mut rest = Vec::new();
			r.read_to_end(&mut rest).await.unwrap();
			assert_eq!(rest, b" world");
		});
	}

	#[test]
	fn test_read_timeout() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(None);
			let err = r
				.read_buf_timeout(Duration::from_millis(10))
				.await
				.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::TimedOut);
			w.write_buf(Bytes::from_static(b"data")).await.unwrap();
			let data = r.read_buf_timeout(TIMEOUT_DUR).await.unwrap().unwrap();
			assert_eq!(data, "data");
		});
	}

	#[test]
	fn test_reader_close() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(None);
			w.write_buf(Bytes::from_static(b"dropped")).await.unwrap();
			r.close();
			assert!(r.read_buf().await.unwrap().is_none());
			let err = w.write_buf(Bytes::from_static(b"x")).await.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
		});
	}

	#[test]
	fn test_interrupt() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(None);
			let reading = tokio::spawn({
				let r = r.clone();
				async move { r.read_buf().await }
			});
			tokio::task::yield_now().await;
			w.interrupt();
			let err = timeout(TIMEOUT_DUR, reading)
				.await
				.unwrap()
				.unwrap()
				.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
			let err = w.write_buf(Bytes::from_static(b"x")).await.unwrap_err();
			assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
			// Closing after an interrupt does not hide the error.
			w.close();
			assert!(r.read_buf().await.is_err());
		});
	}

	#[test]
	fn test_size_limit() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(Some(4));
			// Accepted even though it is larger than the limit.
			w.write_buf(Bytes::from_static(b"12345678")).await.unwrap();
			let blocked = timeout(
				Duration::from_millis(50),
				w.write_buf(Bytes::from_static(b"9")),
			)
			.await;
			assert!(blocked.is_err());

			let writing = tokio::spawn({
				let w = w.clone();
				async move { w.write_buf(Bytes::from_static(b"9")).await }
			});
			assert_eq!(r.read_buf().await.unwrap().unwrap(), "12345678");
			timeout(TIMEOUT_DUR, writing)
				.await
				.unwrap()
				.unwrap()
				.unwrap();
			assert_eq!(r.read_buf().await.unwrap().unwrap(), "9");
		});
	}

	#[test]
	fn test_multiple_waiting_writers() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(Some(4));
			w.write_buf(Bytes::from_static(b"full")).await.unwrap();
			let mut tasks = Vec::new();
			for data in [&b"a"[..], &b"b"[..]] {
				let w = w.clone();
				tasks.push(tokio::spawn(async move {
					w.write_buf(Bytes::from_static(data)).await
				}));
				// Make sure both writers are waiting.
				tokio::time::sleep(Duration::from_millis(20)).await;
			}

			let mut received = Vec::new();
			for _ in 0..3 {
				let data = timeout(TIMEOUT_DUR, r.read_buf()).await.unwrap();
				received.push(data.unwrap().unwrap());
			}
			received.sort();
			assert_eq!(received, [&b"a"[..], &b"b"[..], &b"full"[..]]);
			for task in tasks {
				timeout(TIMEOUT_DUR, task).await.unwrap().unwrap().unwrap();
			}
		});
	}

	#[test]
	fn test_multiple_waiting_readers() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let (r, w) = new(None);
			let tasks: Vec<_> = (0..2)
				.map(|_| {
					let r = r.clone();
					tokio::spawn(async move { r.read_buf().await })
				})
				.collect();
			tokio::time::sleep(Duration::from_millis(20)).await;
			w.write_buf(Bytes::from_static(b"one")).await.unwrap();
			w.write_buf(Bytes::from_static(b"two")).await.unwrap();

			let mut received = Vec::new();
			for task in tasks {
				let data = timeout(TIMEOUT_DUR, task).await.unwrap().unwrap();
				received.push(data.unwrap().unwrap());
			}
			received.sort();
			assert_eq!(received, [&b"one"[..], &b"two"[..]]);
		});
	}
}
