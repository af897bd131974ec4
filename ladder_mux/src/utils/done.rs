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

use std::sync::Arc;
use tokio::sync::watch;

/// A signal that can be fired once and awaited by any number of tasks.
#[derive(Clone)]
pub struct Done(Arc<watch::Sender<bool>>);

impl Done {
	#[must_use]
	pub fn new() -> Self {
		let (sender, _) = watch::channel(false);
		Self(Arc::new(sender))
	}

	/// Fires the signal. Returns `true` only for the call that fired it.
	pub fn close(&self) -> bool {
		!self.0.send_replace(true)
	}

	#[inline]
	#[must_use]
	pub fn is_done(&self) -> bool {
		*self.0.borrow()
	}

	/// Waits until the signal is fired.
	pub async fn wait(&self) {
		let mut receiver = self.0.subscribe();
		loop {
			if *receiver.borrow() {
				return;
			}
			if receiver.changed().await.is_err() {
				return;
			}
		}
	}
}

impl Default for Done {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_done() {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let done = Done::new();
			let waiting = tokio::spawn({
				let done = done.clone();
				async move { done.wait().await }
			});
			assert!(!done.is_done());
			assert!(done.close());
			assert!(!done.close());
			assert!(done.is_done());
			tokio::time::timeout(Duration::from_millis(200), waiting)
				.await
				.unwrap()
				.unwrap();
			// Already fired
			done.wait().await;
		});
	}
}
