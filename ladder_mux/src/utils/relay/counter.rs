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

use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};

/// Shared traffic counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
	#[inline]
	#[must_use]
	pub fn new(v: u64) -> Self {
		Self(Arc::new(AtomicU64::new(v)))
	}

	#[inline]
	#[must_use]
	pub fn get(&self) -> u64 {
		self.0.load(Ordering::Relaxed)
	}

	#[inline]
	pub fn add(&self, v: u64) {
		self.0.fetch_add(v, Ordering::Relaxed);
	}
}

/// Set by copiers on every transfer and reset by the inactivity guard.
#[derive(Clone, Default)]
pub(super) struct ActivityFlag(Arc<AtomicBool>);

impl ActivityFlag {
	#[inline]
	pub fn mark(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	/// Returns whether there was any activity since the last call.
	#[inline]
	pub fn take(&self) -> bool {
		self.0.swap(false, Ordering::Relaxed)
	}
}
