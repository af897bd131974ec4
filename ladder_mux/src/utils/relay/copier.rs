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

use super::counter::{ActivityFlag, Counter};
use crate::prelude::*;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Copies bytes from `r` to `w` until EOF, then shuts `w` down.
pub(super) struct Copier<R, W> {
	pub r: R,
	pub w: W,
	pub count: Counter,
	pub tag: Arc<str>,
	pub activity: ActivityFlag,
}

impl<R, W> Copier<R, W>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	pub async fn run(mut self) -> io::Result<()> {
		loop {
			let data = self.r.fill_buf().await?;
			self.activity.mark();
			if data.is_empty() {
				trace!("{} EOF, shutting down writer", self.tag);
				return self.w.shutdown().await;
			}
			let len = data.len();
			self.w.write_all(data).await?;
			self.r.consume(len);
			self.count.add(len as u64);
			self.activity.mark();
		}
	}
}
