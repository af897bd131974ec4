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

use super::Network;
use crate::{prelude::*, transport::Link};
use std::fmt::{self, Display};

/// Where a proxied connection should go.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
	pub network: Network,
	pub addr: SocksAddr,
}

impl Destination {
	#[inline]
	#[must_use]
	pub fn new(network: Network, addr: SocksAddr) -> Self {
		Self { network, addr }
	}

	#[inline]
	#[must_use]
	pub fn tcp(addr: impl Into<SocksAddr>) -> Self {
		Self::new(Network::Tcp, addr.into())
	}

	#[inline]
	#[must_use]
	pub fn udp(addr: impl Into<SocksAddr>) -> Self {
		Self::new(Network::Udp, addr.into())
	}
}

impl Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.network, self.addr)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
	#[error("{0} is not allowed")]
	NotAllowed(Destination),
	#[error("network {0} not supported")]
	UnsupportedNetwork(Network),
	#[error("dispatch error ({0})")]
	Other(BoxStdErr),
}

/// Opens links to destinations.
///
/// This is what a mux server hands decoded sessions to.
#[async_trait]
pub trait Dispatcher: Send + Sync {
	/// Returns a link connected to `dst`.
	///
	/// Data written into the link's writer goes to `dst`, and responses
	/// can be read from the link's reader.
	/// Implementations must return as soon as the link is created
	/// and drive the outbound connection in the background.
	///
	/// # Errors
	///
	/// Returns a [`DispatchError`] if `dst` cannot be handled at all.
	async fn dispatch(&self, dst: &Destination) -> Result<Link, DispatchError>;
}
