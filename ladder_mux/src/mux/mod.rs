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

//! Mux protocol: many sessions over one physical link.
//!
//! Every frame starts with a 2 bytes big endian metadata length followed by
//! the metadata:
//!
//! ```not_rust
//! +------------+--------+--------+---------------------------------------+
//! | session id | status | option | network | addr type | addr | port    |
//! +------------+--------+--------+---------------------------------------+
//! |     2      |   1    |   1    |   1     |    1      | var  |   2     |
//! +------------+--------+--------+---------------------------------------+
//!                                 \___________ only for New __________/
//! ```
//!
//! If the `Data` option is set, a 2 bytes length and that many payload
//! bytes follow the metadata.

mod client;
mod error;
mod frame;
mod picker;
mod reader;
mod server;
mod session;
mod writer;

pub use client::{
	ClientManager, ClientStrategy, ClientWorker, WorkerState, IDLE_CHECK_INTERVAL, MIN_CHECK_INTERVAL,
};
pub use error::Error;
pub use frame::{
	FrameMetadata, FrameOption, SessionStatus, TargetNetwork, MAX_CHUNK_SIZE, MAX_METADATA_LEN,
};
pub use picker::{
	ClientWorkerFactory, DialingWorkerFactory, IncrementalWorkerPicker, WorkerPicker,
	CLEANUP_INTERVAL,
};
pub use server::{is_mux_cool, MuxServer, ServerWorker, MUX_COOL_DOMAIN, MUX_COOL_PORT};
pub use session::{Session, SessionTable, TransferType};
pub use writer::{FrameWriter, LinkWriter};
