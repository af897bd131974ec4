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

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::default_trait_access)]

mod args;
mod config;
mod serve;

use args::{Action, ActionCommons, AppOptions};
use config::{Config, Format};
use std::{borrow::Cow, fs, io, path::Path};
use tokio::runtime::Runtime;

type BoxStdErr = Box<dyn std::error::Error + Send + Sync>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes from sysexits.h.
mod exit_code {
	pub const USAGE: i32 = 64;
	pub const SOFTWARE: i32 = 70;
	pub const IOERR: i32 = 74;
	pub const CONFIG: i32 = 78;
}

#[derive(Debug, thiserror::Error)]
enum Error {
	#[error("[IO error] {0}")]
	Io(#[from] io::Error),
	#[error("[input] {0}")]
	Input(Cow<'static, str>),
	#[error("[config] {0}")]
	Config(BoxStdErr),
	#[error("[runtime] {0}")]
	Runtime(BoxStdErr),
}

fn main() {
	let action = AppOptions::new_from_args().into_action();
	let res = match action {
		Action::CheckVersion => {
			println!("{}", VERSION);
			return;
		}
		Action::PrintHelp(help) => {
			println!("{}", help);
			Err(Error::Input("no config file given".into()))
		}
		Action::Serve { coms, path, format } => serve(coms, &path, format),
	};
	if let Err(err) = res {
		println!("Error happened during initialization:\n {}\n", err);
		std::process::exit(match err {
			Error::Io(_) => exit_code::IOERR,
			Error::Input(_) => exit_code::USAGE,
			Error::Config(_) => exit_code::CONFIG,
			Error::Runtime(_) => exit_code::SOFTWARE,
		});
	}
}

fn serve(coms: ActionCommons, path: &Path, format: Format) -> Result<(), Error> {
	let conf_str = fs::read_to_string(path).map_err(|e| {
		Error::Input(format!("cannot read config '{}': {}", path.display(), e).into())
	})?;
	let mut conf = Config::from_str(&conf_str, format).map_err(Error::Config)?;
	if let Some(level) = coms.log {
		conf.log.level = level;
	}
	if let Some(output) = coms.log_out {
		conf.log.output = output;
	}
	conf.log.init_logger().map_err(Error::Config)?;

	let rt = Runtime::new()?;
	rt.block_on(serve::serve(conf)).map_err(Error::Runtime)
}
