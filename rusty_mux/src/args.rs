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

use super::config::{Format, LogOutput};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rusty_mux")]
pub struct AppOptions {
	/// Set the format of the config file. Can be 'toml' (default) or 'json'.
	#[arg(short, long)]
	format: Option<Format>,

	/// Read config from file.
	#[arg(short, long, value_name = "FILE")]
	config: Option<String>,

	/// Print version.
	#[arg(long)]
	version: bool,

	/// Set the log level. Must be one of ["trace", "debug", "info", "warn", "error", "off"]
	#[arg(long, value_name = "LEVEL")]
	log: Option<log::LevelFilter>,

	/// Set the output for log. Can be a file, "@stdout", "@stderr" or "@none".
	#[arg(long, value_name = "FILE")]
	log_out: Option<String>,
}

impl AppOptions {
	pub fn new_from_args() -> Self {
		Self::parse()
	}

	pub fn into_action(self) -> Action {
		if self.version {
			return Action::CheckVersion;
		}

		let coms = ActionCommons {
			log: self.log,
			log_out: self.log_out.map(|s| LogOutput::from_str(&s)),
		};

		if let Some(path) = self.config {
			let path = PathBuf::from(path);
			let format = self.format.unwrap_or_else(|| {
				let mut format = Format::default();
				if let Some(ext) = path.extension() {
					if ext.eq_ignore_ascii_case("json") {
						format = Format::Json;
					}
				}
				format
			});
			return Action::Serve { coms, path, format };
		}

		Action::PrintHelp(Self::command().render_help().to_string())
	}
}

pub enum Action {
	CheckVersion,
	/// No config given.
	PrintHelp(String),
	Serve {
		coms: ActionCommons,
		path: PathBuf,
		format: Format,
	},
}

pub struct ActionCommons {
	pub log: Option<log::LevelFilter>,
	/// `Some(None)` disables logging.
	pub log_out: Option<Option<LogOutput>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn action_of(args: &[&str]) -> Action {
		AppOptions::try_parse_from(args).unwrap().into_action()
	}

	#[test]
	fn test_format_from_extension() {
		match action_of(&["rusty_mux", "-c", "conf/server.json"]) {
			Action::Serve { format, .. } => assert_eq!(format, Format::Json),
			_ => panic!("expected serve action"),
		}
		match action_of(&["rusty_mux", "-c", "conf/server.conf"]) {
			Action::Serve { format, .. } => assert_eq!(format, Format::Toml),
			_ => panic!("expected serve action"),
		}
		match action_of(&["rusty_mux", "-c", "conf/server.json", "-f", "toml"]) {
			Action::Serve { format, .. } => assert_eq!(format, Format::Toml),
			_ => panic!("expected serve action"),
		}
	}

	#[test]
	fn test_log_overrides() {
		let action = action_of(&[
			"rusty_mux",
			"--config",
			"a.toml",
			"--log",
			"debug",
			"--log-out",
			"@none",
		]);
		match action {
			Action::Serve { coms, .. } => {
				assert_eq!(coms.log, Some(log::LevelFilter::Debug));
				assert_eq!(coms.log_out, Some(None));
			}
			_ => panic!("expected serve action"),
		}
	}

	#[test]
	fn test_no_config() {
		assert!(matches!(action_of(&["rusty_mux"]), Action::PrintHelp(_)));
		assert!(matches!(
			action_of(&["rusty_mux", "--version"]),
			Action::CheckVersion
		));
		assert!(AppOptions::try_parse_from(["rusty_mux", "-f", "yaml"]).is_err());
	}
}
