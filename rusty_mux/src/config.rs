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

use crate::BoxStdErr;
use fern::colors::{Color, ColoredLevelConfig};
use ladder_mux::{mux::ClientStrategy, Network, SocksAddr};
use log::{Level, LevelFilter};
use serde::Deserialize;
use std::{borrow::Cow, net::SocketAddr, str::FromStr, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
	Toml,
	Json,
}

impl FromStr for Format {
	type Err = Cow<'static, str>;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut s = s.to_string();
		s.make_ascii_lowercase();
		Ok(match s.as_str() {
			"toml" => Self::Toml,
			"json" => Self::Json,
			_ => return Err("must be either 'toml' or 'json'".into()),
		})
	}
}

impl Default for Format {
	fn default() -> Self {
		Format::Toml
	}
}

// ------------------- Logging -------------------
const STR_STDOUT: &str = "@stdout";
const STR_STDERR: &str = "@stderr";
const STR_NONE: &str = "@none";

#[derive(Debug, PartialEq, Eq)]
pub enum LogOutput {
	Stdout,
	Stderr,
	File(String),
}

impl LogOutput {
	pub fn is_colorful(&self) -> bool {
		matches!(self, Self::Stdout | Self::Stderr)
	}

	/// Returns `None` if logging is disabled.
	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			STR_NONE => None,
			STR_STDOUT | "" => Some(LogOutput::Stdout),
			STR_STDERR => Some(LogOutput::Stderr),
			_ => Some(LogOutput::File(s.to_string())),
		}
	}
}

fn deserialize_output<'de, D>(deserializer: D) -> Result<Option<LogOutput>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s = <Cow<'de, str> as Deserialize<'de>>::deserialize(deserializer)?;
	Ok(LogOutput::from_str(&s))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
	#[serde(default = "default_log_level")]
	pub level: LevelFilter,
	#[serde(
		default = "default_output",
		deserialize_with = "deserialize_output",
		rename = "output"
	)]
	pub output: Option<LogOutput>,
}

impl Log {
	/// Initialize logger.
	///
	/// DO NOT call this function more than once!
	pub fn init_logger(&self) -> Result<(), BoxStdErr> {
		let output = match &self.output {
			Some(output) => output,
			// Logging disabled.
			None => return Ok(()),
		};
		let time_format =
			time::format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]Z")?;
		let is_colorful = output.is_colorful();
		let colors = ColoredLevelConfig::new()
			.info(Color::Blue)
			.trace(Color::Magenta);
		let levels: [String; 5] = {
			let all = [
				Level::Error,
				Level::Warn,
				Level::Info,
				Level::Debug,
				Level::Trace,
			];
			all.map(|level| {
				if is_colorful {
					colors.color(level).to_string()
				} else {
					level.to_string()
				}
			})
		};
		let dispatch = fern::Dispatch::new()
			.level(self.level)
			.format(move |out, message, record| {
				let time = time::OffsetDateTime::now_utc()
					.format(&time_format)
					.unwrap_or_default();
				let level = levels[record.level() as usize - 1].as_str();
				let target = record.target();
				out.finish(format_args!("[{time} {level} {target}] {message}"));
			});
		match output {
			LogOutput::Stdout => dispatch.chain(std::io::stdout()),
			LogOutput::Stderr => dispatch.chain(std::io::stderr()),
			LogOutput::File(f) => dispatch.chain(fern::log_file(f)?),
		}
		.apply()?;
		Ok(())
	}
}

impl Default for Log {
	fn default() -> Self {
		Log {
			level: default_log_level(),
			output: default_output(),
		}
	}
}

fn default_log_level() -> LevelFilter {
	LevelFilter::Info
}

#[allow(clippy::unnecessary_wraps)]
fn default_output() -> Option<LogOutput> {
	Some(LogOutput::Stdout)
}

// ------------------- Client -------------------

/// Tunnels every local connection to `target` through the mux server.
///
/// Unknown fields are not rejected because of the flattened strategy.
#[derive(Deserialize)]
pub struct Client {
	pub listen: Vec<SocketAddr>,
	/// Address of the mux server.
	pub server: SocksAddr,
	pub target: SocksAddr,
	#[serde(default)]
	pub network: Network,
	#[serde(flatten)]
	pub strategy: ClientStrategy,
	#[serde(default = "default_idle_check_secs")]
	pub idle_check_secs: u64,
}

impl Client {
	pub fn idle_check(&self) -> Duration {
		Duration::from_secs(self.idle_check_secs)
	}
}

fn default_idle_check_secs() -> u64 {
	16
}

// ------------------- Server -------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Server {
	pub listen: Vec<SocketAddr>,
	#[serde(default = "default_dial_timeout_secs")]
	pub dial_timeout_secs: u64,
}

impl Server {
	pub fn dial_timeout(&self) -> Duration {
		Duration::from_secs(self.dial_timeout_secs)
	}
}

fn default_dial_timeout_secs() -> u64 {
	10
}

// ------------------- Config -------------------
#[derive(Deserialize)]
pub struct Config {
	#[serde(default)]
	pub log: Log,
	#[serde(default)]
	pub client: Option<Client>,
	#[serde(default)]
	pub server: Option<Server>,
}

impl Config {
	pub fn from_str(s: &str, format: Format) -> Result<Self, BoxStdErr> {
		let conf: Config = match format {
			Format::Toml => toml::from_str(s)?,
			Format::Json => serde_json::from_str(s)?,
		};
		conf.check()?;
		Ok(conf)
	}

	fn check(&self) -> Result<(), BoxStdErr> {
		if self.client.is_none() && self.server.is_none() {
			return Err("at least one of 'client' and 'server' is required".into());
		}
		if let Some(client) = &self.client {
			if client.listen.is_empty() {
				return Err("'client.listen' cannot be empty".into());
			}
			if client.idle_check_secs == 0 {
				return Err("'client.idle_check_secs' must be positive".into());
			}
		}
		if let Some(server) = &self.server {
			if server.listen.is_empty() {
				return Err("'server.listen' cannot be empty".into());
			}
		}
		Ok(())
	}
}
