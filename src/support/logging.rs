//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Rcconf.
//
// Rcconf is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Rcconf is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Rcconf. If not, see <http://www.gnu.org/licenses/>.

//! Logger initialisation.
//!
//! `--syslog` selects syslog. Otherwise, interactive runs log to standard
//! error, and other runs use the log4rs configuration named by the manifest
//! if there is one, falling back to standard error.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use super::error::Error;

/// Log to standard error, at debug level if `verbose`.
pub fn init_console(verbose: bool) -> Result<(), Error> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Logging(e.to_string()))?;

    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Log through the log4rs configuration in `path`.
pub fn init_file(path: &Path) -> Result<(), Error> {
    log4rs::init_file(path, log4rs::file::Deserializers::new())
        .map_err(|e| Error::Logging(format!("{}: {}", path.display(), e)))
}

/// Log to the local syslog with facility `LOG_MAIL`.
pub fn init_syslog(verbose: bool) -> Result<(), Error> {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_MAIL,
        hostname: None,
        process: env!("CARGO_PKG_NAME").to_owned(),
        pid: nix::unistd::getpid().as_raw(),
    };

    let logger = syslog::unix(formatter)
        .map_err(|e| Error::Logging(e.to_string()))?;
    log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
        .map(|_| {
            log::set_max_level(if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            })
        })
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Pick and initialise a logger.
///
/// `--syslog` always wins. A terminal on standard error gets the console
/// logger; otherwise a log4rs configuration from the manifest is used if
/// there is one, and the console if not.
pub fn init(
    syslog: bool,
    verbose: bool,
    log_config: Option<&Path>,
) -> Result<(), Error> {
    if syslog {
        return init_syslog(verbose);
    }

    if Ok(true) == nix::unistd::isatty(2) {
        return init_console(verbose);
    }

    match log_config {
        Some(path) if path.is_file() => init_file(path),
        _ => init_console(verbose),
    }
}
