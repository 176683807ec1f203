//-
// Copyright (c) 2026, the Mailcache authors
//
// This file is part of Mailcache.
//
// Mailcache is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcache is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcache. If not, see <http://www.gnu.org/licenses/>.

//! Time-boxed, concurrency-safe caches for a multi-tenant mail server.
//!
//! * `cache::json_message_cache` keeps rendered messages per user, folder and
//!   mail id, each level with its own time to live.
//! * `cache::single_slot` and `cache::managed` keep live mail-server
//!   connections for reuse.
//! * `cache::session_cache` keeps arbitrary values for one session.
//!
//! `service::CacheService` owns all of them.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod cache;
pub mod service;
pub mod support;

pub use crate::service::CacheService;
pub use crate::support::error::Error;

const LOG_PATTERN: &str = "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}";

/// Initialise logging from `logging.toml` under `root` if it exists, else
/// log to stderr.
pub fn init_log(root: &Path) -> Result<(), Error> {
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        init_log_from_file(&log_config_file)
    } else {
        init_simple_log()
    }
}

/// Initialise logging from a log4rs configuration file.
pub fn init_log_from_file(path: &Path) -> Result<(), Error> {
    log4rs::init_file(path, log4rs::config::Deserializers::new()).map_err(
        |e| {
            Error::Config(format!(
                "Failed to initialise logging from '{}': {}",
                path.display(),
                e
            ))
        },
    )
}

/// Log everything at `INFO` and above to stderr.
pub fn init_simple_log() -> Result<(), Error> {
    init_console_log(LevelFilter::Info)
}

fn init_console_log(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Config(e.to_string()))?;

    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        // Another test harness may have installed a logger already.
        let _ = init_console_log(LevelFilter::Debug);
    })
}
