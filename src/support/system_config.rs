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

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::error::Error;

/// The cache configuration.
///
/// This is stored in a TOML file, conventionally `mailcache.toml` next to
/// the rest of the server configuration.
///
/// Every individual setting is optional. A setting with a value that cannot
/// be understood is logged and treated as absent, so a typo in one setting
/// degrades to the default instead of preventing startup. Only a file which
/// cannot be read or is not TOML at all is an error.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub json_message_cache: JsonMessageCacheConfig,

    #[serde(default)]
    pub mail_access: MailAccessConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JsonMessageCacheConfig {
    /// Whether the rendered-message cache exists at all.
    ///
    /// Defaults to true.
    #[serde(deserialize_with = "lenient::flag")]
    pub enabled: Option<bool>,

    /// How long a user's folder map lives, in seconds. Default 300.
    #[serde(deserialize_with = "lenient::number")]
    pub user_ttl_secs: Option<u64>,
    /// How often expired users are swept, in seconds. Default 60.
    #[serde(deserialize_with = "lenient::number")]
    pub user_sweep_secs: Option<u64>,

    /// How long a folder's messages live, in seconds. Default 300.
    #[serde(deserialize_with = "lenient::number")]
    pub folder_ttl_secs: Option<u64>,
    /// How often each user's expired folders are swept, in seconds. Default
    /// 60.
    #[serde(deserialize_with = "lenient::number")]
    pub folder_sweep_secs: Option<u64>,

    /// How long a reader waits for a message some other thread is rendering
    /// before rendering it itself, in milliseconds. Default 100.
    #[serde(deserialize_with = "lenient::number")]
    pub max_wait_millis: Option<u64>,

    /// If true, only unseen messages are prefetched. Default false.
    #[serde(deserialize_with = "lenient::flag")]
    pub prefetch_unseen_only: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MailAccessConfig {
    /// How long an idle connection stays pooled, in seconds, unless the
    /// connection specifies its own. Default 7.
    #[serde(deserialize_with = "lenient::number")]
    pub idle_secs: Option<u64>,

    /// How often expired connections are closed, in seconds. Default 3.
    #[serde(deserialize_with = "lenient::number")]
    pub sweep_secs: Option<u64>,

    /// The most connections pooled per user and account. 0 means unbounded.
    /// Default 0.
    #[serde(deserialize_with = "lenient::number")]
    pub max_per_key: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// If true, cleanup after a session ends runs on a background thread
    /// instead of in the caller. Default true.
    #[serde(deserialize_with = "lenient::flag")]
    pub background_cleanup: Option<bool>,
}

impl CacheConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }
}

impl JsonMessageCacheConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn user_ttl(&self) -> Duration {
        secs(self.user_ttl_secs, 300)
    }

    pub fn user_sweep_interval(&self) -> Duration {
        secs(self.user_sweep_secs, 60)
    }

    pub fn folder_ttl(&self) -> Duration {
        secs(self.folder_ttl_secs, 300)
    }

    pub fn folder_sweep_interval(&self) -> Duration {
        secs(self.folder_sweep_secs, 60)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_millis.unwrap_or(100))
    }

    pub fn prefetch_unseen_only(&self) -> bool {
        self.prefetch_unseen_only.unwrap_or(false)
    }
}

impl MailAccessConfig {
    pub fn idle_time(&self) -> Duration {
        secs(self.idle_secs, 7)
    }

    pub fn sweep_interval(&self) -> Duration {
        secs(self.sweep_secs, 3)
    }

    pub fn max_per_key(&self) -> Option<usize> {
        match self.max_per_key.unwrap_or(0) {
            0 => None,
            n => Some(n as usize),
        }
    }
}

impl ServiceConfig {
    pub fn background_cleanup(&self) -> bool {
        self.background_cleanup.unwrap_or(true)
    }
}

/// The longest TTL or interval accepted, one year.
const MAX_SECS: u64 = 365 * 86400;

// A TTL or interval of zero would mean "expire immediately" or "sweep
// continuously", neither of which is ever intended, so zero falls back to the
// default too. Anything longer than `MAX_SECS` is clamped so deadlines stay
// representable.
fn secs(configured: Option<u64>, default: u64) -> Duration {
    match configured {
        Some(0) => {
            warn!("Ignoring zero duration setting; using {}s", default);
            Duration::from_secs(default)
        },
        Some(n) if n > MAX_SECS => {
            warn!("Duration setting {}s is too long; using {}s", n, MAX_SECS);
            Duration::from_secs(MAX_SECS)
        },
        Some(n) => Duration::from_secs(n),
        None => Duration::from_secs(default),
    }
}

/// Deserialisers which accept anything and turn what they can't understand
/// into `None` with a warning.
mod lenient {
    use log::warn;
    use serde::{Deserialize, Deserializer};

    pub fn number<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<u64>, D::Error> {
        Ok(match toml::Value::deserialize(de)? {
            toml::Value::Integer(n) if n >= 0 => Some(n as u64),
            toml::Value::String(ref s) => match s.trim().parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!("Ignoring unparseable number {:?}; using default", s);
                    None
                },
            },
            other => {
                warn!("Ignoring invalid number {}; using default", other);
                None
            },
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<bool>, D::Error> {
        Ok(match toml::Value::deserialize(de)? {
            toml::Value::Boolean(b) => Some(b),
            toml::Value::String(ref s) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" => Some(true),
                    "false" | "no" | "off" => Some(false),
                    _ => {
                        warn!("Ignoring unparseable flag {:?}; using default", s);
                        None
                    },
                }
            },
            other => {
                warn!("Ignoring invalid flag {}; using default", other);
                None
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CacheConfig::parse("").unwrap();
        assert!(config.json_message_cache.enabled());
        assert_eq!(
            Duration::from_secs(300),
            config.json_message_cache.user_ttl()
        );
        assert_eq!(
            Duration::from_millis(100),
            config.json_message_cache.max_wait()
        );
        assert_eq!(Duration::from_secs(7), config.mail_access.idle_time());
        assert_eq!(None, config.mail_access.max_per_key());
        assert!(config.service.background_cleanup());
    }

    #[test]
    fn explicit_values_are_used() {
        let config = CacheConfig::parse(
            r#"
[json_message_cache]
enabled = false
folder_ttl_secs = 30
max_wait_millis = "250"
prefetch_unseen_only = "yes"

[mail_access]
idle_secs = 12
max_per_key = 4
"#,
        )
        .unwrap();

        assert!(!config.json_message_cache.enabled());
        assert_eq!(
            Duration::from_secs(30),
            config.json_message_cache.folder_ttl()
        );
        assert_eq!(
            Duration::from_millis(250),
            config.json_message_cache.max_wait()
        );
        assert!(config.json_message_cache.prefetch_unseen_only());
        assert_eq!(Duration::from_secs(12), config.mail_access.idle_time());
        assert_eq!(Some(4), config.mail_access.max_per_key());
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        crate::init_test_log();

        let config = CacheConfig::parse(
            r#"
[json_message_cache]
enabled = "sometimes"
user_ttl_secs = "five minutes"
user_sweep_secs = -3
folder_sweep_secs = 0
max_wait_millis = [1, 2]

[mail_access]
sweep_secs = 2.5
"#,
        )
        .unwrap();

        let json = &config.json_message_cache;
        assert!(json.enabled());
        assert_eq!(Duration::from_secs(300), json.user_ttl());
        assert_eq!(Duration::from_secs(60), json.user_sweep_interval());
        assert_eq!(Duration::from_secs(60), json.folder_sweep_interval());
        assert_eq!(Duration::from_millis(100), json.max_wait());
        assert_eq!(
            Duration::from_secs(3),
            config.mail_access.sweep_interval()
        );
    }

    #[test]
    fn huge_durations_are_clamped() {
        crate::init_test_log();

        let config = CacheConfig::parse(
            r#"
[json_message_cache]
user_ttl_secs = 9223372036854775807
folder_sweep_secs = "18446744073709551615"

[mail_access]
idle_secs = 9223372036854775807
sweep_secs = 31536000
"#,
        )
        .unwrap();

        let one_year = Duration::from_secs(365 * 86400);
        assert_eq!(one_year, config.json_message_cache.user_ttl());
        assert_eq!(
            one_year,
            config.json_message_cache.folder_sweep_interval()
        );
        assert_eq!(one_year, config.mail_access.idle_time());
        assert_eq!(one_year, config.mail_access.sweep_interval());
    }

    #[test]
    fn broken_toml_is_an_error() {
        assert!(matches!(
            CacheConfig::parse("[json_message_cache\nenabled = true"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            CacheConfig::load(Path::new("/nonexistent/mailcache.toml")),
            Err(Error::Io(_))
        ));
    }
}
