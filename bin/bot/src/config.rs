//! Centralized bot configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested sections (`TELEGRAM__TOKEN`, `SCHEDULER__UTC_OFFSET`).

use chrono::{FixedOffset, TimeDelta};
use pitchside_scheduler::TickCadence;
use serde::Deserialize;
use std::time::Duration;

/// Bot configuration.
#[derive(Debug, Deserialize)]
pub struct BotConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Telegram transport configuration.
    pub telegram: TelegramConfig,

    /// Tick driver configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Conversation lifetime configuration.
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather.
    pub token: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed delay between the end of one tick and the start of the next.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_startup_delay_seconds")]
    pub startup_delay_seconds: u64,

    /// Offset every local time is evaluated in, as `+HH:MM` or `-HH:MM`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Lifetime of a new conversation before it may be pruned.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// Interval between expired conversation cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_seconds() -> u64 {
    25
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_startup_delay_seconds() -> u64 {
    5
}

fn default_utc_offset() -> String {
    "+03:00".to_string()
}

fn default_ttl_hours() -> i64 {
    36
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            startup_delay_seconds: default_startup_delay_seconds(),
            utc_offset: default_utc_offset(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl SchedulerConfig {
    /// Parses the configured offset.
    pub fn offset(&self) -> Option<FixedOffset> {
        parse_offset(&self.utc_offset)
    }

    #[must_use]
    pub fn cadence(&self) -> TickCadence {
        TickCadence {
            interval: Duration::from_secs(self.interval_seconds),
            startup_delay: Duration::from_secs(self.startup_delay_seconds),
        }
    }
}

impl ConversationConfig {
    /// The configured lifetime, if it is positive and representable.
    pub fn ttl(&self) -> Option<TimeDelta> {
        TimeDelta::try_hours(self.ttl_hours).filter(|ttl| *ttl > TimeDelta::zero())
    }
}

impl BotConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Parses `+HH:MM`, `-HH:MM` or `Z`.
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_has_correct_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval_seconds, 30);
        assert_eq!(config.startup_delay_seconds, 5);
        assert_eq!(config.offset(), FixedOffset::east_opt(3 * 3600));
    }

    #[test]
    fn conversation_config_has_correct_defaults() {
        let config = ConversationConfig::default();
        assert_eq!(config.ttl(), Some(TimeDelta::hours(36)));
        assert_eq!(config.cleanup_interval_seconds, 300);
    }

    #[test]
    fn out_of_range_ttl_is_rejected() {
        let huge = ConversationConfig {
            ttl_hours: i64::MAX,
            ..ConversationConfig::default()
        };
        assert_eq!(huge.ttl(), None);

        let zero = ConversationConfig {
            ttl_hours: 0,
            ..ConversationConfig::default()
        };
        assert_eq!(zero.ttl(), None);
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("-05:30"), FixedOffset::west_opt(5 * 3600 + 1800));
        assert_eq!(parse_offset("+3"), FixedOffset::east_opt(3 * 3600));
        assert_eq!(parse_offset("03:00"), None);
        assert_eq!(parse_offset("+25:00"), None);
        assert_eq!(parse_offset(""), None);
    }
}
