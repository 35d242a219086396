//! Client and server configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional JSON file named by `CONFIG_FILE`, then environment variables
//! (a `.env` file in the working directory is loaded first).

use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::bet::LOTTERY_WINNER_NUMBER;
use crate::error::{LotteryError, Result};
use crate::protocol::{BATCH_OVERHEAD, DEFAULT_MAX_FRAME_LENGTH, HEADER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub agency_id: u32,
    pub server_address: String,
    /// Ceiling for a batch frame, header included.
    pub batch_max_bytes: usize,
    pub sender_count: usize,
    pub channel_capacity: usize,
    pub dataset_path: Option<PathBuf>,
    pub winners: WinnersConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WinnersConfig {
    pub max_attempts: u32,
    pub response_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub expected_agencies: usize,
    pub winning_number: u32,
    pub max_frame_length: u32,
    pub rendezvous_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            agency_id: 0,
            server_address: "127.0.0.1:12345".to_string(),
            batch_max_bytes: 8 * 1024,
            sender_count: 1,
            channel_capacity: 64,
            dataset_path: None,
            winners: WinnersConfig::default(),
        }
    }
}

impl Default for WinnersConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            response_timeout_ms: 1_000,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:12345".to_string(),
            expected_agencies: 5,
            winning_number: LOTTERY_WINNER_NUMBER,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            rendezvous_timeout_ms: 60_000,
        }
    }
}

impl ClientConfig {
    /// Load defaults, `CONFIG_FILE`, then environment overrides.
    pub fn load() -> Result<Self> {
        load_layered()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply `KEY=value` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "AGENCY_ID", &mut self.agency_id)?;
        override_from(&lookup, "SERVER_ADDRESS", &mut self.server_address)?;
        override_from(&lookup, "BATCH_MAX_BYTES", &mut self.batch_max_bytes)?;
        override_from(&lookup, "SENDER_COUNT", &mut self.sender_count)?;
        override_from(&lookup, "CHANNEL_CAPACITY", &mut self.channel_capacity)?;
        if let Some(path) = lookup("DATASET_PATH") {
            self.dataset_path = Some(PathBuf::from(path));
        }

        let winners = &mut self.winners;
        override_from(&lookup, "WINNERS_MAX_ATTEMPTS", &mut winners.max_attempts)?;
        override_from(&lookup, "WINNERS_TIMEOUT_MS", &mut winners.response_timeout_ms)?;
        override_from(&lookup, "WINNERS_BACKOFF_MS", &mut winners.initial_backoff_ms)?;
        override_from(&lookup, "WINNERS_MAX_BACKOFF_MS", &mut winners.max_backoff_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.agency_id == 0 {
            return Err(LotteryError::Config("AGENCY_ID must be set".into()));
        }
        if self.server_address.is_empty() {
            return Err(LotteryError::Config("SERVER_ADDRESS must be set".into()));
        }
        if self.batch_max_bytes <= BATCH_OVERHEAD {
            return Err(LotteryError::Config(format!(
                "BATCH_MAX_BYTES must exceed the {}-byte batch overhead",
                BATCH_OVERHEAD
            )));
        }
        if self.sender_count == 0 {
            return Err(LotteryError::Config("SENDER_COUNT must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(LotteryError::Config(
                "CHANNEL_CAPACITY must be at least 1".into(),
            ));
        }
        self.winners.validate()
    }
}

impl WinnersConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(LotteryError::Config(
                "WINNERS_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(LotteryError::Config(
                "WINNERS_TIMEOUT_MS must be positive".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(LotteryError::Config(
                "WINNERS_MAX_BACKOFF_MS must not be below WINNERS_BACKOFF_MS".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[inline]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[inline]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl ServerConfig {
    /// Load defaults, `CONFIG_FILE`, then environment overrides.
    pub fn load() -> Result<Self> {
        load_layered()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "LISTEN_ADDRESS", &mut self.listen_address)?;
        override_from(&lookup, "EXPECTED_AGENCIES", &mut self.expected_agencies)?;
        override_from(&lookup, "WINNING_NUMBER", &mut self.winning_number)?;
        override_from(&lookup, "MAX_FRAME_LENGTH", &mut self.max_frame_length)?;
        override_from(&lookup, "RENDEZVOUS_TIMEOUT_MS", &mut self.rendezvous_timeout_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.expected_agencies == 0 {
            return Err(LotteryError::Config(
                "EXPECTED_AGENCIES must be at least 1".into(),
            ));
        }
        // Room for at least an acknowledgement frame.
        if (self.max_frame_length as usize) < HEADER_SIZE {
            return Err(LotteryError::Config(format!(
                "MAX_FRAME_LENGTH must be at least {}",
                HEADER_SIZE
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }
}

/// Shared loading path for both config types.
trait Layered: DeserializeOwned + Default {
    fn apply(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()>;
    fn check(&self) -> Result<()>;
}

impl Layered for ClientConfig {
    fn apply(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        self.apply_overrides(lookup)
    }

    fn check(&self) -> Result<()> {
        self.validate()
    }
}

impl Layered for ServerConfig {
    fn apply(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        self.apply_overrides(lookup)
    }

    fn check(&self) -> Result<()> {
        self.validate()
    }
}

fn load_layered<T: Layered>() -> Result<T> {
    dotenvy::dotenv().ok();

    let mut config = match env::var("CONFIG_FILE") {
        Ok(path) => from_file(Path::new(&path))?,
        Err(_) => T::default(),
    };
    config.apply(&|key| env::var(key).ok())?;
    config.check()?;
    Ok(config)
}

fn from_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        LotteryError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn override_from<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| LotteryError::Config(format!("{}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
