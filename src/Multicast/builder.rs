use std::time::Duration;

use super::Channel;
use crate::error::{ChannelError, Result};
use crate::Core::bitmap::BITMAP_WIDTH;
use crate::Core::checksum::ChecksumMode;

/// Default number of slots per channel.
pub const DEFAULT_CHANNEL_SIZE: u32 = 10;
/// Default maximum payload size in bytes.
pub const DEFAULT_MAX_MSG_SIZE: u32 = 1024;
/// Default writer timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub const ENV_CHANNEL_SIZE: &str = "KZIMP_CHANNEL_SIZE";
pub const ENV_MAX_MSG_SIZE: &str = "KZIMP_MAX_MSG_SIZE";
pub const ENV_TIMEOUT_MS: &str = "KZIMP_TIMEOUT_MS";
pub const ENV_COMPUTE_CHECKSUM: &str = "KZIMP_COMPUTE_CHECKSUM";

/// Geometry and policy of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Identifier used in logs and stats.
    pub channel_id: u32,
    /// Number of slots in the ring.
    pub capacity: u32,
    /// Upper bound on payload bytes per message.
    pub max_msg_size: u32,
    /// How long the writer waits on a slot before evicting its readers.
    pub timeout: Duration,
    /// What the per-message checksum covers.
    pub checksum_mode: ChecksumMode,
    /// Reader bits handed out, at most [`BITMAP_WIDTH`].
    pub max_readers: u32,
    /// Back the ring with `/dev/shm/<name>` instead of an anonymous mapping.
    pub shm_name: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_id: 0,
            capacity: DEFAULT_CHANNEL_SIZE,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            checksum_mode: ChecksumMode::HeaderAndPayload,
            max_readers: BITMAP_WIDTH,
            shm_name: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(
        capacity: u32,
        max_msg_size: u32,
        timeout: Duration,
        checksum_mode: ChecksumMode,
    ) -> Self {
        Self {
            capacity,
            max_msg_size,
            timeout,
            checksum_mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ChannelError::InvalidConfig(
                "capacity must be greater than zero".into(),
            ));
        }
        if self.max_msg_size == 0 {
            return Err(ChannelError::InvalidConfig(
                "max_msg_size must be greater than zero".into(),
            ));
        }
        if self.max_readers == 0 || self.max_readers > BITMAP_WIDTH {
            return Err(ChannelError::InvalidConfig(format!(
                "max_readers must be in 1..={}, got {}",
                BITMAP_WIDTH, self.max_readers
            )));
        }
        if u64::try_from(self.timeout.as_millis()).is_err() {
            return Err(ChannelError::InvalidConfig("timeout out of range".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Builder for [`Channel`], starting from the kzimp defaults.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuilder {
    config: ChannelConfig,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the defaults, overridden by `KZIMP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = ChannelConfig::default();
        if let Some(v) = env_number::<u32>(ENV_CHANNEL_SIZE)? {
            config.capacity = v;
        }
        if let Some(v) = env_number::<u32>(ENV_MAX_MSG_SIZE)? {
            config.max_msg_size = v;
        }
        if let Some(v) = env_number::<u64>(ENV_TIMEOUT_MS)? {
            config.timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_number::<u32>(ENV_COMPUTE_CHECKSUM)? {
            // kzimp treats any non-zero flag as "checksum on"; 1 and 2 pick the mode
            config.checksum_mode = match v {
                0 => ChecksumMode::None,
                1 => ChecksumMode::HeaderAndPayload,
                other => ChecksumMode::from_u32(other - 1)?,
            };
        }
        Ok(Self { config })
    }

    pub fn with_channel_id(mut self, channel_id: u32) -> Self {
        self.config.channel_id = channel_id;
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn with_max_msg_size(mut self, max_msg_size: u32) -> Self {
        self.config.max_msg_size = max_msg_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.config.checksum_mode = mode;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.config.max_readers = max_readers;
        self
    }

    pub fn with_shm_name(mut self, name: impl Into<String>) -> Self {
        self.config.shm_name = Some(name.into());
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn into_config(self) -> ChannelConfig {
        self.config
    }

    pub fn build(self) -> Result<Channel> {
        Channel::with_config(self.config)
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ChannelError::InvalidConfig(format!("{} is not a valid number: {:?}", key, raw))
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ChannelError::InvalidConfig(format!(
            "{} is not valid unicode",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_follow_module_parameters() {
        let c = ChannelConfig::default();
        assert_eq!(c.capacity, 10);
        assert_eq!(c.max_msg_size, 1024);
        assert_eq!(c.timeout_ms(), 5000);
        assert_eq!(c.checksum_mode, ChecksumMode::HeaderAndPayload);
        assert_eq!(c.max_readers, 64);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_zero_geometry() {
        let zero_cap = ChannelConfig::new(0, 16, Duration::from_millis(1), ChecksumMode::None);
        assert!(matches!(zero_cap.validate(), Err(ChannelError::InvalidConfig(_))));
        let zero_msg = ChannelConfig::new(4, 0, Duration::from_millis(1), ChecksumMode::None);
        assert!(matches!(zero_msg.validate(), Err(ChannelError::InvalidConfig(_))));
        let readers = ChannelBuilder::new().with_max_readers(65).into_config();
        assert!(readers.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides() {
        std::env::set_var(ENV_CHANNEL_SIZE, "32");
        std::env::set_var(ENV_TIMEOUT_MS, "250");
        std::env::set_var(ENV_COMPUTE_CHECKSUM, "0");
        let b = ChannelBuilder::from_env().unwrap();
        std::env::remove_var(ENV_CHANNEL_SIZE);
        std::env::remove_var(ENV_TIMEOUT_MS);
        std::env::remove_var(ENV_COMPUTE_CHECKSUM);

        assert_eq!(b.config().capacity, 32);
        assert_eq!(b.config().timeout, Duration::from_millis(250));
        assert_eq!(b.config().checksum_mode, ChecksumMode::None);
        assert_eq!(b.config().max_msg_size, DEFAULT_MAX_MSG_SIZE);
    }

    #[test]
    #[serial]
    fn env_rejects_garbage() {
        std::env::set_var(ENV_MAX_MSG_SIZE, "lots");
        let r = ChannelBuilder::from_env();
        std::env::remove_var(ENV_MAX_MSG_SIZE);
        assert!(matches!(r, Err(ChannelError::InvalidConfig(_))));
    }
}
