//! Validated, builder-constructed shard configuration.

use crate::{
    error::{ConfigError, ConfigErrorType},
    intents::Intents,
    presence::Presence,
};
use std::sync::Arc;

/// `properties` field sent in an IDENTIFY payload.
#[derive(Debug, Clone)]
pub struct IdentifyProperties {
    /// Operating system the client is running on.
    pub os: String,
    /// Library/browser name identifying this client.
    pub browser: String,
    /// Device name identifying this client.
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "gateway-core".to_owned(),
            device: "gateway-core".to_owned(),
        }
    }
}

/// Validated shard configuration consumed by [`Connection`]/[`Supervisor`].
///
/// [`Connection`]: crate::connection::Connection
/// [`Supervisor`]: crate::supervisor::Supervisor
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) token: String,
    pub(crate) shard: [u64; 2],
    pub(crate) intents: Intents,
    pub(crate) large_threshold: u64,
    pub(crate) identify_properties: IdentifyProperties,
    pub(crate) presence: Arc<std::sync::Mutex<Presence>>,
    pub(crate) gateway_url: String,
    pub(crate) compression: bool,
    pub(crate) api_version: u8,
}

impl Config {
    /// Start building a configuration for the given bot token and gateway
    /// URL. The URL must be the bare `wss://...` gateway endpoint; this
    /// crate appends the `v`/`encoding`/`compress` query parameters itself.
    #[must_use]
    pub fn builder(token: impl Into<String>, gateway_url: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(token.into(), gateway_url.into())
    }

    /// The shard's `(id, count)` pair.
    #[must_use]
    pub const fn shard(&self) -> [u64; 2] {
        self.shard
    }

    /// Intents requested at IDENTIFY time.
    #[must_use]
    pub const fn intents(&self) -> Intents {
        self.intents
    }

    /// Discord API version this connection negotiates.
    #[must_use]
    pub const fn api_version(&self) -> u8 {
        self.api_version
    }
}

/// Lower bound of the accepted `large_threshold` range.
const LARGE_THRESHOLD_MIN: u64 = 50;
/// Upper bound of the accepted `large_threshold` range.
const LARGE_THRESHOLD_MAX: u64 = 250;
/// Default Discord gateway API version this crate negotiates.
const DEFAULT_API_VERSION: u8 = 10;

/// Builder for [`Config`], validating eagerly rather than panicking.
#[derive(Debug)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    fn new(token: String, gateway_url: String) -> Self {
        Self(Config {
            token,
            shard: [0, 1],
            intents: Intents::empty(),
            large_threshold: 50,
            identify_properties: IdentifyProperties::default(),
            presence: Arc::new(std::sync::Mutex::new(Presence::default())),
            gateway_url,
            compression: cfg!(feature = "compression"),
            api_version: DEFAULT_API_VERSION,
        })
    }

    /// Consume the builder, returning the validated configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.0
    }

    /// Set the shard's `(id, count)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorType::ShardId`] if `shard_id >= shard_count`.
    pub fn shard(mut self, shard_id: u64, shard_count: u64) -> Result<Self, ConfigError> {
        if shard_id >= shard_count {
            return Err(ConfigError {
                kind: ConfigErrorType::ShardId {
                    id: shard_id,
                    total: shard_count,
                },
            });
        }
        self.0.shard = [shard_id, shard_count];
        Ok(self)
    }

    /// Set the intents requested at IDENTIFY time.
    #[must_use]
    pub const fn intents(mut self, intents: Intents) -> Self {
        self.0.intents = intents;
        self
    }

    /// Set the member-count threshold above which a guild is considered
    /// "large" and its members are not sent in GUILD_CREATE.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigErrorType::LargeThreshold`] if `threshold` is outside
    /// `50..=250`.
    pub fn large_threshold(mut self, threshold: u64) -> Result<Self, ConfigError> {
        if !(LARGE_THRESHOLD_MIN..=LARGE_THRESHOLD_MAX).contains(&threshold) {
            return Err(ConfigError {
                kind: ConfigErrorType::LargeThreshold { value: threshold },
            });
        }
        self.0.large_threshold = threshold;
        Ok(self)
    }

    /// Override the `properties` object sent with IDENTIFY.
    #[must_use]
    pub fn identify_properties(mut self, properties: IdentifyProperties) -> Self {
        self.0.identify_properties = properties;
        self
    }

    /// Set the presence sent with the initial IDENTIFY.
    #[must_use]
    pub fn presence(self, presence: Presence) -> Self {
        if let Ok(mut guard) = self.0.presence.lock() {
            *guard = presence;
        }
        self
    }

    /// Toggle zlib-stream compression of inbound payloads.
    #[must_use]
    pub const fn compression(mut self, enabled: bool) -> Self {
        self.0.compression = enabled;
        self
    }

    /// Override the Discord API version to negotiate (default 10).
    #[must_use]
    pub const fn api_version(mut self, version: u8) -> Self {
        self.0.api_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Config: Clone, Send, Sync);
    assert_impl_all!(ConfigBuilder: Send, Sync);

    #[test]
    fn shard_id_must_be_less_than_count() {
        let err = Config::builder("token", "wss://gateway.discord.gg")
            .shard(1, 1)
            .unwrap_err();
        assert!(matches!(err.kind(), ConfigErrorType::ShardId { id: 1, total: 1 }));
    }

    #[test]
    fn large_threshold_out_of_range_errors() {
        assert!(Config::builder("token", "wss://gateway.discord.gg")
            .large_threshold(49)
            .is_err());
        assert!(Config::builder("token", "wss://gateway.discord.gg")
            .large_threshold(251)
            .is_err());
        assert!(Config::builder("token", "wss://gateway.discord.gg")
            .large_threshold(250)
            .is_ok());
    }

    #[test]
    fn builder_defaults_are_sane() {
        let config = Config::builder("token", "wss://gateway.discord.gg").build();
        assert_eq!(config.shard(), [0, 1]);
        assert_eq!(config.api_version(), 10);
    }
}
