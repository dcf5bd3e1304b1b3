use std::path::Path;
use std::time::Duration;

use aws_sdk_kinesis::types::ShardIteratorType;
use serde::{Deserialize, Serialize};

use crate::consumer::StreamBinding;
use crate::error::ConfigError;

const MAX_SHARD_IDLE_WAIT: Duration = Duration::from_secs(60);

/// Connection string value meaning "use the ambient AWS configuration".
pub const USE_DEFAULT_CONNECTION: &str = "UseDefault";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerManifest {
    #[serde(default)]
    pub trigger: Vec<StreamTriggerConfig>,
}

impl TriggerManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadManifest {
            path: path.display().to_string(),
            source,
        })?;
        text.parse()
    }
}

impl std::str::FromStr for TriggerManifest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let manifest: TriggerManifest = toml::from_str(s)?;
        if manifest.trigger.is_empty() {
            return Err(ConfigError::NoTriggers);
        }
        for trigger in &manifest.trigger {
            if trigger.stream_name.trim().is_empty() {
                return Err(ConfigError::EmptyField("stream_name"));
            }
            if trigger.connection.trim().is_empty() {
                return Err(ConfigError::EmptyField("connection"));
            }
        }
        Ok(manifest)
    }
}

/// One `[[trigger]]` entry of the manifest.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamTriggerConfig {
    pub stream_name: String,
    pub connection: String,
    pub batch_size: Option<u16>,
    pub shard_idle_wait_millis: Option<u64>,
    pub detector_poll_millis: Option<u64>,
    pub shard_iterator_type: Option<String>,
}

impl StreamTriggerConfig {
    pub fn binding(&self) -> StreamBinding {
        StreamBinding::new(&self.stream_name, &self.connection)
    }

    pub fn batch_size(&self) -> u16 {
        self.batch_size.unwrap_or(100).clamp(1, 10_000)
    }

    /// Capped well below the five minute lifetime of a shard iterator.
    pub fn shard_idle_wait(&self) -> Duration {
        parse_milliseconds(self.shard_idle_wait_millis.unwrap_or(1000))
            .min(MAX_SHARD_IDLE_WAIT)
    }

    pub fn detector_poll(&self) -> Duration {
        parse_milliseconds(self.detector_poll_millis.unwrap_or(30_000))
    }

    pub fn shard_iterator_type(&self) -> ShardIteratorType {
        ShardIteratorType::from(self.shard_iterator_type.as_deref().unwrap_or("LATEST"))
    }
}

fn parse_milliseconds(milliseconds: u64) -> Duration {
    Duration::from_millis(milliseconds.clamp(100, 300_000))
}

/// Endpoint details resolved from a binding's connection setting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

impl ConnectionSettings {
    /// Reads the environment variable named by `setting` and parses it.
    pub fn from_env(setting: &str) -> Result<Self, ConfigError> {
        let value = std::env::var(setting)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSetting(setting.to_string()))?;
        Self::parse(setting, &value)
    }

    /// Parses `Key=Value;Key=Value`. Keys are case-insensitive.
    pub fn parse(setting: &str, value: &str) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedConnection {
            setting: setting.to_string(),
            reason,
        };

        let value = value.trim();
        if value == USE_DEFAULT_CONNECTION {
            return Ok(Self::default());
        }

        let mut settings = Self::default();
        for pair in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, val) = pair
                .split_once('=')
                .ok_or_else(|| malformed(format!("expected Key=Value, got {pair:?}")))?;
            let val = val.trim();
            if val.is_empty() {
                return Err(malformed(format!("{} has no value", key.trim())));
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => settings.endpoint_url = Some(val.to_string()),
                "region" => settings.region = Some(val.to_string()),
                other => return Err(malformed(format!("unknown key {other:?}"))),
            }
        }

        if settings == Self::default() {
            return Err(malformed("no recognised keys".into()));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [[trigger]]
        stream_name = "workitems"
        connection = "EventHubConnectionAppSetting"

        [[trigger]]
        stream_name = "orders"
        connection = "OrdersConnection"
        batch_size = 0
        shard_idle_wait_millis = 5
        detector_poll_millis = 1000000
        shard_iterator_type = "TRIM_HORIZON"
    "#;

    #[test]
    fn parses_manifest_with_defaults() {
        let manifest: TriggerManifest = MANIFEST.parse().unwrap();
        let workitems = &manifest.trigger[0];

        assert_eq!(
            workitems.binding(),
            StreamBinding::new("workitems", "EventHubConnectionAppSetting")
        );
        assert_eq!(workitems.batch_size(), 100);
        assert_eq!(workitems.shard_idle_wait(), Duration::from_millis(1000));
        assert_eq!(workitems.detector_poll(), Duration::from_millis(30_000));
        assert_eq!(workitems.shard_iterator_type(), ShardIteratorType::Latest);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let manifest: TriggerManifest = MANIFEST.parse().unwrap();
        let orders = &manifest.trigger[1];

        assert_eq!(orders.batch_size(), 1);
        assert_eq!(orders.shard_idle_wait(), Duration::from_millis(100));
        assert_eq!(orders.detector_poll(), Duration::from_millis(300_000));
        assert_eq!(orders.shard_iterator_type(), ShardIteratorType::TrimHorizon);
    }

    #[test]
    fn idle_wait_stays_under_iterator_lifetime() {
        let config = StreamTriggerConfig {
            stream_name: "workitems".into(),
            connection: "C".into(),
            shard_idle_wait_millis: Some(300_000),
            ..Default::default()
        };

        assert_eq!(config.shard_idle_wait(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = r#"
            [[trigger]]
            stream_name = "workitems"
            connection = "C"
            checkpoint_store = "blob"
        "#
        .parse::<TriggerManifest>()
        .unwrap_err();

        assert!(matches!(err, ConfigError::ParseManifest(_)));
    }

    #[test]
    fn rejects_empty_manifest_and_blank_fields() {
        assert!(matches!(
            "".parse::<TriggerManifest>(),
            Err(ConfigError::NoTriggers)
        ));
        assert!(matches!(
            "[[trigger]]\nstream_name = \" \"\nconnection = \"C\"".parse::<TriggerManifest>(),
            Err(ConfigError::EmptyField("stream_name"))
        ));
    }

    #[test]
    fn parses_connection_string() {
        let settings = ConnectionSettings::parse(
            "C",
            "Endpoint=http://localhost:4566; region=us-east-1;",
        )
        .unwrap();

        assert_eq!(
            settings,
            ConnectionSettings {
                endpoint_url: Some("http://localhost:4566".into()),
                region: Some("us-east-1".into()),
            }
        );
    }

    #[test]
    fn use_default_connection_means_ambient_config() {
        assert_eq!(
            ConnectionSettings::parse("C", "UseDefault").unwrap(),
            ConnectionSettings::default()
        );
    }

    #[test]
    fn rejects_malformed_connection_strings() {
        for value in ["Endpoint", "Endpoint=", "SharedAccessKey=abc", ";;"] {
            assert!(
                matches!(
                    ConnectionSettings::parse("C", value),
                    Err(ConfigError::MalformedConnection { .. })
                ),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn missing_setting_is_reported_by_name() {
        let err = ConnectionSettings::from_env("STREAM_TRIGGER_TEST_UNSET_SETTING").unwrap_err();

        assert!(
            matches!(err, ConfigError::MissingSetting(name) if name == "STREAM_TRIGGER_TEST_UNSET_SETTING")
        );
    }
}
