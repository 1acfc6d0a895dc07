use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RinglinkConfig {
    /// Path of the serial device node, e.g. `/dev/ttyUSB0`.
    pub device: String,
    #[serde(default = "defaults::baud_rate")]
    pub baud_rate: u32,
    /// Bytes per ring, header included.
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::drain_idle_poll_us")]
    pub drain_idle_poll_us: u64,
    #[serde(default = "defaults::flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn baud_rate() -> u32 {
        115_200
    }

    pub fn capacity() -> usize {
        4096
    }

    pub fn drain_idle_poll_us() -> u64 {
        1_000
    }

    pub fn flush_timeout_ms() -> u64 {
        100
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl RinglinkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn drain_idle_poll(&self) -> Duration {
        Duration::from_micros(self.drain_idle_poll_us)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn only_device_is_required() {
        let cfg = RinglinkConfig::parse(r#"device = "/dev/ttyACM0""#).unwrap();
        assert_eq!(cfg.device, "/dev/ttyACM0");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.capacity, 4096);
        assert_eq!(cfg.drain_idle_poll(), Duration::from_millis(1));
        assert_eq!(cfg.flush_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn missing_device_is_a_parse_error() {
        let err = RinglinkConfig::parse("baud_rate = 9600").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_overrides_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device = \"/dev/ttyUSB1\"\nbaud_rate = 9600\ncapacity = 512\nlog_level = \"debug\""
        )
        .unwrap();

        let cfg = RinglinkConfig::load(file.path()).unwrap();
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.capacity, 512);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = RinglinkConfig::load("/nonexistent/ringlink.toml").unwrap_err();
        assert_eq!(err.to_string(), "failed to read '/nonexistent/ringlink.toml'");
    }
}
