use crate::domain::machine::MachineId;
use crate::domain::telemetry::DEFAULT_RETENTION;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub flush: FlushSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub interest: InterestSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "/".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_string(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            connect_timeout_ms: 20_000,
        }
    }
}

impl ConnectionSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlushSettings {
    pub interval_ms: u64,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl FlushSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSettings {
    pub retention: usize,
    pub stale_after_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            stale_after_secs: 30,
        }
    }
}

impl StoreSettings {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InterestSettings {
    #[serde(default)]
    pub machine_ids: Vec<MachineId>,
}

pub fn load_telemetry_config() -> anyhow::Result<TelemetryConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/telemetry").required(false))
        .add_source(
            config::Environment::with_prefix("WELD_TELEMETRY")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("interest.machine_ids")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
