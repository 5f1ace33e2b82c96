use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_log::{Level, LogConfig};
use tally_metrics::AggregatorConfig;

/// The name of the config file within the config folder.
const CONFIG_FILE_NAME: &str = "config.yml";

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(error, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing or writing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// A value that is out of its allowed range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum ValidationError {
    #[error("pct_threshold must be between 1 and 100, got {0}")]
    PctThreshold(u8),
    #[error("flush_interval must be greater than zero")]
    FlushInterval,
    #[error("buffer_size must be greater than zero")]
    BufferSize,
    #[error("graphite timeout must be greater than zero")]
    GraphiteTimeout,
}

/// A flag override that is neither `true` nor `false`.
#[derive(Debug, thiserror::Error)]
#[error("expected a boolean, got {0:?}")]
struct ParseBoolError(String);

fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ParseBoolError(value.to_owned())),
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the listener should bind to (network interface).
    pub host: Option<String>,
    /// The UDP port to listen on.
    pub port: Option<String>,
    /// The flush interval in milliseconds.
    pub flush_interval: Option<String>,
    /// The percentile reported for timers.
    pub pct_threshold: Option<String>,
    /// The expiry window in seconds.
    pub expire: Option<String>,
    /// "true" to report counters as raw sums.
    pub no_aggregate_counters: Option<String>,
    /// "true" to delete gauges after reporting them.
    pub delete_gauges: Option<String>,
    /// "true" to enable debug mode.
    pub debug: Option<String>,
}

/// Listener options.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Tally {
    /// The host the listener binds to.
    pub host: IpAddr,
    /// The UDP port the listener binds to.
    pub port: u16,
    /// The size of the receive buffer in bytes. Longer datagrams are truncated.
    pub buffer_size: usize,
    /// Enables debug output of sinks.
    pub debug: bool,
}

impl Default for Tally {
    fn default() -> Self {
        Tally {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8125,
            buffer_size: 8192,
            debug: false,
        }
    }
}

/// Options of the graphite sink.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct GraphiteConfig {
    /// The graphite host.
    pub host: String,
    /// The port of the plaintext protocol.
    pub port: u16,
    /// Prefix for counter and gauge paths.
    pub counters_prefix: String,
    /// Prefix for timer paths.
    pub timers_prefix: String,
    /// Optional prefix prepended to every line, for example an API key of a hosted graphite.
    pub global_prefix: Option<String>,
    /// Timeout in seconds to connect and write a flush.
    pub timeout: u64,
}

impl GraphiteConfig {
    /// Returns the connect and write timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 2003,
            counters_prefix: "stats".to_owned(),
            timers_prefix: "stats.timers".to_owned(),
            global_prefix: None,
            timeout: 5,
        }
    }
}

/// A configured sink that receives every flushed snapshot.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Prints snapshots to stdout.
    Console,
    /// Sends snapshots to graphite over TCP.
    Graphite(GraphiteConfig),
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::Console]
}

/// Control the internal metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Metrics {
    /// Hostname and port of the statsd server that receives internal metrics.
    ///
    /// Defaults to `None`, which disables internal metrics.
    pub statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"tally"`.
    pub prefix: String,
    /// Default tags to apply to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "tally".to_owned(),
            default_tags: BTreeMap::new(),
        }
    }
}

/// Controls various limits
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Limits {
    /// The maximum number of seconds to wait for pending deliveries after receiving a shutdown
    /// signal.
    pub shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            shutdown_timeout: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct ConfigValues {
    #[serde(default)]
    tally: Tally,
    #[serde(default)]
    aggregator: AggregatorConfig,
    #[serde(default = "default_sinks")]
    sinks: Vec<SinkConfig>,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    limits: Limits,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            tally: Tally::default(),
            aggregator: AggregatorConfig::default(),
            sinks: default_sinks(),
            logging: LogConfig::default(),
            metrics: Metrics::default(),
            limits: Limits::default(),
        }
    }
}

impl ConfigValues {
    /// Loads the config file from the given directory, or the defaults if there is no file.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = base.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let pct_threshold = self.aggregator.pct_threshold;
        if !(1..=100).contains(&pct_threshold) {
            return Err(ValidationError::PctThreshold(pct_threshold));
        }

        if self.aggregator.flush_interval == 0 {
            return Err(ValidationError::FlushInterval);
        }

        if self.tally.buffer_size == 0 {
            return Err(ValidationError::BufferSize);
        }

        for sink in &self.sinks {
            if let SinkConfig::Graphite(graphite) = sink
                && graphite.timeout == 0
            {
                return Err(ValidationError::GraphiteTimeout);
            }
        }

        Ok(())
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// If the folder does not contain a `config.yml`, the defaults are used.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = ConfigValues::load(&path)?;
        values.validate().map_err(|err| {
            ConfigError::wrap(err, ConfigErrorKind::InvalidValue).file(path.join(CONFIG_FILE_NAME))
        })?;

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        values
            .validate()
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::InvalidValue))?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let tally = &mut self.values.tally;

        if let Some(host) = overrides.host {
            tally.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            tally.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(debug) = overrides.debug {
            tally.debug = parse_bool(&debug).map_err(|err| ConfigError::for_field(err, "debug"))?;
            if tally.debug && self.values.logging.level != Level::Trace {
                self.values.logging.level = Level::Debug;
            }
        }

        let aggregator = &mut self.values.aggregator;

        if let Some(flush_interval) = overrides.flush_interval {
            aggregator.flush_interval = flush_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
            if aggregator.flush_interval == 0 {
                return Err(ConfigError::for_field(
                    ValidationError::FlushInterval,
                    "flush_interval",
                ));
            }
        }

        if let Some(pct_threshold) = overrides.pct_threshold {
            let pct_threshold = pct_threshold
                .parse::<u8>()
                .map_err(|err| ConfigError::for_field(err, "pct_threshold"))?;
            if !(1..=100).contains(&pct_threshold) {
                return Err(ConfigError::for_field(
                    ValidationError::PctThreshold(pct_threshold),
                    "pct_threshold",
                ));
            }
            aggregator.pct_threshold = pct_threshold;
        }

        if let Some(expire) = overrides.expire {
            aggregator.expire = expire
                .parse()
                .map_err(|err| ConfigError::for_field(err, "expire"))?;
        }

        if let Some(value) = overrides.no_aggregate_counters {
            aggregator.no_aggregate_counters = parse_bool(&value)
                .map_err(|err| ConfigError::for_field(err, "no_aggregate_counters"))?;
        }

        if let Some(value) = overrides.delete_gauges {
            aggregator.delete_gauges = parse_bool(&value)
                .map_err(|err| ConfigError::for_field(err, "delete_gauges"))?;
        }

        Ok(self)
    }

    /// Serializes the effective configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadYaml))
    }

    /// Returns the folder the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.tally.host, self.values.tally.port)
    }

    /// Returns the size of the datagram receive buffer.
    pub fn buffer_size(&self) -> usize {
        self.values.tally.buffer_size
    }

    /// Returns `true` if debug mode is enabled.
    pub fn debug(&self) -> bool {
        self.values.tally.debug
    }

    /// Returns the aggregator configuration.
    pub fn aggregator_config(&self) -> &AggregatorConfig {
        &self.values.aggregator
    }

    /// Returns the configured sinks in registration order.
    pub fn sinks(&self) -> &[SinkConfig] {
        &self.values.sinks
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server for internal metrics, if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags of internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the time to wait for pending deliveries on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}
