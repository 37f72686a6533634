use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/usage_report/config.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "/home/grit_share/recharge/";
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_UNIT_PRICE: f64 = 3.75;
pub const DEFAULT_PRICE_LABEL: &str = "Storage Cost/TB/Quarter";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no configuration found!\n\n{}", searched_help(.searched))]
    Missing { searched: Vec<PathBuf> },
    #[error("config is invalid. Edit: {}\n{message}", path.display())]
    Invalid { path: PathBuf, message: String },
    #[error("failed to read config {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn searched_help(searched: &[PathBuf]) -> String {
    searched
        .iter()
        .map(|p| format!("create: {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: String,
    pub db: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            user: None,
            pass: String::new(),
            db: None,
        }
    }
}

impl DatabaseConfig {
    /// Connection options for sqlx.
    ///
    /// Unset fields fall through to libpq-style defaults (`PGHOST`, `PGUSER`,
    /// `~/.pgpass`, ...).
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new().port(self.port);
        if let Some(host) = &self.host {
            opts = opts.host(host);
        }
        if let Some(user) = &self.user {
            opts = opts.username(user);
        }
        if !self.pass.is_empty() {
            opts = opts.password(&self.pass);
        }
        if let Some(db) = &self.db {
            opts = opts.database(db);
        }
        opts
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Dollars per TB per billing period, written to `Data!B1`.
    pub unit_price: f64,
    pub price_label: String,
    pub hide_zero_rows: bool,
    /// Drop the first row returned by the usage query.
    pub skip_first_row: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            unit_price: DEFAULT_UNIT_PRICE,
            price_label: DEFAULT_PRICE_LABEL.to_string(),
            hide_zero_rows: true,
            skip_first_row: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub database: DatabaseConfig,
    pub output: OutputConfig,
    pub report: ReportSettings,
}

impl ReportConfig {
    fn validate(self, path: &Path) -> Result<Self, ConfigError> {
        let price = self.report.unit_price;
        if !price.is_finite() || price < 0.0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: format!("report.unit_price must be a non-negative number, got {price}"),
            });
        }
        Ok(self)
    }
}

/// Where a run's configuration comes from.
pub trait ConfigSource {
    /// Human readable location, used in log lines and error context.
    fn describe(&self) -> String;

    fn load(&self) -> Result<ReportConfig, ConfigError>;
}

/// TOML file looked up in the user's config dir first, then system-wide.
#[derive(Debug, Clone)]
pub struct LayeredTomlSource {
    user_path: Option<PathBuf>,
    system_path: PathBuf,
}

impl LayeredTomlSource {
    pub fn new(user_path: Option<PathBuf>, system_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path,
            system_path: system_path.into(),
        }
    }

    /// `$XDG_CONFIG_HOME/usage_report/config.toml`, then `/etc/usage_report/config.toml`.
    pub fn from_default_locations() -> Self {
        let user_path = dirs::config_dir().map(|dir| dir.join("usage_report").join("config.toml"));
        Self::new(user_path, SYSTEM_CONFIG_PATH)
    }

    /// Pick the file to load: the user file when it exists, otherwise the system file.
    pub fn resolve(&self) -> Result<&Path, ConfigError> {
        if let Some(user) = self.user_path.as_deref().filter(|p| p.exists()) {
            return Ok(user);
        }
        if self.system_path.exists() {
            return Ok(&self.system_path);
        }
        Err(ConfigError::Missing {
            searched: self.candidates(),
        })
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.system_path.clone()];
        paths.extend(self.user_path.clone());
        paths
    }
}

impl ConfigSource for LayeredTomlSource {
    fn describe(&self) -> String {
        match self.resolve() {
            Ok(path) => path.display().to_string(),
            Err(_) => self
                .candidates()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }

    fn load(&self) -> Result<ReportConfig, ConfigError> {
        let path = self.resolve()?;
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::Missing {
                searched: self.candidates(),
            },
            _ => ConfigError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let cfg: ReportConfig = toml::from_str(&contents).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "loaded TOML configuration");
        cfg.validate(path)
    }
}

/// A dotenv file with `POSTGRES_*` keys.
///
/// Recognized keys: `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_USER`,
/// `POSTGRES_PASS`, `POSTGRES_DB`, `OUTPUT_PATH` (default: current directory),
/// `UNIT_PRICE`, `PRICE_LABEL`, `HIDE_ZERO_ROWS` and `SKIP_FIRST_ROW`. The two
/// flags take `true` or `false`.
#[derive(Debug, Clone)]
pub struct EnvFileSource {
    path: PathBuf,
}

impl EnvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn flag(&self, key: &str, value: &str) -> Result<bool, ConfigError> {
        value
            .trim()
            .parse::<bool>()
            .map_err(|e| self.invalid(format!("{key} '{value}': {e}")))
    }

    fn read_vars(&self) -> Result<HashMap<String, String>, ConfigError> {
        let iter = dotenvy::from_path_iter(&self.path).map_err(|e| match e {
            dotenvy::Error::Io(io) if io.kind() == io::ErrorKind::NotFound => ConfigError::Missing {
                searched: vec![self.path.clone()],
            },
            dotenvy::Error::Io(io) => ConfigError::Unreadable {
                path: self.path.clone(),
                source: io,
            },
            other => self.invalid(other.to_string()),
        })?;

        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| self.invalid(e.to_string()))?;
            vars.insert(key, value);
        }
        Ok(vars)
    }
}

impl ConfigSource for EnvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<ReportConfig, ConfigError> {
        let mut vars = self.read_vars()?;

        let port = match vars.remove("POSTGRES_PORT") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|e| self.invalid(format!("POSTGRES_PORT '{p}': {e}")))?,
            None => DEFAULT_PORT,
        };

        let mut report = ReportSettings::default();
        if let Some(p) = vars.remove("UNIT_PRICE") {
            report.unit_price = p
                .trim()
                .parse::<f64>()
                .map_err(|e| self.invalid(format!("UNIT_PRICE '{p}': {e}")))?;
        }
        if let Some(label) = vars.remove("PRICE_LABEL") {
            report.price_label = label;
        }
        if let Some(v) = vars.remove("HIDE_ZERO_ROWS") {
            report.hide_zero_rows = self.flag("HIDE_ZERO_ROWS", &v)?;
        }
        if let Some(v) = vars.remove("SKIP_FIRST_ROW") {
            report.skip_first_row = self.flag("SKIP_FIRST_ROW", &v)?;
        }

        let cfg = ReportConfig {
            database: DatabaseConfig {
                host: vars.remove("POSTGRES_HOST"),
                port,
                user: vars.remove("POSTGRES_USER"),
                pass: vars.remove("POSTGRES_PASS").unwrap_or_default(),
                db: vars.remove("POSTGRES_DB"),
            },
            output: OutputConfig {
                path: vars.remove("OUTPUT_PATH").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            },
            report,
        };

        tracing::debug!(path = %self.path.display(), "loaded env file configuration");
        cfg.validate(&self.path)
    }
}
