//! # DTE Configuration
//!
//! Emitter identity, environment, endpoints and certificate for one
//! company context.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CAJA_EMPRESA_ID=empresa-1                                          │
//! │     CAJA_ENVIRONMENT=produccion                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/caja-pos/caja.toml (Linux)                               │
//! │     ~/Library/Application Support/cl.caja.pos/caja.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     certificacion environment, CAF folios off                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # caja.toml
//! [company]
//! empresa_id = "empresa-1"
//! terminal_id = "caja-01"
//!
//! [emitter]
//! rut = "76123456-0"
//! legal_name = "Comercial Los Andes SpA"
//! business_line = "Venta al por menor"
//! address = "Av. Providencia 1234, Santiago"
//!
//! [environment]
//! mode = "certificacion"  # certificacion | produccion
//!
//! [backoffice]
//! base_url = "https://backoffice.example.cl/api/"
//!
//! [certificate]
//! path = "/etc/caja/firma.key"
//! subject_rut = "12345678-5"
//!
//! [sync]
//! poll_interval_secs = 60
//! delivered_retention_days = 7
//! folio = "caf"  # remote | caf
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use caja_core::{Emitter, Rut};

use crate::error::{DteError, DteResult};

// =============================================================================
// SII Endpoints
// =============================================================================

const SII_UPLOAD_CERTIFICACION: &str = "https://maullin.sii.cl/cgi_dte/UPL/DTEUpload";
const SII_STATUS_CERTIFICACION: &str = "https://maullin.sii.cl/DTEWS/QueryEstUp.jws";
const SII_UPLOAD_PRODUCCION: &str = "https://palena.sii.cl/cgi_dte/UPL/DTEUpload";
const SII_STATUS_PRODUCCION: &str = "https://palena.sii.cl/DTEWS/QueryEstUp.jws";

// =============================================================================
// Environment
// =============================================================================

/// Which SII environment documents go to.
///
/// `certificacion` is the default: a terminal never talks to production
/// unless configured to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// SII test environment (maullin).
    #[default]
    Certificacion,
    /// SII production environment (palena).
    Produccion,
}

impl Environment {
    /// Default upload endpoint for this environment.
    pub fn upload_url(&self) -> &'static str {
        match self {
            Environment::Certificacion => SII_UPLOAD_CERTIFICACION,
            Environment::Produccion => SII_UPLOAD_PRODUCCION,
        }
    }

    /// Default status query endpoint for this environment.
    pub fn status_url(&self) -> &'static str {
        match self {
            Environment::Certificacion => SII_STATUS_CERTIFICACION,
            Environment::Produccion => SII_STATUS_PRODUCCION,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Certificacion => write!(f, "certificacion"),
            Environment::Produccion => write!(f, "produccion"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = DteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "certificacion" | "certificación" | "cert" | "test" => Ok(Environment::Certificacion),
            "produccion" | "producción" | "prod" | "production" => Ok(Environment::Produccion),
            _ => Err(DteError::InvalidConfig(format!(
                "Invalid environment: {}. Must be certificacion or produccion",
                s
            ))),
        }
    }
}

// =============================================================================
// Folio Source
// =============================================================================

/// Where folios come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolioSource {
    /// `POST /folio/next` on the Back Office.
    #[default]
    Remote,
    /// A CAF range installed in the local database.
    Caf,
}

impl std::fmt::Display for FolioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FolioSource::Remote => write!(f, "remote"),
            FolioSource::Caf => write!(f, "caf"),
        }
    }
}

impl std::str::FromStr for FolioSource {
    type Err = DteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "backoffice" => Ok(FolioSource::Remote),
            "caf" | "local" => Ok(FolioSource::Caf),
            _ => Err(DteError::InvalidConfig(format!(
                "Invalid folio source: {}. Must be remote or caf",
                s
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Company context this terminal works for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyConfig {
    /// Back Office company id.
    #[serde(default)]
    pub empresa_id: String,

    /// Registered terminal id.
    #[serde(default)]
    pub terminal_id: String,
}

/// Issuer identity printed on every document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmitterConfig {
    #[serde(default)]
    pub rut: String,
    #[serde(default)]
    pub legal_name: String,
    #[serde(default)]
    pub business_line: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub mode: Environment,
}

/// Back Office HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackOfficeConfig {
    /// Base URL; request paths are joined onto it.
    #[serde(default = "default_backoffice_url")]
    pub base_url: String,

    /// Request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_backoffice_url() -> String {
    "http://localhost:8000/api/".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for BackOfficeConfig {
    fn default() -> Self {
        Self {
            base_url: default_backoffice_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// SII web service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiiConfig {
    /// Overrides the environment's upload endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    /// Overrides the environment's status endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,

    /// Request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SiiConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            status_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Signing certificate.
///
/// The key file holds the raw 32-byte Ed25519 seed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// RUT of the certificate holder.
    #[serde(default)]
    pub subject_rut: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

/// Sync engine and submission retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Run loop period (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Outbound events delivered per kind per flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Reference entities upserted concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// First retry delay (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Retry delay cap (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Give up retrying after this long (seconds).
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,

    /// Delivered outbound events older than this are deleted each cycle
    /// (days). 0 deletes them on the next cycle.
    #[serde(default = "default_delivered_retention")]
    pub delivered_retention_days: u32,

    #[serde(default)]
    pub folio: FolioSource,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_batch_size() -> u32 {
    100
}
fn default_max_concurrency() -> usize {
    8
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}
fn default_max_elapsed() -> u64 {
    120
}
fn default_delivered_retention() -> u32 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_elapsed_secs: default_max_elapsed(),
            delivered_retention_days: default_delivered_retention(),
            folio: FolioSource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "caja.db".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// =============================================================================
// DTE Config
// =============================================================================

/// Complete configuration for one company context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DteConfig {
    #[serde(default)]
    pub company: CompanyConfig,

    #[serde(default)]
    pub emitter: EmitterConfig,

    #[serde(default)]
    pub environment: EnvironmentConfig,

    #[serde(default)]
    pub backoffice: BackOfficeConfig,

    #[serde(default)]
    pub sii: SiiConfig,

    #[serde(default)]
    pub certificate: CertificateConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl DteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (caja.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DteResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> DteResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| DteError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DteError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| DteError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DteResult<()> {
        Rut::parse(&self.emitter.rut)
            .map_err(|e| DteError::InvalidConfig(format!("emitter.rut: {}", e)))?;

        self.backoffice_url()?;
        Url::parse(self.upload_url()).map_err(|e| DteError::InvalidUrl(format!("sii upload: {}", e)))?;
        Url::parse(self.status_url()).map_err(|e| DteError::InvalidUrl(format!("sii status: {}", e)))?;

        if self.sync.batch_size == 0 {
            return Err(DteError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_concurrency == 0 {
            return Err(DteError::InvalidConfig(
                "max_concurrency must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(DteError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("CAJA_EMPRESA_ID") {
            debug!(empresa_id = %id, "Overriding empresa ID from environment");
            self.company.empresa_id = id;
        }

        if let Ok(id) = std::env::var("CAJA_TERMINAL_ID") {
            self.company.terminal_id = id;
        }

        if let Ok(url) = std::env::var("CAJA_BACKOFFICE_URL") {
            debug!(url = %url, "Overriding Back Office URL from environment");
            self.backoffice.base_url = url;
        }

        if let Ok(mode) = std::env::var("CAJA_ENVIRONMENT") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding environment from environment");
                    self.environment.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown environment in CAJA_ENVIRONMENT"),
            }
        }

        if let Ok(rut) = std::env::var("CAJA_EMITTER_RUT") {
            self.emitter.rut = rut;
        }

        if let Ok(path) = std::env::var("CAJA_DB_PATH") {
            self.database.path = path;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("cl", "caja", "pos")
            .map(|dirs| dirs.config_dir().join("caja.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn empresa_id(&self) -> &str {
        &self.company.empresa_id
    }

    pub fn environment(&self) -> Environment {
        self.environment.mode
    }

    /// Parsed Back Office base URL, http or https only.
    ///
    /// Always ends in `/` so endpoint paths join under it instead of
    /// replacing its last segment.
    pub fn backoffice_url(&self) -> DteResult<Url> {
        let url = as_base_url(Url::parse(&self.backoffice.base_url)?);
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(DteError::InvalidUrl(format!(
                "Back Office URL must be http or https, got: {}",
                other
            ))),
        }
    }

    /// Upload endpoint: the override, or the environment's default.
    pub fn upload_url(&self) -> &str {
        self.sii
            .upload_url
            .as_deref()
            .unwrap_or_else(|| self.environment.mode.upload_url())
    }

    /// Status endpoint: the override, or the environment's default.
    pub fn status_url(&self) -> &str {
        self.sii
            .status_url
            .as_deref()
            .unwrap_or_else(|| self.environment.mode.status_url())
    }

    pub fn backoffice_timeout(&self) -> Duration {
        Duration::from_secs(self.backoffice.timeout_secs)
    }

    pub fn sii_timeout(&self) -> Duration {
        Duration::from_secs(self.sii.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    /// The emitter block printed on documents.
    pub fn emitter(&self) -> DteResult<Emitter> {
        let rut = Rut::parse(&self.emitter.rut)
            .map_err(|e| DteError::InvalidConfig(format!("emitter.rut: {}", e)))?;

        Ok(Emitter {
            rut,
            legal_name: self.emitter.legal_name.clone(),
            business_line: self.emitter.business_line.clone(),
            address: self.emitter.address.clone(),
        })
    }
}

/// Appends the trailing `/` that `Url::join` needs to keep the last segment.
pub(crate) fn as_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DteConfig {
        let mut config = DteConfig::default();
        config.company.empresa_id = "empresa-1".into();
        config.emitter.rut = "76.123.456-0".into();
        config.emitter.legal_name = "Comercial Los Andes SpA".into();
        config
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("certificacion".parse::<Environment>().unwrap(), Environment::Certificacion);
        assert_eq!("cert".parse::<Environment>().unwrap(), Environment::Certificacion);
        assert_eq!("Produccion".parse::<Environment>().unwrap(), Environment::Produccion);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Produccion);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_folio_source_parsing() {
        assert_eq!("caf".parse::<FolioSource>().unwrap(), FolioSource::Caf);
        assert_eq!("remote".parse::<FolioSource>().unwrap(), FolioSource::Remote);
        assert!("both".parse::<FolioSource>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = DteConfig::default();
        assert_eq!(config.environment(), Environment::Certificacion);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.folio, FolioSource::Remote);
        assert_eq!(config.upload_url(), SII_UPLOAD_CERTIFICACION);
    }

    #[test]
    fn test_endpoints_follow_environment() {
        let mut config = valid_config();
        config.environment.mode = Environment::Produccion;
        assert!(config.upload_url().contains("palena"));
        assert!(config.status_url().contains("palena"));

        config.sii.upload_url = Some("http://localhost:9000/upload".into());
        assert_eq!(config.upload_url(), "http://localhost:9000/upload");
        assert!(config.status_url().contains("palena"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        // Bad check digit
        config.emitter.rut = "76123456-1".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.emitter.rut = "76123456-0".into();
        config.backoffice.base_url = "ftp://backoffice".into();
        assert!(matches!(config.validate(), Err(DteError::InvalidUrl(_))));

        config.backoffice.base_url = "https://backoffice.example.cl/api/".into();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        config.sync.batch_size = 10;
        config.sync.max_concurrency = 0;
        assert!(config.validate().is_err());

        config.sync.max_concurrency = 4;
        config.sync.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoffice_base_path_is_kept() {
        let mut config = valid_config();
        config.backoffice.base_url = "https://bo.example.cl/api".into();

        let base = config.backoffice_url().unwrap();
        assert_eq!(base.as_str(), "https://bo.example.cl/api/");
        assert_eq!(
            base.join("sync/products").unwrap().as_str(),
            "https://bo.example.cl/api/sync/products"
        );

        config.backoffice.base_url = "https://bo.example.cl/api/".into();
        assert_eq!(config.backoffice_url().unwrap().as_str(), "https://bo.example.cl/api/");

        config.backoffice.base_url = "https://bo.example.cl".into();
        assert_eq!(config.backoffice_url().unwrap().as_str(), "https://bo.example.cl/");
    }

    #[test]
    fn test_emitter_from_config() {
        let emitter = valid_config().emitter().unwrap();
        assert_eq!(emitter.rut.to_string(), "76123456-0");
        assert_eq!(emitter.legal_name, "Comercial Los Andes SpA");
    }

    #[test]
    fn test_toml_serialization() {
        let config = valid_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[emitter]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: DteConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.emitter.rut, config.emitter.rut);
        assert_eq!(parsed.sync.folio, config.sync.folio);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: DteConfig = toml::from_str(
            r#"
            [emitter]
            rut = "76123456-0"

            [sync]
            folio = "caf"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.sync.folio, FolioSource::Caf);
        assert_eq!(parsed.sync.poll_interval_secs, 60);
        assert_eq!(parsed.sync.delivered_retention_days, 7);
        assert_eq!(parsed.environment(), Environment::Certificacion);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("caja-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("caja.toml");

        valid_config().save(Some(path.clone())).unwrap();
        let loaded = DteConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.company.empresa_id, "empresa-1");

        std::fs::remove_dir_all(dir).unwrap();
    }
}
