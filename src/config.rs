use crate::geo::ReferenceLocation;
use crate::interest::InterestConfig;
use crate::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "windscout.toml";

/// The `AppConfig` struct holds every setting of a scouting run.
///
/// Values are layered: built-in defaults, then the optional TOML file, then `WINDSCOUT_*`
/// environment variables (`__` separates nesting levels, e.g. `WINDSCOUT_LLM__MODEL`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub llm: LlmConfig,
    pub geo: GeoConfig,
    pub marketplaces: MarketplaceConfig,
    pub storage: StorageConfig,
    pub reconcile: ReconcileConfig,
    pub interests: InterestConfig,
    pub mail: MailConfig,
    pub schedule: ScheduleConfig,
}

/// The `HttpConfig` struct holds the settings for outgoing HTTP requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// The number of concurrent requests allowed per batch.
    pub concurrent_requests: usize,
    /// The timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// The maximum number of attempts for failed requests.
    pub max_retries: u32,
    /// The user agent string to be used in HTTP requests.
    pub user_agent: String,
    /// The rate limit settings.
    pub rate_limit: RateLimit,
}

/// The `RateLimit` struct holds the rate limiting settings shared by all requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// The number of requests allowed per second. Zero disables pacing.
    pub requests_per_second: f32,
    /// The number of requests that may be in flight at once.
    pub burst_size: usize,
}

/// The `LlmConfig` struct holds the settings for the extraction model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat completions endpoint of an OpenAI-compatible API.
    pub endpoint: String,
    pub model: String,
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// The temperature setting, controlling the randomness of the output.
    pub temperature: f32,
    /// The maximum number of tokens allowed in the response.
    pub max_tokens: u32,
    /// How many listing images are sent along with the text.
    pub max_images: usize,
    /// Image shown with the worked example in the prompt.
    pub example_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// CSV with `plz,lat,lon` columns.
    pub postal_code_table: PathBuf,
    /// Falls back to `GEOAPIFY_API_KEY`. Without a key only the postal table is used.
    pub geocoder_api_key: Option<String>,
    pub country_code: String,
    pub references: Vec<ReferenceLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Search result URLs with a `{}` placeholder for the page number.
    pub search_urls: Vec<String>,
    pub max_pages: usize,
    /// How many result pages are fetched before checking whether more exist.
    pub page_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub store_file: PathBuf,
    pub current_offers_file: PathBuf,
    pub filtered_out_file: PathBuf,
    /// Memoisation file for LLM and geocoding answers. Unset keeps the cache in memory.
    pub cache_file: Option<PathBuf>,
    /// Workbook with one worksheet per entry kind.
    pub export_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Re-run extraction when a known listing's title or description got longer.
    pub requery_on_growth: bool,
    /// Concurrent extraction calls per batch.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Falls back to `MAILJET_API_KEY`.
    pub api_key: Option<String>,
    /// Falls back to `MAILJET_SECRET_KEY`.
    pub secret_key: Option<String>,
    pub from_email: String,
    pub from_name: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local hour of day after which the daily run may start.
    pub run_after_hour: u32,
    /// File holding the date of the last completed run.
    pub state_file: PathBuf,
    pub check_interval_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: crate::DEFAULT_CONCURRENT_REQUESTS,
            timeout_secs: crate::DEFAULT_TIMEOUT.as_secs(),
            max_retries: crate::DEFAULT_MAX_RETRIES,
            user_agent: String::from("Mozilla/5.0 (compatible; windscout/0.1)"),
            rate_limit: RateLimit::default(),
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            burst_size: 5,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.openai.com/v1/chat/completions"),
            model: String::from("gpt-4o-mini"),
            api_key: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_images: 4,
            example_image: None,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            postal_code_table: PathBuf::from("data/plz_geocoord.csv"),
            geocoder_api_key: None,
            country_code: String::from("de"),
            references: vec![ReferenceLocation {
                name: String::from("Karlsruhe"),
                lat: 49.0069,
                lon: 8.4037,
                radius_km: 130.0,
            }],
        }
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            search_urls: vec![String::from(
                "https://www.kleinanzeigen.de/s-karlsruhe/seite:{}/windsurfen/k0l9186r50",
            )],
            max_pages: 50,
            page_batch_size: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_file: PathBuf::from("db.json"),
            current_offers_file: PathBuf::from("current_offers.json"),
            filtered_out_file: PathBuf::from("filtered_out_offers.json"),
            cache_file: Some(PathBuf::from("data/request_cache.json")),
            export_file: PathBuf::from("export.xlsx"),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requery_on_growth: true,
            batch_size: 10,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_after_hour: 13,
            state_file: PathBuf::from("last_run_date.txt"),
            check_interval_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `path` (or [`DEFAULT_CONFIG_FILE`]) and the environment.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings = Config::builder()
            .add_source(File::from(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("WINDSCOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mail.recipients")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        config.apply_secret_fallbacks();
        Ok(config)
    }

    /// Fills unset secrets from the conventional environment variables.
    fn apply_secret_fallbacks(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if self.llm.api_key.is_none() {
            self.llm.api_key = env("OPENAI_API_KEY");
        }
        if self.geo.geocoder_api_key.is_none() {
            self.geo.geocoder_api_key = env("GEOAPIFY_API_KEY");
        }
        if self.mail.api_key.is_none() {
            self.mail.api_key = env("MAILJET_API_KEY");
        }
        if self.mail.secret_key.is_none() {
            self.mail.secret_key = env("MAILJET_SECRET_KEY");
        }
    }
}
