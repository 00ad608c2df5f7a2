//! Configuration management for the archiver
//!
//! Settings are read from a TOML file (`boarddocs.toml` by default). Every
//! field has a default, so a missing file or a partial one is fine; command
//! line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, ScrapeError};

/// File name looked up in the working directory when no path is given
pub const CONFIG_FILE_NAME: &str = "boarddocs.toml";

/// Board entry page crawled when nothing else is configured
pub const DEFAULT_SITE_URL: &str = "https://go.boarddocs.com/ca/sfusd/Board.nsf/goto?open&id=BDLAAB25F17C";

/// Top-level scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// BoardDocs page the crawl starts from
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Root of the archive tree
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Browser launch settings (ignored when attaching)
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Waits and pauses around page interactions
    #[serde(default)]
    pub timing: TimingSettings,

    /// Retry policy for the flaky item link
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Chrome/Chromium binary; autodetected when unset
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Run without a visible window
    #[serde(default)]
    pub headless: bool,

    #[serde(default)]
    pub window_width: Option<u32>,

    #[serde(default)]
    pub window_height: Option<u32>,

    /// How long the DevTools connection may sit idle before it is dropped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Waits and pauses around page interactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Deadline for the network activity triggered by one interaction
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Pause after clicks that start animations
    #[serde(default = "default_click_pause_ms")]
    pub click_pause_ms: u64,
}

/// Retry policy for the flaky item link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Selector wait of the first attempt
    #[serde(default = "default_base_timeout_ms")]
    pub base_timeout_ms: u64,

    /// Added to the selector wait on each further attempt
    #[serde(default = "default_timeout_step_ms")]
    pub timeout_step_ms: u64,

    /// Pause before clicking again
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

// Default value providers
fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_click_pause_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_timeout_ms() -> u64 {
    1_000
}

fn default_timeout_step_ms() -> u64 {
    1_000
}

fn default_pause_ms() -> u64 {
    500
}

impl ScraperConfig {
    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            ScrapeError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load `boarddocs.toml` from `dir` or use defaults
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize to TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScrapeError::Config(format!("Failed to serialize config: {}", e)))
    }
}

impl BrowserSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl TimingSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn click_pause(&self) -> Duration {
        Duration::from_millis(self.click_pause_ms)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            output_dir: default_output_dir(),
            browser: BrowserSettings::default(),
            timing: TimingSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            window_width: None,
            window_height: None,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            click_pause_ms: default_click_pause_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_timeout_ms: default_base_timeout_ms(),
            timeout_step_ms: default_timeout_step_ms(),
            pause_ms: default_pause_ms(),
        }
    }
}
