use anyhow::{Context, Result, anyhow, ensure};
use serde_valid::Validate;
use std::{env, str::FromStr, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Reachability probe configuration
    pub probe: ProbeConfig,

    /// Monitor loop cadence
    pub monitor: MonitorConfig,

    /// Wireless networks and interface
    pub wifi: WifiConfig,

    /// Telegram bot configuration
    pub telegram: TelegramConfig,

    /// Pending notification queue configuration
    pub pending: PendingConfig,
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub host: String,
    pub timeout: Duration,
    pub samples: u32,
    pub max_failures: u32,
    pub status_samples: u32,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub retry_primary_interval: Duration,
    pub join_settle: Duration,
    pub probe_settle: Duration,
}

/// Networks are SSIDs, which are limited to 32 characters
#[derive(Clone, Debug, Validate)]
pub struct WifiConfig {
    #[validate(max_length = 32)]
    pub primary: String,
    #[validate(max_length = 32)]
    pub secondary: String,
    #[validate(max_length = 32)]
    pub fallback: String,
    pub interface: Option<String>,
    pub use_sudo: bool,
    pub join_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub chat_ids: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct PendingConfig {
    pub capacity: usize,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. The first call loads
    /// it from the process environment, later calls return the cached instance.
    pub fn get() -> Result<&'static Self> {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

        if let Some(config) = APP_CONFIG.get() {
            return Ok(config);
        }

        let config = Self::load(|key| env::var(key).ok())?;
        Ok(APP_CONFIG.get_or_init(|| config))
    }

    /// Load and validate the configuration from an arbitrary key lookup
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&lookup);

        let probe = ProbeConfig::load(&vars)?;
        let monitor = MonitorConfig::load(&vars)?;
        let wifi = WifiConfig::load(&vars)?;
        let telegram = TelegramConfig::load(&vars)?;
        let pending = PendingConfig {
            capacity: vars.parse_or("NETCHANGE_PENDING_CAPACITY", 100)?,
        };

        Ok(Self {
            probe,
            monitor,
            wifi,
            telegram,
            pending,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(value) => value
                .parse::<T>()
                .context(format!("failed to parse {key}: invalid format")),
            None => Ok(default),
        }
    }

    fn secs_or(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse_or(key, default).map(Duration::from_secs)
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| anyhow!("failed to get {key}"))
    }
}

impl ProbeConfig {
    fn load(vars: &Vars) -> Result<Self> {
        Ok(Self {
            host: vars
                .get("NETCHANGE_PROBE_HOST")
                .unwrap_or_else(|| "pool.ntp.org".to_string()),
            timeout: vars.secs_or("NETCHANGE_PROBE_TIMEOUT_SECS", 5)?,
            samples: vars.parse_or("NETCHANGE_PROBE_SAMPLES", 20)?,
            max_failures: vars.parse_or("NETCHANGE_PROBE_MAX_FAILURES", 10)?,
            status_samples: vars.parse_or("NETCHANGE_STATUS_SAMPLES", 10)?,
        })
    }
}

impl MonitorConfig {
    fn load(vars: &Vars) -> Result<Self> {
        Ok(Self {
            check_interval: vars.secs_or("NETCHANGE_CHECK_INTERVAL_SECS", 300)?,
            retry_primary_interval: vars.secs_or("NETCHANGE_RETRY_PRIMARY_SECS", 3 * 3600)?,
            join_settle: vars.secs_or("NETCHANGE_JOIN_SETTLE_SECS", 5)?,
            probe_settle: vars.secs_or("NETCHANGE_PROBE_SETTLE_SECS", 2)?,
        })
    }
}

impl WifiConfig {
    fn load(vars: &Vars) -> Result<Self> {
        let config = Self {
            primary: vars.required("NETCHANGE_PRIMARY_WIFI")?,
            secondary: vars.required("NETCHANGE_SECONDARY_WIFI")?,
            fallback: vars.required("NETCHANGE_FALLBACK_WIFI")?,
            interface: vars
                .get("NETCHANGE_WIFI_INTERFACE")
                .or_else(|| Self::default_interface().map(String::from)),
            use_sudo: vars.parse_or("NETCHANGE_WIFI_SUDO", true)?,
            join_timeout: vars.secs_or("NETCHANGE_JOIN_TIMEOUT_SECS", 30)?,
        };

        config.validate().context("wifi validation failed")?;

        let [primary, secondary, fallback] = config.priority_list();
        ensure!(
            primary != secondary && primary != fallback && secondary != fallback,
            "wifi validation failed: primary, secondary and fallback networks must differ"
        );

        Ok(config)
    }

    /// Networks in the order they are tried when reachability is lost
    pub fn priority_list(&self) -> [&str; 3] {
        [
            self.primary.as_str(),
            self.secondary.as_str(),
            self.fallback.as_str(),
        ]
    }

    fn default_interface() -> Option<&'static str> {
        if cfg!(target_os = "windows") {
            None
        } else if cfg!(target_os = "macos") {
            Some("en0")
        } else {
            Some("wlan0")
        }
    }
}

impl TelegramConfig {
    fn load(vars: &Vars) -> Result<Self> {
        let api_url = vars
            .get("TELEGRAM_API_URL")
            .unwrap_or_else(|| "https://api.telegram.org".to_string());

        let chat_ids = vars
            .get("TELEGRAM_CHAT_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<i64>()
                    .context(format!("failed to parse TELEGRAM_CHAT_IDS entry: {id}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            api_url,
            bot_token: vars.get("TELEGRAM_BOT_TOKEN_NETCHANGE"),
            chat_ids,
        })
    }
}
