//! Inspector configuration management

use crate::usb::{
    DeviceFilter, PacketSizePolicy, ReadOptions, TrackingMode, WalkOptions, WatchOptions,
    parse_hex_id,
};
use anyhow::{Context, Result, anyhow};
use common::{DEFAULT_EVENT_BUFFER, HotplugFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectorConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub walk: WalkSettings,
    #[serde(default)]
    pub watch: WatchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSettings {
    /// Devices to inspect, as `0xVID:0xPID` patterns; empty means all
    pub filters: Vec<String>,
}

/// Topology walk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkSettings {
    /// Read each endpoint once during the walk
    pub read_endpoints: bool,
    pub read_timeout_ms: u64,
    /// Claim interfaces before reading (detaches kernel drivers)
    pub claim_interfaces: bool,
    /// Endpoints reporting more than 1024 bytes per packet: clamp or reject
    pub oversize_packets: PacketSizePolicy,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            read_endpoints: true,
            read_timeout_ms: 1000,
            claim_interfaces: false,
            oversize_packets: PacketSizePolicy::Clamp,
        }
    }
}

/// Hotplug watch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub poll_interval_ms: u64,
    pub event_timeout_ms: u64,
    pub tracking: TrackingMode,
    /// Stop after this many devices were opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_after_arrivals: Option<u64>,
    /// Report the first enumerated device when the watch ends
    pub post_check: bool,
    /// Deliver arrivals for devices already connected
    pub enumerate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_class: Option<u8>,
    /// Capacity of the session event channel
    pub event_buffer: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            event_timeout_ms: 100,
            tracking: TrackingMode::PerDevice,
            exit_after_arrivals: None,
            post_check: true,
            enumerate: false,
            match_vendor: None,
            match_product: None,
            match_class: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl InspectorConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-inspect/inspector.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: InspectorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-inspect").join("inspector.toml")
        } else {
            PathBuf::from(".config/usb-inspect/inspector.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        DeviceFilter::parse_all(self.usb.filters.as_slice())?;

        if self.walk.read_timeout_ms == 0 {
            return Err(anyhow!("walk.read_timeout_ms must be greater than 0"));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(anyhow!("watch.poll_interval_ms must be greater than 0"));
        }
        if self.watch.event_timeout_ms == 0 {
            return Err(anyhow!("watch.event_timeout_ms must be greater than 0"));
        }
        if self.watch.event_buffer == 0 {
            return Err(anyhow!("watch.event_buffer must be greater than 0"));
        }
        if self.watch.exit_after_arrivals == Some(0) {
            return Err(anyhow!("watch.exit_after_arrivals must be at least 1"));
        }

        self.hotplug_filter()?;
        Ok(())
    }

    fn hotplug_filter(&self) -> Result<HotplugFilter> {
        let vendor_id = self
            .watch
            .match_vendor
            .as_deref()
            .map(|id| parse_hex_id(id, "VID"))
            .transpose()?;
        let product_id = self
            .watch
            .match_product
            .as_deref()
            .map(|id| parse_hex_id(id, "PID"))
            .transpose()?;

        Ok(HotplugFilter {
            vendor_id,
            product_id,
            class: self.watch.match_class,
            enumerate: self.watch.enumerate,
        })
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            timeout: Duration::from_millis(self.walk.read_timeout_ms),
            policy: self.walk.oversize_packets,
        }
    }

    /// Options for a topology walk
    pub fn walk_options(&self) -> Result<WalkOptions> {
        Ok(WalkOptions {
            read_endpoints: self.walk.read_endpoints,
            claim_interfaces: self.walk.claim_interfaces,
            read: self.read_options(),
            filters: DeviceFilter::parse_all(self.usb.filters.as_slice())?,
        })
    }

    /// Options for a hotplug watch
    pub fn watch_options(&self) -> Result<WatchOptions> {
        Ok(WatchOptions {
            filter: self.hotplug_filter()?,
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            event_timeout: Duration::from_millis(self.watch.event_timeout_ms),
            tracking: self.watch.tracking,
            exit_after_arrivals: self.watch.exit_after_arrivals,
            post_check: self.watch.post_check,
            event_buffer: self.watch.event_buffer,
        })
    }
}

/// Load a configuration file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<InspectorConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    InspectorConfig::load(Some(path_buf))
}
