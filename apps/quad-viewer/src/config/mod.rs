use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::layout::{Dimensions, CELL_COUNT};
use crate::pipeline::SinkChoice;
use crate::QuadViewerError;

/// Pattern nicks accepted by `videotestsrc`
pub const TEST_PATTERNS: &[&str] = &[
    "smpte",
    "snow",
    "black",
    "white",
    "red",
    "green",
    "blue",
    "checkers-1",
    "checkers-2",
    "checkers-4",
    "checkers-8",
    "circular",
    "blink",
    "smpte75",
    "zone-plate",
    "gamut",
    "chroma-zone-plate",
    "solid-color",
    "ball",
    "smpte100",
    "bar",
    "pinwheel",
    "spokes",
    "gradient",
    "colors",
    "smpte-rp-219",
];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub video: VideoConfig,
    pub sources: Vec<SourceConfig>,
    pub overlay: OverlayConfig,
    pub telemetry: TelemetryConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub title: String,
    pub fullscreen: bool,
    /// X display name; `$DISPLAY` when unset
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_width: u32,
    pub output_height: u32,
    pub sink: SinkChoice,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Use a live test source with this pattern instead of the device
    pub test_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub visible_on_start: bool,
    pub hide_after_ms: u64,
    pub font: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub window_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_ms: u64,
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            video: VideoConfig::default(),
            sources: (0..CELL_COUNT).map(SourceConfig::for_cell).collect(),
            overlay: OverlayConfig::default(),
            telemetry: TelemetryConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
            x: 0,
            y: 0,
            title: "Quad Viewer".to_string(),
            fullscreen: false,
            display: None,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_width: 3840,
            output_height: 2160,
            sink: SinkChoice::Auto,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::for_cell(0)
    }
}

impl SourceConfig {
    pub fn for_cell(cell: usize) -> Self {
        Self {
            device: format!("/dev/video{}", cell),
            width: 1920,
            height: 1080,
            test_pattern: None,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            visible_on_start: true,
            hide_after_ms: 3000,
            font: "Sans Bold 18".to_string(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window_frames: crate::telemetry::DEFAULT_WINDOW_FRAMES,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            status_interval_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console: true,
        }
    }
}

/// Command-line values that replace the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub title: Option<String>,
    pub fullscreen: bool,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub devices: Vec<String>,
    pub test_sources: bool,
    pub sink: Option<SinkChoice>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub no_console_log: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err("window width and height must be greater than 0".to_string());
        }
        if self.video.output_width == 0 || self.video.output_height == 0 {
            return Err("video output width and height must be greater than 0".to_string());
        }

        if self.sources.len() != CELL_COUNT {
            return Err(format!(
                "exactly {} sources are required, {} configured",
                CELL_COUNT,
                self.sources.len()
            ));
        }
        for (cell, source) in self.sources.iter().enumerate() {
            if source.width == 0 || source.height == 0 {
                return Err(format!("source {} width and height must be greater than 0", cell));
            }
            match &source.test_pattern {
                Some(pattern) if !TEST_PATTERNS.contains(&pattern.as_str()) => {
                    return Err(format!("source {} has unknown test pattern '{}'", cell, pattern));
                }
                None if source.device.is_empty() => {
                    return Err(format!("source {} has no device", cell));
                }
                _ => {}
            }
        }

        if self.runtime.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }
        if self.telemetry.window_frames < 2 {
            return Err("telemetry window_frames must be at least 2".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!("unknown log level '{}'", self.logging.level));
        }

        Ok(())
    }

    /// Load from TOML, or JSON when the file has a `.json` extension
    pub async fn from_file(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(QuadViewerError::ConfigError(format!(
                "Configuration file not found: {:?}\n\
                Use --save-config to write one with the default settings",
                path
            )));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            QuadViewerError::ConfigError(format!("Failed to read configuration file {:?}: {}", path, e))
        })?;

        let config: Config = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                QuadViewerError::ConfigError(format!("Failed to parse configuration file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                QuadViewerError::ConfigError(format!("Failed to parse configuration file {:?}: {}", path, e))
            })?
        };

        config.validate().map_err(QuadViewerError::ConfigError)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration in the format implied by the extension
    pub async fn save(&self, path: &Path) -> crate::Result<()> {
        let content = self.render(is_json(path))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn render(&self, json: bool) -> crate::Result<String> {
        if json {
            serde_json::to_string_pretty(self)
                .map_err(|e| QuadViewerError::ConfigError(format!("Failed to serialize config: {}", e)))
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| QuadViewerError::ConfigError(format!("Failed to serialize config: {}", e)))
        }
    }

    pub fn merge(&mut self, overrides: ConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(x) = overrides.x {
            self.window.x = x;
        }
        if let Some(y) = overrides.y {
            self.window.y = y;
        }
        if let Some(title) = overrides.title {
            self.window.title = title;
        }
        if overrides.fullscreen {
            self.window.fullscreen = true;
        }
        if let Some(width) = overrides.output_width {
            self.video.output_width = width;
        }
        if let Some(height) = overrides.output_height {
            self.video.output_height = height;
        }
        if let Some(sink) = overrides.sink {
            self.video.sink = sink;
        }

        if overrides.devices.len() > CELL_COUNT {
            warn!(
                "{} devices given, only the first {} are used",
                overrides.devices.len(),
                CELL_COUNT
            );
        }
        for (source, device) in self.sources.iter_mut().zip(overrides.devices) {
            source.device = device;
            source.test_pattern = None;
        }
        if overrides.test_sources {
            const PATTERNS: [&str; CELL_COUNT] = ["smpte", "ball", "snow", "pinwheel"];
            for (source, pattern) in self.sources.iter_mut().zip(PATTERNS) {
                source.test_pattern = Some(pattern.to_string());
            }
        }
        for source in &mut self.sources {
            if let Some(width) = overrides.video_width {
                source.width = width;
            }
            if let Some(height) = overrides.video_height {
                source.height = height;
            }
        }

        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(file) = overrides.log_file {
            self.logging.file = Some(file);
        }
        if overrides.no_console_log {
            self.logging.console = false;
        }
    }

    pub fn window_size(&self) -> Dimensions {
        Dimensions::new(self.window.width, self.window.height)
    }

    pub fn output_size(&self) -> Dimensions {
        Dimensions::new(self.video.output_width, self.video.output_height)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_interval_ms)
    }

    pub fn overlay_hide_after(&self) -> Duration {
        Duration::from_millis(self.overlay.hide_after_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.status_interval_secs)
    }

    /// Configured capture devices that exist on this host
    pub fn available_devices(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.test_pattern.is_none())
            .filter(|s| Path::new(&s.device).exists())
            .map(|s| s.device.clone())
            .collect()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
