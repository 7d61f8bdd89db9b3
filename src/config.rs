use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use clip_bus::ExportSettings;
use serde::Deserialize;

/// Environment variable naming a JSON settings file.
pub const CONFIG_ENV: &str = "WRANGLER_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WranglerConfig {
    output_folder: PathBuf,
    custom_video: bool,
    custom_video_width: u32,
    custom_video_height: Option<u32>,
    custom_video_framerate: f64,
    custom_video_bitrate: Option<usize>,
    video_codec: String,
    progress_interval_ms: u64,
    gap_threshold_secs: f64,
}

impl Default for WranglerConfig {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::from("."),
            custom_video: false,
            custom_video_width: 1920,
            custom_video_height: None,
            custom_video_framerate: 24.0,
            custom_video_bitrate: None,
            video_codec: "libx265".to_string(),
            progress_interval_ms: 500,
            gap_threshold_secs: clip_bus::journey::JOURNEY_GAP_SECS,
        }
    }
}

impl WranglerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn gap_threshold(&self) -> f64 {
        self.gap_threshold_secs
    }

    /// Settings for a re-encoded export: the custom frame when enabled,
    /// otherwise the source's own size.
    pub fn resample_settings(&self) -> ExportSettings {
        let settings = if self.custom_video {
            ExportSettings::custom(
                self.custom_video_width,
                self.custom_video_height,
                Some(self.custom_video_framerate),
                self.custom_video_bitrate,
            )
        } else {
            ExportSettings::resampled()
        };
        settings.with_codec(&self.video_codec)
    }
}

pub fn config() -> &'static WranglerConfig {
    static CONFIG: LazyLock<WranglerConfig> = LazyLock::new(|| match std::env::var_os(CONFIG_ENV) {
        Some(path) => WranglerConfig::load(Path::new(&path)).unwrap_or_else(|e| {
            log::warn!("ignoring config {:?}: {}", path, e);
            WranglerConfig::default()
        }),
        None => WranglerConfig::default(),
    });
    &CONFIG
}
