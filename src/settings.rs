//! Booth settings
//!
//! Loading/saving of the photo-booth.json configuration. Missing or corrupt
//! files fall back to defaults with a warning so the booth always starts.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::crop::MIN_CROP_PERCENT;
use crate::render::compositor::LayoutMode;

pub const SETTINGS_FILE: &str = "photo-booth.json";

/// Crop region as percentages of the video frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CropPercent {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl CropPercent {
    pub fn as_array(&self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

/// Persisted booth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoothSettings {
    /// Camera device index
    #[serde(rename = "cameraIndex", default)]
    pub camera_index: u32,

    /// Crop region per feed slot, in percent of the video frame
    #[serde(rename = "crops", default = "default_crops")]
    pub crops: [CropPercent; 2],

    /// RGB tint per mask unit (cutout and tint channel per slot)
    #[serde(rename = "tints", default = "default_tints")]
    pub tints: [[f32; 3]; 4],

    /// Video brightness offset (-1.0 to 1.0)
    #[serde(rename = "brightness", default)]
    pub brightness: f32,

    /// Video contrast multiplier (0.0 to 2.0)
    #[serde(rename = "contrast", default = "default_contrast")]
    pub contrast: f32,

    /// Output layout
    #[serde(rename = "layout", default = "default_layout")]
    pub layout: LayoutMode,

    /// Mirror the composite horizontally
    #[serde(rename = "mirror", default = "default_mirror")]
    pub mirror: bool,

    /// Whether the tint channel colors the cutout
    #[serde(rename = "tintEnabled", default = "default_tint_enabled")]
    pub tint_enabled: bool,

    /// Cutout alpha ramp: background confidence below `low` stays opaque,
    /// above `high` is fully transparent
    #[serde(rename = "cutoutLow", default = "default_cutout_low")]
    pub cutout_low: f32,
    #[serde(rename = "cutoutHigh", default = "default_cutout_high")]
    pub cutout_high: f32,

    /// Target frame rate (10-120)
    #[serde(rename = "targetFps", default = "default_target_fps")]
    pub target_fps: u32,
}

fn default_crops() -> [CropPercent; 2] {
    [
        CropPercent {
            x: 10.0,
            y: 5.0,
            w: 40.0,
            h: 90.0,
        },
        CropPercent {
            x: 55.0,
            y: 5.0,
            w: 40.0,
            h: 90.0,
        },
    ]
}

fn default_tints() -> [[f32; 3]; 4] {
    [
        [1.0, 1.0, 1.0],
        [0.9, 0.3, 0.3],
        [1.0, 1.0, 1.0],
        [0.3, 0.4, 0.9],
    ]
}

fn default_contrast() -> f32 {
    1.0
}

fn default_layout() -> LayoutMode {
    LayoutMode::Quad
}

fn default_mirror() -> bool {
    true
}

fn default_tint_enabled() -> bool {
    true
}

fn default_cutout_low() -> f32 {
    0.3
}

fn default_cutout_high() -> f32 {
    0.7
}

fn default_target_fps() -> u32 {
    30
}

impl Default for BoothSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            crops: default_crops(),
            tints: default_tints(),
            brightness: 0.0,
            contrast: default_contrast(),
            layout: default_layout(),
            mirror: default_mirror(),
            tint_enabled: default_tint_enabled(),
            cutout_low: default_cutout_low(),
            cutout_high: default_cutout_high(),
            target_fps: default_target_fps(),
        }
    }
}

impl BoothSettings {
    /// Clamp all fields into their valid ranges
    pub fn sanitize(&mut self) {
        for crop in &mut self.crops {
            crop.x = crop.x.clamp(0.0, 100.0 - MIN_CROP_PERCENT);
            crop.y = crop.y.clamp(0.0, 100.0 - MIN_CROP_PERCENT);
            crop.w = crop.w.clamp(MIN_CROP_PERCENT, 100.0 - crop.x);
            crop.h = crop.h.clamp(MIN_CROP_PERCENT, 100.0 - crop.y);
        }
        self.brightness = self.brightness.clamp(-1.0, 1.0);
        self.contrast = self.contrast.clamp(0.0, 2.0);
        self.cutout_low = self.cutout_low.clamp(0.0, 1.0);
        self.cutout_high = self.cutout_high.clamp(self.cutout_low, 1.0);
        self.target_fps = self.target_fps.clamp(10, 120);
    }

    /// Load from the default settings path, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No settings file at {}, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.sanitize();
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(&PathBuf::from(SETTINGS_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_booth_layout() {
        let settings = BoothSettings::default();
        assert_eq!(settings.crops[0].as_array(), [10.0, 5.0, 40.0, 90.0]);
        assert_eq!(settings.layout, LayoutMode::Quad);
        assert!(settings.mirror);
        assert_eq!(settings.target_fps, 30);
    }

    #[test]
    fn sanitize_clamps_out_of_range_fields() {
        let mut settings = BoothSettings::default();
        settings.crops[0] = CropPercent {
            x: 150.0,
            y: -10.0,
            w: 0.0,
            h: 500.0,
        };
        settings.contrast = 9.0;
        settings.cutout_low = 0.8;
        settings.cutout_high = 0.2;
        settings.target_fps = 500;
        settings.sanitize();

        let crop = settings.crops[0];
        assert!(crop.x <= 100.0 - MIN_CROP_PERCENT);
        assert!(crop.y >= 0.0);
        assert!(crop.w >= MIN_CROP_PERCENT);
        assert!(crop.x + crop.w <= 100.0);
        assert!(crop.y + crop.h <= 100.0);
        assert_eq!(settings.contrast, 2.0);
        // The ramp stays ordered after clamping
        assert!(settings.cutout_high >= settings.cutout_low);
        assert_eq!(settings.target_fps, 120);
    }

    #[test]
    fn corrupt_json_falls_back_to_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join("photo-booth-test-corrupt.json");
        fs::write(&path, "{not json").unwrap();
        let settings = BoothSettings::load_from(&path);
        assert_eq!(settings.target_fps, BoothSettings::default().target_fps);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = std::env::temp_dir();
        let path = dir.join("photo-booth-test-roundtrip.json");

        let mut settings = BoothSettings::default();
        settings.camera_index = 2;
        settings.layout = LayoutMode::Overlay;
        settings.crops[1] = CropPercent {
            x: 50.0,
            y: 10.0,
            w: 30.0,
            h: 80.0,
        };
        settings.save_to(&path).unwrap();

        let loaded = BoothSettings::load_from(&path);
        assert_eq!(loaded.camera_index, 2);
        assert_eq!(loaded.layout, LayoutMode::Overlay);
        assert_eq!(loaded.crops[1].as_array(), [50.0, 10.0, 30.0, 80.0]);
        let _ = fs::remove_file(&path);
    }
}
