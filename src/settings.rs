//! Renderer settings and their double-buffered sharing between threads.
//!
//! Settings persist as JSON (see [`WaveFrontSettings::load`]). Control threads
//! write the *intermediate* copy through [`SharedSettings::update`]; the frame
//! loop promotes it to the *live* copy only at a frame boundary.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// Reservoir resampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReSTIRSettings {
    pub lights_per_bag: u32,
    pub num_light_bags: u32,
    /// Candidates streamed into each reservoir per frame.
    pub num_primary_samples: u32,
    pub reservoirs_per_pixel: u32,
    pub num_spatial_iterations: u32,
    pub num_spatial_samples: u32,
    /// Pixels in a grid cell share one light bag.
    pub pixel_grid_size: u32,
    /// Neighbour search radius in pixels.
    pub spatial_sample_radius: f32,
    pub enable_temporal: bool,
    pub enable_spatial: bool,
    /// Temporal history is clamped to this multiple of the per-frame sample count.
    pub temporal_history_factor: u32,
}

impl Default for ReSTIRSettings {
    fn default() -> Self {
        Self {
            lights_per_bag: 1000,
            num_light_bags: 50,
            num_primary_samples: 32,
            reservoirs_per_pixel: 1,
            num_spatial_iterations: 2,
            num_spatial_samples: 5,
            pixel_grid_size: 16,
            spatial_sample_radius: 30.0,
            enable_temporal: true,
            enable_spatial: true,
            temporal_history_factor: 20,
        }
    }
}

impl ReSTIRSettings {
    /// Fail with [`Error::Configuration`] unless every count and the radius are positive.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("lights_per_bag", self.lights_per_bag),
            ("num_light_bags", self.num_light_bags),
            ("num_primary_samples", self.num_primary_samples),
            ("reservoirs_per_pixel", self.reservoirs_per_pixel),
            ("num_spatial_iterations", self.num_spatial_iterations),
            ("num_spatial_samples", self.num_spatial_samples),
            ("pixel_grid_size", self.pixel_grid_size),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }
        if !(self.spatial_sample_radius > 0.0) {
            return Err(Error::config(format!(
                "spatial_sample_radius must be greater than zero, got {}",
                self.spatial_sample_radius
            )));
        }
        Ok(())
    }
}

/// Frame-level renderer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveFrontSettings {
    /// Resolution the wavefront passes run at.
    pub render_resolution: [u32; 2],
    /// Resolution of the presented image.
    pub output_resolution: [u32; 2],
    pub max_depth: u32,
    /// Minimum intersection distance passed to every trace launch.
    pub min_intersection_t: f32,
    pub max_intersection_t: f32,
    /// Accumulate frames into a running average.
    pub blend_output: bool,
    pub background: [f32; 3],
    pub exposure: f32,
    pub restir: ReSTIRSettings,
}

impl Default for WaveFrontSettings {
    fn default() -> Self {
        Self {
            render_resolution: [640, 360],
            output_resolution: [640, 360],
            max_depth: 3,
            min_intersection_t: 1e-3,
            max_intersection_t: 1e4,
            blend_output: false,
            background: [0.0, 0.0, 0.0],
            exposure: 1.0,
            restir: ReSTIRSettings::default(),
        }
    }
}

impl WaveFrontSettings {
    /// Per-user settings file: `<config dir>/wavetrace/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("wavetrace");
            p.push("settings.json");
            p
        })
    }

    /// Load from the per-user settings file, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(Error::FileNotFound(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load and validate settings from `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save to the per-user settings file.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path().ok_or_else(|| Error::other("no config directory"))?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let [rw, rh] = self.render_resolution;
        let [ow, oh] = self.output_resolution;
        if rw == 0 || rh == 0 {
            return Err(Error::config(format!("render resolution {rw}x{rh} is empty")));
        }
        if ow == 0 || oh == 0 {
            return Err(Error::config(format!("output resolution {ow}x{oh} is empty")));
        }
        if self.max_depth == 0 {
            return Err(Error::config("max_depth must be greater than zero"));
        }
        if !(self.min_intersection_t >= 0.0 && self.max_intersection_t > self.min_intersection_t) {
            return Err(Error::config(format!(
                "invalid intersection range [{}, {}]",
                self.min_intersection_t, self.max_intersection_t
            )));
        }
        self.restir.validate()
    }

    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.render_resolution[0] as usize * self.render_resolution[1] as usize
    }
}

/// What changed when intermediate settings were promoted to live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub render_resized: bool,
    pub output_resized: bool,
    pub restir_changed: bool,
    /// Blending went from disabled to enabled.
    pub blend_enabled: bool,
    pub any: bool,
}

struct SettingsState {
    live: WaveFrontSettings,
    intermediate: WaveFrontSettings,
}

/// Settings shared between the frame loop and control threads.
pub struct SharedSettings {
    state: Mutex<SettingsState>,
}

impl SharedSettings {
    pub fn new(settings: WaveFrontSettings) -> Self {
        Self {
            state: Mutex::new(SettingsState {
                live: settings.clone(),
                intermediate: settings,
            }),
        }
    }

    /// Modify the intermediate settings. Safe to call at any time.
    pub fn update(&self, f: impl FnOnce(&mut WaveFrontSettings)) {
        f(&mut self.state.lock().intermediate);
    }

    /// Settings as they will be after the next frame boundary.
    pub fn intermediate(&self) -> WaveFrontSettings {
        self.state.lock().intermediate.clone()
    }

    /// Settings the current frame is using.
    pub fn live(&self) -> WaveFrontSettings {
        self.state.lock().live.clone()
    }

    /// Promote intermediate to live. Only the frame loop calls this, between frames.
    ///
    /// Invalid intermediate settings are rejected and the intermediate copy is
    /// reverted so a bad edit cannot stall every subsequent frame.
    pub fn apply_pending(&self) -> Result<SettingsChange> {
        let mut state = self.state.lock();
        if state.intermediate == state.live {
            return Ok(SettingsChange::default());
        }
        if let Err(e) = state.intermediate.validate() {
            state.intermediate = state.live.clone();
            return Err(e);
        }
        let change = SettingsChange {
            render_resized: state.intermediate.render_resolution != state.live.render_resolution,
            output_resized: state.intermediate.output_resolution != state.live.output_resolution,
            restir_changed: state.intermediate.restir != state.live.restir,
            blend_enabled: state.intermediate.blend_output && !state.live.blend_output,
            any: true,
        };
        state.live = state.intermediate.clone();
        Ok(change)
    }
}
