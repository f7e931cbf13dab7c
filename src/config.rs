//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};

use time::{Date, Month, OffsetDateTime};

time::serde::format_description!(target_date_format, Date, "[year]-[month]-[day]");

pub const MIN_COUNTDOWN_DAYS: u32 = 1;
pub const MAX_COUNTDOWN_DAYS: u32 = 30;
pub const MIN_CHECK_INTERVAL_SECS: u64 = 5;
const MIN_IMAGE_SCALE: f64 = 0.05;
const MAX_IMAGE_SCALE: f64 = 10.0;
const MAX_IMAGE_OFFSET_PX: f64 = 10_000.0;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    pub selected_preset_index: usize,
    /// Persisted for the settings editor; registration itself lives outside this crate.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Forwarded to the overlay renderer.
    #[serde(default)]
    pub prevent_minimize_on_show_desktop: bool,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_presets")]
    pub presets: Vec<Preset>,
}

/// Named bundle of target date, assets and visual/audio parameters.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Preset {
    #[serde(default = "default_preset_name")]
    pub name: String,
    #[serde(with = "target_date_format", default = "default_target_date")]
    pub target_date: Date,
    #[serde(default = "default_countdown_days")]
    pub countdown_days: u32,
    #[serde(default)]
    pub character_image_path: String,
    #[serde(default)]
    pub ice_image_path: String,
    #[serde(default)]
    pub audio_path: String,
    /// Baseline only; the countdown schedule overrides it while active.
    #[serde(default = "default_one")]
    pub character_opacity: f64,
    /// Baseline only; the countdown schedule overrides it while active.
    #[serde(default = "default_one")]
    pub ice_opacity: f64,
    #[serde(default = "default_one")]
    pub character_image_scale: f64,
    #[serde(default = "default_one")]
    pub ice_image_scale: f64,
    #[serde(default)]
    pub character_offset_x: f64,
    #[serde(default)]
    pub character_offset_y: f64,
    #[serde(default)]
    pub ice_offset_x: f64,
    #[serde(default)]
    pub ice_offset_y: f64,
    /// Advisory bound for the settings editor; not read by the schedule.
    #[serde(default = "default_max_audio_blur")]
    pub max_audio_blur: f64,
    /// Advisory bound for the settings editor; not read by the schedule.
    #[serde(default = "default_min_audio_volume")]
    pub min_audio_volume: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            selected_preset_index: 0,
            auto_start: true,
            prevent_minimize_on_show_desktop: false,
            check_interval_secs: default_check_interval_secs(),
            presets: default_presets(),
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            name: default_preset_name(),
            target_date: default_target_date(),
            countdown_days: default_countdown_days(),
            character_image_path: String::new(),
            ice_image_path: String::new(),
            audio_path: String::new(),
            character_opacity: 1.0,
            ice_opacity: 1.0,
            character_image_scale: 1.0,
            ice_image_scale: 1.0,
            character_offset_x: 0.0,
            character_offset_y: 0.0,
            ice_offset_x: 0.0,
            ice_offset_y: 0.0,
            max_audio_blur: default_max_audio_blur(),
            min_audio_volume: default_min_audio_volume(),
        }
    }
}

impl Config {
    pub fn selected_preset(&self) -> Option<&Preset> {
        self.presets.get(self.selected_preset_index)
    }
}

impl Preset {
    pub fn audio_path(&self) -> Option<&Path> {
        non_empty_path(&self.audio_path)
    }

    pub fn character_image_path(&self) -> Option<&Path> {
        non_empty_path(&self.character_image_path)
    }

    pub fn ice_image_path(&self) -> Option<&Path> {
        non_empty_path(&self.ice_image_path)
    }

    /// Applies `map` to each asset path field, leaving empty paths untouched.
    pub fn map_asset_paths<F>(&mut self, mut map: F)
    where
        F: FnMut(&Path) -> PathBuf,
    {
        for field in [
            &mut self.character_image_path,
            &mut self.ice_image_path,
            &mut self.audio_path,
        ] {
            if field.trim().is_empty() {
                continue;
            }
            let mapped = map(Path::new(field.as_str()));
            *field = mapped.to_string_lossy().into_owned();
        }
    }
}

fn non_empty_path(raw: &str) -> Option<&Path> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(Path::new(raw))
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn clamp_finite(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn sanitize_preset(preset: Preset) -> Preset {
    let name = if preset.name.trim().is_empty() {
        default_preset_name()
    } else {
        preset.name.trim().to_string()
    };
    Preset {
        name,
        countdown_days: preset
            .countdown_days
            .clamp(MIN_COUNTDOWN_DAYS, MAX_COUNTDOWN_DAYS),
        character_opacity: clamp_unit(preset.character_opacity, 1.0),
        ice_opacity: clamp_unit(preset.ice_opacity, 1.0),
        character_image_scale: clamp_finite(
            preset.character_image_scale,
            MIN_IMAGE_SCALE,
            MAX_IMAGE_SCALE,
            1.0,
        ),
        ice_image_scale: clamp_finite(
            preset.ice_image_scale,
            MIN_IMAGE_SCALE,
            MAX_IMAGE_SCALE,
            1.0,
        ),
        character_offset_x: clamp_finite(
            preset.character_offset_x,
            -MAX_IMAGE_OFFSET_PX,
            MAX_IMAGE_OFFSET_PX,
            0.0,
        ),
        character_offset_y: clamp_finite(
            preset.character_offset_y,
            -MAX_IMAGE_OFFSET_PX,
            MAX_IMAGE_OFFSET_PX,
            0.0,
        ),
        ice_offset_x: clamp_finite(
            preset.ice_offset_x,
            -MAX_IMAGE_OFFSET_PX,
            MAX_IMAGE_OFFSET_PX,
            0.0,
        ),
        ice_offset_y: clamp_finite(
            preset.ice_offset_y,
            -MAX_IMAGE_OFFSET_PX,
            MAX_IMAGE_OFFSET_PX,
            0.0,
        ),
        max_audio_blur: clamp_unit(preset.max_audio_blur, default_max_audio_blur()),
        min_audio_volume: clamp_unit(preset.min_audio_volume, default_min_audio_volume()),
        ..preset
    }
}

/// Clamps every field into its legal range.
pub fn sanitize_config(config: Config) -> Config {
    let mut presets: Vec<Preset> = config.presets.into_iter().map(sanitize_preset).collect();
    if presets.is_empty() {
        presets = default_presets();
    }
    let selected_preset_index = config.selected_preset_index.min(presets.len() - 1);

    Config {
        selected_preset_index,
        auto_start: config.auto_start,
        prevent_minimize_on_show_desktop: config.prevent_minimize_on_show_desktop,
        check_interval_secs: config.check_interval_secs.max(MIN_CHECK_INTERVAL_SECS),
        presets,
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_preset_name() -> String {
    "Default".to_string()
}

fn default_countdown_days() -> u32 {
    7
}

fn default_max_audio_blur() -> f64 {
    0.8
}

fn default_min_audio_volume() -> f64 {
    0.2
}

fn default_presets() -> Vec<Preset> {
    vec![Preset::default()]
}

/// December 25th of the current local year.
pub fn default_target_date() -> Date {
    let year = OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .year();
    Date::from_calendar_date(year, Month::December, 25).unwrap_or(Date::MIN)
}
