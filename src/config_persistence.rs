use std::path::{Component, Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;
use time::macros::format_description;
use time::Date;
use toml_edit::{DocumentMut, Item, Table};

use crate::config::{default_target_date, sanitize_config, Config, Preset};

/// Seed file looked up next to the executable when no TOML config exists yet.
pub const LEGACY_SEED_FILE_NAME: &str = "default-preset.json";

#[derive(Debug, Default, Deserialize)]
struct LegacySeedFile {
    #[serde(rename = "DefaultPreset")]
    default_preset: Option<LegacyPreset>,
    #[serde(rename = "DefaultConfig")]
    default_config: Option<LegacyGlobals>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LegacyPreset {
    name: String,
    target_date: String,
    countdown_days: i64,
    character_image_path: String,
    ice_image_path: String,
    audio_path: String,
    character_opacity: f64,
    ice_opacity: f64,
    character_image_scale: f64,
    ice_image_scale: f64,
    character_offset_x: f64,
    character_offset_y: f64,
    ice_offset_x: f64,
    ice_offset_y: f64,
    max_audio_blur: f64,
    min_audio_volume: f64,
}

impl Default for LegacyPreset {
    fn default() -> Self {
        let preset = Preset::default();
        Self {
            name: preset.name,
            target_date: String::new(),
            countdown_days: i64::from(preset.countdown_days),
            character_image_path: String::new(),
            ice_image_path: String::new(),
            audio_path: String::new(),
            character_opacity: preset.character_opacity,
            ice_opacity: preset.ice_opacity,
            character_image_scale: preset.character_image_scale,
            ice_image_scale: preset.ice_image_scale,
            character_offset_x: preset.character_offset_x,
            character_offset_y: preset.character_offset_y,
            ice_offset_x: preset.ice_offset_x,
            ice_offset_y: preset.ice_offset_y,
            max_audio_blur: preset.max_audio_blur,
            min_audio_volume: preset.min_audio_volume,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LegacyGlobals {
    #[serde(rename = "AutoStart")]
    auto_start: bool,
    #[serde(rename = "PreventMinimizeOnWinD")]
    prevent_minimize_on_show_desktop: bool,
}

impl Default for LegacyGlobals {
    fn default() -> Self {
        Self {
            auto_start: true,
            prevent_minimize_on_show_desktop: false,
        }
    }
}

impl LegacyPreset {
    fn into_preset(self) -> Preset {
        Preset {
            name: self.name,
            target_date: parse_legacy_date(&self.target_date).unwrap_or_else(default_target_date),
            countdown_days: u32::try_from(self.countdown_days.max(0)).unwrap_or(u32::MAX),
            character_image_path: self.character_image_path,
            ice_image_path: self.ice_image_path,
            audio_path: self.audio_path,
            character_opacity: self.character_opacity,
            ice_opacity: self.ice_opacity,
            character_image_scale: self.character_image_scale,
            ice_image_scale: self.ice_image_scale,
            character_offset_x: self.character_offset_x,
            character_offset_y: self.character_offset_y,
            ice_offset_x: self.ice_offset_x,
            ice_offset_y: self.ice_offset_y,
            max_audio_blur: self.max_audio_blur,
            min_audio_volume: self.min_audio_volume,
        }
    }
}

/// Accepts `YYYY-MM-DD` optionally followed by a time part (`2025-12-25T00:00:00`).
fn parse_legacy_date(raw: &str) -> Option<Date> {
    let date_part = raw.trim().get(..10)?;
    Date::parse(date_part, format_description!("[year]-[month]-[day]")).ok()
}

pub fn legacy_seed_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(LEGACY_SEED_FILE_NAME))
}

/// Builds a config from a legacy seed file. `Ok(None)` when the file does not exist.
pub fn load_legacy_seed(path: &Path) -> Result<Option<Config>, String> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {}", path.display(), err)),
    };
    let seed: LegacySeedFile = serde_json::from_str(&text)
        .map_err(|err| format!("failed to parse {}: {}", path.display(), err))?;

    let globals = seed.default_config.unwrap_or_default();
    let preset = seed.default_preset.unwrap_or_default().into_preset();
    let mut config = Config {
        auto_start: globals.auto_start,
        prevent_minimize_on_show_desktop: globals.prevent_minimize_on_show_desktop,
        presets: vec![preset],
        ..Config::default()
    };
    resolve_asset_paths(&mut config, &base_dir_of(path));
    Ok(Some(config))
}

fn base_dir_of(file_path: &Path) -> PathBuf {
    match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Turns relative asset paths into paths under `base_dir`.
pub fn resolve_asset_paths(config: &mut Config, base_dir: &Path) {
    for preset in &mut config.presets {
        preset.map_asset_paths(|path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            }
        });
    }
}

/// Stores asset paths living under `base_dir` relative to it, with forward slashes.
pub fn relativize_asset_paths(config: &mut Config, base_dir: &Path) {
    for preset in &mut config.presets {
        preset.map_asset_paths(|path| match path.strip_prefix(base_dir) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                let parts: Vec<String> = relative
                    .components()
                    .filter_map(|component| match component {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                PathBuf::from(parts.join("/"))
            }
            _ => path.to_path_buf(),
        });
    }
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let replacing_scalar_with_aot = item.is_array_of_tables()
        && table
            .get(key)
            .is_some_and(|current| !current.is_array_of_tables());
    if replacing_scalar_with_aot {
        table.remove(key);
        table[key] = item;
        return;
    }

    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn merge_table_with_targeted_updates(destination: &mut Table, source: &Table) {
    for (key, source_item) in source.iter() {
        match source_item {
            Item::Table(source_table) => {
                if !destination.get(key).is_some_and(Item::is_table) {
                    destination.insert(key, Item::Table(Table::new()));
                }
                if let Some(destination_table) =
                    destination.get_mut(key).and_then(Item::as_table_mut)
                {
                    merge_table_with_targeted_updates(destination_table, source_table);
                }
            }
            Item::ArrayOfTables(source_array) => {
                if !destination.get(key).is_some_and(Item::is_array_of_tables) {
                    set_table_value_preserving_decor(destination, key, source_item.clone());
                    continue;
                }
                let Some(destination_array) = destination
                    .get_mut(key)
                    .and_then(Item::as_array_of_tables_mut)
                else {
                    continue;
                };
                for (index, source_table) in source_array.iter().enumerate() {
                    match destination_array.get_mut(index) {
                        Some(destination_table) => {
                            merge_table_with_targeted_updates(destination_table, source_table)
                        }
                        None => destination_array.push(source_table.clone()),
                    }
                }
                while destination_array.len() > source_array.len() {
                    destination_array.remove(source_array.len());
                }
            }
            _ => {
                set_table_value_preserving_decor(destination, key, source_item.clone());
            }
        }
    }
}

/// Rewrites `existing_text` with the values of `config`, keeping comments and layout.
pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, String> {
    let next_config_text = toml::to_string(config)
        .map_err(|err| format!("failed to serialize config to TOML: {}", err))?;
    let next_document = next_config_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse serialized config TOML document: {}", err))?;
    let mut existing_document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse existing config as TOML document: {}", err))?;

    merge_table_with_targeted_updates(existing_document.as_table_mut(), next_document.as_table());
    Ok(existing_document.to_string())
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let mut config_to_save = config.clone();
    relativize_asset_paths(&mut config_to_save, &base_dir_of(path));

    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = if let Some(existing_text) = existing_text {
        match serialize_config_with_preserved_comments(&existing_text, &config_to_save) {
            Ok(updated_text) => Some(updated_text),
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Writing plain TOML.",
                    path.display(),
                    err
                );
                toml::to_string(&config_to_save).ok()
            }
        }
    } else {
        toml::to_string(&config_to_save).ok()
    };

    let Some(config_text) = config_text else {
        log::error!("Failed to serialize config for {}", path.display());
        return;
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(err) = std::fs::create_dir_all(parent) {
            log::error!("Failed to create config directory {}: {}", parent.display(), err);
            return;
        }
    }
    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

/// Loads, sanitizes and path-resolves the config at `path`, seeding it on first run.
pub fn load_config_file(path: &Path) -> Config {
    load_config_file_with_seed(path, legacy_seed_path().as_deref())
}

pub fn load_config_file_with_seed(path: &Path, legacy_seed: Option<&Path>) -> Config {
    let config = match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "Failed to parse config file {}. Using seed defaults. error={}",
                    path.display(),
                    err
                );
                seed_config(legacy_seed)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let seeded = seed_config(legacy_seed);
            info!("Config: writing initial config to {}", path.display());
            persist_config_file(&seeded, path);
            seeded
        }
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using seed defaults. error={}",
                path.display(),
                err
            );
            seed_config(legacy_seed)
        }
    };

    let mut config = sanitize_config(config);
    resolve_asset_paths(&mut config, &base_dir_of(path));
    config
}

fn seed_config(legacy_seed: Option<&Path>) -> Config {
    let Some(seed_path) = legacy_seed else {
        return Config::default();
    };
    match load_legacy_seed(seed_path) {
        Ok(Some(config)) => {
            info!("Config: seeded from {}", seed_path.display());
            sanitize_config(config)
        }
        Ok(None) => Config::default(),
        Err(err) => {
            warn!("Config: ignoring legacy seed. error={}", err);
            Config::default()
        }
    }
}
