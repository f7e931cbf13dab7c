//! Layer geometry for the overlay renderer.

use std::path::{Path, PathBuf};

use image::ImageError;
use log::debug;

use crate::config::Preset;
use crate::error::OverlayError;
use crate::progress::PresentationParameters;

const MIN_WINDOW_EDGE_PX: f64 = 300.0;
const WINDOW_MARGIN_PX: f64 = 40.0;

/// One positioned, scaled and faded image.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerLayout {
    pub image_path: PathBuf,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub opacity: f64,
}

impl LayerLayout {
    fn right(&self) -> f64 {
        self.x + self.width
    }

    fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Character drawn beneath the ice layer inside a window sized to fit both.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayout {
    pub character: LayerLayout,
    pub ice: LayerLayout,
    pub window_width: f64,
    pub window_height: f64,
}

/// Lays out both images of `preset` with the opacities from `parameters`.
pub fn compute_overlay_layout(
    preset: &Preset,
    parameters: &PresentationParameters,
) -> Result<OverlayLayout, OverlayError> {
    let character_path = preset
        .character_image_path()
        .ok_or(OverlayError::ImageNotConfigured("character"))?;
    let ice_path = preset
        .ice_image_path()
        .ok_or(OverlayError::ImageNotConfigured("ice"))?;

    let character = layout_layer(
        character_path,
        preset.character_image_scale,
        preset.character_offset_x,
        preset.character_offset_y,
        parameters.character_opacity,
    )?;
    let ice = layout_layer(
        ice_path,
        preset.ice_image_scale,
        preset.ice_offset_x,
        preset.ice_offset_y,
        parameters.ice_opacity,
    )?;

    let window_width =
        (character.right().max(ice.right()) + WINDOW_MARGIN_PX).max(MIN_WINDOW_EDGE_PX);
    let window_height =
        (character.bottom().max(ice.bottom()) + WINDOW_MARGIN_PX).max(MIN_WINDOW_EDGE_PX);

    debug!(
        "Overlay: layout window={}x{} character={}x{} ice={}x{}",
        window_width, window_height, character.width, character.height, ice.width, ice.height
    );

    Ok(OverlayLayout {
        character,
        ice,
        window_width,
        window_height,
    })
}

fn layout_layer(
    path: &Path,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
    opacity: f64,
) -> Result<LayerLayout, OverlayError> {
    let (width, height) = image::image_dimensions(path).map_err(|err| match err {
        ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            OverlayError::ImageNotFound(path.to_path_buf())
        }
        other => OverlayError::ImageUnreadable {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })?;
    Ok(LayerLayout {
        image_path: path.to_path_buf(),
        x: offset_x,
        y: offset_y,
        width: f64::from(width) * scale,
        height: f64::from(height) * scale,
        opacity,
    })
}
