//! Basemap switching and grouping of style layers for the sidebar.
//!
//! Basemaps are raster layers shipped with the style document whose id
//! contains `basemap`. Exactly one is normally shown; the chosen one sits just
//! below the first non-raster layer so data layers always draw above it.

use serde::Serialize;
use tracing::debug;

use super::error::LayerError;
use super::materializer::LayerRole;
use super::ports::{RenderSurface, RenderSurfaceError, StyleLayerSummary, Visibility};

/// Title-case a snake_case or kebab-case identifier.
///
/// # Examples
/// ```
/// use dashboard::domain::pretty_label;
///
/// assert_eq!(pretty_label("active_lots"), "Active Lots");
/// assert_eq!(pretty_label("street-map"), "Street Map");
/// ```
pub fn pretty_label(raw: &str) -> String {
    let mut label = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for ch in raw.chars() {
        let ch = if ch == '-' || ch == '_' { ' ' } else { ch };
        if ch.is_alphanumeric() {
            if at_word_start {
                label.extend(ch.to_uppercase());
            } else {
                label.push(ch);
            }
            at_word_start = false;
        } else {
            label.push(ch);
            at_word_start = true;
        }
    }
    label
}

const MARKER: &str = "basemap";

fn basemap_name(id: &str) -> String {
    let lowered = id.to_ascii_lowercase();
    let stripped = match lowered.find(MARKER) {
        Some(found) => {
            let head = id.get(..found).unwrap_or_default();
            let head = head.strip_suffix('-').unwrap_or(head);
            let tail = id.get(found + MARKER.len()..).unwrap_or_default();
            format!("{head}{tail}")
        }
        None => id.to_owned(),
    };
    let name = pretty_label(&stripped).trim().to_owned();
    if name.is_empty() {
        "Basemap".to_owned()
    } else {
        name
    }
}

/// One selectable basemap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Basemap {
    pub id: String,
    pub name: String,
}

/// Basemaps found in the current style, bottom-most first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasemapCatalogue {
    basemaps: Vec<Basemap>,
}

impl BasemapCatalogue {
    /// Collect raster layers whose id mentions `basemap`.
    pub fn detect(style_layers: &[StyleLayerSummary]) -> Self {
        let basemaps = style_layers
            .iter()
            .filter(|layer| layer.is_raster() && layer.id.to_ascii_lowercase().contains(MARKER))
            .map(|layer| Basemap {
                id: layer.id.clone(),
                name: basemap_name(&layer.id),
            })
            .collect();
        Self { basemaps }
    }

    /// Every basemap, bottom-most first.
    pub fn basemaps(&self) -> &[Basemap] {
        &self.basemaps
    }

    /// Whether any basemap is shown.
    pub fn any_visible(&self, surface: &dyn RenderSurface) -> bool {
        self.basemaps
            .iter()
            .any(|basemap| surface.visibility(&basemap.id).is_some_and(Visibility::is_visible))
    }

    /// The top-most visible basemap, or the first one when none is shown.
    pub fn current(&self, surface: &dyn RenderSurface) -> Option<&Basemap> {
        self.basemaps
            .iter()
            .rev()
            .find(|basemap| surface.visibility(&basemap.id).is_some_and(Visibility::is_visible))
            .or_else(|| self.basemaps.first())
    }

    /// Switcher label for the current state.
    pub fn label(&self, surface: &dyn RenderSurface) -> String {
        if !self.any_visible(surface) {
            return "Basemap Off".to_owned();
        }
        self.current(surface)
            .map_or_else(|| "Change Basemap".to_owned(), |basemap| basemap.name.clone())
    }

    /// Show `id`, hide every other basemap, and slot it just below the first
    /// non-raster layer (or on top when the style is all raster).
    pub fn select(&self, id: &str, surface: &mut dyn RenderSurface) -> Result<(), LayerError> {
        if !self.basemaps.iter().any(|basemap| basemap.id == id) {
            return Err(LayerError::not_found(id));
        }
        self.apply_selection(id, surface)
            .map_err(|error| LayerError::surface(error.to_string()))?;
        debug!(basemap = id, "basemap selected");
        Ok(())
    }

    fn apply_selection(&self, id: &str, surface: &mut dyn RenderSurface) -> Result<(), RenderSurfaceError> {
        for basemap in &self.basemaps {
            if surface.has_layer(&basemap.id) {
                surface.set_visibility(&basemap.id, Visibility::None)?;
            }
        }
        if !surface.has_layer(id) {
            return Ok(());
        }
        surface.set_visibility(id, Visibility::Visible)?;
        let anchor = surface
            .style_layers()
            .into_iter()
            .find(|layer| !layer.is_raster())
            .map(|layer| layer.id);
        surface.move_layer(id, anchor.as_deref())
    }

    /// Hide every basemap when any is shown, otherwise show them all.
    ///
    /// Returns whether basemaps are shown afterwards.
    pub fn toggle_all(&self, surface: &mut dyn RenderSurface) -> Result<bool, LayerError> {
        let show = !self.any_visible(surface);
        let visibility = Visibility::from_flag(show);
        for basemap in &self.basemaps {
            if surface.has_layer(&basemap.id) {
                surface
                    .set_visibility(&basemap.id, visibility)
                    .map_err(|error| LayerError::surface(error.to_string()))?;
            }
        }
        Ok(show)
    }
}

/// Style layers sharing one name prefix, such as `roads-outline` and
/// `roads-fill`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerGroup {
    pub name: String,
    pub label: String,
    /// Member ids, top-most first.
    pub layer_ids: Vec<String>,
}

fn split_group_id(id: &str) -> Option<&str> {
    const ROLES: [LayerRole; 7] = [
        LayerRole::NetworkOutline,
        LayerRole::NetworkFill,
        LayerRole::Circle,
        LayerRole::Symbol,
        LayerRole::Heatmap,
        LayerRole::Fill,
        LayerRole::Outline,
    ];
    let known = ROLES.iter().find_map(|role| {
        id.strip_suffix(role.as_str())
            .and_then(|rest| rest.strip_suffix('-'))
    });
    known
        .or_else(|| id.rsplit_once('-').map(|(name, _)| name))
        .filter(|name| !name.is_empty())
}

/// Group dashed style layer ids by their name prefix, skipping basemaps.
///
/// Groups keep first-appearance order; members are listed top-most first.
pub fn group_style_layers(style_layers: &[StyleLayerSummary]) -> Vec<LayerGroup> {
    let mut groups: Vec<LayerGroup> = Vec::new();
    for layer in style_layers {
        if layer.id.to_ascii_lowercase().ends_with("-basemap") {
            continue;
        }
        let Some(name) = split_group_id(&layer.id) else {
            continue;
        };
        match groups.iter_mut().find(|group| group.name == name) {
            Some(group) => group.layer_ids.insert(0, layer.id.clone()),
            None => groups.push(LayerGroup {
                name: name.to_owned(),
                label: pretty_label(name),
                layer_ids: vec![layer.id.clone()],
            }),
        }
    }
    groups
}

/// Hide every member when any is shown, otherwise show them all.
///
/// Returns whether the group is shown afterwards.
pub fn toggle_group_visibility(
    group: &LayerGroup,
    surface: &mut dyn RenderSurface,
) -> Result<bool, RenderSurfaceError> {
    let any_visible = group
        .layer_ids
        .iter()
        .any(|id| surface.visibility(id).is_some_and(Visibility::is_visible));
    let visibility = Visibility::from_flag(!any_visible);
    for id in &group.layer_ids {
        if surface.has_layer(id) {
            surface.set_visibility(id, visibility)?;
        }
    }
    Ok(!any_visible)
}
