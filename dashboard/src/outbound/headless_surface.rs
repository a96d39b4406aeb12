//! In-memory rendering surface.
//!
//! Mirrors the bookkeeping of the browser map widget: an ordered layer stack
//! (bottom-most first), registered sources, per-layer filters and visibility,
//! and the camera. A style swap resets the stack to the style's own base
//! layers and keeps the surface closed to mutations until the load signal is
//! released.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::ports::{
    Camera, RenderSurface, RenderSurfaceError, StyleLayerSummary, StyleLoadSignal, StyleLoaded,
    Visibility,
};
use crate::domain::{FilterExpression, RenderLayer, TileSource};

#[derive(Debug, Clone)]
struct StackEntry {
    summary: StyleLayerSummary,
    render: Option<RenderLayer>,
}

impl StackEntry {
    fn base(summary: StyleLayerSummary) -> Self {
        Self {
            summary,
            render: None,
        }
    }
}

/// Headless [`RenderSurface`] used by the planning CLI and the test suites.
#[derive(Debug)]
pub struct HeadlessSurface {
    base_layers: Vec<StyleLayerSummary>,
    style_camera: Camera,
    style_url: Option<String>,
    sources: BTreeMap<String, TileSource>,
    stack: Vec<StackEntry>,
    camera: Camera,
    mutations: u64,
    moves: u64,
    pending: Option<StyleLoadSignal>,
    manual_style_load: bool,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessSurface {
    /// Empty surface whose style loads complete immediately.
    pub fn new() -> Self {
        Self {
            base_layers: Vec::new(),
            style_camera: Camera::default(),
            style_url: None,
            sources: BTreeMap::new(),
            stack: Vec::new(),
            camera: Camera::default(),
            mutations: 0,
            moves: 0,
            pending: None,
            manual_style_load: false,
        }
    }

    /// Layers every style document ships with, such as basemap rasters.
    ///
    /// They are installed now and again after each style swap.
    pub fn with_base_layers(mut self, layers: Vec<StyleLayerSummary>) -> Self {
        self.stack = layers.iter().cloned().map(StackEntry::base).collect();
        self.base_layers = layers;
        self
    }

    /// Camera a freshly loaded style starts from.
    pub fn with_style_camera(mut self, camera: Camera) -> Self {
        self.style_camera = camera;
        self
    }

    /// Hold style loads open until [`HeadlessSurface::finish_style_load`].
    pub fn with_manual_style_load(mut self) -> Self {
        self.manual_style_load = true;
        self
    }

    /// Release a pending style load.
    ///
    /// Returns `false` when no load was pending.
    pub fn finish_style_load(&mut self) -> bool {
        match self.pending.take() {
            Some(signal) => {
                signal.finish();
                true
            }
            None => false,
        }
    }

    /// Whether a style load is still pending.
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// URL of the last style requested.
    pub fn style_url(&self) -> Option<&str> {
        self.style_url.as_deref()
    }

    /// Registered source ids in lexical order.
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Render layer definition for `id`.
    pub fn layer(&self, id: &str) -> Option<&RenderLayer> {
        self.entry(id).and_then(|entry| entry.render.as_ref())
    }

    /// Current filter of render layer `id`.
    pub fn filter(&self, id: &str) -> Option<&FilterExpression> {
        self.layer(id).map(|layer| &layer.filter)
    }

    /// Count of layer and source mutations applied so far.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Count of move operations applied so far.
    pub fn moves(&self) -> u64 {
        self.moves
    }

    fn entry(&self, id: &str) -> Option<&StackEntry> {
        self.stack.iter().find(|entry| entry.summary.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut StackEntry, RenderSurfaceError> {
        self.stack
            .iter_mut()
            .find(|entry| entry.summary.id == id)
            .ok_or_else(|| RenderSurfaceError::missing_layer(id))
    }

    fn index_of(&self, id: &str) -> Result<usize, RenderSurfaceError> {
        self.stack
            .iter()
            .position(|entry| entry.summary.id == id)
            .ok_or_else(|| RenderSurfaceError::missing_layer(id))
    }

    fn ensure_ready(&self) -> Result<(), RenderSurfaceError> {
        if self.is_loading() {
            return Err(RenderSurfaceError::not_ready());
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.mutations += 1;
    }
}

impl RenderSurface for HeadlessSurface {
    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, source: &TileSource) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        self.sources.insert(source.id.clone(), source.clone());
        self.touch();
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        let in_use = self
            .stack
            .iter()
            .filter_map(|entry| entry.render.as_ref())
            .any(|layer| layer.source == id);
        if in_use {
            return Err(RenderSurfaceError::source_in_use(id));
        }
        self.sources
            .remove(id)
            .ok_or_else(|| RenderSurfaceError::missing_source(id))?;
        self.touch();
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    fn add_layer(&mut self, layer: &RenderLayer) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        if !self.sources.contains_key(&layer.source) {
            return Err(RenderSurfaceError::missing_source(layer.source.clone()));
        }
        if self.has_layer(&layer.id) {
            return Err(RenderSurfaceError::duplicate_layer(layer.id.clone()));
        }
        self.stack.push(StackEntry {
            summary: StyleLayerSummary::new(layer.id.clone(), layer.kind.as_str()),
            render: Some(layer.clone()),
        });
        self.touch();
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        let index = self.index_of(id)?;
        self.stack.remove(index);
        self.touch();
        Ok(())
    }

    fn move_layer(&mut self, id: &str, before: Option<&str>) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        let from = self.index_of(id)?;
        if let Some(anchor) = before {
            if anchor == id {
                return Ok(());
            }
            self.index_of(anchor)?;
        }
        let entry = self.stack.remove(from);
        let to = match before {
            Some(anchor) => self.index_of(anchor)?,
            None => self.stack.len(),
        };
        self.stack.insert(to, entry);
        self.moves += 1;
        self.touch();
        debug!(layer = id, before = ?before, "moved layer");
        Ok(())
    }

    fn set_filter(&mut self, id: &str, filter: &FilterExpression) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        let layer = self
            .entry_mut(id)?
            .render
            .as_mut()
            .ok_or_else(|| RenderSurfaceError::missing_layer(id))?;
        layer.filter = filter.clone();
        self.touch();
        Ok(())
    }

    fn set_visibility(
        &mut self,
        id: &str,
        visibility: Visibility,
    ) -> Result<(), RenderSurfaceError> {
        self.ensure_ready()?;
        self.entry_mut(id)?.summary.visibility = visibility;
        self.touch();
        Ok(())
    }

    fn visibility(&self, id: &str) -> Option<Visibility> {
        self.entry(id).map(|entry| entry.summary.visibility)
    }

    fn style_layers(&self) -> Vec<StyleLayerSummary> {
        self.stack.iter().map(|entry| entry.summary.clone()).collect()
    }

    fn camera(&self) -> Camera {
        self.camera
    }

    fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    fn set_style(&mut self, style_url: &str) -> StyleLoaded {
        self.style_url = Some(style_url.to_owned());
        self.sources.clear();
        self.stack = self
            .base_layers
            .iter()
            .cloned()
            .map(StackEntry::base)
            .collect();
        self.camera = self.style_camera;
        self.touch();
        debug!(style_url, "style replaced");
        if self.manual_style_load {
            let (signal, gate) = StyleLoaded::pending();
            // Replacing an unfinished load aborts its waiter.
            self.pending = Some(signal);
            gate
        } else {
            self.pending = None;
            StyleLoaded::ready()
        }
    }
}
