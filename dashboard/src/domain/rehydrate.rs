//! Replay of the layer list after a full style replacement.
//!
//! A style swap discards every source and layer on the surface. The
//! rehydrator records the camera, waits for the surface's one-shot load
//! gate, then rebuilds the layers the store holds at that point, filtered
//! to the principal known at that point. Sidebar actions that ran while the
//! style was loading are therefore kept rather than undone. A layer that
//! fails to come back is recorded and skipped; the others still return.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{LayerError, RehydrationFailure};
use super::filter::FilterBuilder;
use super::introspector::GeometryIntrospector;
use super::layer::{LayerDescriptor, LayerName};
use super::layer_service::AppState;
use super::lock_or_recover;
use super::materializer::{TileTemplate, apply, materialize, set_visibility};
use super::ordering::RenderOrderCoordinator;
use super::ports::{Camera, RenderSurface, Visibility};

/// State captured immediately before a style swap.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSnapshot {
    /// Camera to restore once the new style is drawn.
    pub camera: Camera,
    /// Layer list at the time the swap was requested.
    pub descriptors: Vec<LayerDescriptor>,
}

impl StyleSnapshot {
    /// Copy the camera and the ordered descriptors.
    pub fn capture(surface: &dyn RenderSurface, descriptors: &[LayerDescriptor]) -> Self {
        Self {
            camera: surface.camera(),
            descriptors: descriptors.to_vec(),
        }
    }

    /// Layers present at capture time that `current` no longer holds.
    pub fn dropped_since<'a>(
        &'a self,
        current: &'a [LayerDescriptor],
    ) -> impl Iterator<Item = &'a LayerName> + 'a {
        self.descriptors
            .iter()
            .map(LayerDescriptor::name)
            .filter(move |name| !current.iter().any(|layer| layer.name() == *name))
    }
}

/// Outcome of one rehydration pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehydrationReport {
    /// Layers drawn again on the new style, bottom-most first.
    pub restored: Vec<LayerName>,
    /// Layers that could not be drawn, with the reason.
    pub failures: Vec<RehydrationFailure>,
}

impl RehydrationReport {
    /// Whether every layer came back.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert per-layer failures into [`LayerError::PartialRehydration`].
    ///
    /// # Errors
    ///
    /// [`LayerError::PartialRehydration`] when any layer failed.
    pub fn into_result(self) -> Result<Self, LayerError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(LayerError::PartialRehydration {
                failures: self.failures,
            })
        }
    }
}

/// Rebuilds the layer list on a freshly loaded style.
pub struct StyleSwapRehydrator {
    introspector: Arc<GeometryIntrospector>,
    tiles: TileTemplate,
    filters: FilterBuilder,
    coordinator: RenderOrderCoordinator,
}

impl StyleSwapRehydrator {
    /// Create a rehydrator sharing the session's introspector.
    pub fn new(introspector: Arc<GeometryIntrospector>, tiles: TileTemplate) -> Self {
        Self {
            introspector,
            tiles,
            filters: FilterBuilder,
            coordinator: RenderOrderCoordinator,
        }
    }

    /// Replace the style and replay the layer list once it has loaded.
    ///
    /// `state` is read again after the load gate opens, so removals,
    /// toggles, moves and principal changes made while the style loaded all
    /// hold on the new style.
    ///
    /// # Errors
    ///
    /// [`LayerError::Surface`] when the load gate is abandoned. Per-layer
    /// failures are collected in the report instead.
    pub async fn swap_style<S: RenderSurface>(
        &self,
        state: &Mutex<AppState>,
        surface: &Mutex<S>,
        style_url: &str,
    ) -> Result<RehydrationReport, LayerError> {
        let (snapshot, loaded) = {
            let state = lock_or_recover(state);
            let mut surface = lock_or_recover(surface);
            let snapshot = StyleSnapshot::capture(&*surface, &state.store().snapshot());
            (snapshot, surface.set_style(style_url))
        };
        info!(
            style_url,
            layers = snapshot.descriptors.len(),
            "style swap requested"
        );

        loaded
            .wait()
            .await
            .map_err(|error| LayerError::surface(error.to_string()))?;
        Ok(self.replay(state, surface, &snapshot).await)
    }

    /// Rebuild every layer `state` currently holds, then restore the
    /// stacking and the camera recorded in `snapshot`.
    pub async fn replay<S: RenderSurface>(
        &self,
        state: &Mutex<AppState>,
        surface: &Mutex<S>,
        snapshot: &StyleSnapshot,
    ) -> RehydrationReport {
        let pending = lock_or_recover(state).store().snapshot();
        let mut report = RehydrationReport::default();
        for descriptor in &pending {
            match self.restore(state, surface, descriptor).await {
                Ok(true) => report.restored.push(descriptor.name().clone()),
                Ok(false) => {
                    debug!(layer = %descriptor.name(), "layer removed while the style loaded");
                }
                Err(error) => {
                    warn!(
                        layer = %descriptor.name(),
                        error = %error,
                        "layer could not be restored after style swap"
                    );
                    report.failures.push(RehydrationFailure {
                        layer: descriptor.name().clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let state = lock_or_recover(state);
        let current = state.store().snapshot();
        let mut surface = lock_or_recover(surface);
        if let Err(error) = self.coordinator.reconcile(&current, &mut *surface) {
            warn!(error = %error, "render order not restored after style swap");
        }
        surface.set_camera(snapshot.camera);
        info!(
            restored = report.restored.len(),
            failed = report.failures.len(),
            dropped = snapshot.dropped_since(&current).count(),
            "style swap rehydrated"
        );
        report
    }

    /// Draw the stored version of `descriptor` on the new style.
    ///
    /// Returns `Ok(false)` when the layer left the store before it could be
    /// drawn. The store and the principal are read under the state lock,
    /// which is held until the surface has been updated.
    async fn restore<S: RenderSurface>(
        &self,
        state: &Mutex<AppState>,
        surface: &Mutex<S>,
        descriptor: &LayerDescriptor,
    ) -> Result<bool, LayerError> {
        let fields = self.introspector.fields_of(descriptor.table()).await;

        let state = lock_or_recover(state);
        let Some(current) = state.store().get(descriptor.name().as_ref()) else {
            return Ok(false);
        };
        let fields = fields?;
        let owner_scoped = current.is_owner_scoped() || FilterBuilder::is_owner_scoped(&fields);
        let current = current.clone().with_owner_scope(owner_scoped);
        let filter = self
            .filters
            .for_descriptor(&current, state.principal())
            .ok_or_else(|| LayerError::auth_required(current.name().as_ref()))?;

        let set = materialize(&current, &filter, &self.tiles);
        let mut surface = lock_or_recover(surface);
        apply(&set, &mut *surface).map_err(|error| LayerError::surface(error.to_string()))?;
        if !current.is_visible() {
            set_visibility(&current, Visibility::None, &mut *surface)
                .map_err(|error| LayerError::surface(error.to_string()))?;
        }
        Ok(true)
    }
}
