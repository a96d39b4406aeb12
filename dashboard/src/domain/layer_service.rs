//! Application state facade driven by the sidebar.
//!
//! [`LayerManager`] owns the session's [`AppState`] and the rendering surface
//! and runs every sidebar action through the same pipeline: store mutation,
//! filter build, materialisation, then render-order reconciliation. Shared
//! state sits behind short synchronous locks that are never held across an
//! await, so independent async chains (a double-clicked "Add Layer", a style
//! swap racing a toggle) interleave safely; uniqueness is enforced by the
//! store at insertion time rather than by UI disabling.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::basemap::{
    BasemapCatalogue, LayerGroup, group_style_layers, pretty_label, toggle_group_visibility,
};
use super::error::{Disposition, LayerError};
use super::filter::{FieldFilter, FilterBuilder, FilterExpression};
use super::introspector::GeometryIntrospector;
use super::layer::{LayerDescriptor, LayerName, StyleKind, TableRef, UserId};
use super::lock_or_recover;
use super::materializer::{
    TileTemplate, apply, materialize, remove_render_layers, render_ids, set_visibility,
    update_filter,
};
use super::ordering::RenderOrderCoordinator;
use super::ports::{MetadataService, RenderSurface, RenderSurfaceError, Visibility};
use super::rehydrate::{RehydrationReport, StyleSwapRehydrator};
use super::store::{LayerDescriptorStore, StoreEvent};

/// Session state created once when the dashboard opens.
#[derive(Debug, Default)]
pub struct AppState {
    store: LayerDescriptorStore,
    principal: Option<UserId>,
}

impl AppState {
    /// State holding `store` and an already resolved `principal`.
    pub fn new(store: LayerDescriptorStore, principal: Option<UserId>) -> Self {
        Self { store, principal }
    }

    /// Ordered layer list.
    pub fn store(&self) -> &LayerDescriptorStore {
        &self.store
    }

    /// Authenticated principal, once resolved.
    pub fn principal(&self) -> Option<UserId> {
        self.principal
    }
}

/// One row of the sidebar layer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarEntry {
    pub name: LayerName,
    pub label: String,
    pub visible: bool,
    pub style: StyleKind,
    pub allowed_styles: Vec<StyleKind>,
    pub filter_field: Option<FieldFilter>,
    /// Rows are filtered to the signed-in user. Also set when the table's
    /// columns could not be read.
    pub owner_scoped: bool,
    /// `false` while the layer is withheld for lack of a principal.
    pub rendered: bool,
}

fn surface_error(error: RenderSurfaceError) -> LayerError {
    debug!(kind = error.kind(), "surface rejected mutation");
    LayerError::surface(error.to_string())
}

fn logged<T>(operation: &'static str, result: Result<T, LayerError>) -> Result<T, LayerError> {
    if let Err(error) = &result {
        match error.disposition() {
            Disposition::Silent => debug!(operation, error = %error, "ignoring stale layer action"),
            Disposition::Dismissible => warn!(operation, error = %error, "layer action failed"),
        }
    }
    result
}

/// Coordinates the layer list with a rendering surface.
pub struct LayerManager<S> {
    metadata: Arc<dyn MetadataService>,
    introspector: Arc<GeometryIntrospector>,
    rehydrator: StyleSwapRehydrator,
    filters: FilterBuilder,
    coordinator: RenderOrderCoordinator,
    tiles: TileTemplate,
    state: Mutex<AppState>,
    surface: Mutex<S>,
}

impl<S: RenderSurface> LayerManager<S> {
    /// Start a session against `surface`.
    pub fn new(metadata: Arc<dyn MetadataService>, surface: S, tiles: TileTemplate) -> Self {
        let introspector = Arc::new(GeometryIntrospector::new(Arc::clone(&metadata)));
        Self {
            rehydrator: StyleSwapRehydrator::new(Arc::clone(&introspector), tiles.clone()),
            metadata,
            introspector,
            filters: FilterBuilder,
            coordinator: RenderOrderCoordinator,
            tiles,
            state: Mutex::new(AppState::default()),
            surface: Mutex::new(surface),
        }
    }

    /// Register a sidebar redraw callback.
    ///
    /// Callbacks run while the session state is locked and must not call
    /// back into the manager.
    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        lock_or_recover(&self.state).store.subscribe(listener);
    }

    /// Deep copy of the ordered layer list.
    pub fn descriptors(&self) -> Vec<LayerDescriptor> {
        lock_or_recover(&self.state).store.snapshot()
    }

    /// Currently known principal.
    pub fn principal(&self) -> Option<UserId> {
        lock_or_recover(&self.state).principal
    }

    /// Run `f` against the rendering surface.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock_or_recover(&self.surface))
    }

    /// Spatial tables grouped by schema, for the "Add Layer" picker.
    pub async fn list_tables(&self) -> Result<BTreeMap<String, Vec<String>>, LayerError> {
        logged(
            "list_tables",
            self.introspector.list_tables().await.map_err(LayerError::from),
        )
    }

    /// Rows for the sidebar list.
    pub fn sidebar(&self) -> Vec<SidebarEntry> {
        let descriptors = self.descriptors();
        let surface = lock_or_recover(&self.surface);
        descriptors
            .into_iter()
            .map(|descriptor| {
                let table_label = pretty_label(descriptor.table().table.as_ref());
                let label = if descriptor.name() == &LayerName::for_table(descriptor.table()) {
                    table_label
                } else {
                    format!("{table_label} ({})", pretty_label(descriptor.style().as_str()))
                };
                let rendered = render_ids(&descriptor).iter().any(|id| surface.has_layer(id));
                SidebarEntry {
                    name: descriptor.name().clone(),
                    label,
                    visible: descriptor.is_visible(),
                    style: descriptor.style(),
                    allowed_styles: descriptor.geometry().allowed_styles().to_vec(),
                    filter_field: descriptor.filter_field().cloned(),
                    owner_scoped: descriptor.is_owner_scoped(),
                    rendered,
                }
            })
            .collect()
    }

    async fn resolve_principal(&self) -> Option<UserId> {
        if let Some(principal) = self.principal() {
            return Some(principal);
        }
        match self.metadata.current_user().await {
            Ok(principal) => {
                let mut state = lock_or_recover(&self.state);
                Some(*state.principal.get_or_insert(principal))
            }
            Err(error) => {
                debug!(error = %error, "no authenticated principal");
                None
            }
        }
    }

    /// Add `table` drawn as `style`, or as the geometry's default style.
    ///
    /// Nothing is stored or rendered when the style is illegal for the
    /// geometry, the geometry lookup fails, or an owner-scoped table has no
    /// principal. A table whose columns cannot be read is treated as
    /// owner-scoped.
    pub async fn add_layer(
        &self,
        table: TableRef,
        style: Option<StyleKind>,
    ) -> Result<LayerName, LayerError> {
        logged("add_layer", self.add_layer_inner(table, style).await)
    }

    async fn add_layer_inner(
        &self,
        table: TableRef,
        style: Option<StyleKind>,
    ) -> Result<LayerName, LayerError> {
        if let Some(style) = style {
            let state = lock_or_recover(&self.state);
            let name = state.store.name_for(&table, style);
            if state.store.contains(name.as_ref()) {
                return Err(LayerError::duplicate_name(name));
            }
        }

        let geometry = self.introspector.geometry_kind_of(&table).await?;
        let style = style.unwrap_or_else(|| geometry.default_style());
        if !geometry.allows(style) {
            return Err(LayerError::style_not_allowed(style, geometry));
        }

        let owner_scoped = self.introspector.owner_scope_of(&table).await;
        let principal = if owner_scoped {
            self.resolve_principal().await
        } else {
            None
        };
        let filter = self
            .filters
            .try_for_scope(&table.to_string(), owner_scoped, principal)?;

        let (descriptor, snapshot) = {
            let mut state = lock_or_recover(&self.state);
            let name = state.store.name_for(&table, style);
            let taken = state
                .store
                .iter()
                .any(|layer| layer.table() == &table && layer.style() == style);
            if taken {
                return Err(LayerError::duplicate_name(name));
            }
            let descriptor = LayerDescriptor::new(name, table, style, geometry)?
                .with_owner_scope(owner_scoped);
            state.store.add(descriptor.clone())?;
            (descriptor, state.store.snapshot())
        };

        let rendered = {
            let mut surface = lock_or_recover(&self.surface);
            apply(&materialize(&descriptor, &filter, &self.tiles), &mut *surface).and_then(|()| {
                self.coordinator
                    .reconcile(&snapshot, &mut *surface)
                    .map(|_| ())
            })
        };
        if let Err(error) = rendered {
            lock_or_recover(&self.state)
                .store
                .remove(descriptor.name().as_ref());
            return Err(surface_error(error));
        }

        info!(
            layer = %descriptor.name(),
            style = %descriptor.style(),
            geometry = %descriptor.geometry(),
            owner_scoped,
            "layer added"
        );
        Ok(descriptor.name().clone())
    }

    /// Remove `name` and its render layers. Returns `false` when the layer
    /// was already gone.
    pub fn remove_layer(&self, name: &str) -> Result<bool, LayerError> {
        logged("remove_layer", self.remove_layer_inner(name))
    }

    fn remove_layer_inner(&self, name: &str) -> Result<bool, LayerError> {
        let (removed, remaining) = {
            let mut state = lock_or_recover(&self.state);
            let removed = state.store.remove(name);
            (removed, state.store.snapshot())
        };
        let Some(removed) = removed else {
            debug!(layer = name, "remove of absent layer ignored");
            return Ok(false);
        };
        let mut surface = lock_or_recover(&self.surface);
        remove_render_layers(&removed, &remaining, &mut *surface).map_err(surface_error)?;
        info!(layer = name, "layer removed");
        Ok(true)
    }

    /// Flip visibility of `name` and return the new value.
    pub fn toggle_visible(&self, name: &str) -> Result<bool, LayerError> {
        logged("toggle_visible", self.toggle_visible_inner(name))
    }

    fn toggle_visible_inner(&self, name: &str) -> Result<bool, LayerError> {
        let (visible, descriptor) = {
            let mut state = lock_or_recover(&self.state);
            let visible = state.store.toggle_visible(name)?;
            let descriptor = state
                .store
                .get(name)
                .cloned()
                .ok_or_else(|| LayerError::not_found(name))?;
            (visible, descriptor)
        };
        let mut surface = lock_or_recover(&self.surface);
        set_visibility(&descriptor, Visibility::from_flag(visible), &mut *surface)
            .map_err(surface_error)?;
        Ok(visible)
    }

    /// Move `name` to `index` in the layer list and restack the surface.
    pub fn move_layer(&self, name: &str, index: usize) -> Result<usize, LayerError> {
        logged("move_layer", self.move_layer_inner(name, index))
    }

    fn move_layer_inner(&self, name: &str, index: usize) -> Result<usize, LayerError> {
        let (to, snapshot) = {
            let mut state = lock_or_recover(&self.state);
            let to = state.store.move_to(name, index)?;
            (to, state.store.snapshot())
        };
        let mut surface = lock_or_recover(&self.surface);
        self.coordinator
            .reconcile(&snapshot, &mut *surface)
            .map_err(surface_error)?;
        Ok(to)
    }

    /// Redraw `name` with a different style.
    ///
    /// The render layers are destroyed and recreated; the style must be legal
    /// for the geometry and not already used for the same table.
    pub fn restyle(&self, name: &str, style: StyleKind) -> Result<(), LayerError> {
        logged("restyle", self.restyle_inner(name, style))
    }

    fn restyle_inner(&self, name: &str, style: StyleKind) -> Result<(), LayerError> {
        let (previous, current, snapshot, principal) = {
            let mut state = lock_or_recover(&self.state);
            let previous = state
                .store
                .get(name)
                .cloned()
                .ok_or_else(|| LayerError::not_found(name))?;
            if previous.style() == style {
                return Ok(());
            }
            let clash = state.store.iter().any(|layer| {
                layer.name() != previous.name()
                    && layer.table() == previous.table()
                    && layer.style() == style
            });
            if clash {
                return Err(LayerError::duplicate_name(LayerName::for_styled_table(
                    previous.table(),
                    style,
                )));
            }
            state.store.set_style(name, style)?;
            let current = state
                .store
                .get(name)
                .cloned()
                .ok_or_else(|| LayerError::not_found(name))?;
            (previous, current, state.store.snapshot(), state.principal)
        };

        let mut surface = lock_or_recover(&self.surface);
        remove_render_layers(&previous, &snapshot, &mut *surface).map_err(surface_error)?;
        if let Some(filter) = self.filters.for_descriptor(&current, principal) {
            self.realise(&current, &filter, &mut *surface)
                .map_err(surface_error)?;
        }
        self.coordinator
            .reconcile(&snapshot, &mut *surface)
            .map_err(surface_error)?;
        info!(layer = name, style = %style, "layer restyled");
        Ok(())
    }

    fn realise(
        &self,
        descriptor: &LayerDescriptor,
        filter: &FilterExpression,
        surface: &mut dyn RenderSurface,
    ) -> Result<(), RenderSurfaceError> {
        apply(&materialize(descriptor, filter, &self.tiles), surface)?;
        if !descriptor.is_visible() {
            set_visibility(descriptor, Visibility::None, surface)?;
        }
        Ok(())
    }

    /// Restrict `name` to features whose attribute matches the selection,
    /// or clear the selection with `None`.
    pub fn select_filter_field(
        &self,
        name: &str,
        selection: Option<FieldFilter>,
    ) -> Result<(), LayerError> {
        logged(
            "select_filter_field",
            self.select_filter_field_inner(name, selection),
        )
    }

    fn select_filter_field_inner(
        &self,
        name: &str,
        selection: Option<FieldFilter>,
    ) -> Result<(), LayerError> {
        let (descriptor, principal) = {
            let mut state = lock_or_recover(&self.state);
            state.store.set_filter_field(name, selection)?;
            let descriptor = state
                .store
                .get(name)
                .cloned()
                .ok_or_else(|| LayerError::not_found(name))?;
            (descriptor, state.principal)
        };
        let filter = self
            .filters
            .for_descriptor(&descriptor, principal)
            .ok_or_else(|| LayerError::auth_required(name))?;
        let mut surface = lock_or_recover(&self.surface);
        update_filter(&descriptor, &filter, &mut *surface).map_err(surface_error)?;
        Ok(())
    }

    /// Replace the principal and refilter every owner-scoped layer.
    ///
    /// Without a principal owner-scoped layers are withdrawn from the
    /// surface; they return once a principal is set again.
    pub fn set_principal(&self, principal: Option<UserId>) -> Result<(), LayerError> {
        logged("set_principal", self.set_principal_inner(principal))
    }

    fn set_principal_inner(&self, principal: Option<UserId>) -> Result<(), LayerError> {
        let snapshot = {
            let mut state = lock_or_recover(&self.state);
            state.principal = principal;
            state.store.snapshot()
        };
        let mut surface = lock_or_recover(&self.surface);
        for descriptor in snapshot.iter().filter(|layer| layer.is_owner_scoped()) {
            let rendered = render_ids(descriptor).iter().any(|id| surface.has_layer(id));
            match (self.filters.for_descriptor(descriptor, principal), rendered) {
                (Some(filter), true) => {
                    update_filter(descriptor, &filter, &mut *surface).map_err(surface_error)?;
                }
                (Some(filter), false) => {
                    self.realise(descriptor, &filter, &mut *surface)
                        .map_err(surface_error)?;
                }
                (None, _) => {
                    remove_render_layers(descriptor, &snapshot, &mut *surface)
                        .map_err(surface_error)?;
                    info!(layer = %descriptor.name(), "owner-scoped layer withheld");
                }
            }
        }
        self.coordinator
            .reconcile(&snapshot, &mut *surface)
            .map_err(surface_error)?;
        Ok(())
    }

    /// Replace the style (for example a new basemap) and restore every layer.
    ///
    /// The layers drawn on the new style are the ones stored once it has
    /// loaded, filtered to the principal known at that point. Layers that
    /// fail to come back are reported through
    /// [`LayerError::PartialRehydration`] after the rest have been restored.
    pub async fn swap_style(&self, style_url: &str) -> Result<RehydrationReport, LayerError> {
        let result = self
            .rehydrator
            .swap_style(&self.state, &self.surface, style_url)
            .await
            .and_then(RehydrationReport::into_result);
        logged("swap_style", result)
    }

    /// Basemaps available in the current style.
    pub fn basemaps(&self) -> BasemapCatalogue {
        let surface = lock_or_recover(&self.surface);
        BasemapCatalogue::detect(&surface.style_layers())
    }

    /// Show basemap `id` and hide the others.
    pub fn select_basemap(&self, id: &str) -> Result<(), LayerError> {
        let mut surface = lock_or_recover(&self.surface);
        let catalogue = BasemapCatalogue::detect(&surface.style_layers());
        logged("select_basemap", catalogue.select(id, &mut *surface))
    }

    /// Show or hide every basemap at once.
    pub fn toggle_all_basemaps(&self) -> Result<bool, LayerError> {
        let mut surface = lock_or_recover(&self.surface);
        let catalogue = BasemapCatalogue::detect(&surface.style_layers());
        logged("toggle_all_basemaps", catalogue.toggle_all(&mut *surface))
    }

    /// Style layers grouped by name prefix.
    pub fn layer_groups(&self) -> Vec<LayerGroup> {
        group_style_layers(&lock_or_recover(&self.surface).style_layers())
    }

    /// Toggle every member of group `name`.
    pub fn toggle_group(&self, name: &str) -> Result<bool, LayerError> {
        let mut surface = lock_or_recover(&self.surface);
        let groups = group_style_layers(&surface.style_layers());
        let result = groups
            .iter()
            .find(|group| group.name == name)
            .ok_or_else(|| LayerError::not_found(name))
            .and_then(|group| {
                toggle_group_visibility(group, &mut *surface).map_err(surface_error)
            });
        logged("toggle_group", result)
    }
}
