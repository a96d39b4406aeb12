//! Domain primitives and services for the layer registry.
//!
//! Purpose: keep what the sidebar shows (ordered layer descriptors) and what
//! the rendering surface draws (render layers, sources, filters, z-order)
//! consistent across every user mutation and every style swap. Adapters sit
//! behind the traits in [`ports`].
//!
//! Public surface:
//! - [`LayerManager`]: application state facade driven by the sidebar.
//! - [`LayerDescriptorStore`]: ordered source of truth for added layers.
//! - [`GeometryIntrospector`]: geometry and field discovery.
//! - [`FilterBuilder`]: owner-isolation filters.
//! - [`materialize`] and [`apply`]: render-layer templates and realisation.
//! - [`RenderOrderCoordinator`]: z-order reconciliation.
//! - [`StyleSwapRehydrator`]: replay after basemap swaps.

pub mod basemap;
pub mod error;
pub mod filter;
pub mod introspector;
pub mod layer;
pub mod layer_service;
pub mod materializer;
pub mod ordering;
pub mod ports;
pub mod rehydrate;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use self::basemap::{
    Basemap, BasemapCatalogue, LayerGroup, group_style_layers, pretty_label,
    toggle_group_visibility,
};
pub use self::error::{Disposition, ErrorCode, LayerError, RehydrationFailure};
pub use self::filter::{FieldFilter, FilterBuilder, FilterExpression, OWNER_FIELD};
pub use self::introspector::{
    FieldInfo, GeometryIntrospector, IntrospectionError, classify_geometry,
};
pub use self::layer::{
    GeometryKind, IdentifierValidationError, LayerDescriptor, LayerName, SchemaName, StyleKind,
    TableName, TableRef, UserId,
};
pub use self::layer_service::{AppState, LayerManager, SidebarEntry};
pub use self::materializer::{
    LayerRole, RenderLayer, RenderLayerKind, RenderLayerSet, TileSource, TileTemplate, apply,
    materialize, remove_render_layers, render_id, render_ids, set_visibility, update_filter,
};
pub use self::ordering::RenderOrderCoordinator;
pub use self::rehydrate::{RehydrationReport, StyleSnapshot, StyleSwapRehydrator};
pub use self::store::{LayerDescriptorStore, StoreEvent};

/// Lock `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in the domain is a short synchronous update, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
