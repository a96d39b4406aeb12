//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod metadata_service;
mod render_surface;

#[cfg(test)]
pub use metadata_service::MockMetadataService;
pub use metadata_service::{
    FixtureMetadataService, FixtureTable, MetadataService, MetadataServiceError,
};
pub use render_surface::{
    Camera, RenderSurface, RenderSurfaceError, StyleLayerSummary, StyleLoadSignal, StyleLoaded,
    Visibility,
};
