//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **http_metadata**: reqwest-backed client for the table metadata REST API
//! - **headless_surface**: in-memory rendering surface for planning and tests
//!
//! Adapters are thin translators between domain types and the external
//! representation. They contain no business logic.

pub mod headless_surface;
pub mod http_metadata;

pub use headless_surface::HeadlessSurface;
pub use http_metadata::HttpMetadataService;
