//! Metadata REST outbound adapters.
//!
//! This module provides a thin HTTP implementation of the `MetadataService`
//! port.

mod dto;
mod http_service;

pub use http_service::HttpMetadataService;
