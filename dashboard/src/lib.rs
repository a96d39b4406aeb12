//! Map dashboard layer registry.
//!
//! Keeps the sidebar's ordered list of data layers consistent with an external
//! map rendering surface: owner-isolation filters, render-layer templates,
//! z-order reconciliation, and replay after basemap style swaps.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::indexing_slicing))]

pub mod config;
pub mod domain;
pub mod outbound;

pub use config::DashboardSettings;
