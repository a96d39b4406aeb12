//! Dashboard configuration loaded via OrthoConfig.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_TILE_URL_TEMPLATE: &str = "/api/v1/map-data/proxy/tiles/{layer}/{z}/{x}/{y}.pbf";
const DEFAULT_STYLE_URL: &str = "/static/config/style.json";

/// Configuration values for the metadata client and tile sources.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "DASHBOARD")]
pub struct DashboardSettings {
    /// Base URL of the metadata REST API (without trailing slash).
    pub api_base_url: Option<String>,
    /// Bearer token sent with authenticated metadata requests.
    pub auth_token: Option<String>,
    /// Vector tile URL template; `{layer}` is replaced by the table name.
    pub tile_url_template: Option<String>,
    /// Maximum zoom advertised by generated tile sources.
    #[ortho_config(default = 22)]
    pub tile_max_zoom: u8,
    /// Timeout applied to every metadata request, in seconds.
    #[ortho_config(default = 10)]
    pub request_timeout_secs: u64,
    /// Style document loaded when the dashboard starts.
    pub style_url: Option<String>,
}

impl DashboardSettings {
    /// Return the configured API base URL, falling back to the default.
    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
    }

    /// Return the configured tile URL template, falling back to the default.
    pub fn tile_url_template(&self) -> &str {
        self.tile_url_template
            .as_deref()
            .unwrap_or(DEFAULT_TILE_URL_TEMPLATE)
    }

    /// Return the maximum zoom of generated tile sources.
    pub fn tile_max_zoom(&self) -> u8 {
        self.tile_max_zoom
    }

    /// Return the metadata request timeout, never shorter than one second.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Return the configured style URL, falling back to the default.
    pub fn style_url(&self) -> &str {
        self.style_url.as_deref().unwrap_or(DEFAULT_STYLE_URL)
    }
}
