//! Resolve a list of tables into the render plan the dashboard would draw.
//!
//! Layers are added in the order given (the last one ends up on top), then
//! the resulting descriptors, render stack and any per-layer failures are
//! written to stdout as JSON.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use dashboard::DashboardSettings;
use dashboard::domain::ports::{FixtureMetadataService, MetadataService, RenderSurface};
use dashboard::domain::{
    FieldInfo, LayerManager, OWNER_FIELD, RenderOrderCoordinator, StyleKind, TableRef,
    TileTemplate, UserId,
};
use dashboard::outbound::{HeadlessSurface, HttpMetadataService};
use ortho_config::OrthoConfig;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use url::Url;

/// `layer-plan` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "layer-plan",
    about = "Resolve tables into ordered render layers using the dashboard layer registry",
    version
)]
struct CliArgs {
    /// Layer to add as `schema.table` or `schema.table:style`; repeatable.
    #[arg(long = "layer", value_name = "schema.table[:style]", value_parser = parse_layer_arg)]
    layers: Vec<LayerArg>,
    /// Principal used for owner-scoped tables instead of asking the API.
    #[arg(long = "principal", value_name = "id")]
    principal: Option<i64>,
    /// Use built-in sample tables instead of the metadata API.
    #[arg(long)]
    offline: bool,
    /// Also swap to this style and report the rehydration outcome.
    #[arg(long = "swap-style", value_name = "url")]
    swap_style: Option<String>,
}

#[derive(Debug, Clone)]
struct LayerArg {
    table: TableRef,
    style: Option<StyleKind>,
}

fn parse_layer_arg(raw: &str) -> Result<LayerArg, String> {
    let (qualified, style) = match raw.split_once(':') {
        Some((qualified, style)) => (
            qualified,
            Some(style.parse::<StyleKind>().map_err(|error| error.to_string())?),
        ),
        None => (raw, None),
    };
    let (schema, table) = qualified
        .split_once('.')
        .ok_or_else(|| format!("layer '{raw}' must be schema-qualified"))?;
    let table = TableRef::parse(schema, table).map_err(|error| error.to_string())?;
    Ok(LayerArg { table, style })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LayerPlan {
    layers: Vec<Value>,
    render_stack: Vec<String>,
    sources: Vec<String>,
    errors: Vec<PlanError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rehydration: Option<Value>,
}

#[derive(Debug, Serialize)]
struct PlanError {
    layer: String,
    code: Value,
    message: String,
}

fn sample_metadata() -> io::Result<FixtureMetadataService> {
    let table = |schema: &str, name: &str| {
        TableRef::parse(schema, name).map_err(|error| io::Error::other(error.to_string()))
    };
    Ok(FixtureMetadataService::default()
        .with_table(
            table("public", "parcels")?,
            "ST_MultiPolygon",
            vec![FieldInfo::new("id", "integer"), FieldInfo::new("zoning", "text")],
        )
        .with_table(
            table("public", "roads")?,
            "ST_MultiLineString",
            vec![FieldInfo::new("name", "text")],
        )
        .with_table(
            table("survey", "wells")?,
            "ST_Point",
            vec![FieldInfo::new("depth", "double precision")],
        )
        .with_table(
            table("public", "lots")?,
            "ST_Polygon",
            vec![
                FieldInfo::new(OWNER_FIELD, "integer"),
                FieldInfo::new("status", "text"),
            ],
        ))
}

fn metadata_service(
    settings: &DashboardSettings,
    offline: bool,
) -> io::Result<Arc<dyn MetadataService>> {
    if offline {
        return Ok(Arc::new(sample_metadata()?));
    }
    let base_url = Url::parse(settings.api_base_url())
        .map_err(|error| io::Error::other(format!("parse api base url: {error}")))?;
    let service = HttpMetadataService::new(
        base_url,
        settings.request_timeout(),
        settings.auth_token.clone(),
    )
    .map_err(|error| io::Error::other(format!("build metadata client: {error}")))?;
    Ok(Arc::new(service))
}

fn main() -> io::Result<()> {
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .with_writer(io::stderr)
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main())
}

async fn async_main() -> io::Result<()> {
    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let settings = DashboardSettings::load_from_iter([OsString::from("layer-plan")])
        .map_err(|error| io::Error::other(format!("load configuration: {error}")))?;

    let metadata = metadata_service(&settings, args.offline)?;
    let tiles = TileTemplate::new(settings.tile_url_template(), settings.tile_max_zoom());
    let mut surface = HeadlessSurface::new();
    surface
        .set_style(settings.style_url())
        .wait()
        .await
        .map_err(|error| io::Error::other(format!("load style: {error}")))?;
    let manager = LayerManager::new(metadata, surface, tiles);

    if let Some(id) = args.principal {
        let principal = UserId::new(id).map_err(|error| io::Error::other(error.to_string()))?;
        manager
            .set_principal(Some(principal))
            .map_err(|error| io::Error::other(error.to_string()))?;
    }

    let mut errors = Vec::new();
    for layer in &args.layers {
        if let Err(error) = manager.add_layer(layer.table.clone(), layer.style).await {
            errors.push(PlanError {
                layer: layer.table.to_string(),
                code: serde_json::to_value(error.code()).map_err(io::Error::other)?,
                message: error.to_string(),
            });
        }
    }

    let rehydration = match &args.swap_style {
        Some(url) => Some(match manager.swap_style(url).await {
            Ok(report) => serde_json::to_value(report).map_err(io::Error::other)?,
            Err(error) => Value::String(error.to_string()),
        }),
        None => None,
    };

    let descriptors = manager.descriptors();
    let plan = manager.with_surface(|surface| LayerPlan {
        layers: RenderOrderCoordinator::flatten(&descriptors)
            .iter()
            .filter_map(|id| surface.layer(id).map(|layer| layer.to_json()))
            .collect(),
        render_stack: surface.layer_ids(),
        sources: surface.source_ids(),
        errors,
        rehydration,
    });
    info!(
        layers = descriptors.len(),
        failed = plan.errors.len(),
        "layer plan resolved"
    );

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &plan).map_err(io::Error::other)?;
    writeln!(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("public.roads", None)]
    #[case("survey.wells:heatmap", Some(StyleKind::Heatmap))]
    fn parses_layer_arguments(#[case] raw: &str, #[case] style: Option<StyleKind>) {
        let layer = parse_layer_arg(raw).expect("valid layer");
        assert_eq!(layer.style, style);
        assert_eq!(layer.table.to_string(), raw.split(':').next().unwrap_or(raw));
    }

    #[rstest]
    #[case("roads")]
    #[case("public.roads:sparkle")]
    fn rejects_malformed_layer_arguments(#[case] raw: &str) {
        assert!(parse_layer_arg(raw).is_err());
    }

    #[rstest]
    fn settings_load_for_the_plan_command() {
        let _guard = env_lock::lock_env([
            ("DASHBOARD_TILE_MAX_ZOOM", None::<String>),
            ("DASHBOARD_STYLE_URL", None::<String>),
        ]);
        let settings = DashboardSettings::load_from_iter([OsString::from("layer-plan")])
            .expect("defaults load");
        assert_eq!(settings.tile_max_zoom(), 22);
        assert_eq!(settings.style_url(), "/static/config/style.json");
    }

    #[rstest]
    #[tokio::test]
    async fn offline_metadata_resolves_the_sample_tables() {
        let metadata = sample_metadata().expect("sample tables");
        let manager = LayerManager::new(
            Arc::new(metadata),
            HeadlessSurface::new(),
            TileTemplate::new("/tiles/{layer}/{z}/{x}/{y}.pbf", 22),
        );
        let wells = TableRef::parse("survey", "wells").expect("table");
        manager.add_layer(wells, None).await.expect("wells");
        assert_eq!(
            manager.with_surface(|surface| surface.layer_ids()),
            ["survey.wells-circle"]
        );
    }
}
