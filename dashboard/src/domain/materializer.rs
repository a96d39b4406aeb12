//! Render-layer templates and their realisation on the rendering surface.
//!
//! [`materialize`] is a pure function: the same descriptor, filter and tile
//! template always produce the same [`RenderLayerSet`]. The surface-facing
//! helpers are idempotent, so replaying a set never duplicates a source or a
//! layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::filter::FilterExpression;
use super::layer::{LayerDescriptor, LayerName, StyleKind, TableRef};
use super::ports::{RenderSurface, RenderSurfaceError, Visibility};

/// Sub-role of a render layer within its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerRole {
    Circle,
    Symbol,
    Heatmap,
    /// Wide casing stroke drawn under a line.
    NetworkOutline,
    /// Narrow stroke drawn over the casing.
    NetworkFill,
    Fill,
    Outline,
}

impl LayerRole {
    /// Id suffix of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Circle => "circle",
            Self::Symbol => "symbol",
            Self::Heatmap => "heatmap",
            Self::NetworkOutline => "network-outline",
            Self::NetworkFill => "network-fill",
            Self::Fill => "fill",
            Self::Outline => "outline",
        }
    }

    /// Roles a style expands to, bottom-most first.
    pub fn for_style(style: StyleKind) -> &'static [LayerRole] {
        match style {
            StyleKind::Circle => &[Self::Circle],
            StyleKind::Symbol => &[Self::Symbol],
            StyleKind::Heatmap => &[Self::Heatmap],
            StyleKind::Line => &[Self::NetworkOutline, Self::NetworkFill],
            StyleKind::Fill => &[Self::Fill, Self::Outline],
        }
    }
}

/// Renderer layer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderLayerKind {
    Circle,
    Symbol,
    Heatmap,
    Line,
    Fill,
}

impl RenderLayerKind {
    /// Renderer type name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Circle => "circle",
            Self::Symbol => "symbol",
            Self::Heatmap => "heatmap",
            Self::Line => "line",
            Self::Fill => "fill",
        }
    }
}

/// Per-table vector tile URL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileTemplate {
    url: String,
    max_zoom: u8,
}

impl TileTemplate {
    /// Token replaced with the table name.
    pub const LAYER_TOKEN: &'static str = "{layer}";

    /// Build a template such as `/tiles/{layer}/{z}/{x}/{y}.pbf`.
    pub fn new(url: impl Into<String>, max_zoom: u8) -> Self {
        Self {
            url: url.into(),
            max_zoom,
        }
    }

    /// Vector source serving `table`.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{TableRef, TileTemplate};
    ///
    /// let tiles = TileTemplate::new("/tiles/{layer}/{z}/{x}/{y}.pbf", 22);
    /// let source = tiles.source_for(&TableRef::parse("public", "roads").expect("table"));
    /// assert_eq!(source.id, "public.roads");
    /// assert_eq!(source.tiles, vec!["/tiles/roads/{z}/{x}/{y}.pbf".to_owned()]);
    /// ```
    pub fn source_for(&self, table: &TableRef) -> TileSource {
        TileSource {
            id: table.to_string(),
            tiles: vec![self.url.replace(Self::LAYER_TOKEN, table.table.as_ref())],
            max_zoom: self.max_zoom,
        }
    }
}

/// Vector tile source registered on the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileSource {
    #[serde(skip)]
    pub id: String,
    pub tiles: Vec<String>,
    #[serde(rename = "maxzoom")]
    pub max_zoom: u8,
}

impl TileSource {
    /// Renderer source document.
    pub fn to_json(&self) -> Value {
        json!({
            "type": "vector",
            "tiles": self.tiles,
            "maxzoom": self.max_zoom,
        })
    }
}

/// One concrete drawable layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayer {
    pub id: String,
    pub role: LayerRole,
    pub kind: RenderLayerKind,
    pub source: String,
    pub source_layer: String,
    pub paint: Value,
    pub layout: Value,
    pub filter: FilterExpression,
}

impl RenderLayer {
    /// Renderer layer document.
    pub fn to_json(&self) -> Value {
        let mut layer = Map::new();
        layer.insert("id".to_owned(), json!(self.id));
        layer.insert("type".to_owned(), json!(self.kind.as_str()));
        layer.insert("source".to_owned(), json!(self.source));
        layer.insert("source-layer".to_owned(), json!(self.source_layer));
        layer.insert("paint".to_owned(), self.paint.clone());
        if self.layout.as_object().is_some_and(|layout| !layout.is_empty()) {
            layer.insert("layout".to_owned(), self.layout.clone());
        }
        layer.insert("filter".to_owned(), self.filter.to_json());
        Value::Object(layer)
    }
}

/// Render layers derived from one descriptor, bottom-most first.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayerSet {
    pub descriptor: LayerName,
    pub source: TileSource,
    pub layers: Vec<RenderLayer>,
}

impl RenderLayerSet {
    /// Ids of every layer in the set.
    pub fn ids(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }
}

/// Deterministic render id: `schema.table-<role>`.
pub fn render_id(table: &TableRef, role: LayerRole) -> String {
    format!("{table}-{}", role.as_str())
}

/// Render ids a descriptor expands to, bottom-most first.
pub fn render_ids(descriptor: &LayerDescriptor) -> Vec<String> {
    LayerRole::for_style(descriptor.style())
        .iter()
        .map(|role| render_id(descriptor.table(), *role))
        .collect()
}

struct TemplateInput<'a> {
    table: &'a TableRef,
    source: &'a str,
    filter: &'a FilterExpression,
}

impl TemplateInput<'_> {
    fn layer(&self, role: LayerRole, kind: RenderLayerKind, paint: Value, layout: Value) -> RenderLayer {
        RenderLayer {
            id: render_id(self.table, role),
            role,
            kind,
            source: self.source.to_owned(),
            source_layer: self.table.table.to_string(),
            paint,
            layout,
            filter: self.filter.clone(),
        }
    }
}

type Template = fn(&TemplateInput<'_>) -> Vec<RenderLayer>;

fn template_for(style: StyleKind) -> Template {
    match style {
        StyleKind::Circle => circle_template,
        StyleKind::Symbol => symbol_template,
        StyleKind::Heatmap => heatmap_template,
        StyleKind::Line => line_template,
        StyleKind::Fill => fill_template,
    }
}

fn circle_template(input: &TemplateInput<'_>) -> Vec<RenderLayer> {
    vec![input.layer(
        LayerRole::Circle,
        RenderLayerKind::Circle,
        json!({
            "circle-radius": 6,
            "circle-color": "#007cbf",
            "circle-stroke-width": 2,
            "circle-stroke-color": "#fff",
        }),
        json!({}),
    )]
}

fn symbol_template(input: &TemplateInput<'_>) -> Vec<RenderLayer> {
    vec![input.layer(
        LayerRole::Symbol,
        RenderLayerKind::Symbol,
        json!({
            "text-color": "#2c2c2c",
            "text-halo-color": "#ffffff",
            "text-halo-width": 0.5,
        }),
        json!({
            "icon-image": "marker-15",
            "icon-size": 1.2,
            "text-field": ["get", "name"],
            "text-font": ["Open Sans Bold"],
            "text-size": 14,
            "text-anchor": "top",
            "symbol-placement": "point",
        }),
    )]
}

fn heatmap_template(input: &TemplateInput<'_>) -> Vec<RenderLayer> {
    vec![input.layer(
        LayerRole::Heatmap,
        RenderLayerKind::Heatmap,
        json!({
            "heatmap-radius": 15,
            "heatmap-intensity": 1,
            "heatmap-color": [
                "interpolate", ["linear"], ["heatmap-density"],
                0, "rgba(33,102,172,0)",
                0.2, "rgb(103,169,207)",
                0.4, "rgb(209,229,240)",
                0.6, "rgb(253,219,199)",
                0.8, "rgb(239,138,98)",
                1, "rgb(178,24,43)"
            ],
        }),
        json!({}),
    )]
}

fn line_template(input: &TemplateInput<'_>) -> Vec<RenderLayer> {
    vec![
        input.layer(
            LayerRole::NetworkOutline,
            RenderLayerKind::Line,
            json!({
                "line-width": 3,
                "line-color": "#485460",
                "line-opacity": 0.7,
            }),
            json!({}),
        ),
        input.layer(
            LayerRole::NetworkFill,
            RenderLayerKind::Line,
            json!({
                "line-width": 1,
                "line-color": "#d2dae2",
                "line-opacity": 0.9,
            }),
            json!({}),
        ),
    ]
}

fn fill_template(input: &TemplateInput<'_>) -> Vec<RenderLayer> {
    vec![
        input.layer(
            LayerRole::Fill,
            RenderLayerKind::Fill,
            json!({
                "fill-opacity": 0.2,
                "fill-color": "#ffffff",
            }),
            json!({}),
        ),
        input.layer(
            LayerRole::Outline,
            RenderLayerKind::Line,
            json!({
                "line-width": 1,
                "line-color": "#ffffff",
            }),
            json!({}),
        ),
    ]
}

/// Expand `descriptor` into its render layers.
///
/// # Examples
/// ```
/// use dashboard::domain::{
///     FilterExpression, GeometryKind, LayerDescriptor, LayerName, StyleKind, TableRef,
///     TileTemplate, materialize,
/// };
///
/// let table = TableRef::parse("public", "parcels").expect("table");
/// let descriptor =
///     LayerDescriptor::new(LayerName::for_table(&table), table, StyleKind::Fill, GeometryKind::Polygon)?;
/// let tiles = TileTemplate::new("/tiles/{layer}/{z}/{x}/{y}.pbf", 22);
/// let set = materialize(&descriptor, &FilterExpression::match_all(), &tiles);
/// assert_eq!(set.ids(), ["public.parcels-fill", "public.parcels-outline"]);
/// # Ok::<(), dashboard::domain::LayerError>(())
/// ```
pub fn materialize(
    descriptor: &LayerDescriptor,
    filter: &FilterExpression,
    tiles: &TileTemplate,
) -> RenderLayerSet {
    let source = tiles.source_for(descriptor.table());
    let input = TemplateInput {
        table: descriptor.table(),
        source: &source.id,
        filter,
    };
    let layers = template_for(descriptor.style())(&input);
    RenderLayerSet {
        descriptor: descriptor.name().clone(),
        source,
        layers,
    }
}

/// Realise `set` on the surface.
///
/// Creates the source only when it is missing, removes stale layers that
/// share an id with the set, then adds the set's layers in role order.
pub fn apply(set: &RenderLayerSet, surface: &mut dyn RenderSurface) -> Result<(), RenderSurfaceError> {
    if !surface.has_source(&set.source.id) {
        surface.add_source(&set.source)?;
    }
    for layer in &set.layers {
        if surface.has_layer(&layer.id) {
            surface.remove_layer(&layer.id)?;
        }
    }
    for layer in &set.layers {
        surface.add_layer(layer)?;
    }
    debug!(layer = %set.descriptor, render_layers = set.layers.len(), "applied render layers");
    Ok(())
}

/// Replace the filter on every existing render layer of `descriptor`.
///
/// Sources and paint are left untouched. Returns the number of layers
/// updated.
pub fn update_filter(
    descriptor: &LayerDescriptor,
    filter: &FilterExpression,
    surface: &mut dyn RenderSurface,
) -> Result<usize, RenderSurfaceError> {
    let mut updated = 0;
    for id in render_ids(descriptor) {
        if surface.has_layer(&id) {
            surface.set_filter(&id, filter)?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Set the visibility of every existing render layer of `descriptor`.
pub fn set_visibility(
    descriptor: &LayerDescriptor,
    visibility: Visibility,
    surface: &mut dyn RenderSurface,
) -> Result<(), RenderSurfaceError> {
    for id in render_ids(descriptor) {
        if surface.has_layer(&id) {
            surface.set_visibility(&id, visibility)?;
        }
    }
    Ok(())
}

/// Remove the render layers of `descriptor`.
///
/// The source is dropped as well unless a descriptor in `remaining` still
/// draws from the same table.
pub fn remove_render_layers(
    descriptor: &LayerDescriptor,
    remaining: &[LayerDescriptor],
    surface: &mut dyn RenderSurface,
) -> Result<(), RenderSurfaceError> {
    for id in render_ids(descriptor) {
        if surface.has_layer(&id) {
            surface.remove_layer(&id)?;
        }
    }
    let shared = remaining
        .iter()
        .any(|other| other.name() != descriptor.name() && other.table() == descriptor.table());
    let source = descriptor.table().to_string();
    if !shared && surface.has_source(&source) {
        surface.remove_source(&source)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    //! Regression coverage for templates and idempotent realisation.
    use super::*;
    use crate::domain::{GeometryKind, UserId};
    use crate::outbound::headless_surface::HeadlessSurface;
    use rstest::{fixture, rstest};

    #[fixture]
    fn tiles() -> TileTemplate {
        TileTemplate::new("/api/v1/map-data/proxy/tiles/{layer}/{z}/{x}/{y}.pbf", 22)
    }

    fn descriptor(table: &str, style: StyleKind, geometry: GeometryKind) -> LayerDescriptor {
        let table = TableRef::parse("public", table).expect("table");
        LayerDescriptor::new(LayerName::for_table(&table), table, style, geometry)
            .expect("descriptor")
    }

    #[rstest]
    #[case(StyleKind::Circle, GeometryKind::Point, &["public.t-circle"])]
    #[case(StyleKind::Symbol, GeometryKind::Point, &["public.t-symbol"])]
    #[case(StyleKind::Heatmap, GeometryKind::Point, &["public.t-heatmap"])]
    #[case(
        StyleKind::Line,
        GeometryKind::LineString,
        &["public.t-network-outline", "public.t-network-fill"]
    )]
    #[case(StyleKind::Fill, GeometryKind::Polygon, &["public.t-fill", "public.t-outline"])]
    fn every_style_has_a_template(
        tiles: TileTemplate,
        #[case] style: StyleKind,
        #[case] geometry: GeometryKind,
        #[case] expected: &[&str],
    ) {
        let descriptor = descriptor("t", style, geometry);
        let set = materialize(&descriptor, &FilterExpression::match_all(), &tiles);
        assert_eq!(set.ids(), expected);
        assert_eq!(render_ids(&descriptor), expected);
        assert!(set.layers.iter().all(|layer| layer.source == "public.t"));
        assert!(set.layers.iter().all(|layer| layer.source_layer == "t"));
    }

    #[rstest]
    fn line_casing_is_wider_than_the_stroke(tiles: TileTemplate) {
        let roads = descriptor("roads", StyleKind::Line, GeometryKind::LineString);
        let set = materialize(&roads, &FilterExpression::match_all(), &tiles);
        assert_eq!(set.layers[0].paint["line-width"], json!(3));
        assert_eq!(set.layers[1].paint["line-width"], json!(1));
        assert_eq!(set.layers[0].paint["line-color"], json!("#485460"));
    }

    #[rstest]
    fn layer_documents_carry_the_filter(tiles: TileTemplate) {
        let wells = descriptor("wells", StyleKind::Circle, GeometryKind::Point);
        let filter = FilterExpression::property_equals(
            "user_id",
            json!(UserId::new(3).expect("user").get()),
        );
        let set = materialize(&wells, &FilterExpression::All(vec![filter]), &tiles);
        assert_eq!(
            set.layers[0].to_json(),
            json!({
                "id": "public.wells-circle",
                "type": "circle",
                "source": "public.wells",
                "source-layer": "wells",
                "paint": {
                    "circle-radius": 6,
                    "circle-color": "#007cbf",
                    "circle-stroke-width": 2,
                    "circle-stroke-color": "#fff",
                },
                "filter": ["all", ["==", ["get", "user_id"], 3]],
            })
        );
        assert_eq!(
            set.source.to_json(),
            json!({
                "type": "vector",
                "tiles": ["/api/v1/map-data/proxy/tiles/wells/{z}/{x}/{y}.pbf"],
                "maxzoom": 22,
            })
        );
    }

    #[rstest]
    fn apply_is_idempotent(tiles: TileTemplate) {
        let parcels = descriptor("parcels", StyleKind::Fill, GeometryKind::Polygon);
        let set = materialize(&parcels, &FilterExpression::match_all(), &tiles);
        let mut surface = HeadlessSurface::new();

        apply(&set, &mut surface).expect("first apply");
        apply(&set, &mut surface).expect("second apply");

        assert_eq!(
            surface.layer_ids(),
            ["public.parcels-fill", "public.parcels-outline"]
        );
        assert_eq!(surface.source_ids(), ["public.parcels"]);
    }

    #[rstest]
    fn update_filter_touches_only_filters(tiles: TileTemplate) {
        let roads = descriptor("roads", StyleKind::Line, GeometryKind::LineString);
        let set = materialize(&roads, &FilterExpression::match_all(), &tiles);
        let mut surface = HeadlessSurface::new();
        apply(&set, &mut surface).expect("apply");

        let narrowed = FilterExpression::All(vec![FilterExpression::property_equals(
            "status",
            json!("open"),
        )]);
        assert_eq!(update_filter(&roads, &narrowed, &mut surface), Ok(2));
        for id in set.ids() {
            assert_eq!(surface.filter(&id), Some(&narrowed));
            assert_eq!(
                surface.layer(&id).map(|layer| layer.paint.clone()),
                set.layers
                    .iter()
                    .find(|layer| layer.id == id)
                    .map(|layer| layer.paint.clone())
            );
        }
    }

    #[rstest]
    fn shared_sources_survive_removal(tiles: TileTemplate) {
        let circles = descriptor("wells", StyleKind::Circle, GeometryKind::Point);
        let table = circles.table().clone();
        let heat = LayerDescriptor::new(
            LayerName::for_styled_table(&table, StyleKind::Heatmap),
            table,
            StyleKind::Heatmap,
            GeometryKind::Point,
        )
        .expect("descriptor");
        let mut surface = HeadlessSurface::new();
        for layer in [&circles, &heat] {
            apply(
                &materialize(layer, &FilterExpression::match_all(), &tiles),
                &mut surface,
            )
            .expect("apply");
        }

        remove_render_layers(&circles, std::slice::from_ref(&heat), &mut surface)
            .expect("remove circles");
        assert_eq!(surface.source_ids(), ["public.wells"]);
        assert_eq!(surface.layer_ids(), ["public.wells-heatmap"]);

        remove_render_layers(&heat, &[], &mut surface).expect("remove heatmap");
        assert!(surface.source_ids().is_empty());
        assert!(surface.layer_ids().is_empty());
    }
}
