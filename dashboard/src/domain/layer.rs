//! Layer identity and descriptor model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::LayerError;
use super::filter::FieldFilter;

/// Validation errors returned by identifier constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierValidationError {
    EmptySchema,
    InvalidSchema,
    EmptyTable,
    InvalidTable,
    EmptyLayerName,
    NonPositiveUserId,
    UnknownStyle(String),
    UnknownGeometry(String),
}

impl fmt::Display for IdentifierValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySchema => write!(f, "schema name must not be empty"),
            Self::InvalidSchema => write!(
                f,
                "schema name must not contain whitespace, '.' or '/' characters"
            ),
            Self::EmptyTable => write!(f, "table name must not be empty"),
            Self::InvalidTable => write!(
                f,
                "table name must not contain whitespace, '.' or '/' characters"
            ),
            Self::EmptyLayerName => write!(f, "layer name must not be empty"),
            Self::NonPositiveUserId => write!(f, "user id must be a positive integer"),
            Self::UnknownStyle(raw) => write!(f, "unknown layer style: {raw}"),
            Self::UnknownGeometry(raw) => write!(f, "unknown geometry kind: {raw}"),
        }
    }
}

impl std::error::Error for IdentifierValidationError {}

fn is_valid_identifier(raw: &str) -> bool {
    !raw.chars()
        .any(|c| c.is_whitespace() || c == '.' || c == '/')
}

/// Database schema holding a spatial table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate and construct a [`SchemaName`].
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentifierValidationError::EmptySchema);
        }
        if !is_valid_identifier(&raw) {
            return Err(IdentifierValidationError::InvalidSchema);
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}

impl TryFrom<String> for SchemaName {
    type Error = IdentifierValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Spatial table name; also used as the vector tile source-layer name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Validate and construct a [`TableName`].
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentifierValidationError::EmptyTable);
        }
        if !is_valid_identifier(&raw) {
            return Err(IdentifierValidationError::InvalidTable);
        }
        Ok(Self(raw))
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl TryFrom<String> for TableName {
    type Error = IdentifierValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Fully qualified backing table, displayed as `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: SchemaName,
    pub table: TableName,
}

impl TableRef {
    /// Build a reference from validated parts.
    pub fn new(schema: SchemaName, table: TableName) -> Self {
        Self { schema, table }
    }

    /// Validate both parts from raw strings.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::TableRef;
    ///
    /// let table = TableRef::parse("public", "parcels").expect("valid table");
    /// assert_eq!(table.to_string(), "public.parcels");
    /// ```
    pub fn parse(
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, IdentifierValidationError> {
        Ok(Self::new(SchemaName::new(schema)?, TableName::new(table)?))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Visual treatment applied to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    Circle,
    Symbol,
    Heatmap,
    Line,
    Fill,
}

impl StyleKind {
    /// Every style kind, in sidebar menu order.
    pub const ALL: [Self; 5] = [
        Self::Circle,
        Self::Symbol,
        Self::Heatmap,
        Self::Line,
        Self::Fill,
    ];

    /// Lowercase name used in ids and layer-name suffixes.
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

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StyleKind {
    type Err = IdentifierValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IdentifierValidationError::UnknownStyle(s.to_owned()))
    }
}

/// Geometry family of a backing table, fixed when the layer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

impl GeometryKind {
    /// Style kinds that may legally render this geometry.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{GeometryKind, StyleKind};
    ///
    /// assert_eq!(GeometryKind::Polygon.allowed_styles(), &[StyleKind::Fill]);
    /// ```
    pub fn allowed_styles(self) -> &'static [StyleKind] {
        match self {
            Self::Point => &[StyleKind::Circle, StyleKind::Symbol, StyleKind::Heatmap],
            Self::LineString => &[StyleKind::Line],
            Self::Polygon => &[StyleKind::Fill],
        }
    }

    /// Whether `style` may render this geometry.
    pub fn allows(self, style: StyleKind) -> bool {
        self.allowed_styles().contains(&style)
    }

    /// Style picked when the user has not chosen one.
    pub fn default_style(self) -> StyleKind {
        match self {
            Self::Point => StyleKind::Circle,
            Self::LineString => StyleKind::Line,
            Self::Polygon => StyleKind::Fill,
        }
    }

    /// Display name used by the metadata API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of a layer descriptor within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerName(String);

impl LayerName {
    /// Accept a name supplied by the sidebar.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IdentifierValidationError::EmptyLayerName);
        }
        Ok(Self(raw))
    }

    /// Default name for a table: `schema.table`.
    pub fn for_table(table: &TableRef) -> Self {
        Self(table.to_string())
    }

    /// Suffixed name used when the table is already shown in another style:
    /// `schema.table.style`.
    pub fn for_styled_table(table: &TableRef, style: StyleKind) -> Self {
        Self(format!("{table}.{style}"))
    }
}

impl AsRef<str> for LayerName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<LayerName> for String {
    fn from(value: LayerName) -> Self {
        value.0
    }
}

impl TryFrom<String> for LayerName {
    type Error = IdentifierValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Identifier of the authenticated principal, as returned by `GET /me`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    /// Validate and construct a [`UserId`].
    pub fn new(id: i64) -> Result<Self, IdentifierValidationError> {
        if id <= 0 {
            return Err(IdentifierValidationError::NonPositiveUserId);
        }
        Ok(Self(id))
    }

    /// Raw numeric identifier.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UserId> for i64 {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = IdentifierValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// One user-visible data layer.
///
/// ## Invariants
/// - `style` belongs to `geometry.allowed_styles()`.
/// - `name` is unique within a [`LayerDescriptorStore`](super::LayerDescriptorStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    name: LayerName,
    table: TableRef,
    style: StyleKind,
    geometry: GeometryKind,
    visible: bool,
    owner_scoped: bool,
    filter_field: Option<FieldFilter>,
}

impl LayerDescriptor {
    /// Create a visible descriptor, rejecting styles the geometry cannot use.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{GeometryKind, LayerDescriptor, LayerName, StyleKind, TableRef};
    ///
    /// let table = TableRef::parse("public", "parcels").expect("valid table");
    /// let name = LayerName::for_table(&table);
    /// let rejected = LayerDescriptor::new(name, table, StyleKind::Circle, GeometryKind::Polygon);
    /// assert!(rejected.is_err());
    /// ```
    pub fn new(
        name: LayerName,
        table: TableRef,
        style: StyleKind,
        geometry: GeometryKind,
    ) -> Result<Self, LayerError> {
        if !geometry.allows(style) {
            return Err(LayerError::style_not_allowed(style, geometry));
        }
        Ok(Self {
            name,
            table,
            style,
            geometry,
            visible: true,
            owner_scoped: false,
            filter_field: None,
        })
    }

    /// Record whether the backing table exposes an owner column.
    pub fn with_owner_scope(mut self, owner_scoped: bool) -> Self {
        self.owner_scoped = owner_scoped;
        self
    }

    /// Unique layer name.
    pub fn name(&self) -> &LayerName {
        &self.name
    }

    /// Backing table.
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Current style.
    pub fn style(&self) -> StyleKind {
        self.style
    }

    /// Geometry fixed at creation.
    pub fn geometry(&self) -> GeometryKind {
        self.geometry
    }

    /// Whether the layer is currently shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether rendering must be restricted to the current principal's rows.
    pub fn is_owner_scoped(&self) -> bool {
        self.owner_scoped
    }

    /// User-selected attribute filter, if any.
    pub fn filter_field(&self) -> Option<&FieldFilter> {
        self.filter_field.as_ref()
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub(crate) fn set_style(&mut self, style: StyleKind) -> Result<(), LayerError> {
        if !self.geometry.allows(style) {
            return Err(LayerError::style_not_allowed(style, self.geometry));
        }
        self.style = style;
        Ok(())
    }

    pub(crate) fn set_filter_field(&mut self, filter_field: Option<FieldFilter>) {
        self.filter_field = filter_field;
    }
}
