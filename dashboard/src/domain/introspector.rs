//! Geometry and field discovery for candidate tables.
//!
//! Introspection calls cannot be cancelled. Each geometry request is tagged
//! with a per-table sequence number and a result that resolves after a newer
//! request for the same table is discarded, so a slow response can never
//! override a fresher one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::LayerError;
use super::filter::FilterBuilder;
use super::layer::{GeometryKind, TableRef};
use super::lock_or_recover;
use super::ports::{MetadataService, MetadataServiceError};

/// One non-geometry column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl FieldInfo {
    /// Construct column metadata.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Errors raised while introspecting a table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntrospectionError {
    /// The metadata service failed.
    #[error("metadata lookup for {table} failed: {source}")]
    Service {
        table: String,
        #[source]
        source: MetadataServiceError,
    },
    /// A newer request for the same table was issued before this one resolved.
    #[error("geometry lookup for {table} was superseded by a newer request")]
    Superseded { table: String },
}

impl From<IntrospectionError> for LayerError {
    fn from(value: IntrospectionError) -> Self {
        match value {
            IntrospectionError::Service { table, source } => {
                LayerError::introspection(table, source.to_string())
            }
            IntrospectionError::Superseded { table } => {
                LayerError::introspection(table, "superseded by a newer request")
            }
        }
    }
}

/// Classify a free-text geometry type reported by the backend.
///
/// Matching is by case-insensitive substring, checked as polygon, then line,
/// then point. Anything else falls back to [`GeometryKind::Point`] and logs a
/// warning.
///
/// # Examples
/// ```
/// use dashboard::domain::{GeometryKind, classify_geometry};
///
/// assert_eq!(classify_geometry("MultiPolygon"), GeometryKind::Polygon);
/// assert_eq!(classify_geometry("ST_LineString"), GeometryKind::LineString);
/// assert_eq!(classify_geometry("Unknown"), GeometryKind::Point);
/// ```
pub fn classify_geometry(raw: &str) -> GeometryKind {
    let lowered = raw.to_ascii_lowercase();
    if lowered.contains("polygon") {
        GeometryKind::Polygon
    } else if lowered.contains("line") {
        GeometryKind::LineString
    } else if lowered.contains("point") {
        GeometryKind::Point
    } else {
        warn!(
            geometry_type = raw,
            "unrecognised geometry type; falling back to Point"
        );
        GeometryKind::Point
    }
}

#[derive(Debug, Default)]
struct SequenceState {
    issued: HashMap<TableRef, u64>,
    known: HashMap<TableRef, GeometryKind>,
}

/// Queries the metadata service for geometry kinds and column lists.
pub struct GeometryIntrospector {
    metadata: Arc<dyn MetadataService>,
    state: Mutex<SequenceState>,
}

impl GeometryIntrospector {
    /// Create an introspector backed by `metadata`.
    pub fn new(metadata: Arc<dyn MetadataService>) -> Self {
        Self {
            metadata,
            state: Mutex::new(SequenceState::default()),
        }
    }

    /// Geometry kind of `table`.
    ///
    /// Returns [`IntrospectionError::Superseded`] when another request for
    /// the same table was issued while this one was in flight.
    pub async fn geometry_kind_of(
        &self,
        table: &TableRef,
    ) -> Result<GeometryKind, IntrospectionError> {
        let sequence = {
            let mut state = lock_or_recover(&self.state);
            let counter = state.issued.entry(table.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let raw = self
            .metadata
            .geometry_type(table)
            .await
            .map_err(|source| IntrospectionError::Service {
                table: table.to_string(),
                source,
            })?;
        let kind = classify_geometry(&raw);

        let mut state = lock_or_recover(&self.state);
        let latest = state.issued.get(table).copied().unwrap_or(sequence);
        if latest != sequence {
            debug!(
                table = %table,
                sequence,
                latest,
                "discarding stale geometry lookup"
            );
            return Err(IntrospectionError::Superseded {
                table: table.to_string(),
            });
        }
        state.known.insert(table.clone(), kind);
        Ok(kind)
    }

    /// Last accepted geometry kind for `table`.
    pub fn known_geometry(&self, table: &TableRef) -> Option<GeometryKind> {
        lock_or_recover(&self.state).known.get(table).copied()
    }

    /// Non-geometry columns of `table`.
    pub async fn fields_of(&self, table: &TableRef) -> Result<Vec<FieldInfo>, IntrospectionError> {
        self.metadata.fields(table).await.map_err(|source| {
            debug!(table = %table, kind = source.kind(), "field lookup rejected");
            IntrospectionError::Service {
                table: table.to_string(),
                source,
            }
        })
    }

    /// Whether rows of `table` must be restricted to their owner.
    ///
    /// A failed column lookup leaves no fields known. That counts as
    /// owner-scoped: the layer then needs a principal and is filtered to it.
    pub async fn owner_scope_of(&self, table: &TableRef) -> bool {
        match self.fields_of(table).await {
            Ok(fields) => FilterBuilder::is_owner_scoped(&fields),
            Err(error) => {
                warn!(
                    table = %table,
                    error = %error,
                    "field lookup failed; treating table as owner-scoped"
                );
                true
            }
        }
    }

    /// Spatial tables grouped by schema.
    pub async fn list_tables(&self) -> Result<BTreeMap<String, Vec<String>>, IntrospectionError> {
        self.metadata
            .schemas_and_tables()
            .await
            .map_err(|source| IntrospectionError::Service {
                table: "*".to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for classification and stale-result discard.
    use std::collections::VecDeque;

    use super::*;
    use crate::domain::ports::MockMetadataService;
    use crate::domain::UserId;
    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::oneshot;

    #[rstest]
    #[case("MultiPolygon", GeometryKind::Polygon)]
    #[case("ST_POLYGON", GeometryKind::Polygon)]
    #[case("ST_LineString", GeometryKind::LineString)]
    #[case("MULTILINESTRING", GeometryKind::LineString)]
    #[case("ST_MultiPoint", GeometryKind::Point)]
    #[case("Unknown", GeometryKind::Point)]
    #[case("", GeometryKind::Point)]
    fn classifies_free_text_geometry(#[case] raw: &str, #[case] expected: GeometryKind) {
        assert_eq!(classify_geometry(raw), expected);
    }

    /// Metadata double whose geometry replies are released by the test.
    struct GatedGeometry {
        replies: Mutex<VecDeque<oneshot::Receiver<String>>>,
    }

    #[async_trait]
    impl MetadataService for GatedGeometry {
        async fn schemas_and_tables(
            &self,
        ) -> Result<BTreeMap<String, Vec<String>>, MetadataServiceError> {
            Ok(BTreeMap::new())
        }

        async fn fields(&self, _table: &TableRef) -> Result<Vec<FieldInfo>, MetadataServiceError> {
            Ok(Vec::new())
        }

        async fn geometry_type(&self, _table: &TableRef) -> Result<String, MetadataServiceError> {
            let reply = lock_or_recover(&self.replies).pop_front();
            match reply {
                Some(receiver) => receiver
                    .await
                    .map_err(|_| MetadataServiceError::transport("reply dropped")),
                None => Err(MetadataServiceError::transport("no reply queued")),
            }
        }

        async fn current_user(&self) -> Result<UserId, MetadataServiceError> {
            Err(MetadataServiceError::unauthorized("anonymous"))
        }
    }

    fn wells() -> TableRef {
        TableRef::parse("survey", "wells").expect("table")
    }

    #[tokio::test]
    async fn stale_geometry_result_is_discarded() {
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let introspector = GeometryIntrospector::new(Arc::new(GatedGeometry {
            replies: Mutex::new(VecDeque::from([first_rx, second_rx])),
        }));
        let table = wells();

        let (first, second, ()) = tokio::join!(
            introspector.geometry_kind_of(&table),
            introspector.geometry_kind_of(&table),
            async {
                second_tx.send("ST_Point".to_owned()).expect("second reply");
                first_tx.send("ST_Polygon".to_owned()).expect("first reply");
            }
        );

        assert_eq!(
            first,
            Err(IntrospectionError::Superseded {
                table: "survey.wells".to_owned()
            })
        );
        assert_eq!(second, Ok(GeometryKind::Point));
        assert_eq!(introspector.known_geometry(&table), Some(GeometryKind::Point));
    }

    #[tokio::test]
    async fn sequential_lookups_are_not_superseded() {
        let mut metadata = MockMetadataService::new();
        metadata
            .expect_geometry_type()
            .times(2)
            .returning(|_| Ok("MultiLineString".to_owned()));
        let introspector = GeometryIntrospector::new(Arc::new(metadata));
        let table = wells();

        for _ in 0..2 {
            assert_eq!(
                introspector.geometry_kind_of(&table).await,
                Ok(GeometryKind::LineString)
            );
        }
    }

    #[tokio::test]
    async fn failed_field_lookup_is_treated_as_owner_scoped() {
        let mut metadata = MockMetadataService::new();
        metadata
            .expect_fields()
            .returning(|_| Err(MetadataServiceError::timeout("10s elapsed")));
        let introspector = GeometryIntrospector::new(Arc::new(metadata));

        assert!(introspector.owner_scope_of(&wells()).await);
        let error = introspector.fields_of(&wells()).await.expect_err("failure");
        assert_eq!(
            LayerError::from(error).code(),
            crate::domain::ErrorCode::IntrospectionFailed
        );
    }

    #[tokio::test]
    async fn service_errors_are_not_cached() {
        let mut metadata = MockMetadataService::new();
        metadata
            .expect_geometry_type()
            .returning(|_| Err(MetadataServiceError::status("status 500")));
        let introspector = GeometryIntrospector::new(Arc::new(metadata));

        assert!(matches!(
            introspector.geometry_kind_of(&wells()).await,
            Err(IntrospectionError::Service { .. })
        ));
        assert_eq!(introspector.known_geometry(&wells()), None);
    }
}
