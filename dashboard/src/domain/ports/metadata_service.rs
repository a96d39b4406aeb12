//! Driven port for the table metadata REST service.
//!
//! The dashboard learns which spatial tables exist, their geometry type, their
//! columns, and who the current principal is through this port. Adapters own
//! transport details; the domain only sees [`MetadataServiceError`].

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{FieldInfo, TableRef, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by metadata lookups.
    pub enum MetadataServiceError {
        /// Network failure before a response arrived.
        Transport { message: String } =>
            "metadata transport failed: {message}",
        /// The request exceeded its deadline.
        Timeout { message: String } =>
            "metadata request timed out: {message}",
        /// The backend rejected the credentials.
        Unauthorized { message: String } =>
            "metadata request unauthorised: {message}",
        /// Any other non-success status.
        Status { message: String } =>
            "metadata request failed: {message}",
        /// The response body could not be decoded.
        Decode { message: String } =>
            "metadata response malformed: {message}",
    }
}

/// Port for table introspection and principal lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// `GET /schemas-and-tables`: spatial tables grouped by schema.
    async fn schemas_and_tables(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, MetadataServiceError>;

    /// `GET /fields/{schema}/{table}`: non-geometry columns.
    async fn fields(&self, table: &TableRef) -> Result<Vec<FieldInfo>, MetadataServiceError>;

    /// `GET /geometry-type/{schema}/{table}`: free-text geometry type.
    async fn geometry_type(&self, table: &TableRef) -> Result<String, MetadataServiceError>;

    /// `GET /me`: identifier of the authenticated principal.
    async fn current_user(&self) -> Result<UserId, MetadataServiceError>;
}

/// Table entry served by [`FixtureMetadataService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureTable {
    pub geometry_type: String,
    pub fields: Vec<FieldInfo>,
}

/// In-memory metadata service for offline planning and tests.
///
/// # Examples
///
/// ```
/// # use dashboard::domain::ports::{FixtureMetadataService, MetadataService};
/// # use dashboard::domain::{FieldInfo, TableRef};
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let parcels = TableRef::parse("public", "parcels").unwrap();
/// let service = FixtureMetadataService::default()
///     .with_table(parcels.clone(), "ST_MultiPolygon", vec![FieldInfo::new("id", "integer")]);
/// assert_eq!(service.geometry_type(&parcels).await.unwrap(), "ST_MultiPolygon");
/// assert!(service.current_user().await.is_err());
/// # });
/// ```
#[derive(Debug, Default, Clone)]
pub struct FixtureMetadataService {
    tables: BTreeMap<TableRef, FixtureTable>,
    principal: Option<UserId>,
}

impl FixtureMetadataService {
    /// Register a table with its geometry type and columns.
    pub fn with_table(
        mut self,
        table: TableRef,
        geometry_type: impl Into<String>,
        fields: Vec<FieldInfo>,
    ) -> Self {
        self.tables.insert(
            table,
            FixtureTable {
                geometry_type: geometry_type.into(),
                fields,
            },
        );
        self
    }

    /// Set the principal returned by [`MetadataService::current_user`].
    pub fn with_principal(mut self, principal: UserId) -> Self {
        self.principal = Some(principal);
        self
    }

    fn lookup(&self, table: &TableRef) -> Result<&FixtureTable, MetadataServiceError> {
        self.tables
            .get(table)
            .ok_or_else(|| MetadataServiceError::status(format!("status 404: {table} not found")))
    }
}

#[async_trait]
impl MetadataService for FixtureMetadataService {
    async fn schemas_and_tables(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, MetadataServiceError> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for table in self.tables.keys() {
            grouped
                .entry(table.schema.to_string())
                .or_default()
                .push(table.table.to_string());
        }
        Ok(grouped)
    }

    async fn fields(&self, table: &TableRef) -> Result<Vec<FieldInfo>, MetadataServiceError> {
        Ok(self.lookup(table)?.fields.clone())
    }

    async fn geometry_type(&self, table: &TableRef) -> Result<String, MetadataServiceError> {
        Ok(self.lookup(table)?.geometry_type.clone())
    }

    async fn current_user(&self) -> Result<UserId, MetadataServiceError> {
        self.principal
            .ok_or_else(|| MetadataServiceError::unauthorized("no authenticated principal"))
    }
}
