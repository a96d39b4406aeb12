//! Rendering filter expressions and the owner-isolation filter builder.
//!
//! No cross-user data leakage is the property this module exists to protect:
//! an owner-scoped table without a resolvable principal yields no filter at
//! all, and callers must then withhold the layer rather than render it
//! unfiltered.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use super::error::LayerError;
use super::introspector::FieldInfo;
use super::layer::{LayerDescriptor, UserId};

/// Column that marks rows as belonging to one user.
pub const OWNER_FIELD: &str = "user_id";

/// Logical predicate tree restricting rendered features.
///
/// Serialises to the renderer's expression syntax, e.g.
/// `["all", ["==", ["get", "user_id"], 7]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpression {
    /// Every clause must hold; an empty list matches everything.
    All(Vec<FilterExpression>),
    /// Both operands are equal.
    Eq(Box<FilterExpression>, Box<FilterExpression>),
    /// Feature property lookup.
    Get(String),
    /// Literal operand.
    Literal(Value),
}

impl FilterExpression {
    /// Filter that matches every feature: `["all"]`.
    pub fn match_all() -> Self {
        Self::All(Vec::new())
    }

    /// `["==", ["get", field], value]`.
    pub fn property_equals(field: impl Into<String>, value: Value) -> Self {
        Self::Eq(
            Box::new(Self::Get(field.into())),
            Box::new(Self::Literal(value)),
        )
    }

    /// Render the expression as renderer JSON.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::FilterExpression;
    /// use serde_json::json;
    ///
    /// assert_eq!(FilterExpression::match_all().to_json(), json!(["all"]));
    /// ```
    pub fn to_json(&self) -> Value {
        match self {
            Self::All(clauses) => {
                let mut items = Vec::with_capacity(clauses.len() + 1);
                items.push(json!("all"));
                items.extend(clauses.iter().map(Self::to_json));
                Value::Array(items)
            }
            Self::Eq(left, right) => json!(["==", left.to_json(), right.to_json()]),
            Self::Get(field) => json!(["get", field]),
            Self::Literal(value) => value.clone(),
        }
    }

    /// Whether the tree contains an equality clause on `field`.
    pub fn constrains(&self, field: &str) -> bool {
        match self {
            Self::All(clauses) => clauses.iter().any(|clause| clause.constrains(field)),
            Self::Eq(left, right) => {
                matches!(left.as_ref(), Self::Get(name) if name == field)
                    || matches!(right.as_ref(), Self::Get(name) if name == field)
            }
            Self::Get(_) | Self::Literal(_) => false,
        }
    }
}

impl Serialize for FilterExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Attribute filter chosen by the user for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    /// Build a selection from a field name and the value to match.
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// Derives rendering filters from column metadata and the current principal.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterBuilder;

impl FilterBuilder {
    /// Build the filter for a table with the given columns.
    ///
    /// Returns `None` when the table carries [`OWNER_FIELD`] and no principal
    /// is available. `None` means "do not render", never "render unfiltered".
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{FieldInfo, FilterBuilder, UserId};
    /// use serde_json::json;
    ///
    /// let fields = vec![FieldInfo::new("user_id", "integer")];
    /// let user = UserId::new(7).expect("user id");
    /// let filter = FilterBuilder.build(&fields, Some(user)).expect("owner filter");
    /// assert_eq!(filter.to_json(), json!(["all", ["==", ["get", "user_id"], 7]]));
    /// assert!(FilterBuilder.build(&fields, None).is_none());
    /// ```
    pub fn build(
        &self,
        fields: &[FieldInfo],
        principal: Option<UserId>,
    ) -> Option<FilterExpression> {
        self.build_with_selection(fields, principal, None)
    }

    /// Build the filter, appending the user's attribute selection if any.
    pub fn build_with_selection(
        &self,
        fields: &[FieldInfo],
        principal: Option<UserId>,
        selection: Option<&FieldFilter>,
    ) -> Option<FilterExpression> {
        Self::compose(Self::is_owner_scoped(fields), principal, selection)
    }

    /// Rebuild the filter of an existing layer from its recorded owner scope
    /// and attribute selection.
    pub fn for_descriptor(
        &self,
        descriptor: &LayerDescriptor,
        principal: Option<UserId>,
    ) -> Option<FilterExpression> {
        Self::compose(
            descriptor.is_owner_scoped(),
            principal,
            descriptor.filter_field(),
        )
    }

    fn compose(
        owner_scoped: bool,
        principal: Option<UserId>,
        selection: Option<&FieldFilter>,
    ) -> Option<FilterExpression> {
        let mut clauses = Vec::new();
        if owner_scoped {
            let user = principal?;
            clauses.push(FilterExpression::property_equals(
                OWNER_FIELD,
                json!(user.get()),
            ));
        }
        if let Some(selection) = selection {
            clauses.push(FilterExpression::property_equals(
                selection.field.clone(),
                selection.value.clone(),
            ));
        }
        Some(FilterExpression::All(clauses))
    }

    /// Variant of [`FilterBuilder::build_with_selection`] for call sites that
    /// propagate errors: a missing principal becomes
    /// [`LayerError::AuthRequired`].
    pub fn try_build(
        &self,
        layer: &str,
        fields: &[FieldInfo],
        principal: Option<UserId>,
        selection: Option<&FieldFilter>,
    ) -> Result<FilterExpression, LayerError> {
        self.build_with_selection(fields, principal, selection)
            .ok_or_else(|| LayerError::auth_required(layer))
    }

    /// Filter for a new layer whose owner scope is already decided, with no
    /// attribute selection yet.
    ///
    /// # Errors
    ///
    /// [`LayerError::AuthRequired`] when `owner_scoped` holds and no
    /// principal is available.
    pub fn try_for_scope(
        &self,
        layer: &str,
        owner_scoped: bool,
        principal: Option<UserId>,
    ) -> Result<FilterExpression, LayerError> {
        Self::compose(owner_scoped, principal, None).ok_or_else(|| LayerError::auth_required(layer))
    }

    /// Whether the columns include the owner marker, matched exactly.
    pub fn is_owner_scoped(fields: &[FieldInfo]) -> bool {
        fields.iter().any(|field| field.name == OWNER_FIELD)
    }
}
