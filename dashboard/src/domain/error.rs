//! Domain-level error taxonomy.
//!
//! Port errors are converted into [`LayerError`] at the call site so that no
//! raw transport failure reaches a sidebar event handler. Adapters decide how
//! to surface each error through [`LayerError::disposition`].

use serde::{Deserialize, Serialize};

use super::layer::{GeometryKind, LayerName, StyleKind};

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A descriptor with the same name already exists.
    DuplicateName,
    /// The referenced descriptor no longer exists.
    NotFound,
    /// Table metadata could not be fetched or understood.
    IntrospectionFailed,
    /// An owner-scoped layer needs an authenticated principal.
    AuthRequired,
    /// The style cannot render the table's geometry.
    StyleNotAllowed,
    /// Some layers were not restored after a style swap.
    PartialRehydration,
    /// The rendering surface rejected an operation.
    SurfaceRejected,
}

/// How the surrounding UI should surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stale UI state: log it and keep quiet.
    Silent,
    /// Transient failure: show a dismissible message.
    Dismissible,
}

/// One layer that could not be restored after a style swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehydrationFailure {
    pub layer: LayerName,
    pub reason: String,
}

/// Errors raised by layer registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerError {
    /// The user tried to add a layer that is already listed.
    #[error("layer {name} already exists")]
    DuplicateName { name: LayerName },
    /// The descriptor was removed before the action reached it.
    #[error("layer {name} not found")]
    NotFound { name: String },
    /// Geometry or field metadata could not be determined.
    #[error("could not determine layer type for {table}: {message}")]
    Introspection { table: String, message: String },
    /// Owner-scoped table without a resolvable principal; nothing is rendered.
    #[error("layer {name} requires an authenticated user")]
    AuthRequired { name: String },
    /// The requested style is illegal for the geometry.
    #[error("style {style} cannot render {geometry} geometry")]
    StyleNotAllowed {
        style: StyleKind,
        geometry: GeometryKind,
    },
    /// One or more layers failed to restore after a style swap.
    #[error("{} layer(s) failed to restore after the style swap", .failures.len())]
    PartialRehydration { failures: Vec<RehydrationFailure> },
    /// The rendering surface rejected a mutation.
    #[error("rendering surface rejected the update: {message}")]
    Surface { message: String },
}

impl LayerError {
    /// Convenience constructor for [`LayerError::DuplicateName`].
    pub fn duplicate_name(name: LayerName) -> Self {
        Self::DuplicateName { name }
    }

    /// Convenience constructor for [`LayerError::NotFound`].
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Convenience constructor for [`LayerError::Introspection`].
    pub fn introspection(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Introspection {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`LayerError::AuthRequired`].
    pub fn auth_required(name: impl Into<String>) -> Self {
        Self::AuthRequired { name: name.into() }
    }

    /// Convenience constructor for [`LayerError::StyleNotAllowed`].
    pub fn style_not_allowed(style: StyleKind, geometry: GeometryKind) -> Self {
        Self::StyleNotAllowed { style, geometry }
    }

    /// Convenience constructor for [`LayerError::Surface`].
    pub fn surface(message: impl Into<String>) -> Self {
        Self::Surface {
            message: message.into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateName { .. } => ErrorCode::DuplicateName,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Introspection { .. } => ErrorCode::IntrospectionFailed,
            Self::AuthRequired { .. } => ErrorCode::AuthRequired,
            Self::StyleNotAllowed { .. } => ErrorCode::StyleNotAllowed,
            Self::PartialRehydration { .. } => ErrorCode::PartialRehydration,
            Self::Surface { .. } => ErrorCode::SurfaceRejected,
        }
    }

    /// Structural failures stay silent; everything else is shown to the user.
    ///
    /// # Examples
    /// ```
    /// use dashboard::domain::{Disposition, LayerError};
    ///
    /// assert_eq!(LayerError::not_found("public.parcels").disposition(), Disposition::Silent);
    /// assert_eq!(
    ///     LayerError::introspection("public.parcels", "timeout").disposition(),
    ///     Disposition::Dismissible
    /// );
    /// ```
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::DuplicateName { .. } | Self::NotFound { .. } => Disposition::Silent,
            _ => Disposition::Dismissible,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LayerError::not_found("x"), ErrorCode::NotFound)]
    #[case(LayerError::auth_required("x"), ErrorCode::AuthRequired)]
    #[case(LayerError::surface("boom"), ErrorCode::SurfaceRejected)]
    #[case(
        LayerError::PartialRehydration { failures: Vec::new() },
        ErrorCode::PartialRehydration
    )]
    fn codes_follow_variants(#[case] error: LayerError, #[case] expected: ErrorCode) {
        assert_eq!(error.code(), expected);
    }

    #[test]
    fn error_codes_serialise_in_snake_case() {
        let value = serde_json::to_value(ErrorCode::IntrospectionFailed).expect("serialise");
        assert_eq!(value, serde_json::json!("introspection_failed"));
    }

    #[test]
    fn partial_rehydration_message_counts_failures() {
        let error = LayerError::PartialRehydration {
            failures: vec![RehydrationFailure {
                layer: LayerName::new("public.roads").expect("name"),
                reason: "timeout".to_owned(),
            }],
        };
        assert_eq!(
            error.to_string(),
            "1 layer(s) failed to restore after the style swap"
        );
    }
}
