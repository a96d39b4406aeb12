//! DTOs for decoding metadata service JSON responses.

use serde::Deserialize;

use crate::domain::{FieldInfo, UserId};

#[derive(Debug, Deserialize)]
pub(super) struct FieldsDto {
    #[serde(default)]
    pub(super) fields: Vec<FieldInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeometryTypeDto {
    pub(super) geometry_type: String,
}

/// `GET /me` payload. Older deployments name the key `user_id`.
#[derive(Debug, Deserialize)]
pub(super) struct CurrentUserDto {
    id: Option<i64>,
    user_id: Option<i64>,
}

impl CurrentUserDto {
    pub(super) fn into_user_id(self) -> Result<UserId, String> {
        let raw = self
            .id
            .or(self.user_id)
            .ok_or_else(|| "profile payload carries neither id nor user_id".to_owned())?;
        UserId::new(raw).map_err(|error| error.to_string())
    }
}
