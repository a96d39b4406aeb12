//! Reqwest-backed metadata service adapter.
//!
//! This adapter owns transport details only: URL construction, bearer
//! authentication, timeout and HTTP error mapping, and JSON decoding into
//! domain records.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::dto::{CurrentUserDto, FieldsDto, GeometryTypeDto};
use crate::domain::ports::{MetadataService, MetadataServiceError};
use crate::domain::{FieldInfo, TableRef, UserId};

/// Metadata adapter that performs authenticated GET requests below one base URL.
pub struct HttpMetadataService {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpMetadataService {
    /// Build an adapter using a reqwest client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base_url: Url,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MetadataServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| MetadataServiceError::transport("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, MetadataServiceError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "metadata request");
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        decode(body.as_ref())
    }
}

#[async_trait]
impl MetadataService for HttpMetadataService {
    async fn schemas_and_tables(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, MetadataServiceError> {
        self.get_json(&["schemas-and-tables"]).await
    }

    async fn fields(&self, table: &TableRef) -> Result<Vec<FieldInfo>, MetadataServiceError> {
        let dto: FieldsDto = self
            .get_json(&["fields", table.schema.as_ref(), table.table.as_ref()])
            .await?;
        Ok(dto.fields)
    }

    async fn geometry_type(&self, table: &TableRef) -> Result<String, MetadataServiceError> {
        let dto: GeometryTypeDto = self
            .get_json(&["geometry-type", table.schema.as_ref(), table.table.as_ref()])
            .await?;
        Ok(dto.geometry_type)
    }

    async fn current_user(&self) -> Result<UserId, MetadataServiceError> {
        let dto: CurrentUserDto = self.get_json(&["me"]).await?;
        dto.into_user_id().map_err(MetadataServiceError::decode)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, MetadataServiceError> {
    serde_json::from_slice(body).map_err(|error| {
        MetadataServiceError::decode(format!("invalid metadata JSON payload: {error}"))
    })
}

fn map_transport_error(error: reqwest::Error) -> MetadataServiceError {
    if error.is_timeout() {
        MetadataServiceError::timeout(error.to_string())
    } else {
        MetadataServiceError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> MetadataServiceError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MetadataServiceError::unauthorized(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            MetadataServiceError::timeout(message)
        }
        _ => MetadataServiceError::status(message),
    }
}

/// Single-line excerpt of an error body, capped at [`PREVIEW_LIMIT`] chars.
fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut words = text.split_whitespace();
    let mut preview = words.next().unwrap_or_default().to_owned();
    for word in words {
        preview.push(' ');
        preview.push_str(word);
    }
    if let Some((cut, _)) = preview.char_indices().nth(PREVIEW_LIMIT) {
        preview.truncate(cut);
        preview.push_str("...");
    }
    preview
}

const PREVIEW_LIMIT: usize = 160;

#[cfg(test)]
mod tests {
    //! Regression coverage for non-network mapping helpers.

    use super::*;
    use rstest::rstest;

    fn service(base: &str) -> HttpMetadataService {
        HttpMetadataService::new(
            Url::parse(base).expect("base url"),
            Duration::from_secs(1),
            None,
        )
        .expect("client")
    }

    #[rstest]
    #[case("http://localhost:8000/api/v1")]
    #[case("http://localhost:8000/api/v1/")]
    fn endpoints_extend_the_base_path(#[case] base: &str) {
        let url = service(base)
            .endpoint(&["fields", "public", "parcels"])
            .expect("endpoint");
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/fields/public/parcels");
    }

    #[rstest]
    #[case::unauthorised(StatusCode::UNAUTHORIZED, "Unauthorized")]
    #[case::forbidden(StatusCode::FORBIDDEN, "Unauthorized")]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, "Timeout")]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, "Timeout")]
    #[case::not_found(StatusCode::NOT_FOUND, "Status")]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "Status")]
    fn maps_http_statuses_to_expected_domain_errors(
        #[case] status: StatusCode,
        #[case] expected: &str,
    ) {
        let error = map_status_error(status, b"{\"detail\":\"nope\"}");
        let matched = match expected {
            "Unauthorized" => matches!(error, MetadataServiceError::Unauthorized { .. }),
            "Timeout" => matches!(error, MetadataServiceError::Timeout { .. }),
            "Status" => matches!(error, MetadataServiceError::Status { .. }),
            _ => panic!("unsupported test expectation: {expected}"),
        };
        assert!(matched, "{status} should map to {expected}, got {error:?}");
    }

    #[test]
    fn status_messages_include_a_compact_body_preview() {
        let error = map_status_error(StatusCode::NOT_FOUND, b"{\n  \"detail\":   \"missing\"\n}");
        assert_eq!(
            error.to_string(),
            "metadata request failed: status 404: { \"detail\": \"missing\" }"
        );
    }

    #[test]
    fn decodes_field_payloads() {
        let dto: FieldsDto = decode(
            br#"{"fields": [{"name": "id", "type": "integer"}, {"name": "user_id", "type": "integer"}]}"#,
        )
        .expect("fields decode");
        assert_eq!(
            dto.fields,
            vec![
                FieldInfo::new("id", "integer"),
                FieldInfo::new("user_id", "integer")
            ]
        );
    }

    #[test]
    fn decodes_geometry_payloads() {
        let dto: GeometryTypeDto =
            decode(br#"{"geometryType": "ST_MultiPolygon"}"#).expect("geometry decode");
        assert_eq!(dto.geometry_type, "ST_MultiPolygon");
    }

    #[rstest]
    #[case(br#"{"id": 7, "email": "a@b.c"}"#.as_slice(), Some(7))]
    #[case(br#"{"user_id": 9}"#.as_slice(), Some(9))]
    #[case(br#"{"email": "a@b.c"}"#.as_slice(), None)]
    #[case(br#"{"id": 0}"#.as_slice(), None)]
    fn resolves_the_principal_from_either_key(#[case] body: &[u8], #[case] expected: Option<i64>) {
        let dto: CurrentUserDto = decode(body).expect("profile decode");
        assert_eq!(dto.into_user_id().ok().map(UserId::get), expected);
    }

    #[test]
    fn malformed_json_maps_to_decode_errors() {
        let error = decode::<GeometryTypeDto>(b"<html>").expect_err("decode fails");
        assert!(matches!(error, MetadataServiceError::Decode { .. }));
    }
}
