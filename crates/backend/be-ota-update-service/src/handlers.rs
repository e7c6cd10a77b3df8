use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument, warn};

use crate::{
    error::{UpdateResult, UpdateServiceError},
    multipart,
    service::AppState,
    types::{AssetQuery, ManifestQuery, Platform, ProtocolVersion, UpdatePayload, UpdateRequest},
};

pub const PROTOCOL_VERSION_HEADER: &str = "expo-protocol-version";
pub const PLATFORM_HEADER: &str = "expo-platform";
pub const RUNTIME_VERSION_HEADER: &str = "expo-runtime-version";
pub const CURRENT_UPDATE_ID_HEADER: &str = "expo-current-update-id";
pub const EMBEDDED_UPDATE_ID_HEADER: &str = "expo-embedded-update-id";
pub const EXPECT_SIGNATURE_HEADER: &str = "expo-expect-signature";
pub const SFV_VERSION_HEADER: &str = "expo-sfv-version";
pub const SIGNATURE_HEADER: &str = "expo-signature";

/// Non-empty header value. Values that are not visible ASCII count as absent.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Build a manifest request from headers, falling back to query parameters
/// for platform and runtime version.
pub fn parse_update_request(
    headers: &HeaderMap,
    query: &ManifestQuery,
) -> UpdateResult<UpdateRequest> {
    let protocol_version = ProtocolVersion::parse(header_str(headers, PROTOCOL_VERSION_HEADER))?;

    let platform: Platform = header_str(headers, PLATFORM_HEADER)
        .or_else(|| query.platform.as_deref().filter(|p| !p.is_empty()))
        .unwrap_or_default()
        .parse()?;

    let runtime_version = header_str(headers, RUNTIME_VERSION_HEADER)
        .or_else(|| query.runtime_version.as_deref().filter(|v| !v.is_empty()))
        .ok_or(UpdateServiceError::MissingRuntimeVersion)?
        .to_string();

    Ok(UpdateRequest {
        platform,
        runtime_version,
        protocol_version,
        current_update_id: header_str(headers, CURRENT_UPDATE_ID_HEADER).map(str::to_string),
        embedded_update_id: header_str(headers, EMBEDDED_UPDATE_ID_HEADER).map(str::to_string),
        expect_signature: header_str(headers, EXPECT_SIGNATURE_HEADER).is_some(),
    })
}

fn multipart_response(payload: UpdatePayload) -> UpdateResult<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(
        PROTOCOL_VERSION_HEADER,
        HeaderValue::from(u16::from(payload.protocol_version.as_u8())),
    );
    headers.insert(SFV_VERSION_HEADER, HeaderValue::from_static("0"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=0"),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&multipart::content_type())
            .map_err(|e| UpdateServiceError::config(e.to_string()))?,
    );
    if let Some(signature) = &payload.signature {
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(signature)
                .map_err(|e| UpdateServiceError::Signing(e.to_string()))?,
        );
    }

    let body = multipart::encode_single_part(payload.part_name, &payload.body);
    Ok((StatusCode::OK, headers, body).into_response())
}

#[instrument(skip(state, headers, query))]
pub async fn manifest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ManifestQuery>,
) -> Response {
    let request = match parse_update_request(&headers, &query) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match state
        .get_update(&request)
        .await
        .and_then(multipart_response)
    {
        Ok(response) => {
            debug!(
                "Served {} for runtime version {}",
                request.platform, request.runtime_version
            );
            response
        }
        Err(e) => {
            warn!("Manifest request failed: {}", e);
            e.into_response()
        }
    }
}

#[instrument(skip(state, query), fields(asset = ?query.asset, platform = ?query.platform))]
pub async fn asset_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Response {
    match state.get_asset(&query).await {
        Ok(asset) => {
            let content_type = HeaderValue::from_str(&asset.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                asset.bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!("Asset request failed: {}", e);
            e.into_response()
        }
    }
}

/// Answers every method other than GET on the update routes.
pub async fn method_not_allowed(method: Method) -> Response {
    UpdateServiceError::MethodNotAllowed(method.to_string()).into_response()
}
