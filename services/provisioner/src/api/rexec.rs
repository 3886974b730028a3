//! Remote execution endpoints.

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};

use crate::api::error::ApiError;
use crate::auth::require_group_membership;
use crate::provision::BrokerConfig;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Deserialize)]
pub struct RexecRequest {
    pub requirements: Vec<String>,
    /// Only read when token validation is disabled.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RexecRequest {
    /// Build a request from urlencoded form fields. `requirments` is the
    /// field name older clients send; `requirements` is accepted too.
    pub fn from_form(fields: Vec<(String, String)>) -> Self {
        let mut requirements = Vec::new();
        let mut user_id = None;
        for (name, value) in fields {
            match name.as_str() {
                "requirments" | "requirements" => requirements.push(value),
                "user_id" => user_id = Some(value),
                _ => {}
            }
        }
        Self {
            requirements,
            user_id,
        }
    }
}

/// Extracts a [`RexecRequest`] from either a JSON body or an
/// `application/x-www-form-urlencoded` body with repeated requirement fields.
#[derive(Debug)]
pub struct RexecPayload(pub RexecRequest);

impl<S> FromRequest<S> for RexecPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(fields) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::bad_request("invalid_request", rejection.body_text()))?;
            return Ok(Self(RexecRequest::from_form(fields)));
        }

        let Json(request) = Json::<RexecRequest>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::bad_request("invalid_request", rejection.body_text()))?;
        Ok(Self(request))
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct RexecResponse {
    pub message: String,
}

/// Who the provisioning call runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub group_id: String,
    pub user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rexec", post(create_rexec_server))
        .route("/broker-config", get(broker_config))
}

async fn create_rexec_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<RexecPayload, ApiError>,
) -> Result<Json<RexecResponse>, ApiError> {
    let request_id = request_id(&headers);

    let RexecPayload(request) = body.map_err(|e| e.with_request_id(request_id.clone()))?;

    let caller = resolve_caller(&state, &headers, request.user_id.as_deref())
        .await
        .map_err(|e| e.with_request_id(request_id.clone()))?;

    let span = tracing::info_span!(
        "rexec",
        request_id = %request_id,
        group_id = %caller.group_id,
        user_id = %caller.user_id
    );

    let outcome = state
        .provisioner()
        .provision(&caller.group_id, &caller.user_id, &request.requirements)
        .instrument(span)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    info!(request_id = %request_id, outcome = ?outcome, "Provisioning request finished");
    Ok(Json(RexecResponse {
        message: outcome.message().to_string(),
    }))
}

async fn broker_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BrokerConfig>, ApiError> {
    let request_id = request_id(&headers);
    let api_url = api_url(&headers, state.root_path());

    let config = state
        .provisioner()
        .broker_config(api_url)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(Json(config))
}

/// With an identity service configured the caller comes from the token and
/// its group membership; otherwise from the request body and the default
/// group.
pub async fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
    body_user_id: Option<&str>,
) -> Result<Caller, ApiError> {
    let default_group = &state.auth().default_group_id;

    let Some(identity_client) = state.identity() else {
        let user_id = body_user_id
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::bad_request("missing_user_id", "user_id is required"))?;
        return Ok(Caller {
            group_id: default_group.clone(),
            user_id: user_id.to_string(),
        });
    };

    let token = bearer_token(headers)?;
    let identity = identity_client.validate(token).await?;
    let group_id = require_group_membership(&identity, state.auth())?
        .unwrap_or_else(|| default_group.clone());

    Ok(Caller {
        group_id,
        user_id: identity.sub,
    })
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing_token", "token is required"))?;

    value
        .trim()
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ApiError::unauthorized("invalid_authorization", "Authorization must be a Bearer token")
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Public base URL of this API as seen by the caller.
pub fn api_url(headers: &HeaderMap, root_path: &str) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, header::HOST.as_str()))
        .unwrap_or("localhost");
    let root = root_path.trim_end_matches('/');
    format!("{scheme}://{host}{root}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn api_url_uses_host_and_root_path() {
        let h = headers(&[("host", "rexec.example.com")]);
        assert_eq!(api_url(&h, "/api/"), "http://rexec.example.com/api");
        assert_eq!(api_url(&h, ""), "http://rexec.example.com");
    }

    #[test]
    fn api_url_honours_forwarding_headers() {
        let h = headers(&[
            ("host", "10.0.0.1:8000"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "rexec.example.com"),
        ]);
        assert_eq!(api_url(&h, "/rexec"), "https://rexec.example.com/rexec");
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer abc")])).unwrap(),
            "abc"
        );
        assert!(bearer_token(&headers(&[])).is_err());
        assert!(bearer_token(&headers(&[("authorization", "Basic abc")])).is_err());
        assert!(bearer_token(&headers(&[("authorization", "Bearer ")])).is_err());
    }

    #[test]
    fn form_fields_accept_both_spellings() {
        let request = RexecRequest::from_form(vec![
            ("requirments".to_string(), "python==3.11".to_string()),
            ("user_id".to_string(), "u-1".to_string()),
            ("requirements".to_string(), "numpy==1.2".to_string()),
            ("extra".to_string(), "ignored".to_string()),
        ]);
        assert_eq!(request.requirements, ["python==3.11", "numpy==1.2"]);
        assert_eq!(request.user_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn request_id_prefers_the_header() {
        assert_eq!(request_id(&headers(&[("x-request-id", "req-7")])), "req-7");
        assert!(!request_id(&headers(&[])).is_empty());
    }
}
