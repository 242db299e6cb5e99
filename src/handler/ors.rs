use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Query,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::HttpError,
    middleware::rate_limit::{ors_rate_limiter, rate_limit_middleware},
    AppState,
};

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROFILE: &str = "driving-car";
const PROFILES: [&str; 4] = ["driving-car", "driving-hgv", "cycling-regular", "foot-walking"];

pub fn ors_handler() -> Router {
    Router::new()
        .route("/route", get(route_get).post(route_post))
        .layer(middleware::from_fn_with_state(
            Arc::new(ors_rate_limiter()),
            rate_limit_middleware,
        ))
}

#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PointInput {
    Pair([f64; 2]),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteBody {
    pub start: Option<PointInput>,
    pub end: Option<PointInput>,
    pub coordinates: Option<Vec<[f64; 2]>>,
    pub profile: Option<String>,
}

/// Upstream request: `[lng, lat]` pairs, in travel order.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub profile: String,
    pub coordinates: Vec<[f64; 2]>,
}

fn valid_pair(pair: [f64; 2]) -> Option<[f64; 2]> {
    let [lng, lat] = pair;
    let ok = lng.is_finite() && lat.is_finite() && (-180.0..=180.0).contains(&lng) && (-90.0..=90.0).contains(&lat);
    ok.then_some(pair)
}

/// Parses `"lng,lat"`.
pub fn parse_point(raw: &str) -> Option<[f64; 2]> {
    let (lng, lat) = raw.split_once(',')?;
    let lng = lng.trim().parse::<f64>().ok()?;
    let lat = lat.trim().parse::<f64>().ok()?;
    valid_pair([lng, lat])
}

fn point_from_input(input: &PointInput) -> Option<[f64; 2]> {
    match input {
        PointInput::Pair(pair) => valid_pair(*pair),
        PointInput::Text(raw) => parse_point(raw),
    }
}

fn parse_profile(raw: Option<&str>) -> Result<String, HttpError> {
    match raw.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(DEFAULT_PROFILE.to_string()),
        Some(profile) if PROFILES.contains(&profile) => Ok(profile.to_string()),
        Some(profile) => Err(HttpError::bad_request(format!("Unsupported profile '{}'", profile))),
    }
}

impl RouteRequest {
    pub fn from_query(query: &RouteQuery) -> Result<Self, HttpError> {
        let (Some(start), Some(end)) = (query.start.as_deref(), query.end.as_deref()) else {
            return Err(HttpError::bad_request("start and end are required as lng,lat"));
        };

        let start = parse_point(start).ok_or_else(|| HttpError::bad_request("start must be lng,lat"))?;
        let end = parse_point(end).ok_or_else(|| HttpError::bad_request("end must be lng,lat"))?;

        Ok(RouteRequest {
            profile: parse_profile(query.profile.as_deref())?,
            coordinates: vec![start, end],
        })
    }

    pub fn from_body(body: &RouteBody) -> Result<Self, HttpError> {
        let coordinates = match (&body.coordinates, &body.start, &body.end) {
            (Some(waypoints), _, _) => {
                if waypoints.len() < 2 {
                    return Err(HttpError::bad_request("coordinates needs at least two points"));
                }
                waypoints
                    .iter()
                    .map(|pair| valid_pair(*pair))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| HttpError::bad_request("coordinates must be [lng, lat] pairs"))?
            }
            (None, Some(start), Some(end)) => {
                let start = point_from_input(start).ok_or_else(|| HttpError::bad_request("start must be lng,lat"))?;
                let end = point_from_input(end).ok_or_else(|| HttpError::bad_request("end must be lng,lat"))?;
                vec![start, end]
            }
            _ => return Err(HttpError::bad_request("Provide start and end, or coordinates")),
        };

        Ok(RouteRequest {
            profile: parse_profile(body.profile.as_deref())?,
            coordinates,
        })
    }
}

pub async fn route_get(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<RouteQuery>,
) -> Result<Response, HttpError> {
    let request = RouteRequest::from_query(&query)?;
    forward(&app_state, request).await
}

pub async fn route_post(
    Extension(app_state): Extension<Arc<AppState>>,
    body: Option<Json<RouteBody>>,
) -> Result<Response, HttpError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = RouteRequest::from_body(&body)?;
    forward(&app_state, request).await
}

async fn forward(app_state: &AppState, request: RouteRequest) -> Result<Response, HttpError> {
    let api_key = app_state
        .env
        .ors_api_key
        .as_deref()
        .ok_or_else(|| HttpError::server_error("Routing is not configured"))?;

    let url = format!(
        "{}/v2/directions/{}/geojson",
        app_state.env.ors_base_url.trim_end_matches('/'),
        request.profile
    );

    let upstream = app_state
        .http_client
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, api_key)
        .timeout(UPSTREAM_TIMEOUT)
        .json(&json!({ "coordinates": request.coordinates }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!("Routing upstream unreachable: {}", e);
            HttpError::new("Routing service unreachable", StatusCode::BAD_GATEWAY)
        })?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        tracing::warn!("Routing upstream answered {}", status);
    }

    let body = upstream.bytes().await.map_err(|e| {
        tracing::error!("Routing upstream body failed: {}", e);
        HttpError::new("Routing service unreachable", StatusCode::BAD_GATEWAY)
    })?;

    Ok((status, [(header::CONTENT_TYPE, "application/json")], body.to_vec()).into_response())
}
