//! Embedding proxy endpoint

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Response},
};
use serde::Deserialize;

use crate::error::Result;
use crate::router::middleware::auth::decode_token;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub url: String,
    /// JWT in the query string: an iframe cannot set Authorization headers
    pub token: String,
}

pub async fn proxy_fetch(
    State(state): State<AppState>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Result<Response<Body>> {
    decode_token(&query.token, &state.config.auth.jwt_secret)?;

    state.proxy.fetch(&query.url, &headers).await
}
