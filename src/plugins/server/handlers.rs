use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap};

use crate::{prelude::*, state::AppState, sv::stats::SystemStats};

const API_KEY: &str = "x-api-key";

pub async fn health() -> &'static str {
  "OK"
}

pub async fn stats(
  State(app): State<Arc<AppState>>,
  headers: HeaderMap,
) -> Result<Json<SystemStats>> {
  let key = headers.get(API_KEY).and_then(|value| value.to_str().ok());
  if app.secret.is_empty() || key != Some(app.secret.as_str()) {
    return Err(Error::Unauthorized);
  }

  Ok(Json(app.sv().stats.system().await?))
}
