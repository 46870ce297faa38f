//! Read-only bar history endpoints.

use super::{run_blocking, ApiError, AppState};
use crate::models::BarRecord;
use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<String>,
}

#[derive(Serialize)]
pub struct DateRangeResponse {
    pub min: Option<NaiveDateTime>,
    pub max: Option<NaiveDateTime>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_symbols(
    State(state): State<AppState>,
) -> Result<Json<SymbolsResponse>, ApiError> {
    let store = state.store.clone();
    let symbols = run_blocking(move || store.symbols()).await?;
    Ok(Json(SymbolsResponse { symbols }))
}

/// Calendar dates with data for a symbol.
pub async fn list_dates(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<NaiveDate>>, ApiError> {
    let store = state.store.clone();
    let dates = run_blocking(move || store.trade_dates(&symbol)).await?;
    Ok(Json(dates))
}

/// Every bar of one trading day.
pub async fn day_data(
    State(state): State<AppState>,
    Path((symbol, trade_date)): Path<(String, String)>,
) -> Result<Json<Vec<BarRecord>>, ApiError> {
    let date = NaiveDate::parse_from_str(trade_date.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!("Invalid date {:?}, expected YYYY-MM-DD", trade_date))
    })?;

    let store = state.store.clone();
    let bars = run_blocking(move || store.day_bars(&symbol, date)).await?;
    if bars.is_empty() {
        return Err(ApiError::NotFound("No data found".to_string()));
    }
    Ok(Json(bars))
}

pub async fn date_range(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<DateRangeResponse>, ApiError> {
    let store = state.store.clone();
    let range = run_blocking(move || store.date_range(&symbol)).await?;
    Ok(Json(DateRangeResponse {
        min: range.map(|(min, _)| min),
        max: range.map(|(_, max)| max),
    }))
}
