//! Bulk CSV upload.

use super::{run_blocking, ApiError, AppState};
use crate::ingest::parse_bars_csv;
use crate::store::normalize_symbol;
use axum::{
    extract::{Multipart, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Deserialize)]
pub struct UploadQuery {
    pub symbol: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub symbol: String,
    pub rows_processed: usize,
}

/// `POST /upload-csv?symbol=..` with the file in multipart field `file`.
pub async fn upload_csv(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let symbol = normalize_symbol(&query.symbol);
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol is required".to_string()));
    }

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if !filename.to_ascii_lowercase().ends_with(".csv") {
            return Err(ApiError::BadRequest("Only CSV files are supported".to_string()));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::BadRequest("Missing file field".to_string()));
    };

    let records = parse_bars_csv(&bytes).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let store = state.store.clone();
    let target = symbol.clone();
    let rows_processed = run_blocking(move || store.insert_bars(&target, &records)).await?;

    info!("📥 Imported {} bars for {} from {}", rows_processed, symbol, filename);
    Ok(Json(UploadResponse {
        symbol,
        rows_processed,
    }))
}
