use crate::{errors::AppError, models::document::DocumentRecord, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
};

/// `GET /documents/{*business_id}`
///
/// Every metadata record stored under the archive path, oldest first.
/// Re-uploaded paths return one record per upload.
pub async fn list_documents(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<Vec<DocumentRecord>>, AppError> {
    let records = state.documents.find_by_business_id(&business_id).await?;
    Ok(Json(records))
}
