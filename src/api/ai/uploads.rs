//! `POST /ai/uploads`, `GET /ai/uploads/{id}` (§4.4, §4.7): multipart attachment upload
//! capped at the configured byte budget (default 10 MiB), opaque-id fetch with a
//! `Content-Disposition` filename.

use crate::api::{authenticate, ClassifiedRole, RequestId};
use crate::audit::detail;
use crate::error::{ok, GatewayError};
use crate::session::Capability;
use crate::state::AppState;
use axum::extract::{Extension, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub async fn create(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    rid: Extension<RequestId>,
    mut multipart: Multipart,
) -> Result<Response, GatewayError> {
    let meta = authenticate(&state, &role, Capability::Full).await?;

    let mut filename = "upload.bin".to_string();
    let mut mime = "application/octet-stream".to_string();
    let mut data: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(e.to_string()))?
    {
        if let Some(name) = field.file_name() {
            filename = name.to_string();
        }
        if let Some(ct) = field.content_type() {
            mime = ct.to_string();
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        if bytes.len() > state.config.upload_max_bytes {
            return Err(GatewayError::PayloadTooLarge);
        }
        data = Some(bytes);
        break;
    }

    let Some(bytes) = data else {
        return Err(GatewayError::Validation("no file part in multipart body".into()));
    };

    match state.ai.save_upload(bytes, &filename, &mime).await {
        Ok(info) => {
            state
                .audit
                .success("ai.uploads.create", Some(&meta), detail([("upload_id", info.upload_id.clone())]), &rid.0 .0)
                .await;
            Ok(ok(serde_json::json!({
                "upload_id": info.upload_id,
                "url": format!("/ai/uploads/{}", info.upload_id),
                "filename": info.filename,
                "mime": info.mime,
                "size": info.size,
            })))
        }
        Err(e) => Err(GatewayError::internal("ai.uploads.create", e)),
    }
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
    role: Extension<ClassifiedRole>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    authenticate(&state, &role, Capability::Full).await?;
    let (info, bytes) = state.ai.open_upload(&id).await.ok_or(GatewayError::NotFound)?;
    let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(&info.filename));
    Ok((
        [
            (header::CONTENT_TYPE, info.mime.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn sanitize_filename(name: &str) -> String {
    name.replace(['"', '\r', '\n'], "_")
}
