use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::db::{self, DbError, NewLike, NewReview, NewSubmission, Score};
use crate::state::AppState;

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

fn db_failure(e: DbError) -> Response {
    if e.is_unique_violation() {
        return failure(StatusCode::CONFLICT, e.to_string());
    }
    tracing::error!("Database error: {}", e);
    failure(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "backend": state.db.kind() }))
}

pub async fn list_images(State(state): State<Arc<AppState>>) -> Response {
    match db::list_submissions(&state.db).await {
        Ok(images) => Json(images).into_response(),
        Err(e) => db_failure(e),
    }
}

pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut student_name = String::new();
    let mut student_id = String::new();
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "studentName" => student_name = field.text().await.unwrap_or_default(),
            "studentId" => student_id = field.text().await.unwrap_or_default(),
            "image" => {
                let filename = field.file_name().unwrap_or("image").to_string();
                if let Ok(data) = field.bytes().await {
                    image = Some((filename, data.to_vec()));
                }
            }
            _ => {}
        }
    }

    let (student_name, student_id) = (student_name.trim(), student_id.trim());
    if student_name.is_empty() || student_id.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Student name and id are required");
    }

    let (original_name, data) = match image {
        Some((name, data)) if !data.is_empty() => (name, data),
        _ => return failure(StatusCode::BAD_REQUEST, "No image uploaded"),
    };

    let is_image = mime_guess::from_path(&original_name)
        .first()
        .map_or(false, |m| m.type_() == mime_guess::mime::IMAGE);
    if !is_image {
        return failure(StatusCode::BAD_REQUEST, "Only image files are allowed");
    }
    if data.len() > state.config.max_upload_bytes {
        return failure(StatusCode::PAYLOAD_TOO_LARGE, "Image is too large");
    }

    let stored = state.storage.upload(&data, &original_name).await;
    let (Some(filename), Some(file_url)) = (stored.filename.clone(), stored.url.clone()) else {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            stored.error.unwrap_or_else(|| "Upload failed".to_string()),
        );
    };

    let submission = NewSubmission {
        student_name: student_name.to_string(),
        student_id: student_id.to_string(),
        filename: filename.clone(),
        original_name: Some(original_name),
        file_url: Some(file_url.clone()),
        file_size: stored.size.and_then(|size| i64::try_from(size).ok()),
    };

    match db::create_submission(&state.db, submission).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "id": id, "filename": filename, "url": file_url })),
        )
            .into_response(),
        Err(e) => {
            // No row points at the file, so drop it.
            state.storage.delete(&filename).await;
            db_failure(e)
        }
    }
}

pub async fn delete_image(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    let submission = match db::get_submission(&state.db, id).await {
        Ok(Some(s)) => s,
        Ok(None) => return failure(StatusCode::NOT_FOUND, "Image not found"),
        Err(e) => return db_failure(e),
    };

    let removed = state.storage.delete(&submission.filename).await;
    if !removed.success {
        tracing::warn!(
            "Could not remove stored file {}: {}",
            submission.filename,
            removed.error.unwrap_or_default()
        );
    }

    match db::delete_submission(&state.db, id).await {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(e) => db_failure(e),
    }
}

pub async fn image_reviews(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match db::reviews_for(&state.db, id).await {
        Ok(reviews) => Json(reviews).into_response(),
        Err(e) => db_failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub teacher_name: String,
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn review_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<ReviewRequest>,
) -> Response {
    let score = match Score::new(request.score) {
        Ok(score) => score,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if request.teacher_name.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Teacher name is required");
    }

    let review = NewReview {
        image_id: id,
        teacher_name: request.teacher_name.trim().to_string(),
        score,
        comment: request.comment,
    };
    match db::upsert_review(&state.db, review).await {
        Ok(outcome) => Json(json!({ "success": true, "result": outcome })).into_response(),
        Err(e) => db_failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub student_name: String,
    pub student_id: String,
}

pub async fn like_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<LikeRequest>,
) -> Response {
    if request.student_id.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Student id is required");
    }
    let like = NewLike {
        image_id: id,
        student_name: request.student_name,
        student_id: request.student_id.trim().to_string(),
    };
    match db::add_like(&state.db, like).await {
        Ok(like_id) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "id": like_id })),
        )
            .into_response(),
        Err(e) => db_failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlikeRequest {
    pub student_id: String,
}

pub async fn unlike_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<UnlikeRequest>,
) -> Response {
    match db::remove_like(&state.db, id, request.student_id.trim()).await {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => failure(StatusCode::NOT_FOUND, "Like not found"),
        Err(e) => db_failure(e),
    }
}

pub async fn image_likes(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match db::likes_for(&state.db, id).await {
        Ok(likes) => Json(likes).into_response(),
        Err(e) => db_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Config};
    use crate::storage::LocalStore;
    use tempfile::TempDir;

    async fn test_state() -> (TempDir, TempDir, Arc<AppState>) {
        let (db_dir, db) = crate::db::tests::embedded_db().await;
        let upload_dir = TempDir::new().unwrap();
        let config = Config {
            backend: BackendConfig::Embedded { path: "unused".to_string() },
            upload_folder: upload_dir.path().to_path_buf(),
            max_upload_bytes: 1024 * 1024,
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let state = Arc::new(AppState {
            db,
            storage: Arc::new(LocalStore::new(upload_dir.path().to_path_buf())),
            config: Arc::new(config),
        });
        (db_dir, upload_dir, state)
    }

    fn review_body(score: i64) -> Json<ReviewRequest> {
        Json(ReviewRequest {
            teacher_name: "Mr. Lind".to_string(),
            score,
            comment: Some(format!("scored {}", score)),
        })
    }

    #[tokio::test]
    async fn test_review_score_bounds() {
        let (_db, _uploads, state) = test_state().await;

        for bad in [-1, 101] {
            let response = review_image(State(state.clone()), Path(7), review_body(bad)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(db::reviews_for(&state.db, 7).await.unwrap().is_empty());

        for good in [0, 100] {
            let response = review_image(State(state.clone()), Path(7), review_body(good)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let reviews = db::reviews_for(&state.db, 7).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].score, 100);
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_reviews_before_responding() {
        let (_db, uploads, state) = test_state().await;

        let stored = state.storage.upload(b"img", "dog.png").await;
        let filename = stored.filename.unwrap();
        let id = db::create_submission(
            &state.db,
            NewSubmission {
                student_name: "Ann".to_string(),
                student_id: "S1".to_string(),
                filename: filename.clone(),
                original_name: Some("dog.png".to_string()),
                file_url: stored.url,
                file_size: Some(3),
            },
        )
        .await
        .unwrap();
        review_image(State(state.clone()), Path(id), review_body(80)).await;

        let response = delete_image(State(state.clone()), Path(id)).await;
        assert_eq!(response.status(), StatusCode::OK);

        assert!(db::get_submission(&state.db, id).await.unwrap().is_none());
        assert!(db::reviews_for(&state.db, id).await.unwrap().is_empty());
        assert!(!uploads.path().join(&filename).exists());

        let again = delete_image(State(state.clone()), Path(id)).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_like_conflict_and_unlike() {
        let (_db, _uploads, state) = test_state().await;
        let like = || {
            Json(LikeRequest {
                student_name: "Ann".to_string(),
                student_id: "S1".to_string(),
            })
        };

        let first = like_image(State(state.clone()), Path(5), like()).await;
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = like_image(State(state.clone()), Path(5), like()).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let unlike = || Json(UnlikeRequest { student_id: "S1".to_string() });
        let removed = unlike_image(State(state.clone()), Path(5), unlike()).await;
        assert_eq!(removed.status(), StatusCode::OK);
        let missing = unlike_image(State(state.clone()), Path(5), unlike()).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
