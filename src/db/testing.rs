//! In-process stand-in for the hosted table API, used by tests.
//!
//! Understands `eq.` filters, `select` with embedded `reviews(...)` and
//! `likes(...)`, `Prefer: return=representation` writes and the
//! `(image_id, student_id)` uniqueness of likes.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use super::statement::Record;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub api_key: Option<String>,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    next_id: i64,
    requests: Vec<RecordedRequest>,
    fail_next: Option<u16>,
}

pub struct FakeTableApi {
    addr: SocketAddr,
    state: Arc<Mutex<Tables>>,
}

impl FakeTableApi {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(Tables::default()));
        let app = Router::new()
            .route("/rest/v1/:table", any(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn seed(&self, table: &str, row: Value) {
        let mut tables = self.state.lock().unwrap();
        let row = row.as_object().cloned().unwrap_or_default();
        if let Some(id) = row.get("id").and_then(Value::as_i64) {
            tables.next_id = tables.next_id.max(id);
        }
        tables.rows.entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.state.lock().unwrap();
        tables.rows.get(table).cloned().unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn fail_next(&self, status: u16) {
        self.state.lock().unwrap().fail_next = Some(status);
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn matches(row: &Record, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(k, v)| cell(row.get(k)) == *v)
}

fn date_column(table: &str) -> Option<&'static str> {
    match table {
        "student_images" => Some("upload_date"),
        "reviews" => Some("review_date"),
        "likes" => Some("like_date"),
        _ => None,
    }
}

async fn handle(
    State(state): State<Arc<Mutex<Tables>>>,
    Path(table): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut tables = state.lock().unwrap();
    tables.requests.push(RecordedRequest {
        method: method.to_string(),
        path: format!("/rest/v1/{}", table),
        query: pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&"),
        api_key: headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    if let Some(status) = tables.fail_next.take() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({"message": "service unavailable"}))).into_response();
    }

    let filters: Vec<(String, String)> = pairs
        .iter()
        .filter_map(|(k, v)| v.strip_prefix("eq.").map(|v| (k.clone(), v.to_string())))
        .collect();
    let select = pairs
        .iter()
        .find(|(k, _)| k == "select")
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "*".to_string());

    match method {
        Method::GET => {
            let rows: Vec<Record> = tables
                .rows
                .get(&table)
                .map(|rows| rows.iter().filter(|r| matches(r, &filters)).cloned().collect())
                .unwrap_or_default();
            let rows: Vec<Record> = rows
                .into_iter()
                .map(|mut row| {
                    for related in ["reviews", "likes"] {
                        if select.contains(&format!("{}(", related)) {
                            let id = cell(row.get("id"));
                            let children: Vec<Value> = tables
                                .rows
                                .get(related)
                                .map(|rs| {
                                    rs.iter()
                                        .filter(|r| cell(r.get("image_id")) == id)
                                        .cloned()
                                        .map(Value::Object)
                                        .collect()
                                })
                                .unwrap_or_default();
                            row.insert(related.to_string(), Value::Array(children));
                        }
                    }
                    row
                })
                .collect();
            Json(rows).into_response()
        }
        Method::POST => {
            let mut row: Record = match serde_json::from_str(&body) {
                Ok(row) => row,
                Err(e) => {
                    return (StatusCode::BAD_REQUEST, Json(json!({"message": e.to_string()})))
                        .into_response()
                }
            };
            if table == "likes" {
                let key = [
                    ("image_id".to_string(), cell(row.get("image_id"))),
                    ("student_id".to_string(), cell(row.get("student_id"))),
                ];
                let duplicate = tables
                    .rows
                    .get("likes")
                    .map_or(false, |rs| rs.iter().any(|r| matches(r, &key)));
                if duplicate {
                    return (
                        StatusCode::CONFLICT,
                        Json(json!({
                            "code": "23505",
                            "message": "duplicate key value violates unique constraint \"likes_image_id_student_id_key\""
                        })),
                    )
                        .into_response();
                }
            }
            tables.next_id += 1;
            row.insert("id".to_string(), json!(tables.next_id));
            if let Some(col) = date_column(&table) {
                row.entry(col.to_string())
                    .or_insert_with(|| json!(chrono::Utc::now().naive_utc()));
            }
            tables.rows.entry(table).or_default().push(row.clone());
            (StatusCode::CREATED, Json(vec![row])).into_response()
        }
        Method::PATCH => {
            let patch: Record = serde_json::from_str(&body).unwrap_or_default();
            let mut updated = Vec::new();
            for row in tables.rows.entry(table).or_default().iter_mut() {
                if matches(row, &filters) {
                    for (k, v) in &patch {
                        row.insert(k.clone(), v.clone());
                    }
                    updated.push(row.clone());
                }
            }
            Json(updated).into_response()
        }
        Method::DELETE => {
            let rows = tables.rows.entry(table).or_default();
            let (removed, kept): (Vec<Record>, Vec<Record>) =
                rows.drain(..).partition(|r| matches(r, &filters));
            *rows = kept;
            Json(removed).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
