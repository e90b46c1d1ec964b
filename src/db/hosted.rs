use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::error::DbError;
use super::statement::{Classified, Param, QueryResult, Record, Statement};
use super::{BackendKind, Store};

const REST_PATH: &str = "rest/v1";
const LIST_SELECT: &str = "*,reviews(score,comment,teacher_name,review_date),likes(id)";

#[derive(Debug, Default, Deserialize)]
struct HostedErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Table API client for a hosted (PostgREST style) backend.
///
/// The hosted tables are provisioned out of band, so this store is
/// schema-unaware. Each query is exactly one outbound request.
pub struct HostedStore {
    client: Client,
    base_url: String,
}

impl HostedStore {
    pub fn new(url: &str, api_key: &str) -> Result<Self, DbError> {
        let mut headers = HeaderMap::new();
        let invalid = |_| DbError::Config("hosted API key is not a valid header value".to_string());
        let key = HeaderValue::from_str(api_key).map_err(invalid)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(invalid)?;
        headers.insert("apikey", key);
        headers.insert("Authorization", bearer);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}/{}", self.base_url, REST_PATH, table))
    }

    fn write(&self, method: Method, table: &str) -> RequestBuilder {
        self.table(method, table)
            .header("Prefer", "return=representation")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Vec<Record>, DbError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(vec![]);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let body: HostedErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .or(body.details)
            .unwrap_or_else(|| text.clone());
        if status.as_u16() == 409 || body.code.as_deref() == Some("23505") {
            return Err(DbError::UniqueViolation(format!(
                "{} ({})",
                message,
                body.code.as_deref().unwrap_or("409")
            )));
        }
        Err(DbError::Hosted {
            status: status.as_u16(),
            code: body.code,
            message,
        })
    }

    async fn dispatch(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        let rows = match statement {
            Statement::ListSubmissions => {
                let rows = self
                    .send(self.table(Method::GET, "student_images").query(&[
                        ("select", LIST_SELECT),
                        ("order", "upload_date.desc,id.desc"),
                    ]))
                    .await?;
                return Ok(QueryResult::from_rows(rows.into_iter().map(flatten_summary).collect()));
            }
            Statement::GetSubmission { id } => {
                self.send(
                    self.table(Method::GET, "student_images")
                        .query(&[("select", "*".to_string()), ("id", eq(id))]),
                )
                .await?
            }
            Statement::InsertSubmission(s) => {
                let rows = self
                    .send(self.write(Method::POST, "student_images").json(&json!({
                        "student_name": s.student_name,
                        "student_id": s.student_id,
                        "filename": s.filename,
                        "original_name": s.original_name,
                        "file_url": s.file_url,
                        "file_size": s.file_size,
                    })))
                    .await?;
                return Ok(inserted(rows));
            }
            Statement::DeleteSubmission { id } => {
                self.send(self.write(Method::DELETE, "student_images").query(&[("id", eq(id))]))
                    .await?
            }
            Statement::ReviewsFor { image_id } => {
                self.send(self.table(Method::GET, "reviews").query(&[
                    ("select", "*".to_string()),
                    ("image_id", eq(image_id)),
                    ("order", "review_date.desc".to_string()),
                ]))
                .await?
            }
            Statement::InsertReview(r) => {
                let rows = self
                    .send(self.write(Method::POST, "reviews").json(&json!({
                        "image_id": r.image_id,
                        "teacher_name": r.teacher_name,
                        "score": r.score.value(),
                        "comment": r.comment,
                    })))
                    .await?;
                return Ok(inserted(rows));
            }
            Statement::UpdateReview(r) => {
                self.send(
                    self.write(Method::PATCH, "reviews")
                        .query(&[("image_id", eq(&r.image_id))])
                        .json(&json!({
                            "teacher_name": r.teacher_name,
                            "score": r.score.value(),
                            "comment": r.comment,
                            "review_date": chrono::Utc::now().naive_utc(),
                        })),
                )
                .await?
            }
            Statement::DeleteReviewsFor { image_id } => {
                self.send(self.write(Method::DELETE, "reviews").query(&[("image_id", eq(image_id))]))
                    .await?
            }
            Statement::FindLike { image_id, student_id } => {
                self.send(self.table(Method::GET, "likes").query(&[
                    ("select", "id".to_string()),
                    ("image_id", eq(image_id)),
                    ("student_id", eq(student_id)),
                ]))
                .await?
            }
            Statement::LikesFor { image_id } => {
                self.send(self.table(Method::GET, "likes").query(&[
                    ("select", "*".to_string()),
                    ("image_id", eq(image_id)),
                    ("order", "like_date.desc".to_string()),
                ]))
                .await?
            }
            Statement::InsertLike(l) => {
                let rows = self
                    .send(self.write(Method::POST, "likes").json(&json!({
                        "image_id": l.image_id,
                        "student_name": l.student_name,
                        "student_id": l.student_id,
                    })))
                    .await?;
                return Ok(inserted(rows));
            }
            Statement::DeleteLike { image_id, student_id } => {
                self.send(self.write(Method::DELETE, "likes").query(&[
                    ("image_id", eq(image_id)),
                    ("student_id", eq(student_id)),
                ]))
                .await?
            }
            Statement::DeleteLikesFor { image_id } => {
                self.send(self.write(Method::DELETE, "likes").query(&[("image_id", eq(image_id))]))
                    .await?
            }
        };
        Ok(QueryResult::from_rows(rows))
    }
}

#[async_trait]
impl Store for HostedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn initialize(&self) -> Result<(), DbError> {
        tracing::info!("Hosted backend: tables are provisioned externally, skipping schema setup");
        Ok(())
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.dispatch(statement)
            .await
            .inspect_err(|e| tracing::error!("Hosted query failed: {} ({:?})", e, statement))
    }

    async fn execute_sql(&self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        let classified = Statement::classify(sql, params)
            .inspect_err(|e| tracing::error!("Hosted statement rejected: {} ({})", e, sql))?;
        match classified {
            Classified::Known(statement) => self.execute(&statement).await,
            Classified::Schema => Ok(QueryResult::empty()),
            Classified::Unknown => {
                tracing::warn!("Hosted backend has no mapping for statement, returning no rows: {}", sql);
                Ok(QueryResult::empty())
            }
        }
    }
}

fn eq<T: std::fmt::Display + ?Sized>(value: &T) -> String {
    format!("eq.{}", value)
}

fn inserted(rows: Vec<Record>) -> QueryResult {
    let inserted_id = rows.first().and_then(|r| r.get("id")).and_then(Value::as_i64);
    QueryResult {
        inserted_id,
        ..QueryResult::from_rows(rows)
    }
}

// Reshapes an embedded-resource row into the flat list-query record.
fn flatten_summary(mut row: Record) -> Record {
    let review = match row.remove("reviews") {
        Some(Value::Array(mut reviews)) if !reviews.is_empty() => reviews.swap_remove(0),
        Some(Value::Object(review)) => Value::Object(review),
        _ => Value::Null,
    };
    for field in ["score", "comment", "teacher_name", "review_date"] {
        row.insert(
            field.to_string(),
            review.get(field).cloned().unwrap_or(Value::Null),
        );
    }

    let like_count = match row.remove("likes") {
        Some(Value::Array(likes)) => likes.len(),
        _ => 0,
    };
    row.insert("like_count".to_string(), json!(like_count));
    row
}
