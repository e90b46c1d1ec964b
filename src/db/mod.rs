mod dialect;
mod embedded;
mod error;
mod hosted;
mod managed;
mod models;
mod schema;
mod statement;
#[cfg(test)]
pub(crate) mod testing;

pub use embedded::EmbeddedStore;
pub use error::DbError;
pub use hosted::HostedStore;
pub use managed::ManagedStore;
pub use models::*;
pub use statement::{Param, QueryResult, Record, Statement};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::config::BackendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Embedded,
    Managed,
    Hosted,
}

/// Capability set every backing store provides.
#[async_trait]
pub trait Store: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Ensures the tables exist. Safe to call repeatedly.
    async fn initialize(&self) -> Result<(), DbError>;

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError>;

    /// Runs canonical-dialect text with positional `$n` parameters.
    async fn execute_sql(&self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError>;
}

/// The query entry point handed to request handlers. The store behind it is
/// fixed for the life of the process.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn Store>,
}

impl Database {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn kind(&self) -> BackendKind {
        self.store.kind()
    }

    /// Ensures the tables, then the indexes. Index definitions go through the
    /// free-text path, so a store without DDL treats them as no-ops.
    pub async fn initialize(&self) -> Result<(), DbError> {
        self.store.initialize().await?;
        for index in schema::INDEXES {
            self.query_sql(index, &[]).await?;
        }
        Ok(())
    }

    pub async fn query(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.store.execute(statement).await
    }

    pub async fn query_sql(&self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        self.store.execute_sql(sql, params).await
    }
}

pub async fn connect(backend: &BackendConfig) -> Result<Database, DbError> {
    let store: Arc<dyn Store> = match backend {
        BackendConfig::Embedded { path } => Arc::new(EmbeddedStore::open(path).await?),
        BackendConfig::Managed { database_url, ssl } => {
            Arc::new(ManagedStore::connect(database_url, *ssl).await?)
        }
        BackendConfig::Hosted { url, api_key } => Arc::new(HostedStore::new(url, api_key)?),
    };
    tracing::info!("Using {:?} database backend", store.kind());
    Ok(Database::new(store))
}

fn decode<T: DeserializeOwned>(rows: Vec<Record>) -> Result<Vec<T>, DbError> {
    rows.into_iter()
        .map(|r| serde_json::from_value(serde_json::Value::Object(r)).map_err(DbError::from))
        .collect()
}

pub async fn list_submissions(db: &Database) -> Result<Vec<SubmissionSummary>, DbError> {
    decode(db.query(&Statement::ListSubmissions).await?.rows)
}

pub async fn get_submission(db: &Database, id: i64) -> Result<Option<Submission>, DbError> {
    let rows = db.query(&Statement::GetSubmission { id }).await?.rows;
    Ok(decode(rows)?.into_iter().next())
}

pub async fn create_submission(db: &Database, submission: NewSubmission) -> Result<i64, DbError> {
    db.query(&Statement::InsertSubmission(submission))
        .await?
        .inserted_id
        .ok_or_else(|| DbError::Config("insert did not report a generated id".to_string()))
}

/// Deletes a submission together with its reviews and likes. Referential
/// cascades are not available on every backend, so the dependents go first.
/// Returns false when no submission had that id.
pub async fn delete_submission(db: &Database, id: i64) -> Result<bool, DbError> {
    db.query(&Statement::DeleteReviewsFor { image_id: id }).await?;
    db.query(&Statement::DeleteLikesFor { image_id: id }).await?;
    let deleted = db.query(&Statement::DeleteSubmission { id }).await?;
    Ok(deleted.affected() > 0)
}

pub async fn reviews_for(db: &Database, image_id: i64) -> Result<Vec<Review>, DbError> {
    decode(db.query(&Statement::ReviewsFor { image_id }).await?.rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Created,
    Updated,
}

/// Writes the single review for a submission, replacing any earlier one.
///
/// This is a lookup followed by a write with no transaction around them; two
/// concurrent first reviews for the same submission can both insert.
pub async fn upsert_review(db: &Database, review: NewReview) -> Result<ReviewOutcome, DbError> {
    let existing = db
        .query(&Statement::ReviewsFor { image_id: review.image_id })
        .await?;
    if existing.rows.is_empty() {
        db.query(&Statement::InsertReview(review)).await?;
        Ok(ReviewOutcome::Created)
    } else {
        db.query(&Statement::UpdateReview(review)).await?;
        Ok(ReviewOutcome::Updated)
    }
}

/// Records a like. A second like from the same student on the same
/// submission fails with [`DbError::UniqueViolation`].
pub async fn add_like(db: &Database, like: NewLike) -> Result<i64, DbError> {
    let existing = db
        .query(&Statement::FindLike {
            image_id: like.image_id,
            student_id: like.student_id.clone(),
        })
        .await?;
    if !existing.rows.is_empty() {
        return Err(DbError::UniqueViolation(format!(
            "student {} already liked image {}",
            like.student_id, like.image_id
        )));
    }
    db.query(&Statement::InsertLike(like))
        .await?
        .inserted_id
        .ok_or_else(|| DbError::Config("insert did not report a generated id".to_string()))
}

pub async fn remove_like(db: &Database, image_id: i64, student_id: &str) -> Result<bool, DbError> {
    let removed = db
        .query(&Statement::DeleteLike {
            image_id,
            student_id: student_id.to_string(),
        })
        .await?;
    Ok(removed.affected() > 0)
}

pub async fn likes_for(db: &Database, image_id: i64) -> Result<Vec<Like>, DbError> {
    decode(db.query(&Statement::LikesFor { image_id }).await?.rows)
}
