use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;

use super::dialect::to_sqlite;
use super::error::DbError;
use super::schema::TABLES;
use super::statement::{Param, QueryResult, Record, Statement, Verb};
use super::{BackendKind, Store};

/// Single-file SQLite store emulating the canonical dialect.
pub struct EmbeddedStore {
    pool: SqlitePool,
}

impl EmbeddedStore {
    pub async fn open(path: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .foreign_keys(false);

        // SQLite queues writers itself; a small pool keeps readers concurrent.
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!("Embedded store opened at {}", path);
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for EmbeddedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    async fn initialize(&self) -> Result<(), DbError> {
        for table in TABLES {
            self.execute_sql(table, &[]).await?;
        }
        Ok(())
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.execute_sql(statement.sql(), &statement.params()).await
    }

    async fn execute_sql(&self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        let rewritten = to_sqlite(sql);
        let query = bind_all(sqlx::query(&rewritten), params);

        let result = match Verb::of(&rewritten) {
            Verb::Select => query
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::from)
                .and_then(|rows| {
                    let records = rows.iter().map(to_record).collect::<Result<Vec<_>, _>>()?;
                    Ok(QueryResult::from_rows(records))
                }),
            verb @ (Verb::Insert | Verb::Update | Verb::Delete) => query
                .execute(&self.pool)
                .await
                .map(|done| QueryResult {
                    rows: vec![],
                    row_count: Some(done.rows_affected()),
                    inserted_id: (verb == Verb::Insert).then(|| done.last_insert_rowid()),
                })
                .map_err(DbError::from),
            Verb::Schema => query
                .execute(&self.pool)
                .await
                .map(|_| QueryResult {
                    row_count: Some(0),
                    ..QueryResult::empty()
                })
                .map_err(DbError::from),
        };

        result.inspect_err(|e| tracing::error!("Embedded query failed: {} ({})", e, rewritten))
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Param],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Param::Null => query.bind(None::<i64>),
            Param::Int(v) => query.bind(*v),
            Param::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

// Decodes by the stored value's runtime type; SQLite columns are only
// loosely typed and aggregates carry no declared type at all.
fn to_record(row: &SqliteRow) -> Result<Record, DbError> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(i)?.into(),
                "REAL" | "NUMERIC" => row.try_get_unchecked::<f64, _>(i)?.into(),
                "BLOB" => serde_json::Value::Null,
                _ => row.try_get_unchecked::<String, _>(i)?.into(),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{NewLike, NewReview, Score};
    use tempfile::TempDir;

    pub(crate) async fn temp_store() -> (TempDir, EmbeddedStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let store = EmbeddedStore::open(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        store.initialize().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.initialize().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|t| t.0).collect();
        assert_eq!(names, vec!["likes", "reviews", "student_images"]);
    }

    #[tokio::test]
    async fn test_rewritten_schema_keeps_long_text() {
        let (_dir, store) = temp_store().await;

        let columns: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info('student_images')")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let name_type = columns.iter().find(|c| c.0 == "student_name").unwrap();
        assert_eq!(name_type.1, "TEXT");

        let long_name = "n".repeat(100);
        let insert = Statement::InsertSubmission(crate::db::models::NewSubmission {
            student_name: long_name.clone(),
            student_id: "S9".to_string(),
            filename: "f.png".to_string(),
            original_name: Some("f.png".to_string()),
            file_url: Some("/uploads/f.png".to_string()),
            file_size: Some(10),
        });
        let id = store.execute(&insert).await.unwrap().inserted_id.unwrap();
        let rows = store.execute(&Statement::GetSubmission { id }).await.unwrap().rows;
        assert_eq!(rows[0]["student_name"], serde_json::Value::String(long_name));
        assert!(rows[0]["upload_date"].is_string());
    }

    #[tokio::test]
    async fn test_duplicate_like_is_unique_violation() {
        let (_dir, store) = temp_store().await;
        let like = Statement::InsertLike(NewLike {
            image_id: 5,
            student_name: "Ann".to_string(),
            student_id: "S1".to_string(),
        });

        let first = store.execute(&like).await.unwrap();
        assert_eq!(first.row_count, Some(1));
        assert!(first.inserted_id.is_some());

        let second = store.execute(&like).await.unwrap_err();
        assert!(second.is_unique_violation(), "{:?}", second);

        let rows = store
            .execute(&Statement::FindLike { image_id: 5, student_id: "S1".to_string() })
            .await
            .unwrap()
            .rows;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_free_text_uses_canonical_placeholders() {
        let (_dir, store) = temp_store().await;
        store
            .execute_sql(
                "INSERT INTO likes (image_id, student_name, student_id) VALUES ($1,$2,$3)",
                &[Param::Int(5), "Ann".into(), "S1".into()],
            )
            .await
            .unwrap();
        let result = store
            .execute_sql("SELECT COUNT(*) AS n FROM likes WHERE image_id = $1", &[Param::Int(5)])
            .await
            .unwrap();
        assert_eq!(result.rows[0]["n"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_schema_verbs_report_zero() {
        let (_dir, store) = temp_store().await;
        let result = store
            .execute_sql("CREATE INDEX IF NOT EXISTS idx_likes_image ON likes(image_id)", &[])
            .await
            .unwrap();
        assert_eq!(result.row_count, Some(0));
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_update_reports_affected_rows() {
        let (_dir, store) = temp_store().await;
        let review = NewReview {
            image_id: 7,
            teacher_name: "T".to_string(),
            score: Score::new(50).unwrap(),
            comment: Some("ok".to_string()),
        };
        let none = store.execute(&Statement::UpdateReview(review.clone())).await.unwrap();
        assert_eq!(none.row_count, Some(0));
        assert_eq!(none.inserted_id, None);

        store.execute(&Statement::InsertReview(review.clone())).await.unwrap();
        let one = store.execute(&Statement::UpdateReview(review)).await.unwrap();
        assert_eq!(one.row_count, Some(1));
    }
}
