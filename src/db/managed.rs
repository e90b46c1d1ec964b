use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode, PgTypeInfo,
    PgValueFormat, PgValueRef,
};
use sqlx::query::Query;
use sqlx::{Column, Decode, Encode, PgPool, Postgres, Row, Type, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;

use super::error::DbError;
use super::schema::TABLES;
use super::statement::{Param, QueryResult, Record, Statement, Verb};
use super::{BackendKind, Store};

/// Pooled PostgreSQL store. Canonical statements run unchanged.
pub struct ManagedStore {
    pool: PgPool,
}

impl ManagedStore {
    pub async fn connect(database_url: &str, ssl: bool) -> Result<Self, DbError> {
        let mut options = PgConnectOptions::from_str(database_url)?;
        if ssl {
            options = options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        tracing::info!("Managed store connected (ssl: {})", ssl);
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for ManagedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Managed
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
        let verb = Verb::of(sql);
        let returns_rows = verb == Verb::Select || sql.to_uppercase().contains(" RETURNING ");

        // The guard goes back to the pool when it drops, on every path.
        let mut conn = self
            .pool
            .acquire()
            .await
            .inspect_err(|e| tracing::error!("Managed pool acquire failed: {}", e))?;

        let query = bind_all(sqlx::query(sql), params);
        let result = if returns_rows {
            match query.fetch_all(&mut *conn).await {
                Ok(rows) => rows
                    .iter()
                    .map(to_record)
                    .collect::<Result<Vec<_>, _>>()
                    .map(|records| {
                        let inserted_id = match verb {
                            Verb::Insert => records
                                .first()
                                .and_then(|r| r.get("id"))
                                .and_then(|v| v.as_i64()),
                            _ => None,
                        };
                        QueryResult {
                            inserted_id,
                            ..QueryResult::from_rows(records)
                        }
                    }),
                Err(e) => Err(DbError::from(e)),
            }
        } else {
            query
                .execute(&mut *conn)
                .await
                .map(|done| QueryResult {
                    rows: vec![],
                    row_count: Some(if verb == Verb::Schema { 0 } else { done.rows_affected() }),
                    inserted_id: None,
                })
                .map_err(DbError::from)
        };

        result.inspect_err(|e| tracing::error!("Managed query failed: {} ({})", e, sql))
    }
}

/// A NULL bound with the unspecified type oid, so the server infers the
/// column type instead of assuming `text`.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// NUMERIC as a float, read from either wire format.
struct Numeric(f64);

impl Type<Postgres> for Numeric {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(1700))
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name() == "NUMERIC"
    }
}

impl<'r> Decode<'r, Postgres> for Numeric {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        if value.format() == PgValueFormat::Text {
            return Ok(Numeric(value.as_str()?.parse()?));
        }

        // ndigits, weight, sign, dscale, then base-10000 digits.
        let bytes = value.as_bytes()?;
        let word = |i: usize| -> Result<i16, BoxDynError> {
            bytes
                .get(i * 2..i * 2 + 2)
                .map(|b| i16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated NUMERIC value".into())
        };
        let ndigits = usize::try_from(word(0)?)?;
        let weight = i32::from(word(1)?);
        let sign = word(2)? as u16;
        if sign == 0xC000 {
            return Ok(Numeric(f64::NAN));
        }

        let mut total = 0.0;
        for i in 0..ndigits {
            let digit = f64::from(word(4 + i)?);
            total += digit * 10_000f64.powi(weight - i as i32);
        }
        Ok(Numeric(if sign == 0x4000 { -total } else { total }))
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Param],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Null => query.bind(UntypedNull),
            // Canonical id and size columns are INT4.
            Param::Int(v) => match i32::try_from(*v) {
                Ok(small) => query.bind(small),
                Err(_) => query.bind(*v),
            },
            Param::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn to_record(row: &PgRow) -> Result<Record, DbError> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(i)?.is_null() {
            record.insert(column.name().to_string(), serde_json::Value::Null);
            continue;
        }
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<i16, _>(i)?.into(),
            "INT4" => row.try_get::<i32, _>(i)?.into(),
            "INT8" => row.try_get::<i64, _>(i)?.into(),
            "FLOAT4" => row.try_get::<f32, _>(i)?.into(),
            "FLOAT8" => row.try_get::<f64, _>(i)?.into(),
            "NUMERIC" => row.try_get::<Numeric, _>(i)?.0.into(),
            "BOOL" => row.try_get::<bool, _>(i)?.into(),
            "TIMESTAMP" => serde_json::to_value(row.try_get::<NaiveDateTime, _>(i)?)?,
            "TIMESTAMPTZ" => serde_json::to_value(row.try_get::<DateTime<Utc>, _>(i)?)?,
            "DATE" => serde_json::to_value(row.try_get::<NaiveDate, _>(i)?)?,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(i)?.into(),
            other => {
                tracing::warn!("Unsupported column type {} for {}", other, column.name());
                serde_json::Value::Null
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
