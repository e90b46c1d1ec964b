use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A review score, guaranteed to lie in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Score(i64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("score must be between {min} and {max}, got {value}", min = Score::MIN, max = Score::MAX)]
pub struct ScoreOutOfRange {
    pub value: i64,
}

impl Score {
    pub const MIN: i64 = 0;
    pub const MAX: i64 = 100;

    pub fn new(value: i64) -> Result<Self, ScoreOutOfRange> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ScoreOutOfRange { value })
        }
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub student_name: String,
    pub student_id: String,
    pub filename: String,
    pub original_name: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
    #[serde(default, deserialize_with = "timestamp")]
    pub upload_date: Option<NaiveDateTime>,
}

/// A submission row from the list query, with its review flattened in and
/// its likes counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSummary {
    #[serde(flatten)]
    pub submission: Submission,
    pub score: Option<i64>,
    pub comment: Option<String>,
    pub teacher_name: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub review_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub like_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub image_id: i64,
    pub teacher_name: String,
    pub score: i64,
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub review_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub image_id: i64,
    pub student_name: String,
    pub student_id: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub like_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub student_name: String,
    pub student_id: String,
    pub filename: String,
    pub original_name: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub image_id: i64,
    pub teacher_name: String,
    pub score: Score,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLike {
    pub image_id: i64,
    pub student_name: String,
    pub student_id: String,
}

// SQLite hands back "2024-01-01 10:00:00", Postgres rows are serialized as
// ISO without offset, and the hosted API may append one.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.naive_utc()));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}
