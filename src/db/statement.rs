use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::error::DbError;
use super::models::{NewLike, NewReview, NewSubmission, Score};

/// One result row, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_id: Option<i64>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Record>) -> Self {
        let row_count = Some(rows.len() as u64);
        Self {
            rows,
            row_count,
            inserted_id: None,
        }
    }

    pub fn affected(&self) -> u64 {
        self.row_count.unwrap_or(self.rows.len() as u64)
    }
}

/// Every statement shape the application issues.
///
/// Each variant owns its canonical (Postgres dialect) template and its
/// positional parameters, so adapters never have to guess a statement's
/// intent from its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    ListSubmissions,
    GetSubmission { id: i64 },
    InsertSubmission(NewSubmission),
    DeleteSubmission { id: i64 },
    ReviewsFor { image_id: i64 },
    InsertReview(NewReview),
    UpdateReview(NewReview),
    DeleteReviewsFor { image_id: i64 },
    FindLike { image_id: i64, student_id: String },
    LikesFor { image_id: i64 },
    InsertLike(NewLike),
    DeleteLike { image_id: i64, student_id: String },
    DeleteLikesFor { image_id: i64 },
}

/// Statement verbs the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Schema,
}

impl Verb {
    pub fn of(sql: &str) -> Verb {
        let head = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_uppercase();
        match head.as_str() {
            "SELECT" | "WITH" => Verb::Select,
            "INSERT" => Verb::Insert,
            "UPDATE" => Verb::Update,
            "DELETE" => Verb::Delete,
            _ => Verb::Schema,
        }
    }
}

/// Outcome of sniffing free statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Known(Statement),
    Schema,
    Unknown,
}

impl Statement {
    pub fn sql(&self) -> &'static str {
        match self {
            Statement::ListSubmissions => {
                "SELECT si.*, r.score, r.comment, r.teacher_name, r.review_date, \
                 COUNT(l.id) AS like_count \
                 FROM student_images si \
                 LEFT JOIN reviews r ON r.image_id = si.id \
                 LEFT JOIN likes l ON l.image_id = si.id \
                 GROUP BY si.id, r.id \
                 ORDER BY si.upload_date DESC, si.id DESC"
            }
            Statement::GetSubmission { .. } => "SELECT * FROM student_images WHERE id = $1",
            Statement::InsertSubmission(_) => {
                "INSERT INTO student_images \
                 (student_name, student_id, filename, original_name, file_url, file_size) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id"
            }
            Statement::DeleteSubmission { .. } => "DELETE FROM student_images WHERE id = $1",
            Statement::ReviewsFor { .. } => {
                "SELECT * FROM reviews WHERE image_id = $1 ORDER BY review_date DESC"
            }
            Statement::InsertReview(_) => {
                "INSERT INTO reviews (image_id, teacher_name, score, comment) \
                 VALUES ($1, $2, $3, $4) RETURNING id"
            }
            Statement::UpdateReview(_) => {
                "UPDATE reviews SET teacher_name = $2, score = $3, comment = $4, \
                 review_date = CURRENT_TIMESTAMP WHERE image_id = $1"
            }
            Statement::DeleteReviewsFor { .. } => "DELETE FROM reviews WHERE image_id = $1",
            Statement::FindLike { .. } => {
                "SELECT id FROM likes WHERE image_id = $1 AND student_id = $2"
            }
            Statement::LikesFor { .. } => {
                "SELECT * FROM likes WHERE image_id = $1 ORDER BY like_date DESC"
            }
            Statement::InsertLike(_) => {
                "INSERT INTO likes (image_id, student_name, student_id) \
                 VALUES ($1, $2, $3) RETURNING id"
            }
            Statement::DeleteLike { .. } => {
                "DELETE FROM likes WHERE image_id = $1 AND student_id = $2"
            }
            Statement::DeleteLikesFor { .. } => "DELETE FROM likes WHERE image_id = $1",
        }
    }

    pub fn params(&self) -> Vec<Param> {
        match self {
            Statement::ListSubmissions => vec![],
            Statement::GetSubmission { id } | Statement::DeleteSubmission { id } => {
                vec![Param::Int(*id)]
            }
            Statement::InsertSubmission(s) => vec![
                s.student_name.as_str().into(),
                s.student_id.as_str().into(),
                s.filename.as_str().into(),
                s.original_name.as_deref().into(),
                s.file_url.as_deref().into(),
                s.file_size.into(),
            ],
            Statement::ReviewsFor { image_id }
            | Statement::DeleteReviewsFor { image_id }
            | Statement::LikesFor { image_id }
            | Statement::DeleteLikesFor { image_id } => vec![Param::Int(*image_id)],
            Statement::InsertReview(r) | Statement::UpdateReview(r) => vec![
                Param::Int(r.image_id),
                r.teacher_name.as_str().into(),
                Param::Int(r.score.value()),
                r.comment.as_deref().into(),
            ],
            Statement::FindLike { image_id, student_id }
            | Statement::DeleteLike { image_id, student_id } => {
                vec![Param::Int(*image_id), student_id.as_str().into()]
            }
            Statement::InsertLike(l) => vec![
                Param::Int(l.image_id),
                l.student_name.as_str().into(),
                l.student_id.as_str().into(),
            ],
        }
    }

    /// Recognizes one of the known statement shapes from free text.
    ///
    /// A shape is known only when its table, projection, `WHERE` columns,
    /// assigned or inserted columns and placeholder count all line up with
    /// one variant. Parameters are then read by the column their placeholder
    /// is bound to. Anything else is [`Classified::Unknown`].
    pub fn classify(sql: &str, params: &[Param]) -> Result<Classified, DbError> {
        let text = sql
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches(';')
            .trim_end()
            .to_uppercase();
        if Verb::of(&text) == Verb::Schema {
            return Ok(Classified::Schema);
        }
        let Some(shape) = Shape::parse(&text) else {
            return Ok(Classified::Unknown);
        };
        if shape.placeholders != params.len() {
            return Ok(Classified::Unknown);
        }

        let v = Bound { shape: &shape, params };
        let statement = match (shape.verb, shape.table.as_str()) {
            (Verb::Select, "STUDENT_IMAGES") if shape.joined => Statement::ListSubmissions,
            (Verb::Select, _) if shape.joined => return Ok(Classified::Unknown),
            (Verb::Select, "STUDENT_IMAGES") if shape.selects_all() && shape.filters_are(&["ID"]) => {
                Statement::GetSubmission { id: v.int("ID")? }
            }
            (Verb::Select, "REVIEWS") if shape.selects_all() && shape.filters_are(&["IMAGE_ID"]) => {
                Statement::ReviewsFor { image_id: v.int("IMAGE_ID")? }
            }
            (Verb::Select, "LIKES")
                if (shape.selects_all() || shape.projection == "ID")
                    && shape.filters_are(&["IMAGE_ID", "STUDENT_ID"]) =>
            {
                Statement::FindLike {
                    image_id: v.int("IMAGE_ID")?,
                    student_id: v.text("STUDENT_ID")?,
                }
            }
            (Verb::Select, "LIKES") if shape.selects_all() && shape.filters_are(&["IMAGE_ID"]) => {
                Statement::LikesFor { image_id: v.int("IMAGE_ID")? }
            }
            (Verb::Insert, "STUDENT_IMAGES")
                if shape.binds_exactly(&[
                    "STUDENT_NAME",
                    "STUDENT_ID",
                    "FILENAME",
                    "ORIGINAL_NAME",
                    "FILE_URL",
                    "FILE_SIZE",
                ]) =>
            {
                Statement::InsertSubmission(NewSubmission {
                    student_name: v.text("STUDENT_NAME")?,
                    student_id: v.text("STUDENT_ID")?,
                    filename: v.text("FILENAME")?,
                    original_name: v.opt_text("ORIGINAL_NAME")?,
                    file_url: v.opt_text("FILE_URL")?,
                    file_size: v.opt_int("FILE_SIZE")?,
                })
            }
            (Verb::Insert, "REVIEWS")
                if shape.binds_exactly(&["IMAGE_ID", "TEACHER_NAME", "SCORE", "COMMENT"]) =>
            {
                Statement::InsertReview(v.review()?)
            }
            (Verb::Insert, "LIKES")
                if shape.binds_exactly(&["IMAGE_ID", "STUDENT_NAME", "STUDENT_ID"]) =>
            {
                Statement::InsertLike(NewLike {
                    image_id: v.int("IMAGE_ID")?,
                    student_name: v.text("STUDENT_NAME")?,
                    student_id: v.text("STUDENT_ID")?,
                })
            }
            (Verb::Update, "REVIEWS")
                if shape.filters_are(&["IMAGE_ID"])
                    && shape.binds_exactly(&["IMAGE_ID", "TEACHER_NAME", "SCORE", "COMMENT"])
                    && shape.stamped.iter().all(|c| c == "REVIEW_DATE") =>
            {
                Statement::UpdateReview(v.review()?)
            }
            (Verb::Delete, "STUDENT_IMAGES") if shape.filters_are(&["ID"]) => {
                Statement::DeleteSubmission { id: v.int("ID")? }
            }
            (Verb::Delete, "REVIEWS") if shape.filters_are(&["IMAGE_ID"]) => {
                Statement::DeleteReviewsFor { image_id: v.int("IMAGE_ID")? }
            }
            (Verb::Delete, "LIKES") if shape.filters_are(&["IMAGE_ID", "STUDENT_ID"]) => {
                Statement::DeleteLike {
                    image_id: v.int("IMAGE_ID")?,
                    student_id: v.text("STUDENT_ID")?,
                }
            }
            (Verb::Delete, "LIKES") if shape.filters_are(&["IMAGE_ID"]) => {
                Statement::DeleteLikesFor { image_id: v.int("IMAGE_ID")? }
            }
            _ => return Ok(Classified::Unknown),
        };
        Ok(Classified::Known(statement))
    }
}

struct Patterns {
    select: Regex,
    delete: Regex,
    update: Regex,
    insert: Regex,
    tail: Regex,
    condition: Regex,
    assignment: Regex,
    placeholder: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static classifier pattern");
        Patterns {
            select: re(r"^SELECT (.+?) FROM (\w+)(.*)$"),
            delete: re(r"^DELETE FROM (\w+)(.*)$"),
            update: re(r"^UPDATE (\w+) SET (.+?)((?: WHERE .+)?)$"),
            insert: re(
                r"^INSERT INTO (\w+) ?\(([^)]*)\) ?VALUES ?\(([^)]*)\)(?: RETURNING \w+(?: ?, ?\w+)*)?$",
            ),
            // Optional alias, optional WHERE, optional ORDER BY, optional RETURNING.
            tail: re(
                r"^(?: (?:AS )?\w+)?(?: WHERE (.+?))?(?: ORDER BY [\w.]+(?: ASC| DESC)?(?: ?, ?[\w.]+(?: ASC| DESC)?)*)?(?: RETURNING \w+(?: ?, ?\w+)*)?$",
            ),
            condition: re(r"^(?:\w+\.)?(\w+) ?= ?\$(\d+)$"),
            assignment: re(r"^(\w+) ?= ?(?:\$(\d+)|CURRENT_TIMESTAMP|NOW\(\))$"),
            placeholder: re(r"\$(\d+)"),
        }
    })
}

/// Outline of one statement: its target table and which column every
/// placeholder is bound to.
#[derive(Debug)]
struct Shape {
    verb: Verb,
    table: String,
    projection: String,
    joined: bool,
    filters: Vec<String>,
    bound: HashMap<String, usize>,
    stamped: Vec<String>,
    placeholders: usize,
}

impl Shape {
    fn parse(text: &str) -> Option<Shape> {
        let p = patterns();
        // Clauses a single table request cannot express.
        if [" LIMIT ", " OFFSET ", " HAVING ", " UNION ", " OR ", " IN ("]
            .iter()
            .any(|k| text.contains(k))
        {
            return None;
        }

        let mut shape = Shape {
            verb: Verb::of(text),
            table: String::new(),
            projection: String::new(),
            joined: text.contains(" JOIN "),
            filters: vec![],
            bound: HashMap::new(),
            stamped: vec![],
            placeholders: p
                .placeholder
                .captures_iter(text)
                .filter_map(|c| c[1].parse::<usize>().ok())
                .max()
                .unwrap_or(0),
        };

        match shape.verb {
            Verb::Select => {
                let c = p.select.captures(text)?;
                shape.projection = c[1].to_string();
                shape.table = c[2].to_string();
                // Only the unfiltered list query joins.
                if shape.joined && text.contains(" WHERE ") {
                    return None;
                }
                if !shape.joined {
                    shape.where_clause(&c[3])?;
                }
            }
            Verb::Delete => {
                let c = p.delete.captures(text)?;
                shape.table = c[1].to_string();
                shape.where_clause(&c[2])?;
            }
            Verb::Update => {
                let c = p.update.captures(text)?;
                shape.table = c[1].to_string();
                for part in c[2].split(',').map(str::trim) {
                    let a = p.assignment.captures(part)?;
                    match a.get(2) {
                        Some(n) => {
                            shape.bind(&a[1], n.as_str())?;
                        }
                        None => shape.stamped.push(a[1].to_string()),
                    }
                }
                shape.where_clause(&c[3])?;
            }
            Verb::Insert => {
                let c = p.insert.captures(text)?;
                shape.table = c[1].to_string();
                let columns: Vec<&str> = c[2].split(',').map(str::trim).collect();
                let values: Vec<&str> = c[3].split(',').map(str::trim).collect();
                if columns.len() != values.len() {
                    return None;
                }
                for (column, value) in columns.into_iter().zip(values) {
                    shape.bind(column, value.strip_prefix('$')?)?;
                }
            }
            Verb::Schema => return None,
        }
        Some(shape)
    }

    fn where_clause(&mut self, rest: &str) -> Option<()> {
        let c = patterns().tail.captures(rest)?;
        if let Some(conditions) = c.get(1) {
            for condition in conditions.as_str().split(" AND ") {
                let m = patterns().condition.captures(condition.trim())?;
                self.filters.push(m[1].to_string());
                self.bind(&m[1], &m[2])?;
            }
        }
        Some(())
    }

    fn bind(&mut self, column: &str, placeholder: &str) -> Option<()> {
        let position = placeholder.parse::<usize>().ok()?.checked_sub(1)?;
        self.bound.insert(column.to_string(), position);
        Some(())
    }

    fn selects_all(&self) -> bool {
        self.projection == "*"
    }

    fn filters_are(&self, columns: &[&str]) -> bool {
        same_set(&self.filters, columns)
    }

    fn binds_exactly(&self, columns: &[&str]) -> bool {
        self.bound.len() == columns.len() && columns.iter().all(|c| self.bound.contains_key(*c))
    }
}

fn same_set(found: &[String], expected: &[&str]) -> bool {
    found.len() == expected.len() && expected.iter().all(|e| found.iter().any(|f| f == e))
}

/// Reads parameters through the column each placeholder is bound to.
struct Bound<'a> {
    shape: &'a Shape,
    params: &'a [Param],
}

impl Bound<'_> {
    fn get(&self, column: &str) -> Result<(usize, &Param), DbError> {
        let position = self.shape.bound.get(column).copied().unwrap_or(usize::MAX);
        self.params
            .get(position)
            .map(|param| (position, param))
            .ok_or_else(|| DbError::InvalidParameter {
                position,
                reason: format!("no parameter bound to {}", column.to_lowercase()),
            })
    }

    fn opt_int(&self, column: &str) -> Result<Option<i64>, DbError> {
        let (position, param) = self.get(column)?;
        match param {
            Param::Int(v) => Ok(Some(*v)),
            Param::Text(s) => s.trim().parse().map(Some).map_err(|_| DbError::InvalidParameter {
                position,
                reason: format!("expected integer, got {:?}", s),
            }),
            Param::Null => Ok(None),
        }
    }

    fn int(&self, column: &str) -> Result<i64, DbError> {
        let position = self.shape.bound.get(column).copied().unwrap_or(usize::MAX);
        self.opt_int(column)?.ok_or_else(|| DbError::InvalidParameter {
            position,
            reason: format!("{} cannot be NULL", column.to_lowercase()),
        })
    }

    fn opt_text(&self, column: &str) -> Result<Option<String>, DbError> {
        let (position, param) = self.get(column)?;
        match param {
            Param::Text(s) => Ok(Some(s.clone())),
            Param::Null => Ok(None),
            Param::Int(v) => Err(DbError::InvalidParameter {
                position,
                reason: format!("expected text, got integer {}", v),
            }),
        }
    }

    fn text(&self, column: &str) -> Result<String, DbError> {
        let position = self.shape.bound.get(column).copied().unwrap_or(usize::MAX);
        self.opt_text(column)?.ok_or_else(|| DbError::InvalidParameter {
            position,
            reason: format!("{} cannot be NULL", column.to_lowercase()),
        })
    }

    fn review(&self) -> Result<NewReview, DbError> {
        let position = self.shape.bound.get("SCORE").copied().unwrap_or(usize::MAX);
        let score = Score::new(self.int("SCORE")?).map_err(|e| DbError::InvalidParameter {
            position,
            reason: e.to_string(),
        })?;
        Ok(NewReview {
            image_id: self.int("IMAGE_ID")?,
            teacher_name: self.text("TEACHER_NAME")?,
            score,
            comment: self.opt_text("COMMENT")?,
        })
    }
}
