//! Canonical (Postgres) to SQLite statement rewriting.
//!
//! The rules only cover the dialect subset this application writes: flat
//! `CREATE TABLE` definitions and single-level DML with `$n` placeholders.
//! Statements outside that subset (nested subqueries using the rewritten
//! features, `$n` inside string literals) come out undefined.

use regex::Regex;
use std::sync::OnceLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)\bSERIAL\s+PRIMARY\s+KEY\b", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            (
                r"(?i)\bTIMESTAMP(?:TZ)?\s+DEFAULT\s+(?:CURRENT_TIMESTAMP|NOW\(\))",
                "DATETIME DEFAULT CURRENT_TIMESTAMP",
            ),
            (r"(?i)\b(?:VARCHAR|CHARACTER\s+VARYING|CHAR)\s*\(\s*\d+\s*\)", "TEXT"),
            (
                r"(?i)\s+REFERENCES\s+\w+\s*\(\s*\w+\s*\)(?:\s+ON\s+(?:DELETE|UPDATE)\s+(?:CASCADE|RESTRICT|SET\s+NULL|SET\s+DEFAULT|NO\s+ACTION))*",
                "",
            ),
            (r"(?i)\s+RETURNING\s+\w+(?:\s*,\s*\w+)*\s*;?\s*$", ""),
            (r"\$(\d+)", "?$1"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Rule {
            pattern: Regex::new(pattern).expect("static rewrite pattern"),
            replacement,
        })
        .collect()
    })
}

/// Rewrites a canonical statement into SQLite dialect.
pub fn to_sqlite(sql: &str) -> String {
    rules().iter().fold(sql.to_string(), |text, rule| {
        rule.pattern.replace_all(&text, rule.replacement).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_schema_types() {
        let canonical = "CREATE TABLE IF NOT EXISTS reviews (\
            id SERIAL PRIMARY KEY, \
            image_id INTEGER REFERENCES student_images(id) ON DELETE CASCADE, \
            teacher_name VARCHAR(100) NOT NULL, \
            review_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP)";
        let rewritten = to_sqlite(canonical);
        assert_eq!(
            rewritten,
            "CREATE TABLE IF NOT EXISTS reviews (\
            id INTEGER PRIMARY KEY AUTOINCREMENT, \
            image_id INTEGER, \
            teacher_name TEXT NOT NULL, \
            review_date DATETIME DEFAULT CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn test_rewrites_placeholders_and_returning() {
        let sql = "INSERT INTO likes (image_id, student_name, student_id) VALUES ($1, $2, $3) RETURNING id";
        assert_eq!(
            to_sqlite(sql),
            "INSERT INTO likes (image_id, student_name, student_id) VALUES (?1, ?2, ?3)"
        );
        assert_eq!(
            to_sqlite("UPDATE reviews SET score = $3 WHERE image_id = $1"),
            "UPDATE reviews SET score = ?3 WHERE image_id = ?1"
        );
    }

    #[test]
    fn test_leaves_plain_sqlite_untouched() {
        let sql = "SELECT * FROM likes WHERE image_id = ?";
        assert_eq!(to_sqlite(sql), sql);
    }
}
