/// Canonical table definitions, in creation order.
pub const TABLES: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS student_images (
        id SERIAL PRIMARY KEY,
        student_name VARCHAR(100) NOT NULL,
        student_id VARCHAR(50) NOT NULL,
        filename VARCHAR(255) NOT NULL,
        original_name VARCHAR(255),
        file_url TEXT,
        file_size INTEGER,
        upload_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id SERIAL PRIMARY KEY,
        image_id INTEGER REFERENCES student_images(id) ON DELETE CASCADE,
        teacher_name VARCHAR(100) NOT NULL,
        score INTEGER NOT NULL CHECK (score >= 0 AND score <= 100),
        comment TEXT,
        review_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS likes (
        id SERIAL PRIMARY KEY,
        image_id INTEGER REFERENCES student_images(id) ON DELETE CASCADE,
        student_name VARCHAR(100) NOT NULL,
        student_id VARCHAR(50) NOT NULL,
        like_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (image_id, student_id)
    )
    "#,
];

/// Secondary indexes for the per-submission lookups, created after the tables.
pub const INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_reviews_image_id ON reviews (image_id)",
    "CREATE INDEX IF NOT EXISTS idx_likes_image_id ON likes (image_id)",
];
