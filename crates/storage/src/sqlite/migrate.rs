use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema (progress snapshots, submission marks, the
/// pending-submission queue, and indexes).
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        // Collections (answers, flags, confidence, violations) are stored as
        // JSON text; they are only ever read back whole.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS exam_progress (
                    exam_id TEXT NOT NULL,
                    student_key TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    student_fields TEXT NOT NULL,
                    answers TEXT NOT NULL,
                    flagged_question_ids TEXT NOT NULL,
                    confidence_levels TEXT NOT NULL,
                    violations TEXT NOT NULL,
                    current_position INTEGER NOT NULL CHECK (current_position >= 0),
                    scratchpad_text TEXT NOT NULL,
                    time_remaining_seconds INTEGER
                        CHECK (time_remaining_seconds IS NULL OR time_remaining_seconds >= 0),
                    lifecycle_state TEXT NOT NULL,
                    started_at TEXT,
                    last_updated TEXT NOT NULL,
                    PRIMARY KEY (exam_id, student_key)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS submission_marks (
                    exam_id TEXT NOT NULL,
                    student_key TEXT NOT NULL,
                    submission_id TEXT,
                    score REAL,
                    max_score REAL,
                    percentage REAL,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (exam_id, student_key)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS pending_submissions (
                    id INTEGER PRIMARY KEY,
                    exam_id TEXT NOT NULL,
                    student_key TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    queued_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_exam_progress_last_updated
                    ON exam_progress (last_updated);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_pending_submissions_queued_at
                    ON pending_submissions (queued_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
