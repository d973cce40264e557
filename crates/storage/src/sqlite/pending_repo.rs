use sqlx::Row;

use super::{SqliteRepository, mapping};
use crate::repository::{PendingSubmission, PendingSubmissionStore, StorageError};

#[async_trait::async_trait]
impl PendingSubmissionStore for SqliteRepository {
    async fn enqueue(&self, submission: &PendingSubmission) -> Result<i64, StorageError> {
        let row = sqlx::query(
            r"
            INSERT INTO pending_submissions (exam_id, student_key, payload, queued_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            ",
        )
        .bind(submission.exam_id.as_str())
        .bind(submission.student_key.as_str())
        .bind(mapping::to_json("payload", &submission.payload)?)
        .bind(submission.queued_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.try_get("id")
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<(i64, PendingSubmission)>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, exam_id, student_key, payload, queued_at
            FROM pending_submissions
            ORDER BY queued_at ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut queued = Vec::with_capacity(rows.len());
        for row in rows {
            queued.push(mapping::map_pending_row(&row)?);
        }
        Ok(queued)
    }

    async fn remove(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM pending_submissions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
