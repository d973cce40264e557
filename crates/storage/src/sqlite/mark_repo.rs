use exam_core::model::ExamId;

use super::{SqliteRepository, mapping};
use crate::repository::{StorageError, SubmissionMarkStore, SubmissionReceipt};

#[async_trait::async_trait]
impl SubmissionMarkStore for SqliteRepository {
    async fn mark_submitted(
        &self,
        exam_id: &ExamId,
        student_key: &str,
        receipt: &SubmissionReceipt,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO submission_marks (
                exam_id, student_key, submission_id, score, max_score,
                percentage, recorded_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(exam_id, student_key) DO UPDATE SET
                submission_id = excluded.submission_id,
                score = excluded.score,
                max_score = excluded.max_score,
                percentage = excluded.percentage,
                recorded_at = excluded.recorded_at
            ",
        )
        .bind(exam_id.as_str())
        .bind(student_key)
        .bind(receipt.submission_id.as_deref())
        .bind(receipt.score)
        .bind(receipt.max_score)
        .bind(receipt.percentage)
        .bind(receipt.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn submitted_receipt(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<SubmissionReceipt>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT submission_id, score, max_score, percentage, recorded_at
            FROM submission_marks
            WHERE exam_id = ?1 AND student_key = ?2
            ",
        )
        .bind(exam_id.as_str())
        .bind(student_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(mapping::map_mark_row).transpose()
    }
}
