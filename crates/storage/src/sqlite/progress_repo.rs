use exam_core::model::ExamId;

use super::{SqliteRepository, mapping};
use crate::repository::{ProgressSnapshot, ProgressStore, StorageError};

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn load(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                exam_id, student_key, session_id, student_fields, answers,
                flagged_question_ids, confidence_levels, violations,
                current_position, scratchpad_text, time_remaining_seconds,
                lifecycle_state, started_at, last_updated
            FROM exam_progress
            WHERE exam_id = ?1 AND student_key = ?2
            ",
        )
        .bind(exam_id.as_str())
        .bind(student_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(mapping::map_progress_row).transpose()
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let time_remaining = snapshot.time_remaining_seconds.map(i64::from);
        let position = i64::try_from(snapshot.current_position)
            .map_err(|_| StorageError::Serialization("current_position overflow".into()))?;

        sqlx::query(
            r"
            INSERT INTO exam_progress (
                exam_id, student_key, session_id, student_fields, answers,
                flagged_question_ids, confidence_levels, violations,
                current_position, scratchpad_text, time_remaining_seconds,
                lifecycle_state, started_at, last_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(exam_id, student_key) DO UPDATE SET
                session_id = excluded.session_id,
                student_fields = excluded.student_fields,
                answers = excluded.answers,
                flagged_question_ids = excluded.flagged_question_ids,
                confidence_levels = excluded.confidence_levels,
                violations = excluded.violations,
                current_position = excluded.current_position,
                scratchpad_text = excluded.scratchpad_text,
                time_remaining_seconds = excluded.time_remaining_seconds,
                lifecycle_state = excluded.lifecycle_state,
                started_at = excluded.started_at,
                last_updated = excluded.last_updated
            ",
        )
        .bind(snapshot.exam_id.as_str())
        .bind(snapshot.student_key())
        .bind(snapshot.session_id.to_string())
        .bind(mapping::to_json("student_fields", &snapshot.student_fields)?)
        .bind(mapping::to_json("answers", &snapshot.answers)?)
        .bind(mapping::to_json(
            "flagged_question_ids",
            &snapshot.flagged_question_ids,
        )?)
        .bind(mapping::to_json(
            "confidence_levels",
            &snapshot.confidence_levels,
        )?)
        .bind(mapping::to_json("violations", &snapshot.violations)?)
        .bind(position)
        .bind(snapshot.scratchpad_text.as_str())
        .bind(time_remaining)
        .bind(snapshot.lifecycle_state.as_str())
        .bind(snapshot.started_at)
        .bind(snapshot.last_updated)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, exam_id: &ExamId, student_key: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            DELETE FROM exam_progress
            WHERE exam_id = ?1 AND student_key = ?2
            ",
        )
        .bind(exam_id.as_str())
        .bind(student_key)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
