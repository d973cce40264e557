use exam_core::model::{LifecycleState, SessionId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use crate::repository::{PendingSubmission, ProgressSnapshot, StorageError, SubmissionReceipt};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn to_json<T: Serialize>(
    field: &'static str,
    value: &T,
) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn position_from_i64(v: i64) -> Result<usize, StorageError> {
    usize::try_from(v)
        .map_err(|_| StorageError::Serialization(format!("invalid current_position: {v}")))
}

pub(crate) fn remaining_from_i64(v: Option<i64>) -> Result<Option<u32>, StorageError> {
    v.map(|secs| {
        u32::try_from(secs)
            .map_err(|_| StorageError::Serialization(format!("invalid time_remaining: {secs}")))
    })
    .transpose()
}

pub(crate) fn parse_lifecycle(s: &str) -> Result<LifecycleState, StorageError> {
    s.parse::<LifecycleState>().map_err(ser)
}

pub(crate) fn parse_session_id(s: &str) -> Result<SessionId, StorageError> {
    s.parse::<SessionId>().map_err(ser)
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressSnapshot, StorageError> {
    let state_str: String = row.try_get("lifecycle_state").map_err(ser)?;
    let session_id_str: String = row.try_get("session_id").map_err(ser)?;

    Ok(ProgressSnapshot {
        session_id: parse_session_id(&session_id_str)?,
        exam_id: exam_core::model::ExamId::new(row.try_get::<String, _>("exam_id").map_err(ser)?),
        student_fields: from_json(
            "student_fields",
            &row.try_get::<String, _>("student_fields").map_err(ser)?,
        )?,
        answers: from_json("answers", &row.try_get::<String, _>("answers").map_err(ser)?)?,
        flagged_question_ids: from_json(
            "flagged_question_ids",
            &row.try_get::<String, _>("flagged_question_ids")
                .map_err(ser)?,
        )?,
        confidence_levels: from_json(
            "confidence_levels",
            &row.try_get::<String, _>("confidence_levels").map_err(ser)?,
        )?,
        current_position: position_from_i64(
            row.try_get::<i64, _>("current_position").map_err(ser)?,
        )?,
        scratchpad_text: row.try_get("scratchpad_text").map_err(ser)?,
        violations: from_json(
            "violations",
            &row.try_get::<String, _>("violations").map_err(ser)?,
        )?,
        time_remaining_seconds: remaining_from_i64(
            row.try_get::<Option<i64>, _>("time_remaining_seconds")
                .map_err(ser)?,
        )?,
        lifecycle_state: parse_lifecycle(&state_str)?,
        started_at: row.try_get("started_at").map_err(ser)?,
        last_updated: row.try_get("last_updated").map_err(ser)?,
    })
}

pub(crate) fn map_mark_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SubmissionReceipt, StorageError> {
    Ok(SubmissionReceipt {
        submission_id: row.try_get("submission_id").map_err(ser)?,
        score: row.try_get("score").map_err(ser)?,
        max_score: row.try_get("max_score").map_err(ser)?,
        percentage: row.try_get("percentage").map_err(ser)?,
        recorded_at: row.try_get("recorded_at").map_err(ser)?,
    })
}

pub(crate) fn map_pending_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(i64, PendingSubmission), StorageError> {
    let payload_raw: String = row.try_get("payload").map_err(ser)?;
    Ok((
        row.try_get("id").map_err(ser)?,
        PendingSubmission {
            exam_id: exam_core::model::ExamId::new(
                row.try_get::<String, _>("exam_id").map_err(ser)?,
            ),
            student_key: row.try_get("student_key").map_err(ser)?,
            payload: from_json("payload", &payload_raw)?,
            queued_at: row.try_get("queued_at").map_err(ser)?,
        },
    ))
}
