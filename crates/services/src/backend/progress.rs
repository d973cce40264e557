//! Remote progress mirror speaking the storage contract over HTTP.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use exam_core::model::{BackendConfig, ExamId};
use storage::repository::{ProgressSnapshot, ProgressStore, StorageError};

use super::http::{authorize, endpoint};

/// Server-side copy of attempt snapshots.
///
/// Implements the same contract as the local store so the controller can
/// treat both sides uniformly; callers decide which copy wins on restore.
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    config: BackendConfig,
}

impl HttpProgressStore {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn progress_url(&self, exam_id: &ExamId, student_key: &str) -> String {
        endpoint(
            &self.config,
            &format!("progress/{}/{student_key}", exam_id.as_str()),
        )
    }
}

fn connection(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl ProgressStore for HttpProgressStore {
    async fn load(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let request = authorize(
            self.client.get(self.progress_url(exam_id, student_key)),
            &self.config,
        );
        let response = request.send().await.map_err(connection)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StorageError::Connection(format!(
                "progress endpoint returned {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(connection)?;
        let snapshot = serde_json::from_str(&body)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let url = self.progress_url(&snapshot.exam_id, &snapshot.student_key());
        let request = authorize(self.client.put(url), &self.config);
        let response = request.json(snapshot).send().await.map_err(connection)?;

        if !response.status().is_success() {
            return Err(StorageError::Connection(format!(
                "progress endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn clear(&self, exam_id: &ExamId, student_key: &str) -> Result<(), StorageError> {
        let request = authorize(
            self.client.delete(self.progress_url(exam_id, student_key)),
            &self.config,
        );
        let response = request.send().await.map_err(connection)?;

        if response.status() != StatusCode::NOT_FOUND && !response.status().is_success() {
            return Err(StorageError::Connection(format!(
                "progress endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
