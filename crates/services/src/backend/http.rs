//! HTTP clients for the platform backend and grading service.

use std::env;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use exam_core::model::{BackendConfig, BackendConfigDraft, ViolationRecord};

use super::contract::{
    GradingClient, GradingOutcome, GradingRequest, HeartbeatReply, ProgressSummary,
    SessionBackend, SessionOutcome, SessionToken, StartSessionRequest, StartedSession,
};
use crate::error::BackendError;

/// Read backend settings from the environment, if configured.
///
/// `EXAM_BACKEND_URL` is required; `EXAM_BACKEND_API_KEY` is optional.
#[must_use]
pub fn config_from_env() -> Option<BackendConfig> {
    let base_url = env::var("EXAM_BACKEND_URL").ok()?;
    let api_key = env::var("EXAM_BACKEND_API_KEY").ok();
    BackendConfigDraft {
        base_url: Some(base_url),
        api_key,
    }
    .validate()
    .ok()
}

pub(super) fn endpoint(config: &BackendConfig, path: &str) -> String {
    format!("{}/{path}", config.base_url().trim_end_matches('/'))
}

pub(super) fn authorize(request: RequestBuilder, config: &BackendConfig) -> RequestBuilder {
    match config.api_key() {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

async fn reject_on_error(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected { status, message })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
}

//
// ─── SESSION BACKEND ───────────────────────────────────────────────────────────
//

#[derive(Clone)]
pub struct HttpSessionBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpSessionBackend {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, BackendError> {
        let request = authorize(self.client.post(endpoint(&self.config, path)), &self.config);
        let response = request.json(body).send().await?;
        reject_on_error(response).await
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn start(&self, request: &StartSessionRequest) -> Result<StartedSession, BackendError> {
        let response = self.post_json("sessions/start", request).await?;
        decode_json(response).await
    }

    async fn heartbeat(
        &self,
        token: &SessionToken,
        progress: &ProgressSummary,
    ) -> Result<HeartbeatReply, BackendError> {
        let response = self
            .post_json("sessions/heartbeat", &HeartbeatBody { token, progress })
            .await?;
        decode_json(response).await
    }

    async fn report_violation(
        &self,
        token: &SessionToken,
        record: &ViolationRecord,
    ) -> Result<(), BackendError> {
        self.post_json("sessions/violation", &ViolationBody { token, record })
            .await?;
        Ok(())
    }

    async fn end(
        &self,
        token: &SessionToken,
        outcome: SessionOutcome,
    ) -> Result<(), BackendError> {
        self.post_json("sessions/end", &EndBody { token, outcome })
            .await?;
        Ok(())
    }
}

//
// ─── GRADING CLIENT ────────────────────────────────────────────────────────────
//

#[derive(Clone)]
pub struct HttpGradingClient {
    client: Client,
    config: BackendConfig,
}

impl HttpGradingClient {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GradingClient for HttpGradingClient {
    async fn submit(&self, request: &GradingRequest) -> Result<GradingOutcome, BackendError> {
        let url = endpoint(&self.config, "grade-exam");
        let response = authorize(self.client.post(url), &self.config)
            .json(request)
            .send()
            .await?;

        // 409 means the backend already holds a graded attempt for this
        // student; it may echo the earlier result in the body.
        if response.status() == StatusCode::CONFLICT {
            let earlier = decode_json(response).await.ok();
            return Ok(GradingOutcome::AlreadySubmitted(earlier));
        }

        let response = reject_on_error(response).await?;
        let graded = decode_json(response).await?;
        Ok(GradingOutcome::Accepted(graded))
    }
}

#[derive(Serialize)]
struct HeartbeatBody<'a> {
    token: &'a SessionToken,
    progress: &'a ProgressSummary,
}

#[derive(Serialize)]
struct ViolationBody<'a> {
    token: &'a SessionToken,
    record: &'a ViolationRecord,
}

#[derive(Serialize)]
struct EndBody<'a> {
    token: &'a SessionToken,
    outcome: SessionOutcome,
}
