//! HTTP client for a running `conduit serve`

use crate::api::ACTOR_HEADER;
use crate::core::{Run, TriggerEvent};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for the conduit HTTP API
#[derive(Debug, Clone)]
pub struct ConduitClient {
    base_url: String,
    client: Client,
    actor: Option<String>,
}

impl ConduitClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            actor: None,
        }
    }

    /// Identity sent with approve, reject and cancel requests
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.actor {
            Some(actor) => request.header(ACTOR_HEADER, actor),
            None => request,
        }
    }

    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    pub async fn trigger(&self, event: &TriggerEvent) -> Result<Vec<Run>> {
        let response = self.post("/triggers").json(event).send().await?;
        self.handle_response(response).await
    }

    pub async fn list_active(&self) -> Result<Vec<Run>> {
        let response = self
            .client
            .get(format!("{}/runs", self.base_url))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn history(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(pipeline) = pipeline {
            query.push(("pipeline", pipeline.to_string()));
        }
        let response = self
            .client
            .get(format!("{}/runs/history", self.base_url))
            .query(&query)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run> {
        let response = self
            .client
            .get(format!("{}/runs/{}", self.base_url, run_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn approve(&self, run_id: Uuid, stage_id: &str) -> Result<Run> {
        let response = self
            .post(&format!("/runs/{}/stages/{}/approve", run_id, stage_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn reject(&self, run_id: Uuid, stage_id: &str) -> Result<Run> {
        let response = self
            .post(&format!("/runs/{}/stages/{}/reject", run_id, stage_id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<Run> {
        let response = self.post(&format!("/runs/{}/cancel", run_id)).send().await?;
        self.handle_response(response).await
    }

    async fn api_error(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        ClientError::ApiError { status, message }
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
