use std::time::Duration;

use reqwest::StatusCode;
use tonic::async_trait;

use crate::error::DispatchError;
use crate::remote::ExecutorClient;
use crate::worker::{JobSubmission, LoadReport};

/// Talks to an executor's HTTP surface (`/calculate`, `/ping`).
#[derive(Debug, Clone)]
pub struct HttpExecutorClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExecutorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    fn address(&self) -> &str {
        &self.base_url
    }

    async fn submit(&self, submission: &JobSubmission) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(format!("{}/calculate", self.base_url))
            .json(submission)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(()),
            StatusCode::CONFLICT => Err(DispatchError::Conflict),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(DispatchError::Rejected(format!(
                    "status {}: {}",
                    status.as_u16(),
                    body.trim()
                )))
            }
        }
    }

    async fn ping(&self) -> Result<LoadReport, DispatchError> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DispatchError::Protocol(format!(
                "Unexpected status code: {}",
                status.as_u16()
            )));
        }
        response
            .json::<LoadReport>()
            .await
            .map_err(|_| DispatchError::Protocol("Failed to decode response".to_string()))
    }
}
