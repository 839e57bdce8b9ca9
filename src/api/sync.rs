use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use super::SyncApi;
use crate::domain::{SyncCategory, SystemMessage};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sync rejected: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid sync response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    success: bool,
    #[serde(default)]
    data: Vec<SystemMessage>,
}

/// Client for the remote sync-trigger API. Every call is authenticated
/// with the static API key header.
pub struct SyncClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SyncClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn trigger_endpoint(&self, category: SyncCategory) -> String {
        let suffix = match category {
            SyncCategory::Stock => "update-stock",
            SyncCategory::Pricing => "update-pricing",
        };
        format!("{}/{}", self.base_url, suffix)
    }
}

#[async_trait]
impl SyncApi for SyncClient {
    async fn trigger(&self, category: SyncCategory) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.trigger_endpoint(category))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| String::new());
            Err(SyncError::Rejected { status, body })
        }
    }

    async fn system_messages(
        &self,
        category: SyncCategory,
    ) -> Result<Vec<SystemMessage>, SyncError> {
        let envelope: MessagesEnvelope = self
            .client
            .get(format!("{}/system-messages", self.base_url))
            .query(&[("category", category.as_str())])
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;

        if !envelope.success {
            return Err(SyncError::InvalidResponse(
                "messages endpoint reported failure".to_string(),
            ));
        }
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_posts_with_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/update-stock")
            .match_header("x-api-key", "k-123")
            .with_status(200)
            .create_async()
            .await;

        let client = SyncClient::new(&server.url(), "k-123");
        client.trigger(SyncCategory::Stock).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn trigger_rejection_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/update-pricing")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let client = SyncClient::new(&server.url(), "wrong");
        let err = client.trigger(SyncCategory::Pricing).await.unwrap_err();
        match err {
            SyncError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn system_messages_parses_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/system-messages")
            .match_query(mockito::Matcher::UrlEncoded(
                "category".to_string(),
                "stock".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"data":[{"id":"m1","message":"stock sync queued","category":"stock","createdAt":"2026-08-06T09:15:00Z"}]}"#,
            )
            .create_async()
            .await;

        let client = SyncClient::new(&server.url(), "k-123");
        let messages = client.system_messages(SyncCategory::Stock).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].category, "stock");
    }
}
