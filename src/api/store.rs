use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;

use super::ObjectStore;
use crate::domain::SignedHeaders;

#[derive(Error, Debug)]
#[error("object store transport error: {0}")]
pub struct StoreError(pub String);

/// Classified outcome of one PUT: the HTTP status plus the raw response
/// body, which carries the store's error text on rejection.
#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub status: u16,
    pub body: String,
}

/// Plain HTTP object store client. One PUT per call, no retries; retry
/// policy belongs to the workflow.
pub struct HttpObjectStore {
    client: Client,
    endpoint_override: Option<String>,
}

impl HttpObjectStore {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            endpoint_override: None,
        }
    }

    /// Point every PUT at `{base}/{key}` instead of the derived
    /// virtual-host endpoint. Used against local stand-ins.
    pub fn with_endpoint(base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint_override: Some(base.into().trim_end_matches('/').to_string()),
        }
    }

    fn endpoint_for(&self, bucket: &str, region: &str, key: &str) -> String {
        match &self.endpoint_override {
            Some(base) => format!("{}/{}", base, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
        }
    }
}

impl Default for HttpObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        body: Bytes,
        headers: &SignedHeaders,
    ) -> Result<StoreResponse, StoreError> {
        let endpoint = self.endpoint_for(bucket, region, key);
        let response = self
            .client
            .put(&endpoint)
            .header("Authorization", &headers.authorization)
            .header("Content-Type", &headers.content_type)
            .header("x-amz-content-sha256", &headers.content_sha256)
            .header("x-amz-date", &headers.amz_date)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_else(|_| String::new());
        Ok(StoreResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::application::signer::RequestSigner;
    use crate::domain::StoreCredentials;

    fn signed_headers() -> SignedHeaders {
        let signer = RequestSigner::new(StoreCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-east-1".to_string(),
            bucket: "exports".to_string(),
        });
        signer.sign("stock.csv", Utc.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap())
    }

    #[test]
    fn endpoint_is_derived_from_bucket_region_and_key() {
        let store = HttpObjectStore::new();
        assert_eq!(
            store.endpoint_for("exports", "eu-west-2", "data/stock.csv"),
            "https://exports.s3.eu-west-2.amazonaws.com/data/stock.csv"
        );
    }

    #[tokio::test]
    async fn put_carries_signed_headers() {
        let mut server = mockito::Server::new_async().await;
        let headers = signed_headers();
        let mock = server
            .mock("PUT", "/stock.csv")
            .match_header("authorization", headers.authorization.as_str())
            .match_header("content-type", "text/csv")
            .match_header("x-amz-content-sha256", "UNSIGNED-PAYLOAD")
            .match_header("x-amz-date", headers.amz_date.as_str())
            .with_status(200)
            .create_async()
            .await;

        let store = HttpObjectStore::with_endpoint(server.url());
        let response = store
            .put_object(
                "exports",
                "us-east-1",
                "stock.csv",
                Bytes::from_static(b"sku,qty\n"),
                &headers,
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejection_body_is_preserved() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/stock.csv")
            .with_status(403)
            .with_body("<Error><Code>SignatureDoesNotMatch</Code></Error>")
            .create_async()
            .await;

        let store = HttpObjectStore::with_endpoint(server.url());
        let response = store
            .put_object(
                "exports",
                "us-east-1",
                "stock.csv",
                Bytes::from_static(b"sku,qty\n"),
                &signed_headers(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 403);
        assert!(response.body.contains("SignatureDoesNotMatch"));
    }
}
