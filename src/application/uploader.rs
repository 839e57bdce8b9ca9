use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info};

use crate::api::ObjectStore;
use crate::application::signer::RequestSigner;
use crate::domain::{StoreCredentials, WorkflowError};

/// Successful upload outcome: the object's public URL.
#[derive(Debug, Clone)]
pub struct UploadedObject {
    pub url: String,
}

/// Transmits one payload to the object store under a freshly signed
/// header set. No retries here; the workflow owns retry policy.
pub struct Uploader<S> {
    store: S,
    signer: RequestSigner,
    credentials: StoreCredentials,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(store: S, credentials: StoreCredentials) -> Self {
        Self {
            store,
            signer: RequestSigner::new(credentials.clone()),
            credentials,
        }
    }

    /// PUT `payload` under `key`. An empty payload is a data-integrity
    /// error and is rejected before any network traffic.
    pub async fn upload(
        &self,
        payload: &[u8],
        key: &str,
        display_name: &str,
    ) -> Result<UploadedObject, WorkflowError> {
        if payload.is_empty() {
            return Err(WorkflowError::EmptyPayload(display_name.to_string()));
        }

        debug!("{}: uploading {} bytes to {}", display_name, payload.len(), key);
        let headers = self.signer.sign(key, Utc::now());
        let response = self
            .store
            .put_object(
                &self.credentials.bucket,
                &self.credentials.region,
                key,
                Bytes::copy_from_slice(payload),
                &headers,
            )
            .await
            .map_err(|e| WorkflowError::UploadTransport(e.to_string()))?;

        if (200..300).contains(&response.status) {
            let url = format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.credentials.bucket, self.credentials.region, key
            );
            info!("{}: uploaded to {}", display_name, url);
            Ok(UploadedObject { url })
        } else {
            Err(WorkflowError::UploadRejected {
                status: response.status,
                body: response.body,
            })
        }
    }
}
