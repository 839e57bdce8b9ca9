use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{Navigator, PageProbe, PageState};
use crate::domain::LoginCredentials;

/// Delay before submitting credentials after steering to the login page,
/// giving the form time to render.
const LOGIN_FORM_SETTLE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("page agent request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("page agent error: {0}")]
    Agent(String),

    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct AgentReply {
    success: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct LocatorBody<'a> {
    locator: &'a str,
}

#[derive(Debug, Serialize)]
struct NavigateBody<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// HTTP/JSON client for the companion page agent: the process that lives
/// next to the browser and can inspect or poke the live page. Cheap to
/// clone; clones share the connection pool.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
    listing_url: String,
    login_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str, listing_url: &str, login_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_url: listing_url.to_string(),
            login_url: login_url.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_command<B: Serialize>(&self, path: &str, body: &B) -> Result<AgentReply, BridgeError> {
        let reply: AgentReply = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;
        Ok(reply)
    }
}

#[async_trait]
impl PageProbe for BridgeClient {
    async fn page_state(&self) -> Result<PageState, BridgeError> {
        let state: PageState = self
            .client
            .get(self.endpoint("state"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;
        Ok(state)
    }

    async fn export_url(&self, locator: &str) -> Result<String, BridgeError> {
        let reply: AgentReply = self
            .client
            .get(self.endpoint("export-url"))
            .query(&[("locator", locator)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;

        match (reply.success, reply.url) {
            (true, Some(url)) if !url.is_empty() => Ok(url),
            _ => Err(BridgeError::Agent(reply.message)),
        }
    }

    async fn click_export(&self, locator: &str) -> Result<(), BridgeError> {
        let reply = self.post_command("click", &LocatorBody { locator }).await?;
        if reply.success {
            Ok(())
        } else {
            Err(BridgeError::Agent(reply.message))
        }
    }

    async fn submit_credentials(&self, credentials: &LoginCredentials) -> Result<(), BridgeError> {
        let reply = self
            .post_command(
                "login",
                &LoginBody {
                    email: &credentials.email,
                    password: &credentials.password,
                },
            )
            .await?;
        if reply.success {
            Ok(())
        } else {
            Err(BridgeError::Agent(reply.message))
        }
    }
}

#[async_trait]
impl Navigator for BridgeClient {
    async fn navigate_to(&self, url: &str) -> Result<(), BridgeError> {
        self.post_command("navigate", &NavigateBody { url }).await?;
        Ok(())
    }

    async fn navigate_to_listing(&self) -> Result<(), BridgeError> {
        debug!("navigating to listing page");
        self.navigate_to(&self.listing_url).await
    }

    async fn navigate_to_login(
        &self,
        auto_submit: bool,
        credentials: Option<&LoginCredentials>,
    ) -> Result<(), BridgeError> {
        self.navigate_to(&self.login_url).await?;
        if auto_submit {
            if let Some(credentials) = credentials {
                tokio::time::sleep(LOGIN_FORM_SETTLE).await;
                self.submit_credentials(credentials).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> BridgeClient {
        BridgeClient::new(
            &server.url(),
            "https://portal.example.com/orderwise/stock/",
            "https://portal.example.com/customer/account/login",
        )
    }

    #[tokio::test]
    async fn page_state_parses_agent_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/state")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"url":"https://portal.example.com/orderwise/stock/","onListingPage":true,"isAuthenticated":false,"challengePresent":false,"hasExportLink":true}"#,
            )
            .create_async()
            .await;

        let state = client_for(&server).page_state().await.unwrap();
        assert!(state.on_listing_page);
        assert!(!state.is_authenticated);
        assert!(state.has_export_link);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn export_url_failure_carries_agent_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/export-url")
            .match_query(mockito::Matcher::UrlEncoded(
                "locator".to_string(),
                "#missing".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":false,"message":"export control not found at locator"}"#)
            .create_async()
            .await;

        let err = client_for(&server).export_url("#missing").await.unwrap_err();
        assert!(err.to_string().contains("export control not found"));
    }

    #[tokio::test]
    async fn click_export_reports_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/click")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"message":"clicked"}"#)
            .create_async()
            .await;

        client_for(&server).click_export("#export a").await.unwrap();
        mock.assert_async().await;
    }
}
