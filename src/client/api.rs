use async_trait::async_trait;
use reqwest::RequestBuilder;

use crate::entitlements::{BillingSource, FetchError};
use crate::error::AppResult;
use crate::models::{BillingRecord, ConfirmCheckoutRequest, EntitlementsResponse};

/// Thin reqwest wrapper for one signed-in session against this backend.
#[derive(Clone)]
pub struct BillingApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BillingApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticated GET against `path` (e.g. `/api/glucose/export.csv`).
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(&self.token)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(&self.token)
    }

    pub async fn status(&self) -> Result<BillingRecord, FetchError> {
        let record = self
            .get("/api/billing/status")
            .send()
            .await?
            .error_for_status()?
            .json::<BillingRecord>()
            .await?;
        Ok(record)
    }

    pub async fn entitlements(&self) -> AppResult<EntitlementsResponse> {
        let resp = self
            .get("/api/billing/entitlements")
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn confirm_checkout(&self, session_id: &str) -> AppResult<BillingRecord> {
        let resp = self
            .post("/api/billing/confirm")
            .json(&ConfirmCheckoutRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn logout(&self) -> AppResult<()> {
        self.post("/api/auth/logout")
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Feeds a client-side cache from `GET /api/billing/status`.
pub struct HttpBillingSource {
    api: BillingApiClient,
}

impl HttpBillingSource {
    pub fn new(api: BillingApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BillingSource for HttpBillingSource {
    async fn fetch(&self) -> Result<BillingRecord, FetchError> {
        self.api.status().await
    }
}
