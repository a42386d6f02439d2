use reqwest::{Response, StatusCode};
use std::future::Future;
use std::sync::Arc;

use crate::client::{BillingApiClient, HttpBillingSource, UpgradePrompt};
use crate::entitlements::{
    AccessGate, BillingStatusCache, FeatureKey, Freshness, GateDecision, Plan,
};
use crate::error::AppResult;
use crate::models::{BillingRecord, UpgradeRequiredBody};

/// What the client knows about the signed-in user's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing fetched yet, or logged out.
    Unknown,
    Known { plan: Plan },
    /// A purchase was confirmed; the next check refetches.
    Invalidated { last_plan: Plan },
}

#[derive(Debug)]
pub enum Gated {
    Performed(Response),
    UpgradeRequired(UpgradeRequiredBody),
}

impl Gated {
    pub fn is_performed(&self) -> bool {
        matches!(self, Gated::Performed(_))
    }
}

/// Client half of the access gate: decides locally when it can, and
/// otherwise lets the backend decide.
pub struct ClientGate {
    api: BillingApiClient,
    gate: AccessGate,
    prompt: UpgradePrompt,
}

impl ClientGate {
    pub fn new(api: BillingApiClient) -> Self {
        let cache = BillingStatusCache::new(Arc::new(HttpBillingSource::new(api.clone())));
        Self {
            api,
            gate: AccessGate::new(cache),
            prompt: UpgradePrompt::new(),
        }
    }

    pub fn api(&self) -> &BillingApiClient {
        &self.api
    }

    pub fn prompt(&self) -> &UpgradePrompt {
        &self.prompt
    }

    pub fn session_state(&self) -> SessionState {
        match self.gate.cache().cached() {
            None => SessionState::Unknown,
            Some(c) if c.freshness == Freshness::Invalidated => SessionState::Invalidated {
                last_plan: c.record.plan,
            },
            Some(c) => SessionState::Known {
                plan: c.record.plan,
            },
        }
    }

    /// Loads (or reuses) the billing record, e.g. right after sign-in.
    pub async fn refresh(&self) -> BillingRecord {
        self.gate.cache().get().await
    }

    /// Runs `call` unless the plan is known to lack `feature`.
    ///
    /// A fresh local deny never reaches the network. A stale one is
    /// rechecked first. With no plan loaded the request goes out and the
    /// backend decides; its 402 is handled like a local deny and reloads
    /// the plan so the next call can be refused locally.
    pub async fn invoke<F, Fut>(&self, feature: FeatureKey, call: F) -> AppResult<Gated>
    where
        F: FnOnce(&BillingApiClient) -> Fut,
        Fut: Future<Output = Result<Response, reqwest::Error>>,
    {
        if let Some(GateDecision::Deny {
            required_plan,
            current_plan,
        }) = self.gate.check_known(feature.as_str()).await
        {
            let body = UpgradeRequiredBody::new(feature.as_str(), current_plan, required_plan);
            log::debug!("{} denied locally ({current_plan} < {required_plan})", feature.as_str());
            self.prompt.raise(body.clone());
            return Ok(Gated::UpgradeRequired(body));
        }

        let resp = call(&self.api).await?;
        if resp.status() == StatusCode::PAYMENT_REQUIRED {
            let body: UpgradeRequiredBody = resp.json().await?;
            log::debug!("{} denied by server: {}", feature.as_str(), body.message);
            self.prompt.raise(body.clone());
            // 服务端的判定说明本地套餐未知或已过期，重新加载后下次可本地拦截
            let cache = self.gate.cache();
            if cache.cached().map(|c| c.record.plan) != Some(body.current_plan) {
                cache.invalidate();
                cache.get().await;
            }
            return Ok(Gated::UpgradeRequired(body));
        }
        Ok(Gated::Performed(resp))
    }

    /// Confirms a returned Checkout session and drops the cached plan.
    pub async fn confirm_checkout(&self, session_id: &str) -> AppResult<BillingRecord> {
        let record = self.api.confirm_checkout(session_id).await?;
        self.gate.cache().invalidate();
        self.prompt.dismiss();
        Ok(record)
    }

    pub async fn logout(&self) -> AppResult<()> {
        let result = self.api.logout().await;
        // 无论服务端是否成功，本地状态都回到 Unknown
        self.gate.cache().reset();
        self.prompt.dismiss();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Mock, Server};

    async fn status_mock(server: &mut Server, plan: &str) -> Mock {
        server
            .mock("GET", "/api/billing/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"plan":"{plan}","status":"active"}}"#))
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_fresh_deny_short_circuits() {
        let mut server = Server::new_async().await;
        let status = status_mock(&mut server, "free").await;
        let export = server
            .mock("GET", "/api/glucose/export.csv")
            .expect(0)
            .create_async()
            .await;

        let gate = ClientGate::new(BillingApiClient::new(server.url(), "tok"));
        gate.refresh().await;
        assert_eq!(gate.session_state(), SessionState::Known { plan: Plan::Free });

        let outcome = gate
            .invoke(FeatureKey::CsvExport, |api| api.get("/api/glucose/export.csv").send())
            .await
            .unwrap();
        let Gated::UpgradeRequired(body) = outcome else {
            panic!("expected a local deny");
        };
        assert_eq!(body.current_plan, Plan::Free);
        assert_eq!(body.required_plan, Plan::Pro);
        assert_eq!(gate.prompt().current(), Some(body));

        status.assert_async().await;
        export.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_state_falls_through_to_server_402() {
        let mut server = Server::new_async().await;
        let status = status_mock(&mut server, "premium").await;
        let import = server
            .mock("POST", "/api/glucose/import")
            .with_status(402)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":"UPGRADE_REQUIRED","message":"cgmImport requires the pro plan","currentPlan":"premium","requiredPlan":"pro"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let gate = ClientGate::new(BillingApiClient::new(server.url(), "tok"));
        assert_eq!(gate.session_state(), SessionState::Unknown);

        let upload = |api: &BillingApiClient| {
            api.post("/api/glucose/import")
                .body("2026-03-01T08:00:00Z,112\n")
                .send()
        };
        let outcome = gate.invoke(FeatureKey::CgmImport, upload).await.unwrap();
        assert!(!outcome.is_performed());
        let prompt = gate.prompt().current().unwrap();
        assert_eq!(prompt.current_plan, Plan::Premium);
        assert_eq!(prompt.required_plan, Plan::Pro);
        assert_eq!(gate.session_state(), SessionState::Known { plan: Plan::Premium });

        // 第二次在本地拦截，不再请求导入接口
        let outcome = gate.invoke(FeatureKey::CgmImport, upload).await.unwrap();
        assert!(!outcome.is_performed());
        status.assert_async().await;
        import.assert_async().await;
    }

    #[tokio::test]
    async fn test_allowed_feature_is_performed() {
        let mut server = Server::new_async().await;
        let _status = status_mock(&mut server, "pro").await;
        let export = server
            .mock("GET", "/api/glucose/export.csv")
            .with_status(200)
            .with_body("measured_at,value_mg_dl,source,note\n")
            .expect(1)
            .create_async()
            .await;

        let gate = ClientGate::new(BillingApiClient::new(server.url(), "tok"));
        gate.refresh().await;
        let outcome = gate
            .invoke(FeatureKey::CsvExport, |api| api.get("/api/glucose/export.csv").send())
            .await
            .unwrap();
        assert!(outcome.is_performed());
        assert!(gate.prompt().current().is_none());
        export.assert_async().await;
    }

    #[tokio::test]
    async fn test_confirm_then_logout_session_transitions() {
        let mut server = Server::new_async().await;
        let free = status_mock(&mut server, "free").await;
        let _confirm = server
            .mock("POST", "/api/billing/confirm")
            .match_body(mockito::Matcher::Json(serde_json::json!({"sessionId": "cs_test_1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"plan":"premium","status":"active"}"#)
            .create_async()
            .await;
        let _logout = server
            .mock("POST", "/api/auth/logout")
            .with_status(200)
            .create_async()
            .await;

        let gate = ClientGate::new(BillingApiClient::new(server.url(), "tok"));
        gate.refresh().await;
        assert_eq!(gate.session_state(), SessionState::Known { plan: Plan::Free });

        let record = gate.confirm_checkout("cs_test_1").await.unwrap();
        assert_eq!(record.plan, Plan::Premium);
        assert_eq!(
            gate.session_state(),
            SessionState::Invalidated { last_plan: Plan::Free }
        );

        free.remove_async().await;
        let _premium = status_mock(&mut server, "premium").await;
        assert_eq!(gate.refresh().await.plan, Plan::Premium);
        assert_eq!(gate.session_state(), SessionState::Known { plan: Plan::Premium });

        gate.logout().await.unwrap();
        assert_eq!(gate.session_state(), SessionState::Unknown);
    }
}
