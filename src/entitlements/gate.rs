use crate::entitlements::cache::{BillingStatusCache, Freshness};
use crate::entitlements::policy::{self, GateDecision, Plan};
use crate::error::{AppError, AppResult};

/// The one place every gated feature goes through, on the server and in
/// [`crate::client::ClientGate`].
///
/// A plan that merely outlived its TTL may still grant access once, while a
/// refresh runs in the background; it is never trusted to deny. After
/// `invalidate()` nothing is decided from the old entry.
#[derive(Clone)]
pub struct AccessGate {
    cache: BillingStatusCache,
}

impl AccessGate {
    pub fn new(cache: BillingStatusCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &BillingStatusCache {
        &self.cache
    }

    pub async fn check(&self, feature: &str) -> GateDecision {
        if let Some(cached) = self.cache.cached() {
            let decision = policy::evaluate(cached.record.plan, feature);
            match cached.freshness {
                Freshness::Fresh => return decision,
                // 仅 TTL 过期：先放行，后台刷新，下一次检查用新套餐
                Freshness::Stale if decision.is_allowed() => {
                    self.refresh_in_background();
                    return decision;
                }
                Freshness::Stale | Freshness::Invalidated => {}
            }
        }
        let record = self.cache.get().await;
        policy::evaluate(record.plan, feature)
    }

    fn refresh_in_background(&self) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            cache.get().await;
        });
    }

    /// Like [`check`](Self::check), but `None` while the session has never
    /// loaded a plan.
    pub async fn check_known(&self, feature: &str) -> Option<GateDecision> {
        self.cache.cached()?;
        Some(self.check(feature).await)
    }

    pub async fn plan(&self) -> Plan {
        self.cache.get().await.plan
    }

    pub async fn range_max_days(&self) -> u32 {
        policy::range_max_days(self.plan().await)
    }
}

impl GateDecision {
    /// Turns a deny into `AppError::UpgradeRequired` (HTTP 402).
    pub fn require(self, feature: &str) -> AppResult<()> {
        match self {
            GateDecision::Allow => Ok(()),
            GateDecision::Deny {
                required_plan,
                current_plan,
            } => Err(AppError::UpgradeRequired {
                feature: feature.to_string(),
                current_plan,
                required_plan,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::cache::tests::FakeSource;
    use std::sync::Arc;
    use std::time::Duration;

    fn gate_for(source: &Arc<FakeSource>) -> AccessGate {
        AccessGate::new(BillingStatusCache::new(source.clone()))
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let source = Arc::new(FakeSource::new(Plan::Free));
        let gate = gate_for(&source);

        let first = gate.check("csvExport").await;
        let second = gate.check("csvExport").await;
        assert_eq!(first, second);
        assert_eq!(
            first,
            GateDecision::Deny {
                required_plan: Plan::Pro,
                current_plan: Plan::Free
            }
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidated_deny_is_rechecked() {
        let source = Arc::new(FakeSource::new(Plan::Free));
        let gate = gate_for(&source);
        assert!(!gate.check("insightsFull").await.is_allowed());

        source.set_plan(Plan::Premium);
        gate.cache().invalidate();
        assert!(gate.check("insightsFull").await.is_allowed());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downgrade_then_invalidate_denies() {
        let source = Arc::new(FakeSource::new(Plan::Pro));
        let gate = gate_for(&source);
        assert!(gate.check("csvExport").await.is_allowed());

        // 订阅取消后写回 free 并失效缓存
        source.set_plan(Plan::Free);
        gate.cache().invalidate();
        tokio::time::advance(Duration::from_secs(24 * 3600)).await;

        for _ in 0..5 {
            assert_eq!(
                gate.check("csvExport").await,
                GateDecision::Deny {
                    required_plan: Plan::Pro,
                    current_plan: Plan::Free
                }
            );
        }
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_allow_refreshes_in_background() {
        let source = Arc::new(FakeSource::new(Plan::Pro));
        let gate = gate_for(&source);
        let _ = gate.check("csvExport").await;

        source.set_plan(Plan::Free);
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert!(gate.check("csvExport").await.is_allowed());

        while source.calls() < 2 {
            tokio::task::yield_now().await;
        }
        while !gate.cache().cached().is_some_and(|c| c.is_fresh()) {
            tokio::task::yield_now().await;
        }
        assert!(!gate.check("csvExport").await.is_allowed());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_deny_refreshes_after_ttl() {
        let source = Arc::new(FakeSource::new(Plan::Free));
        let gate = gate_for(&source);
        let _ = gate.check("pdfExport").await;

        source.set_plan(Plan::Premium);
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert!(gate.check("pdfExport").await.is_allowed());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_check_known_unknown_session() {
        let source = Arc::new(FakeSource::new(Plan::Pro));
        let gate = gate_for(&source);
        assert_eq!(gate.check_known("csvExport").await, None);
        assert_eq!(source.calls(), 0);

        gate.plan().await;
        assert_eq!(gate.check_known("csvExport").await, Some(GateDecision::Allow));
    }

    #[tokio::test]
    async fn test_range_max_days_for_pro() {
        let source = Arc::new(FakeSource::new(Plan::Pro));
        assert_eq!(gate_for(&source).range_max_days().await, 30);
    }

    #[test]
    fn test_require_maps_deny_to_upgrade_required() {
        let denied = GateDecision::Deny {
            required_plan: Plan::Pro,
            current_plan: Plan::Premium,
        };
        match denied.require("cgmImport") {
            Err(AppError::UpgradeRequired {
                feature,
                current_plan,
                required_plan,
            }) => {
                assert_eq!(feature, "cgmImport");
                assert_eq!(current_plan, Plan::Premium);
                assert_eq!(required_plan, Plan::Pro);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(GateDecision::Allow.require("cgmImport").is_ok());
    }
}
