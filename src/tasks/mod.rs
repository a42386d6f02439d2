//! Background scheduled tasks for the application.
//!
//! Call `spawn_all` once during startup to launch them.

use crate::services::BillingService;

/// Spawn all background tasks. Detaches via `tokio::spawn`; does not block.
pub fn spawn_all(billing_service: BillingService) {
    // 清理长时间未使用的订阅缓存
    {
        let svc = billing_service.clone();
        let idle = svc.settings().session_idle();
        let interval = svc.settings().sweep_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let evicted = svc.sweep_idle(idle);
                if evicted > 0 {
                    log::info!("Evicted {evicted} idle billing caches");
                }
            }
        });
    }
}
