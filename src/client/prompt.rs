use std::sync::Arc;
use tokio::sync::watch;

use crate::models::UpgradeRequiredBody;

/// Upgrade prompt shown by the UI. Local denies and server 402s both land
/// here with the same payload.
#[derive(Clone)]
pub struct UpgradePrompt {
    tx: Arc<watch::Sender<Option<UpgradeRequiredBody>>>,
}

impl UpgradePrompt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self, body: UpgradeRequiredBody) {
        self.tx.send_replace(Some(body));
    }

    pub fn dismiss(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<UpgradeRequiredBody> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UpgradeRequiredBody>> {
        self.tx.subscribe()
    }
}

impl Default for UpgradePrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::Plan;

    #[tokio::test]
    async fn test_subscribers_see_raise_and_dismiss() {
        let prompt = UpgradePrompt::new();
        let mut rx = prompt.subscribe();

        prompt.raise(UpgradeRequiredBody::new("csvExport", Plan::Free, Plan::Pro));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().required_plan, Plan::Pro);

        prompt.dismiss();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert!(prompt.current().is_none());
    }
}
