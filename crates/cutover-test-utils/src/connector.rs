//! Connector handing out a prepared control plane

use async_trait::async_trait;
use cutover_control::{ControlPlane, ControlPlaneError};
use cutover_core::ControlPlaneConnector;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

type ConnectHook = Box<dyn Fn() + Send + Sync>;

/// Returns the same control plane on every connect.
///
/// The hook runs before each connect; tests use it to apply what the new
/// service would do on startup, such as the backend's rename pass.
pub struct FakeConnector {
    control: Arc<dyn ControlPlane>,
    on_connect: Option<ConnectHook>,
    refusals: AtomicU32,
    connects: AtomicU32,
}

impl std::fmt::Debug for FakeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnector")
            .field("connects", &self.connects())
            .finish_non_exhaustive()
    }
}

impl FakeConnector {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            on_connect: None,
            refusals: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Refuse the next `n` logins
    #[must_use]
    pub fn refusing(self, n: u32) -> Self {
        self.refusals.store(n, Ordering::SeqCst);
        self
    }

    /// Successful connects so far
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlaneConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn ControlPlane>, ControlPlaneError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ControlPlaneError::Login("service still starting".to_string()));
        }
        if let Some(hook) = &self.on_connect {
            hook();
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.control.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::FakeControlPlane;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn refusals_run_out_and_hook_runs_on_success() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let connector = FakeConnector::new(Arc::new(FakeControlPlane::new()))
            .on_connect(move || flag.store(true, Ordering::SeqCst))
            .refusing(1);

        assert!(matches!(connector.connect().await, Err(ControlPlaneError::Login(_))));
        assert!(!fired.load(Ordering::SeqCst));
        assert!(connector.connect().await.is_ok());
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(connector.connects(), 1);
    }
}
