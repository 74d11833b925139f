use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ConsoleHub, HubSettings};

/// Instance id → console hub. Hubs are created lazily and removed when
/// the owning process is reaped.
pub struct HubRegistry {
    hubs: Mutex<HashMap<String, Arc<ConsoleHub>>>,
    settings: HubSettings,
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

impl HubRegistry {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            hubs: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// The map lock only guards lookup/insert/remove, never hub I/O.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ConsoleHub>>> {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_create(&self, instance_id: &str) -> Arc<ConsoleHub> {
        let mut hubs = self.lock();
        if let Some(hub) = hubs.get(instance_id) {
            return hub.clone();
        }
        let hub = Arc::new(ConsoleHub::start(instance_id, self.settings));
        hubs.insert(instance_id.to_string(), hub.clone());
        hub
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<ConsoleHub>> {
        self.lock().get(instance_id).cloned()
    }

    /// Stop and forget the hub for `instance_id`. Returns whether one existed.
    pub fn remove(&self, instance_id: &str) -> bool {
        let removed = self.lock().remove(instance_id);
        match removed {
            Some(hub) => {
                hub.stop();
                tracing::info!("Console hub for '{}' removed", instance_id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HubState;

    #[tokio::test]
    async fn test_get_or_create_reuses_hub() {
        let registry = HubRegistry::default();
        let a = registry.get_or_create("srv-1");
        let b = registry.get_or_create("srv-1");
        let other = registry.get_or_create("srv-2");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_stops_hub_and_is_idempotent() {
        let registry = HubRegistry::default();
        let hub = registry.get_or_create("srv");
        let mut sub = hub.subscribe().await.unwrap();

        assert!(registry.remove("srv"));
        assert!(!registry.remove("srv"));
        assert!(registry.get("srv").is_none());
        assert_eq!(hub.state(), HubState::Stopped);
        assert_eq!(sub.recv().await, None);

        // a fresh hub replaces the stopped one
        let fresh = registry.get_or_create("srv");
        assert_eq!(fresh.state(), HubState::Active);
        assert!(!Arc::ptr_eq(&hub, &fresh));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_yields_one_hub() {
        let registry = Arc::new(HubRegistry::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move { r.get_or_create("shared") }));
        }

        let mut hubs = Vec::new();
        for h in handles {
            hubs.push(h.await.unwrap());
        }
        assert!(hubs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
