use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// One published version of the runtime configuration.
///
/// Snapshots are shared as `Arc<Configuration>` and never modified after they
/// are installed in a [`ConfigurationStore`]. Every change goes through
/// [`ConfigurationStore::replace`] or [`ConfigurationStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub webhook_url: String,
    pub enabled: bool,
    pub monitored_channels: HashSet<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            enabled: true,
            monitored_channels: HashSet::new(),
        }
    }
}

impl Configuration {
    pub fn is_channel_monitored(&self, channel_id: &str) -> bool {
        self.monitored_channels.contains(channel_id)
    }

    pub fn has_valid_webhook_url(&self) -> bool {
        is_valid_webhook_url(&self.webhook_url)
    }
}

/// Only the scheme prefix is checked; reachability is the sender's problem.
pub fn is_valid_webhook_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Holds the current [`Configuration`] snapshot behind a read/write lock.
///
/// Readers take the shared lock only long enough to clone the `Arc`. Writers
/// hold the exclusive lock while building and installing the next snapshot, so
/// two writers never interleave.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    current: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_configuration(configuration: Configuration) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(configuration))),
        }
    }

    pub fn get(&self) -> Arc<Configuration> {
        self.current
            .read()
            .clone()
            .unwrap_or_else(|| Arc::new(Configuration::default()))
    }

    /// Installs `configuration` as the current snapshot.
    ///
    /// # Panics
    ///
    /// Panics when handed the snapshot that is already installed. Callers are
    /// expected to clone, modify and publish; re-publishing the same `Arc`
    /// means a caller skipped the clone.
    pub fn replace(&self, configuration: Arc<Configuration>) {
        let mut current = self.current.write();
        if let Some(existing) = current.as_ref() {
            assert!(
                !Arc::ptr_eq(existing, &configuration),
                "replace called with the existing configuration snapshot"
            );
        }
        *current = Some(configuration);
    }

    /// Builds the next snapshot from a copy of the current one and publishes
    /// it. The exclusive lock is held from the read to the publish, so no
    /// other writer can land in between. Returns whatever `mutate` returns.
    pub fn update<F, R>(&self, mutate: F) -> R
    where
        F: FnOnce(&mut Configuration) -> R,
    {
        let mut current = self.current.write();
        let mut next = current.as_deref().cloned().unwrap_or_default();
        let result = mutate(&mut next);
        *current = Some(Arc::new(next));
        result
    }

    /// [`update`](Self::update) restricted to the monitored channel set.
    pub fn mutate_channel_set<F, R>(&self, mutate: F) -> R
    where
        F: FnOnce(&mut HashSet<String>) -> R,
    {
        self.update(|configuration| mutate(&mut configuration.monitored_channels))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|configuration| configuration.enabled = enabled);
    }

    pub fn is_channel_monitored(&self, channel_id: &str) -> bool {
        self.get().is_channel_monitored(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use test_case::test_case;

    use super::*;

    #[test_case("" => false ; "empty")]
    #[test_case("example.com/hook" => false ; "missing scheme")]
    #[test_case("ftp://example.com/hook" => false ; "wrong scheme")]
    #[test_case("HTTPS://example.com" => false ; "uppercase scheme")]
    #[test_case(" https://example.com" => false ; "leading whitespace")]
    #[test_case("http://" => true ; "bare http prefix")]
    #[test_case("http://localhost:3000/webhook" => true ; "plain http")]
    #[test_case("https://unreachable.invalid/hook" => true ; "unresolvable host")]
    fn webhook_url_validation(url: &str) -> bool {
        is_valid_webhook_url(url)
    }

    #[test]
    fn get_before_initialization_returns_empty_enabled_snapshot() {
        let store = ConfigurationStore::new();
        let config = store.get();
        assert!(config.enabled);
        assert!(config.webhook_url.is_empty());
        assert!(config.monitored_channels.is_empty());
    }

    #[test]
    fn replace_publishes_new_snapshot_without_touching_old_one() {
        let store = ConfigurationStore::new();
        let first = store.get();

        let mut next = (*first).clone();
        next.webhook_url = "https://example.com/hook".to_string();
        store.replace(Arc::new(next));

        assert!(first.webhook_url.is_empty());
        assert_eq!(store.get().webhook_url, "https://example.com/hook");
    }

    #[test]
    #[should_panic(expected = "existing configuration snapshot")]
    fn replace_with_installed_snapshot_panics() {
        let store = ConfigurationStore::with_configuration(Configuration::default());
        let installed = store.get();
        store.replace(installed);
    }

    #[test]
    fn mutate_channel_set_copies_on_write() {
        let store = ConfigurationStore::new();
        let before = store.get();

        store.mutate_channel_set(|channels| channels.insert("C1".to_string()));

        assert!(!before.is_channel_monitored("C1"));
        assert!(store.is_channel_monitored("C1"));
    }

    #[test]
    fn mutate_channel_set_keeps_other_fields() {
        let store = ConfigurationStore::with_configuration(Configuration {
            webhook_url: "https://example.com/hook".to_string(),
            enabled: false,
            monitored_channels: HashSet::new(),
        });

        store.mutate_channel_set(|channels| channels.insert("C1".to_string()));

        let config = store.get();
        assert_eq!(config.webhook_url, "https://example.com/hook");
        assert!(!config.enabled);
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let store = ConfigurationStore::new();

        assert!(store.mutate_channel_set(|channels| channels.insert("C1".to_string())));
        assert!(!store.mutate_channel_set(|channels| channels.insert("C1".to_string())));
        assert_eq!(store.get().monitored_channels.len(), 1);

        assert!(!store.mutate_channel_set(|channels| channels.remove("C9")));
        assert_eq!(store.get().monitored_channels.len(), 1);

        assert!(store.mutate_channel_set(|channels| channels.remove("C1")));
        assert!(!store.mutate_channel_set(|channels| channels.remove("C1")));
        assert!(store.get().monitored_channels.is_empty());
    }

    #[test]
    fn concurrent_mutations_lose_nothing() {
        let store = Arc::new(ConfigurationStore::new());
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    store.mutate_channel_set(|channels| channels.insert(format!("C{i}")));
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("mutation thread panicked");
        }

        let config = store.get();
        assert_eq!(config.monitored_channels.len(), 64);
        for i in 0..64 {
            assert!(config.is_channel_monitored(&format!("C{i}")));
        }
    }

    #[test]
    fn update_does_not_lose_concurrent_channel_changes() {
        let store = Arc::new(ConfigurationStore::new());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    store.mutate_channel_set(|channels| channels.insert(format!("C{i}")));
                }
            })
        };

        for i in 0..2_000 {
            store.update(|configuration| {
                configuration.webhook_url = format!("https://example.com/hook/{i}");
            });
        }
        writer.join().expect("mutation thread panicked");

        let config = store.get();
        assert_eq!(config.monitored_channels.len(), 2_000);
        assert_eq!(config.webhook_url, "https://example.com/hook/1999");
    }

    #[test]
    fn set_enabled_preserves_channels() {
        let store = ConfigurationStore::new();
        store.mutate_channel_set(|channels| channels.insert("C1".to_string()));

        store.set_enabled(false);

        let config = store.get();
        assert!(!config.enabled);
        assert!(config.is_channel_monitored("C1"));
    }
}
