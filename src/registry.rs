//! Concurrency-safe record of the droplets this process knows about.
//!
//! The registry is seeded with the droplets already on the account when the
//! race starts, so its length is the number counted against the ceiling.
//! Every mutation goes through one mutex; callers only ever see cloned
//! snapshots.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::Droplet;

/// Shared collection of droplet records keyed by provider id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    droplets: Mutex<Vec<Droplet>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Droplet>> {
        self.droplets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `droplet`, replacing any record with the same id.
    ///
    /// Returns `true` when the id was not present before.
    pub fn insert(&self, droplet: Droplet) -> bool {
        let mut droplets = self.lock();
        if let Some(existing) = droplets.iter_mut().find(|entry| entry.id == droplet.id) {
            *existing = droplet;
            return false;
        }
        droplets.push(droplet);
        true
    }

    /// Removes the record for `droplet_id`.
    ///
    /// Returns `true` exactly once per inserted id; later calls report
    /// `false`.
    pub fn remove(&self, droplet_id: u64) -> bool {
        let mut droplets = self.lock();
        let before = droplets.len();
        droplets.retain(|entry| entry.id != droplet_id);
        droplets.len() != before
    }

    /// Returns `true` when a record for `droplet_id` is present.
    #[must_use]
    pub fn contains(&self, droplet_id: u64) -> bool {
        self.lock().iter().any(|entry| entry.id == droplet_id)
    }

    /// Returns the record for `droplet_id`, if any.
    #[must_use]
    pub fn get(&self, droplet_id: u64) -> Option<Droplet> {
        self.lock().iter().find(|entry| entry.id == droplet_id).cloned()
    }

    /// Number of droplets currently counted against the ceiling.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when no droplets are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies the current records in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Droplet> {
        self.lock().clone()
    }
}

impl From<Vec<Droplet>> for InstanceRegistry {
    fn from(value: Vec<Droplet>) -> Self {
        let registry = Self::new();
        for droplet in value {
            registry.insert(droplet);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use rstest::rstest;

    use super::*;
    use crate::backend::InstanceStage;

    fn droplet(id: u64) -> Droplet {
        Droplet {
            id,
            name: format!("do-exit-fra1-{id:08x}"),
            region: String::from("fra1"),
            image_id: Some(1),
            size: String::from("s-1vcpu-1gb"),
            public_ip: None,
            stage: InstanceStage::Created,
        }
    }

    #[rstest]
    fn insert_replaces_existing_record() {
        let registry = InstanceRegistry::new();
        assert!(registry.insert(droplet(1)));

        let mut updated = droplet(1);
        updated.stage = InstanceStage::Verified;
        assert!(!registry.insert(updated));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(1).map(|entry| entry.stage),
            Some(InstanceStage::Verified)
        );
    }

    #[rstest]
    fn remove_reports_true_exactly_once() {
        let registry = InstanceRegistry::from(vec![droplet(1), droplet(2)]);

        assert!(registry.remove(1));
        assert!(!registry.remove(1));
        assert!(!registry.contains(1));
        assert_eq!(registry.snapshot(), vec![droplet(2)]);
    }

    #[rstest]
    fn seeding_deduplicates_ids() {
        let registry = InstanceRegistry::from(vec![droplet(5), droplet(5), droplet(6)]);
        assert_eq!(registry.len(), 2);
    }

    #[rstest]
    fn concurrent_removal_succeeds_once() {
        let registry = Arc::new(InstanceRegistry::from(vec![droplet(9)]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&registry);
                thread::spawn(move || shared.remove(9))
            })
            .collect();

        let removed = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .filter(|removed| *removed)
            .count();

        assert_eq!(removed, 1);
        assert!(registry.is_empty());
    }
}
