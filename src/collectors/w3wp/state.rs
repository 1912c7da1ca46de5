//! State shared between the engine loops and the gather path.

use crate::management::RawCounterSample;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Latest counters of one application pool.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AppPoolMetric {
    pub percent_processor_time: f64,
    pub private_bytes: u64,
    pub working_set: u64,
    pub handle_count: u32,
    pub thread_count: u32,
    pub io_read_bytes_per_sec: u64,
    pub io_write_bytes_per_sec: u64,
}

impl From<&RawCounterSample> for AppPoolMetric {
    fn from(sample: &RawCounterSample) -> Self {
        Self {
            percent_processor_time: sample.percent_processor_time as f64,
            private_bytes: sample.private_bytes,
            working_set: sample.working_set,
            handle_count: sample.handle_count,
            thread_count: sample.thread_count,
            io_read_bytes_per_sec: sample.io_read_bytes_per_sec,
            io_write_bytes_per_sec: sample.io_write_bytes_per_sec,
        }
    }
}

/// Process id to application pool name.
///
/// Entries are never evicted. A pid that exited keeps its pool until the OS
/// reuses the id and the identity loop overwrites it.
#[derive(Debug, Default)]
pub struct ProcessIdentityMap {
    inner: RwLock<HashMap<u32, String>>,
}

impl ProcessIdentityMap {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<u32, String>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u32, String>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert(&self, process_id: u32, group: String) {
        self.write().insert(process_id, group);
    }

    pub fn resolve(&self, process_id: u32) -> Option<String> {
        self.read().get(&process_id).cloned()
    }

    pub fn contains(&self, process_id: u32) -> bool {
        self.read().contains_key(&process_id)
    }

    /// Keep only the samples whose process is mapped, under one read lock.
    pub fn retain_known(&self, mut samples: Vec<RawCounterSample>) -> Vec<RawCounterSample> {
        let known = self.read();
        samples.retain(|sample| known.contains_key(&sample.process_id));
        samples
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Application pool name to its most recent counters. Last write wins.
#[derive(Debug, Default)]
pub struct AppPoolMetrics {
    inner: RwLock<BTreeMap<String, AppPoolMetric>>,
}

impl AppPoolMetrics {
    pub fn apply(&self, app_pool: String, metric: AppPoolMetric) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_pool, metric);
    }

    /// Copy of the current contents, ordered by pool name.
    pub fn snapshot(&self) -> Vec<(String, AppPoolMetric)> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, metric)| (name.clone(), *metric))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
