//! Per-chain critical sections.
//!
//! Mutations of one chain run one at a time; mutations of different chains
//! never wait on each other. Readers take no lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use medledger_core::ReportId;

/// Table size at which [`ChainLocks::lock`] evicts idle entries first.
pub const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per report chain, created on first use.
///
/// An entry is idle when only the table references it: no guard is held and
/// no task is waiting. Idle entries are evicted once the table reaches
/// [`PRUNE_THRESHOLD`], so its size tracks the chains in flight rather than
/// every chain ever touched.
#[derive(Debug, Default)]
pub struct ChainLocks {
    inner: Mutex<HashMap<ReportId, Arc<AsyncMutex<()>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `report_id`.
    ///
    /// The table lock is held only to look up the chain's mutex, never
    /// across the await.
    pub async fn lock(&self, report_id: &ReportId) -> OwnedMutexGuard<()> {
        let chain = {
            // The table holds no invariant a panicking holder could break.
            let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if table.len() >= PRUNE_THRESHOLD {
                evict_idle(&mut table);
            }
            Arc::clone(table.entry(report_id.clone()).or_default())
        };
        chain.lock_owned().await
    }

    /// Evict every idle entry. Returns how many were evicted.
    pub fn prune_idle(&self) -> usize {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        evict_idle(&mut table)
    }

    /// Number of chains that have been locked at least once.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_idle(table: &mut HashMap<ReportId, Arc<AsyncMutex<()>>>) -> usize {
    let before = table.len();
    table.retain(|_, chain| Arc::strong_count(chain) > 1);
    before - table.len()
}
