use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{PageId, TxnId};
use crate::transaction::concurrency::deadlock::{choose_victim, WaitsForGraph};

/// Page lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether two requests on the same page can be held together
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether holding `self` already satisfies a request for `requested`
    pub fn covers(&self, requested: LockMode) -> bool {
        *self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Transaction {0} was chosen as a deadlock victim")]
    Deadlock(TxnId),

    #[error("Transaction {txn_id} timed out waiting for page {page_id}")]
    Timeout { txn_id: TxnId, page_id: PageId },
}

impl LockError {
    /// Transaction that has to abort
    pub fn txn_id(&self) -> TxnId {
        match self {
            LockError::Deadlock(txn_id) => *txn_id,
            LockError::Timeout { txn_id, .. } => *txn_id,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Configuration for lock waits
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How often a blocked request re-runs cycle detection
    pub deadlock_check_interval: Duration,

    /// Give up a single wait after this long (no limit when `None`)
    pub lock_wait_timeout: Option<Duration>,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            deadlock_check_interval: Duration::from_millis(10),
            lock_wait_timeout: None,
        }
    }
}

/// A blocked request. Each waiter parks on its own condition variable so a
/// grant or a deadlock abort wakes exactly that thread.
#[derive(Debug)]
pub(crate) struct LockWaiter {
    pub txn_id: TxnId,
    pub mode: LockMode,
    signal: Arc<Condvar>,
}

/// Holders and FIFO wait queue of one page
#[derive(Debug, Default)]
pub(crate) struct PageLockState {
    pub holders: HashMap<TxnId, LockMode>,
    pub queue: VecDeque<LockWaiter>,
}

impl PageLockState {
    fn is_sole_holder(&self, txn_id: TxnId) -> bool {
        self.holders.len() == 1 && self.holders.contains_key(&txn_id)
    }

    fn all_shared(&self) -> bool {
        self.holders.values().all(|mode| *mode == LockMode::Shared)
    }

    /// Whether a fresh request can be granted without queueing
    fn can_grant_now(&self, txn_id: TxnId, mode: LockMode) -> bool {
        match mode {
            // Shared requests do not overtake a queued exclusive request
            LockMode::Shared => {
                self.all_shared() && !self.queue.iter().any(|w| w.mode == LockMode::Exclusive)
            }
            LockMode::Exclusive => self.holders.is_empty() || self.is_sole_holder(txn_id),
        }
    }

    /// Whether the request at the head of the queue can now be granted
    fn head_grantable(&self) -> bool {
        match self.queue.front() {
            Some(head) => match head.mode {
                LockMode::Exclusive => self.holders.is_empty() || self.is_sole_holder(head.txn_id),
                LockMode::Shared => self.all_shared(),
            },
            None => false,
        }
    }

    /// Queue a request. Upgrades from current holders go ahead of ordinary
    /// requests, which could never be granted before the upgrader lets go.
    fn enqueue(&mut self, waiter: LockWaiter) {
        if self.holders.contains_key(&waiter.txn_id) {
            let position = self
                .queue
                .iter()
                .position(|w| !self.holders.contains_key(&w.txn_id))
                .unwrap_or(self.queue.len());
            self.queue.insert(position, waiter);
        } else {
            self.queue.push_back(waiter);
        }
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: HashMap<PageId, PageLockState>,
    /// Pages each transaction holds a lock on
    held: HashMap<TxnId, HashSet<PageId>>,
    /// Transactions told to abort (deadlock victims and timed-out waiters)
    /// that have not finished aborting yet
    victims: HashMap<TxnId, LockError>,
}

impl LockTable {
    fn is_granted(&self, txn_id: TxnId, page_id: PageId, mode: LockMode) -> bool {
        self.pages
            .get(&page_id)
            .and_then(|state| state.holders.get(&txn_id))
            .is_some_and(|held| held.covers(mode))
    }

    fn grant(&mut self, txn_id: TxnId, page_id: PageId, mode: LockMode) {
        self.pages.entry(page_id).or_default().holders.insert(txn_id, mode);
        self.held.entry(txn_id).or_default().insert(page_id);
    }

    /// Grant queued requests from the head, in order, while they fit
    fn grant_waiters(&mut self, page_id: PageId) {
        let Some(state) = self.pages.get_mut(&page_id) else {
            return;
        };

        let mut granted = Vec::new();
        while state.head_grantable() {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            state.holders.insert(waiter.txn_id, waiter.mode);
            waiter.signal.notify_one();
            granted.push(waiter.txn_id);

            if waiter.mode == LockMode::Exclusive {
                break;
            }
        }

        for txn_id in granted {
            debug!("Granted queued lock on page {} to transaction {}", page_id, txn_id);
            self.held.entry(txn_id).or_default().insert(page_id);
        }
    }

    /// Take a request out of the queue, letting whoever was behind it move
    fn withdraw(&mut self, txn_id: TxnId, page_id: PageId) {
        if let Some(state) = self.pages.get_mut(&page_id) {
            state.queue.retain(|w| w.txn_id != txn_id);
        }
        self.grant_waiters(page_id);
        self.drop_if_idle(page_id);
    }

    fn release(&mut self, txn_id: TxnId, page_id: PageId) -> bool {
        let released = self
            .pages
            .get_mut(&page_id)
            .is_some_and(|state| state.holders.remove(&txn_id).is_some());

        if let Some(pages) = self.held.get_mut(&txn_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&txn_id);
            }
        }

        if released {
            self.grant_waiters(page_id);
        }
        self.drop_if_idle(page_id);
        released
    }

    fn drop_if_idle(&mut self, page_id: PageId) {
        if self.pages.get(&page_id).is_some_and(PageLockState::is_idle) {
            self.pages.remove(&page_id);
        }
    }

    /// Wake a transaction wherever it is parked
    fn wake(&self, txn_id: TxnId) {
        for state in self.pages.values() {
            for waiter in state.queue.iter().filter(|w| w.txn_id == txn_id) {
                waiter.signal.notify_one();
            }
        }
    }
}

/// Page-granularity two-phase lock manager with deadlock detection
pub struct LockManager {
    config: LockManagerConfig,
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table: Mutex::new(LockTable::default()),
        }
    }

    /// Acquire a lock on `page_id`, blocking the calling thread until it is
    /// granted or the transaction is picked to break a deadlock.
    pub fn acquire(&self, txn_id: TxnId, page_id: PageId, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();

        if let Some(verdict) = table.victims.get(&txn_id) {
            return Err(verdict.clone());
        }
        if table.is_granted(txn_id, page_id, mode) {
            return Ok(());
        }

        let state = table.pages.entry(page_id).or_default();
        if state.can_grant_now(txn_id, mode) {
            table.grant(txn_id, page_id, mode);
            return Ok(());
        }

        let signal = Arc::new(Condvar::new());
        state.enqueue(LockWaiter {
            txn_id,
            mode,
            signal: Arc::clone(&signal),
        });
        debug!("Transaction {} waits for {:?} lock on page {}", txn_id, mode, page_id);

        let deadline = self.config.lock_wait_timeout.map(|limit| Instant::now() + limit);
        loop {
            let granted = table.is_granted(txn_id, page_id, mode);
            if let Some(verdict) = table.victims.get(&txn_id).cloned() {
                if !granted {
                    table.withdraw(txn_id, page_id);
                }
                return Err(verdict);
            }
            if granted {
                return Ok(());
            }

            let cycle = WaitsForGraph::build(table.pages.values()).find_cycle_from(txn_id);
            if let Some(victim) = cycle.as_deref().and_then(choose_victim) {
                if table.victims.insert(victim, LockError::Deadlock(victim)).is_none() {
                    warn!(
                        "Deadlock detected among transactions {:?}, aborting transaction {}",
                        cycle.unwrap_or_default(),
                        victim
                    );
                }
                if victim == txn_id {
                    table.withdraw(txn_id, page_id);
                    return Err(LockError::Deadlock(txn_id));
                }
                table.wake(victim);
            }

            let mut wait = self.config.deadlock_check_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    table.withdraw(txn_id, page_id);
                    let verdict = LockError::Timeout { txn_id, page_id };
                    table.victims.insert(txn_id, verdict.clone());
                    return Err(verdict);
                }
                wait = wait.min(deadline - now);
            }
            signal.wait_for(&mut table, wait);
        }
    }

    /// Release one lock early. Returns whether the transaction held it.
    pub fn release(&self, txn_id: TxnId, page_id: PageId) -> bool {
        self.table.lock().release(txn_id, page_id)
    }

    /// Release every lock of a transaction and forget any deadlock verdict
    /// against it. Safe to call repeatedly.
    pub fn release_all(&self, txn_id: TxnId) {
        let mut table = self.table.lock();

        let pages = table.held.remove(&txn_id).unwrap_or_default();
        for page_id in &pages {
            if let Some(state) = table.pages.get_mut(page_id) {
                state.holders.remove(&txn_id);
            }
            table.grant_waiters(*page_id);
            table.drop_if_idle(*page_id);
        }

        let queued: Vec<PageId> = table
            .pages
            .iter()
            .filter(|(_, state)| state.queue.iter().any(|w| w.txn_id == txn_id))
            .map(|(page_id, _)| *page_id)
            .collect();
        for page_id in queued {
            table.withdraw(txn_id, page_id);
        }

        table.victims.remove(&txn_id);
        if !pages.is_empty() {
            debug!("Released {} page locks of transaction {}", pages.len(), txn_id);
        }
    }

    /// Non-blocking check for any lock on the page
    pub fn holds(&self, txn_id: TxnId, page_id: PageId) -> bool {
        self.lock_mode(txn_id, page_id).is_some()
    }

    pub fn lock_mode(&self, txn_id: TxnId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        table
            .pages
            .get(&page_id)
            .and_then(|state| state.holders.get(&txn_id))
            .copied()
    }

    /// Pages a transaction currently holds locks on
    pub fn locked_pages(&self, txn_id: TxnId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<PageId> = table
            .held
            .get(&txn_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    /// Number of requests queued on a page
    pub fn waiting_count(&self, page_id: PageId) -> usize {
        let table = self.table.lock();
        table.pages.get(&page_id).map_or(0, |state| state.queue.len())
    }

    /// Whether the transaction has been told to abort, as a deadlock
    /// victim or after a timed-out wait
    pub fn is_victim(&self, txn_id: TxnId) -> bool {
        self.table.lock().victims.contains_key(&txn_id)
    }

    /// Why the transaction has to abort, if it does. Cleared by `release_all`.
    pub fn abort_verdict(&self, txn_id: TxnId) -> Option<LockError> {
        self.table.lock().victims.get(&txn_id).cloned()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockManagerConfig::default())
    }
}
