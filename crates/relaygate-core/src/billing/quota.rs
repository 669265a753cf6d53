use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use arc_swap::ArcSwap;
use relaygate_storage::{QuotaDelta, QuotaSink};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("account {account_id} has {balance}, needs {requested}")]
    Insufficient {
        account_id: i64,
        requested: i64,
        balance: i64,
    },
    #[error("unknown account {0}")]
    UnknownAccount(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Pending,
    Settled,
    Refunded,
}

const PENDING: u8 = 0;
const SETTLED: u8 = 1;
const REFUNDED: u8 = 2;

/// Quota held against an account until the request settles or fails.
///
/// Clones share the state, so only one of settle/refund ever applies.
#[derive(Debug, Clone)]
pub struct Reservation {
    account_id: i64,
    amount: i64,
    state: Arc<AtomicU8>,
}

impl Reservation {
    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn state(&self) -> ReservationState {
        match self.state.load(Ordering::Acquire) {
            PENDING => ReservationState::Pending,
            SETTLED => ReservationState::Settled,
            _ => ReservationState::Refunded,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ReservationState::Pending
    }

    fn finalize(&self, next: u8) -> bool {
        self.state
            .compare_exchange(PENDING, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Per-account balances mutated with CAS loops. Every mutation is mirrored
/// to the sink as a delta.
pub struct QuotaLedger {
    balances: ArcSwap<HashMap<i64, Arc<AtomicI64>>>,
    sink: Arc<dyn QuotaSink>,
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("account_count", &self.balances.load().len())
            .finish()
    }
}

impl QuotaLedger {
    pub fn new(balances: impl IntoIterator<Item = (i64, i64)>, sink: Arc<dyn QuotaSink>) -> Self {
        let balances = balances
            .into_iter()
            .map(|(account_id, balance)| (account_id, Arc::new(AtomicI64::new(balance))))
            .collect();
        Self {
            balances: ArcSwap::from_pointee(balances),
            sink,
        }
    }

    pub fn balance(&self, account_id: i64) -> Option<i64> {
        self.cell(account_id)
            .map(|cell| cell.load(Ordering::Acquire))
    }

    /// Overwrites a balance without emitting a delta; used when loading state.
    pub fn set_balance(&self, account_id: i64, balance: i64) {
        if let Some(cell) = self.cell(account_id) {
            cell.store(balance, Ordering::Release);
            return;
        }
        self.balances.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(account_id)
                .or_insert_with(|| Arc::new(AtomicI64::new(balance)));
            next
        });
    }

    /// Deducts `amount` up front. Never leaves the balance below zero and
    /// never deducts partially.
    pub fn pre_consume(&self, account_id: i64, amount: i64) -> Result<Reservation, QuotaError> {
        let amount = amount.max(0);
        let cell = self
            .cell(account_id)
            .ok_or(QuotaError::UnknownAccount(account_id))?;
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if current < amount {
                return Err(QuotaError::Insufficient {
                    account_id,
                    requested: amount,
                    balance: current,
                });
            }
            match cell.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.emit(account_id, -amount);
        Ok(Reservation {
            account_id,
            amount,
            state: Arc::new(AtomicU8::new(PENDING)),
        })
    }

    /// Charges `actual` against the reservation and returns it. `None` when
    /// the reservation was already settled or refunded.
    pub fn settle(&self, reservation: &Reservation, actual: i64) -> Option<i64> {
        if !reservation.finalize(SETTLED) {
            return None;
        }
        let delta = actual - reservation.amount;
        self.apply(reservation.account_id, -delta);
        Some(actual)
    }

    /// Returns the reserved amount. Only the first call has an effect.
    pub fn refund(&self, reservation: &Reservation) -> bool {
        if !reservation.finalize(REFUNDED) {
            return false;
        }
        self.apply(reservation.account_id, reservation.amount);
        true
    }

    fn apply(&self, account_id: i64, delta: i64) {
        if delta == 0 {
            return;
        }
        match self.cell(account_id) {
            Some(cell) => {
                cell.fetch_add(delta, Ordering::AcqRel);
                self.emit(account_id, delta);
            }
            None => warn!(event = "quota_account_missing", account_id, delta),
        }
    }

    fn emit(&self, account_id: i64, delta: i64) {
        if delta != 0 {
            self.sink.submit(QuotaDelta { account_id, delta });
        }
    }

    fn cell(&self, account_id: i64) -> Option<Arc<AtomicI64>> {
        self.balances.load().get(&account_id).cloned()
    }
}
