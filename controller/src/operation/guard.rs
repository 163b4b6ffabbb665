//! Per-class single-flight gate.
//!
//! At most one operation of each [`OperationClass`] may be in flight. A
//! second request while one is active is dropped, not queued. The check and
//! the set happen under one lock, so two near-simultaneous callers can never
//! both pass.
//!
//! Prefer [`ConcurrencyGuard::acquire`], whose [`GuardTicket`] releases the
//! class on drop. That covers every exit path, including early returns and
//! panics unwinding through an `.await`.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The four operation classes the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// State refresh.
    Refresh,
    /// Deposit submission.
    Deposit,
    /// Transfer submission.
    Transfer,
    /// Withdraw submission.
    Withdraw,
}

impl OperationClass {
    /// Every class.
    pub const ALL: [OperationClass; 4] = [
        OperationClass::Refresh,
        OperationClass::Deposit,
        OperationClass::Transfer,
        OperationClass::Withdraw,
    ];

    fn index(self) -> usize {
        match self {
            OperationClass::Refresh => 0,
            OperationClass::Deposit => 1,
            OperationClass::Transfer => 2,
            OperationClass::Withdraw => 3,
        }
    }

    /// Lowercase name, used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Refresh => "refresh",
            OperationClass::Deposit => "deposit",
            OperationClass::Transfer => "transfer",
            OperationClass::Withdraw => "withdraw",
        }
    }

    /// Capitalized name, used in status messages.
    pub fn title(self) -> &'static str {
        match self {
            OperationClass::Refresh => "Refresh",
            OperationClass::Deposit => "Deposit",
            OperationClass::Transfer => "Transfer",
            OperationClass::Withdraw => "Withdraw",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "held" flag per operation class.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    held: Mutex<[bool; 4]>,
}

impl ConcurrencyGuard {
    /// A guard with every class free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `class` held if it is free. Returns `false`, changing nothing,
    /// if it is already held.
    pub fn try_enter(&self, class: OperationClass) -> bool {
        let mut held = self.held.lock();
        let slot = &mut held[class.index()];
        if *slot {
            trace!(%class, "guard busy");
            return false;
        }
        *slot = true;
        trace!(%class, "guard entered");
        true
    }

    /// Releases `class` unconditionally.
    pub fn leave(&self, class: OperationClass) {
        self.held.lock()[class.index()] = false;
        trace!(%class, "guard left");
    }

    /// `true` while an operation of `class` is in flight.
    pub fn is_held(&self, class: OperationClass) -> bool {
        self.held.lock()[class.index()]
    }

    /// Number of classes currently held.
    pub fn in_flight(&self) -> usize {
        self.held.lock().iter().filter(|h| **h).count()
    }

    /// [`try_enter`](Self::try_enter) returning a ticket that leaves on drop.
    pub fn acquire(&self, class: OperationClass) -> Option<GuardTicket<'_>> {
        self.try_enter(class).then_some(GuardTicket { guard: self, class })
    }
}

/// Proof that a class is held. Dropping it releases the class.
#[must_use = "dropping the ticket releases the guard immediately"]
pub struct GuardTicket<'a> {
    guard: &'a ConcurrencyGuard,
    class: OperationClass,
}

impl GuardTicket<'_> {
    /// The class this ticket holds.
    pub fn class(&self) -> OperationClass {
        self.class
    }
}

impl fmt::Debug for GuardTicket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardTicket").field("class", &self.class).finish()
    }
}

impl Drop for GuardTicket<'_> {
    fn drop(&mut self) {
        self.guard.leave(self.class);
    }
}
