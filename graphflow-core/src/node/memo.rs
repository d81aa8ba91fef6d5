//! Memo Slot
//!
//! Backing storage of the cache decorator. The slot starts empty and is
//! filled at most once: the first stored result wins, and every later read
//! returns a clone of it without touching the wrapped dependency.
//!
//! # Thread Safety
//!
//! The slot is guarded by a `RwLock`. Two concurrent first evaluations may
//! both compute the wrapped dependency, but only one result is stored and
//! both callers observe that stored result.

use parking_lot::RwLock;

use crate::value::Value;

pub(crate) struct MemoSlot {
    value: RwLock<Option<Value>>,
}

impl MemoSlot {
    pub(crate) fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    /// The cached value, if any.
    pub(crate) fn get(&self) -> Option<Value> {
        self.value.read().clone()
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.value.read().is_some()
    }

    /// Store `value` unless the slot is already filled; returns the stored value.
    pub(crate) fn fill(&self, value: Value) -> Value {
        let mut slot = self.value.write();
        match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                *slot = Some(value.clone());
                value
            }
        }
    }
}
