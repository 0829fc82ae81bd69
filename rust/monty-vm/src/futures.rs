//! The async coordinator: a table of pending external-call outcomes.
//!
//! Call ids are allocated when an external call suspends and the host
//! answers `future`. Outcomes arrive in batches via `FutureSnapshot::resume`
//! (first-completed policy: any non-empty subset). Each delivery is stamped
//! with an epoch so `gather` can apply its first-raised error rule.

use crate::heap::HeapId;
use crate::values::Value;
use std::collections::BTreeMap;

/// Outcome of one completed external call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FutureOutcome {
    Return(Value),
    /// A raised exception (heap exception object).
    Exception(HeapId),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FutureState {
    Pending,
    Completed { outcome: FutureOutcome, epoch: u64 },
}

/// Pending/completed table keyed by call id.
#[derive(Debug, Clone, Default)]
pub(crate) struct FuturesTable {
    entries: BTreeMap<u64, FutureState>,
    next_epoch: u64,
}

impl FuturesTable {
    pub fn mark_pending(&mut self, call_id: u64) {
        self.entries.insert(call_id, FutureState::Pending);
    }

    pub fn complete(&mut self, call_id: u64, outcome: FutureOutcome) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.entries
            .insert(call_id, FutureState::Completed { outcome, epoch });
    }

    pub fn get(&self, call_id: u64) -> Option<FutureState> {
        self.entries.get(&call_id).copied()
    }

    /// Remove a consumed entry (its result has been delivered to the script).
    pub fn take(&mut self, call_id: u64) -> Option<FutureState> {
        self.entries.remove(&call_id)
    }

    /// Call ids still awaiting an outcome.
    pub fn pending_ids(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, s)| matches!(s, FutureState::Pending))
            .map(|(&id, _)| id)
            .collect()
    }

    /// Root values for the sweep: captured return values.
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().filter_map(|s| match s {
            FutureState::Completed { outcome: FutureOutcome::Return(v), .. } => Some(*v),
            FutureState::Completed { outcome: FutureOutcome::Exception(id), .. } => {
                Some(Value::Ref(*id))
            }
            FutureState::Pending => None,
        })
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (u64, FutureState)> + '_ {
        self.entries.iter().map(|(&id, &s)| (id, s))
    }

    pub(crate) fn epoch_counter(&self) -> u64 {
        self.next_epoch
    }

    pub(crate) fn restore(entries: Vec<(u64, FutureState)>, next_epoch: u64) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            next_epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_then_completed() {
        let mut table = FuturesTable::default();
        table.mark_pending(1);
        table.mark_pending(2);
        assert_eq!(table.pending_ids(), vec![1, 2]);
        table.complete(1, FutureOutcome::Return(Value::Int(5)));
        assert_eq!(table.pending_ids(), vec![2]);
        assert!(matches!(
            table.get(1),
            Some(FutureState::Completed { epoch: 0, .. })
        ));
    }

    #[test]
    fn epochs_increase_per_delivery() {
        let mut table = FuturesTable::default();
        table.mark_pending(7);
        table.mark_pending(8);
        table.complete(8, FutureOutcome::Return(Value::None));
        table.complete(7, FutureOutcome::Return(Value::None));
        let (Some(FutureState::Completed { epoch: e8, .. }), Some(FutureState::Completed { epoch: e7, .. })) =
            (table.get(8), table.get(7))
        else {
            panic!("both should be complete");
        };
        assert!(e8 < e7);
    }
}
