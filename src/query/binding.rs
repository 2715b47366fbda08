//! Working-table binding through the execution param table
//!
//! A working-table scan sits inside the recursive term, which is a separate
//! subtree of the recursive union that owns the table. There is no plan edge
//! from the scan back to the union, so the union publishes a handle to its
//! shared state into a param slot reserved at plan time, and the scan
//! resolves that slot on its first pull.

use crate::storage::WorkTableStore;
use crate::types::{Schema, Value};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Index into the per-execution param table, fixed at plan setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// State shared between a recursive union and its working-table scans
pub struct WorkTableState {
    /// Row shape of the recursive union's output
    pub schema: Schema,
    /// Store currently in the read role
    pub read_store: WorkTableStore,
}

/// Handle published into a param slot
#[derive(Clone)]
pub struct WorkTableHandle(Arc<Mutex<WorkTableState>>);

impl WorkTableHandle {
    pub fn new(schema: Schema, read_store: WorkTableStore) -> Self {
        Self(Arc::new(Mutex::new(WorkTableState { schema, read_store })))
    }

    /// Lock the shared state. Callers must not hold the guard across pulls.
    pub fn lock(&self) -> MutexGuard<'_, WorkTableState> {
        self.0.lock()
    }

    pub fn ptr_eq(&self, other: &WorkTableHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for WorkTableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkTableHandle")
            .field("refs", &Arc::strong_count(&self.0))
            .finish()
    }
}

/// Param slot contents
#[derive(Debug, Clone, Default)]
pub enum ParamSlot {
    #[default]
    Unset,
    /// Scalar query parameter
    Datum(Value),
    /// Working table of a recursive union
    WorkTable(WorkTableHandle),
}

/// Indexed, per-execution array of param slots
#[derive(Debug, Default)]
pub struct ParamTable {
    slots: Vec<ParamSlot>,
}

impl ParamTable {
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![ParamSlot::Unset; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: ParamId) -> &ParamSlot {
        self.slots
            .get(id.0)
            .unwrap_or_else(|| panic!("param {} out of range ({} slots)", id, self.slots.len()))
    }

    pub fn set(&mut self, id: ParamId, slot: ParamSlot) {
        let len = self.slots.len();
        match self.slots.get_mut(id.0) {
            Some(entry) => *entry = slot,
            None => panic!("param {} out of range ({} slots)", id, len),
        }
    }
}

/// Make `handle` visible to working-table scans bound to `id`.
/// Called only by the owning recursive union; republishing is a no-op.
pub fn publish(params: &mut ParamTable, id: ParamId, handle: &WorkTableHandle) {
    if let ParamSlot::WorkTable(current) = params.get(id) {
        if current.ptr_eq(handle) {
            return;
        }
    }
    log::trace!("[Binding] publish working table at {}", id);
    params.set(id, ParamSlot::WorkTable(handle.clone()));
}

/// Look up the working table published at `id`.
///
/// # Panics
///
/// If nothing was published yet, or the slot holds something else. Either
/// means the plan was built or started in the wrong order.
pub fn resolve(params: &ParamTable, id: ParamId) -> WorkTableHandle {
    match params.get(id) {
        ParamSlot::WorkTable(handle) => {
            log::trace!("[Binding] resolved working table at {}", id);
            handle.clone()
        }
        ParamSlot::Unset => panic!(
            "working table param {} resolved before its recursive union published it",
            id
        ),
        ParamSlot::Datum(value) => panic!(
            "working table param {} holds a datum ({:?}), not a working table",
            id, value
        ),
    }
}

/// Clear the slot when the owning recursive union shuts down
pub fn release(params: &mut ParamTable, id: ParamId) {
    params.set(id, ParamSlot::Unset);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkTableConfig;
    use crate::storage::StoreRole;
    use crate::types::ColumnType;

    fn handle() -> WorkTableHandle {
        WorkTableHandle::new(
            Schema::from_pairs(&[("n", ColumnType::Integer)]),
            WorkTableStore::new(WorkTableConfig::default(), StoreRole::Read),
        )
    }

    #[test]
    fn test_publish_then_resolve() {
        let mut params = ParamTable::with_len(2);
        let h = handle();
        publish(&mut params, ParamId(1), &h);
        // Idempotent
        publish(&mut params, ParamId(1), &h);

        let resolved = resolve(&params, ParamId(1));
        assert!(resolved.ptr_eq(&h));
        assert!(matches!(params.get(ParamId(0)), ParamSlot::Unset));

        release(&mut params, ParamId(1));
        assert!(matches!(params.get(ParamId(1)), ParamSlot::Unset));
    }

    #[test]
    #[should_panic(expected = "before its recursive union published it")]
    fn test_resolve_unset_faults() {
        let params = ParamTable::with_len(1);
        resolve(&params, ParamId(0));
    }

    #[test]
    #[should_panic(expected = "not a working table")]
    fn test_resolve_wrong_kind_faults() {
        let mut params = ParamTable::with_len(1);
        params.set(ParamId(0), ParamSlot::Datum(Value::Integer(3)));
        resolve(&params, ParamId(0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_param_out_of_range_faults() {
        let params = ParamTable::with_len(1);
        params.get(ParamId(4));
    }
}
