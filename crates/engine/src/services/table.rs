//! Table occupancy service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::TableId;

use crate::error::EngineError;

/// Floor plan collaborator: table numbers and the occupancy flag.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Returns the number printed on the table.
    async fn table_number(&self, table_id: TableId) -> Result<u32, EngineError>;

    /// Sets or clears the table's occupancy flag.
    async fn set_occupied(&self, table_id: TableId, occupied: bool) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    number: u32,
    occupied: bool,
}

#[derive(Debug, Default)]
struct InMemoryTableState {
    tables: HashMap<TableId, TableEntry>,
    fail_on_release: bool,
}

/// In-memory floor plan.
///
/// Unknown tables are registered on first use with the next free number.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTableService {
    state: Arc<Mutex<InMemoryTableState>>,
}

impl InMemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table with an explicit number.
    pub fn add_table(&self, table_id: TableId, number: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tables.insert(
            table_id,
            TableEntry {
                number,
                occupied: false,
            },
        );
    }

    /// Returns the occupancy flag, or `None` for an unknown table.
    pub fn is_occupied(&self, table_id: TableId) -> Option<bool> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tables.get(&table_id).map(|t| t.occupied)
    }

    /// Makes releasing a table fail.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_release = fail;
    }
}

fn entry(state: &mut InMemoryTableState, table_id: TableId) -> &mut TableEntry {
    let next = state.tables.values().map(|t| t.number).max().unwrap_or(0) + 1;
    state.tables.entry(table_id).or_insert(TableEntry {
        number: next,
        occupied: false,
    })
}

#[async_trait]
impl TableService for InMemoryTableService {
    async fn table_number(&self, table_id: TableId) -> Result<u32, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entry(&mut state, table_id).number)
    }

    async fn set_occupied(&self, table_id: TableId, occupied: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !occupied && state.fail_on_release {
            return Err(EngineError::ExternalService {
                service: "table",
                message: "floor plan unavailable".to_string(),
            });
        }
        entry(&mut state, table_id).occupied = occupied;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tables_get_sequential_numbers() {
        let service = InMemoryTableService::new();
        let first = TableId::new();
        let second = TableId::new();

        assert_eq!(service.table_number(first).await.unwrap(), 1);
        assert_eq!(service.table_number(second).await.unwrap(), 2);
        assert_eq!(service.table_number(first).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn occupancy_toggle() {
        let service = InMemoryTableService::new();
        let table = TableId::new();
        service.add_table(table, 12);

        service.set_occupied(table, true).await.unwrap();
        assert_eq!(service.is_occupied(table), Some(true));
        assert_eq!(service.table_number(table).await.unwrap(), 12);

        service.set_fail_on_release(true);
        assert!(service.set_occupied(table, false).await.is_err());
        assert_eq!(service.is_occupied(table), Some(true));
    }
}
