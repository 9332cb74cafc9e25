//! In-memory observation store, used when no database is configured.
use std::sync::Mutex;

use crate::database::{Change, ObservationStore, StoreError};
use crate::record::Observation;

/// Observations kept in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Observation>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn with_rows<T>(&self, operation: impl FnOnce(&mut Vec<Observation>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        operation(&mut rows)
    }
}

fn position(rows: &[Observation], id: &str) -> Option<usize> {
    rows.iter().position(|row| row.id == id)
}

fn insert_row(rows: &mut Vec<Observation>, observation: &Observation) -> Result<(), StoreError> {
    if position(rows, &observation.id).is_some() {
        return Err(StoreError::Conflict(observation.id.clone()));
    }
    rows.push(observation.clone());
    Ok(())
}

fn update_row(rows: &mut [Observation], id: &str, observation: &Observation) -> Result<(), StoreError> {
    let index = position(rows, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let row = &mut rows[index];
    *row = Observation {
        id: row.id.clone(),
        ..observation.clone()
    };
    Ok(())
}

fn delete_row(rows: &mut Vec<Observation>, id: &str) -> Result<(), StoreError> {
    let index = position(rows, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    rows.remove(index);
    Ok(())
}

impl ObservationStore for MemoryStore {
    fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
        self.with_rows(|rows| insert_row(rows, observation))
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Observation>, StoreError> {
        self.with_rows(|rows| Ok(position(rows, id).map(|index| rows[index].clone())))
    }

    fn list_all(&self) -> Result<Vec<Observation>, StoreError> {
        self.with_rows(|rows| Ok(rows.clone()))
    }

    fn update(&self, id: &str, observation: &Observation) -> Result<(), StoreError> {
        self.with_rows(|rows| update_row(rows, id, observation))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.with_rows(|rows| delete_row(rows, id))
    }

    fn commit(&self, changes: &[Change]) -> Result<Vec<usize>, StoreError> {
        self.with_rows(|rows| {
            let mut staged = rows.clone();
            let mut skipped = Vec::new();
            for (position, change) in changes.iter().enumerate() {
                let applied = match change {
                    Change::Insert(observation) => insert_row(&mut staged, observation),
                    Change::Update(observation) => update_row(&mut staged, &observation.id, observation),
                    Change::Delete(id) => delete_row(&mut staged, id),
                };
                match applied {
                    Ok(()) => {}
                    Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => skipped.push(position),
                    Err(err) => return Err(err),
                }
            }
            *rows = staged;
            Ok(skipped)
        })
    }
}
