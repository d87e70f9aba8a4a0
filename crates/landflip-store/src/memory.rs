//! In-process parcel store. Ids are assigned sequentially from 1.

use landflip_core::{NewParcel, Parcel};
use tracing::debug;

use crate::{MAX_LIST_LIMIT, ParcelFilter, ParcelStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    parcels: Vec<Parcel>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut Parcel, StoreError> {
        // Ids are dense and ascending, so the index is id - 1.
        usize::try_from(id - 1)
            .ok()
            .and_then(|i| self.parcels.get_mut(i))
            .filter(|p| p.id == id)
            .ok_or(StoreError::UnknownId(id))
    }

    /// Apply `f` to every `(id, value)` pair, all or nothing.
    fn update<T: Copy>(
        &mut self,
        updates: &[(i64, T)],
        f: impl Fn(&mut Parcel, T),
    ) -> Result<usize, StoreError> {
        for &(id, _) in updates {
            self.get_mut(id)?;
        }
        for &(id, value) in updates {
            f(self.get_mut(id)?, value);
        }
        Ok(updates.len())
    }
}

impl ParcelStore for MemoryStore {
    fn insert_batch(&mut self, batch: &[NewParcel]) -> Result<usize, StoreError> {
        for new in batch {
            self.next_id += 1;
            self.parcels.push(Parcel::from_new(self.next_id, new.clone()));
        }
        debug!(count = batch.len(), total = self.parcels.len(), "inserted batch");
        Ok(batch.len())
    }

    fn all_parcels(&self) -> Result<Vec<Parcel>, StoreError> {
        Ok(self.parcels.clone())
    }

    fn set_scores(&mut self, scores: &[(i64, u8)]) -> Result<usize, StoreError> {
        self.update(scores, |p, score| p.score = Some(score))
    }

    fn set_valuations(&mut self, valuations: &[(i64, f64)]) -> Result<usize, StoreError> {
        self.update(valuations, |p, value| p.valuation = Some(value))
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.parcels.len())
    }

    fn list(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, StoreError> {
        Ok(self
            .parcels
            .iter()
            .rev()
            .filter(|p| filter.matches(p))
            .take(filter.effective_limit(MAX_LIST_LIMIT))
            .cloned()
            .collect())
    }
}
