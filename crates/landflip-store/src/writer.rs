//! Bounded-batch persistence of ingested parcels.

use landflip_core::NewParcel;
use tracing::{debug, info};

use crate::{ParcelStore, StoreError, WriteError};

/// Outcome of a completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub flushes: usize,
}

/// Buffers parcels and commits them to a store every `batch_size` records.
///
/// Call [`finish`](Self::finish) to flush the tail. Dropping the writer
/// without finishing discards only the unflushed buffer; earlier batches
/// stay committed.
pub struct BatchWriter<'s, S: ParcelStore + ?Sized> {
    store: &'s mut S,
    batch_size: usize,
    buffer: Vec<NewParcel>,
    persisted: usize,
    flushes: usize,
}

impl<'s, S: ParcelStore + ?Sized> BatchWriter<'s, S> {
    /// A `batch_size` of 0 is treated as 1.
    pub fn new(store: &'s mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            persisted: 0,
            flushes: 0,
        }
    }

    pub fn push(&mut self, parcel: NewParcel) -> Result<(), WriteError> {
        self.buffer.push(parcel);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Records committed so far.
    pub fn persisted(&self) -> usize {
        self.persisted
    }

    pub fn finish(mut self) -> Result<WriteSummary, WriteError> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        info!(written = self.persisted, flushes = self.flushes, "write complete");
        Ok(WriteSummary {
            written: self.persisted,
            flushes: self.flushes,
        })
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        let written = self
            .store
            .insert_batch(&self.buffer)
            .map_err(|source| self.failed(source))?;
        self.persisted += written;
        self.flushes += 1;
        self.buffer.clear();
        debug!(batch = self.flushes, written, total = self.persisted, "flushed batch");
        Ok(())
    }

    fn failed(&self, source: StoreError) -> WriteError {
        WriteError {
            persisted: self.persisted,
            source,
        }
    }
}

/// Write every parcel from `parcels` in batches of `batch_size`.
pub fn write_all<S, I>(store: &mut S, parcels: I, batch_size: usize) -> Result<WriteSummary, WriteError>
where
    S: ParcelStore + ?Sized,
    I: IntoIterator<Item = NewParcel>,
{
    let mut writer = BatchWriter::new(store, batch_size);
    for parcel in parcels {
        writer.push(parcel)?;
    }
    writer.finish()
}
