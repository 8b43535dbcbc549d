//! Fixed-capacity, slot-indexed vector storage.
//!
//! A [`VectorBuffer`] owns one contiguous block of f32 storage partitioned
//! into fixed-width slots, plus the bookkeeping that maps stable
//! [`VectorId`]s onto recyclable slots. It performs no locking itself; the
//! indexed store wraps buffer and index together behind a single
//! reader-writer lock.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::similarity;
use crate::types::{BufferStats, VectorId};

/// Contiguous f32 storage for up to `capacity` vectors of fixed dimension.
///
/// Slots are reused LIFO after deletion; vector ids are never reused. Each
/// occupied slot caches the vector's Euclidean norm, computed once at write
/// time with f64 accumulation.
pub struct VectorBuffer {
    dimensions: usize,
    capacity: usize,
    /// Flat storage, `capacity * dimensions` floats, allocated once.
    data: Vec<f32>,
    id_to_slot: HashMap<VectorId, usize>,
    /// Reverse mapping for iteration; `None` marks a free slot.
    slot_to_id: Vec<Option<VectorId>>,
    /// Recycled slots, popped LIFO.
    free_slots: Vec<usize>,
    /// Next never-used slot; monotone until the free list takes over.
    next_slot: usize,
    /// Magnitude cache, slot-keyed. Valid only for occupied slots.
    magnitudes: Vec<f32>,
}

impl VectorBuffer {
    /// Create a buffer sized from a memory budget.
    ///
    /// `capacity = max_memory_bytes / (dimensions * 4)`, rounded down. The
    /// flat block is allocated up front so insertion never reallocates.
    pub fn new(max_memory_bytes: usize, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(StoreError::Validation(
                "dimensions must be non-zero".to_string(),
            ));
        }
        let vector_bytes = dimensions * std::mem::size_of::<f32>();
        let capacity = max_memory_bytes / vector_bytes;
        if capacity == 0 {
            return Err(StoreError::Validation(format!(
                "memory budget {} bytes holds no {}-dimensional vector",
                max_memory_bytes, dimensions
            )));
        }
        Ok(Self::with_capacity(capacity, dimensions))
    }

    /// Create a buffer with an explicit slot capacity.
    pub fn with_capacity(capacity: usize, dimensions: usize) -> Self {
        debug!(capacity, dimensions, "allocating vector buffer");
        Self {
            dimensions,
            capacity,
            data: vec![0.0; capacity * dimensions],
            id_to_slot: HashMap::new(),
            slot_to_id: vec![None; capacity],
            free_slots: Vec::new(),
            next_slot: 0,
            magnitudes: vec![0.0; capacity],
        }
    }

    /// Configured dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    /// Whether no vector is stored.
    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    /// Whether `id` is stored.
    pub fn contains(&self, id: VectorId) -> bool {
        self.id_to_slot.contains_key(&id)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Pop a recycled slot, or advance the never-used counter.
    fn allocate_slot(&mut self) -> Result<usize> {
        if let Some(slot) = self.free_slots.pop() {
            return Ok(slot);
        }
        if self.next_slot < self.capacity {
            let slot = self.next_slot;
            self.next_slot += 1;
            return Ok(slot);
        }
        Err(StoreError::BufferFull {
            capacity: self.capacity,
        })
    }

    fn write_slot(&mut self, slot: usize, vector: &[f32]) {
        let start = slot * self.dimensions;
        self.data[start..start + self.dimensions].copy_from_slice(vector);
        self.magnitudes[slot] = similarity::magnitude(vector);
    }

    /// Insert a vector under a fresh id, returning the slot it landed in.
    ///
    /// Fails on dimension mismatch, duplicate id, or a full buffer; the
    /// buffer is unchanged on any failure.
    pub fn insert(&mut self, id: VectorId, vector: &[f32]) -> Result<usize> {
        self.check_dimensions(vector)?;
        if self.id_to_slot.contains_key(&id) {
            return Err(StoreError::Validation(format!(
                "vector id {} already present",
                id
            )));
        }
        let slot = self.allocate_slot()?;
        self.write_slot(slot, vector);
        self.id_to_slot.insert(id, slot);
        self.slot_to_id[slot] = Some(id);
        Ok(slot)
    }

    /// Replace a stored vector in place, recomputing its magnitude.
    ///
    /// The id and slot are unchanged.
    pub fn replace(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        self.write_slot(slot, vector);
        Ok(())
    }

    /// Borrow the stored vector for `id`.
    pub fn get(&self, id: VectorId) -> Result<&[f32]> {
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(self.vector_at(slot).expect("occupied slot has data"))
    }

    /// Cached magnitude for `id`.
    pub fn magnitude(&self, id: VectorId) -> Result<f32> {
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(self.magnitudes[slot])
    }

    /// Delete a vector, queueing its slot for reuse.
    pub fn delete(&mut self, id: VectorId) -> Result<usize> {
        let slot = self
            .id_to_slot
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        self.slot_to_id[slot] = None;
        self.magnitudes[slot] = 0.0;
        self.free_slots.push(slot);
        Ok(slot)
    }

    /// Slot holding `id`, if any.
    pub fn slot_of(&self, id: VectorId) -> Option<usize> {
        self.id_to_slot.get(&id).copied()
    }

    /// Id occupying `slot`, if any.
    pub fn id_at(&self, slot: usize) -> Option<VectorId> {
        self.slot_to_id.get(slot).copied().flatten()
    }

    /// Vector data at `slot`, or `None` for a free slot.
    ///
    /// Slot-addressed access for the index, which works in slot space.
    pub fn vector_at(&self, slot: usize) -> Option<&[f32]> {
        if self.slot_to_id.get(slot)?.is_none() {
            return None;
        }
        let start = slot * self.dimensions;
        Some(&self.data[start..start + self.dimensions])
    }

    /// Cached magnitude at `slot`, or `None` for a free slot.
    pub fn magnitude_at(&self, slot: usize) -> Option<f32> {
        if self.slot_to_id.get(slot)?.is_none() {
            return None;
        }
        Some(self.magnitudes[slot])
    }

    /// Lazy iteration over occupied `(id, slot)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (VectorId, usize)> + '_ {
        self.slot_to_id
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| id.map(|id| (id, slot)))
    }

    /// Usage metrics.
    pub fn stats(&self) -> BufferStats {
        let in_use = self.id_to_slot.len();
        let vector_bytes = self.dimensions * std::mem::size_of::<f32>();
        BufferStats {
            capacity: self.capacity,
            in_use,
            free: self.capacity - in_use,
            dimensions: self.dimensions,
            bytes_allocated: self.capacity * vector_bytes,
            bytes_in_use: in_use * vector_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize, dims: usize) -> VectorBuffer {
        VectorBuffer::with_capacity(capacity, dims)
    }

    #[test]
    fn test_capacity_from_memory_budget() {
        // 4 KiB at 4 dims = 4 * 4 bytes per vector = 256 slots
        let buf = VectorBuffer::new(4096, 4).unwrap();
        assert_eq!(buf.capacity(), 256);
        assert_eq!(buf.stats().bytes_allocated, 4096);
    }

    #[test]
    fn test_zero_capacity_budget_rejected() {
        assert!(VectorBuffer::new(3, 4).is_err());
        assert!(VectorBuffer::new(1024, 0).is_err());
    }

    #[test]
    fn test_insert_get_roundtrip_bit_exact() {
        let mut buf = buffer(4, 3);
        let id = VectorId::new();
        let v = [0.1f32, -2.5, 3.25];
        buf.insert(id, &v).unwrap();
        assert_eq!(buf.get(id).unwrap(), &v);
    }

    #[test]
    fn test_magnitude_cached_on_insert() {
        let mut buf = buffer(4, 2);
        let id = VectorId::new();
        buf.insert(id, &[3.0, 4.0]).unwrap();
        assert!((buf.magnitude(id).unwrap() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_dimension_mismatch_leaves_buffer_unchanged() {
        let mut buf = buffer(4, 3);
        let id = VectorId::new();
        let err = buf.insert(id, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(buf.len(), 0);
        assert!(!buf.contains(id));
    }

    #[test]
    fn test_buffer_full() {
        let mut buf = buffer(2, 2);
        buf.insert(VectorId::new(), &[1.0, 0.0]).unwrap();
        buf.insert(VectorId::new(), &[0.0, 1.0]).unwrap();
        let err = buf.insert(VectorId::new(), &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, StoreError::BufferFull { capacity: 2 }));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut buf = buffer(4, 2);
        let id = VectorId::new();
        buf.insert(id, &[1.0, 0.0]).unwrap();
        assert!(buf.insert(id, &[0.0, 1.0]).is_err());
    }

    #[test]
    fn test_slot_recycling() {
        let mut buf = buffer(4, 2);
        let a = VectorId::new();
        let slot_a = buf.insert(a, &[1.0, 0.0]).unwrap();
        let bytes_after_first = buf.stats().bytes_in_use;

        buf.delete(a).unwrap();
        assert_eq!(buf.stats().bytes_in_use, 0);

        let b = VectorId::new();
        let slot_b = buf.insert(b, &[0.0, 1.0]).unwrap();

        // LIFO reuse returns the freed slot, memory use returns to the
        // single-vector level, and the dead id no longer resolves.
        assert_eq!(slot_a, slot_b);
        assert_eq!(buf.stats().bytes_in_use, bytes_after_first);
        assert!(matches!(buf.get(a), Err(StoreError::NotFound(_))));
        assert_eq!(buf.id_at(slot_b), Some(b));
    }

    #[test]
    fn test_replace_recomputes_magnitude() {
        let mut buf = buffer(4, 2);
        let id = VectorId::new();
        buf.insert(id, &[3.0, 4.0]).unwrap();
        buf.replace(id, &[6.0, 8.0]).unwrap();
        assert_eq!(buf.get(id).unwrap(), &[6.0, 8.0]);
        assert!((buf.magnitude(id).unwrap() - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_replace_missing_id() {
        let mut buf = buffer(4, 2);
        assert!(matches!(
            buf.replace(VectorId::new(), &[1.0, 0.0]),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_slot_addressed_access() {
        let mut buf = buffer(4, 2);
        let id = VectorId::new();
        let slot = buf.insert(id, &[1.0, 2.0]).unwrap();

        assert_eq!(buf.vector_at(slot).unwrap(), &[1.0, 2.0]);
        assert!(buf.magnitude_at(slot).is_some());

        buf.delete(id).unwrap();
        assert!(buf.vector_at(slot).is_none());
        assert!(buf.magnitude_at(slot).is_none());
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut buf = buffer(4, 2);
        let a = VectorId::new();
        let b = VectorId::new();
        let c = VectorId::new();
        buf.insert(a, &[1.0, 0.0]).unwrap();
        buf.insert(b, &[0.0, 1.0]).unwrap();
        buf.insert(c, &[1.0, 1.0]).unwrap();
        buf.delete(b).unwrap();

        let live: Vec<VectorId> = buf.iter().map(|(id, _)| id).collect();
        assert_eq!(live.len(), 2);
        assert!(live.contains(&a));
        assert!(live.contains(&c));
    }

    #[test]
    fn test_stats() {
        let mut buf = buffer(8, 4);
        buf.insert(VectorId::new(), &[0.0; 4]).unwrap();
        buf.insert(VectorId::new(), &[1.0; 4]).unwrap();

        let stats = buf.stats();
        assert_eq!(stats.capacity, 8);
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.free, 6);
        assert_eq!(stats.bytes_in_use, 2 * 4 * 4);
    }

    #[test]
    fn test_high_dimension_magnitude_tolerance() {
        let mut buf = buffer(2, 1536);
        let id = VectorId::new();
        let v: Vec<f32> = (0..1536).map(|i| (i as f32 * 0.001).sin()).collect();
        buf.insert(id, &v).unwrap();

        let expected: f64 = v.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
        let got = buf.magnitude(id).unwrap() as f64;
        assert!((got - expected).abs() / expected < 1e-5);
    }
}
