//! Address translation between capture-time and replay-time address spaces.
//!
//! Descriptor handles and GPU virtual addresses recorded in a trace are
//! meaningless on the replay machine. These maps record the correspondence
//! at creation time and rewrite every later use. Remap helpers tolerate
//! addresses that are not present (pass-through): capture tools sometimes
//! record zero addresses or addresses belonging to other processes.

use std::collections::BTreeMap;

use crate::object_info::SharedIncrements;

/// Everything needed to translate one descriptor heap's handle range,
/// keyed externally by the heap's capture-time begin address.
pub struct DescriptorHeapBinding {
    pub replay_begin: u64,
    pub heap_type: u32,
    pub descriptor_count: u32,
    pub capture_increments: SharedIncrements,
    pub replay_increments: SharedIncrements,
}

/// Ordered map from a heap's capture-time begin address to its binding.
/// Used for both the CPU and GPU descriptor address spaces.
#[derive(Default)]
pub struct DescriptorAddressMap {
    heaps: BTreeMap<u64, DescriptorHeapBinding>,
}

impl DescriptorAddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a heap's begin address. Idempotent: the first observation
    /// wins and later observations of the same begin are ignored.
    pub fn record(&mut self, capture_begin: u64, binding: DescriptorHeapBinding) {
        self.heaps.entry(capture_begin).or_insert(binding);
    }

    pub fn remove(&mut self, capture_begin: u64) {
        self.heaps.remove(&capture_begin);
    }

    pub fn contains(&self, capture_begin: u64) -> bool {
        self.heaps.contains_key(&capture_begin)
    }

    /// Translates a capture-time handle into the replay address space,
    /// preserving the descriptor index:
    /// `B' + ((h - B) / i_c) * i_r` for the heap with the largest begin
    /// `B <= h`. Handles outside any recorded heap pass through unchanged.
    pub fn remap(&self, handle: u64) -> u64 {
        if handle == 0 {
            return handle;
        }
        let Some((capture_begin, binding)) = self.heaps.range(..=handle).next_back() else {
            return handle;
        };

        let capture_increment = binding
            .capture_increments
            .borrow()
            .get(&binding.heap_type)
            .copied()
            .unwrap_or(0);
        let replay_increment = binding
            .replay_increments
            .borrow()
            .get(&binding.heap_type)
            .copied()
            .unwrap_or(0);
        if capture_increment == 0 || replay_increment == 0 {
            return handle;
        }

        let index = (handle - capture_begin) / u64::from(capture_increment);
        if index >= u64::from(binding.descriptor_count) {
            return handle;
        }
        binding.replay_begin + index * u64::from(replay_increment)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuVaRange {
    pub replay_va: u64,
    pub size: u64,
}

/// Range map from capture-time GPU virtual address to the resource's replay
/// range. Point lookups resolve by containing range.
#[derive(Default)]
pub struct GpuVaMap {
    ranges: BTreeMap<u64, GpuVaRange>,
}

impl GpuVaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resource's address range. The first observation wins.
    pub fn add(&mut self, capture_va: u64, replay_va: u64, size: u64) {
        self.ranges
            .entry(capture_va)
            .or_insert(GpuVaRange { replay_va, size });
    }

    pub fn remove(&mut self, capture_va: u64) {
        self.ranges.remove(&capture_va);
    }

    pub fn contains(&self, capture_va: u64) -> bool {
        self.ranges.contains_key(&capture_va)
    }

    /// Translates an address that falls inside a recorded range to
    /// `replay_va + (address - capture_va)`. Addresses outside every range
    /// pass through unchanged.
    pub fn remap(&self, address: u64) -> u64 {
        if address == 0 {
            return address;
        }
        match self.ranges.range(..=address).next_back() {
            Some((capture_va, range)) if address - capture_va < range.size => {
                range.replay_va + (address - capture_va)
            }
            _ => address,
        }
    }
}
