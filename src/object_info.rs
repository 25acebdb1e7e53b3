//! Per-object side tables that make capture-time identifiers translatable.
//!
//! Every driver object encountered during replay gets one [`DxObjectInfo`]
//! keyed by its capture id. The replay-side `ref_count` tracks only the
//! references held through the trace; it may diverge from the driver's own
//! counter, and removal fires strictly when the trace-held count reaches
//! zero.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::driver::DriverObjectRef;
use crate::window::WindowId;

/// Descriptor-heap-type to byte-increment table, shared by reference between
/// a device and every descriptor heap it creates. Heaps refer to the maps,
/// never back to the device, so no cycle forms.
pub type SharedIncrements = Rc<RefCell<FxHashMap<u32, u32>>>;

pub struct DeviceInfo {
    pub capture_increments: SharedIncrements,
    pub replay_increments: SharedIncrements,
}

impl DeviceInfo {
    pub fn new() -> Self {
        Self {
            capture_increments: Rc::new(RefCell::new(FxHashMap::default())),
            replay_increments: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DescriptorHeapInfo {
    pub heap_type: u32,
    pub descriptor_count: u32,
    /// Heap-start addresses, recorded on the first
    /// `Get*DescriptorHandleForHeapStart` observation only. Zero means not
    /// yet observed.
    pub capture_cpu_begin: u64,
    pub replay_cpu_begin: u64,
    pub capture_gpu_begin: u64,
    pub replay_gpu_begin: u64,
    pub capture_increments: SharedIncrements,
    pub replay_increments: SharedIncrements,
}

impl DescriptorHeapInfo {
    pub fn new(
        heap_type: u32,
        descriptor_count: u32,
        capture_increments: SharedIncrements,
        replay_increments: SharedIncrements,
    ) -> Self {
        Self {
            heap_type,
            descriptor_count,
            capture_cpu_begin: 0,
            replay_cpu_begin: 0,
            capture_gpu_begin: 0,
            replay_gpu_begin: 0,
            capture_increments,
            replay_increments,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MappedSubresource {
    pub memory_id: u64,
    pub map_count: u32,
}

#[derive(Default)]
pub struct ResourceInfo {
    /// GPU virtual addresses, recorded on the first `GetGPUVirtualAddress`
    /// observation only. Zero means not yet observed.
    pub capture_va: u64,
    pub replay_va: u64,
    pub mapped_memory: FxHashMap<u32, MappedSubresource>,
}

pub struct SwapchainInfo {
    pub window: WindowId,
}

/// Tagged optional payload attached to a [`DxObjectInfo`]. Destroyed with
/// the object when its replay-side ref count reaches zero.
pub enum ObjectExtraInfo {
    None,
    Device(DeviceInfo),
    DescriptorHeap(DescriptorHeapInfo),
    Resource(ResourceInfo),
    Swapchain(SwapchainInfo),
}

pub struct DxObjectInfo {
    /// 64-bit identifier assigned at capture time, unique within the trace.
    pub capture_id: u64,
    /// Live replay-time driver object.
    pub object: DriverObjectRef,
    /// References held through the trace. Starts at one for the creating
    /// call.
    pub ref_count: u32,
    pub extra_info: ObjectExtraInfo,
}

impl DxObjectInfo {
    pub fn new(capture_id: u64, object: DriverObjectRef) -> Self {
        Self {
            capture_id,
            object,
            ref_count: 1,
            extra_info: ObjectExtraInfo::None,
        }
    }
}

/// Mapping from capture-time object id to its replay-side record.
#[derive(Default)]
pub struct ObjectTable {
    objects: FxHashMap<u64, DxObjectInfo>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: DxObjectInfo) {
        self.objects.insert(info.capture_id, info);
    }

    pub fn get(&self, capture_id: u64) -> Option<&DxObjectInfo> {
        self.objects.get(&capture_id)
    }

    pub fn get_mut(&mut self, capture_id: u64) -> Option<&mut DxObjectInfo> {
        self.objects.get_mut(&capture_id)
    }

    pub fn remove(&mut self, capture_id: u64) -> Option<DxObjectInfo> {
        self.objects.remove(&capture_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
