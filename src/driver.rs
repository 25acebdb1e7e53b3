//! The injected driver call surface.
//!
//! The replay consumer never calls D3D12/DXGI directly; it resolves captured
//! object ids to [`DriverObject`]s and hands them back to a [`Driver`]
//! implementation, which downcasts to its own concrete object type at the
//! point of use. This keeps the core loop platform-independent and lets
//! tests substitute a recording driver.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Untyped replay-time driver object. The driver that produced it is the
/// only party that knows the concrete type behind it.
pub trait DriverObject: Any {
    fn as_any(&self) -> &dyn Any;
}

pub type DriverObjectRef = Rc<dyn DriverObject>;

/// A raw COM result code. Negative values are failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HResult(pub i32);

impl HResult {
    pub const OK: HResult = HResult(0);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub heap_type: u32,
    pub descriptor_count: u32,
    pub flags: u32,
    pub node_mask: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapProperties {
    pub heap_type: u32,
    pub cpu_page_property: u32,
    pub memory_pool: u32,
    pub creation_node_mask: u32,
    pub visible_node_mask: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: u32,
    pub alignment: u64,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: u32,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub layout: u32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub buffer_count: u32,
    pub buffer_usage: u32,
    pub swap_effect: u32,
    pub flags: u32,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub windowed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstantBufferViewDesc {
    /// GPU virtual address of the buffer backing the view.
    pub buffer_location: u64,
    pub size_in_bytes: u32,
}

/// One method per driver entry point the replay consumer overrides.
///
/// Every call returns the raw [`HResult`] (alongside any produced object)
/// rather than a `Result`, because the consumer compares it against the
/// captured return code and continues on mismatch.
pub trait Driver {
    fn create_device(
        &mut self,
        adapter: Option<&dyn DriverObject>,
        minimum_feature_level: u32,
    ) -> (HResult, Option<DriverObjectRef>);

    fn create_dxgi_factory(&mut self, flags: u32) -> (HResult, Option<DriverObjectRef>);

    fn add_ref(&mut self, object: &dyn DriverObject) -> u32;

    fn release(&mut self, object: &dyn DriverObject) -> u32;

    fn create_descriptor_heap(
        &mut self,
        device: &dyn DriverObject,
        desc: &DescriptorHeapDesc,
    ) -> (HResult, Option<DriverObjectRef>);

    fn get_descriptor_handle_increment_size(
        &mut self,
        device: &dyn DriverObject,
        heap_type: u32,
    ) -> u32;

    fn create_committed_resource(
        &mut self,
        device: &dyn DriverObject,
        heap_properties: &HeapProperties,
        heap_flags: u32,
        desc: &ResourceDesc,
        initial_state: u32,
    ) -> (HResult, Option<DriverObjectRef>);

    fn create_constant_buffer_view(
        &mut self,
        device: &dyn DriverObject,
        desc: &ConstantBufferViewDesc,
        dest_descriptor: u64,
    );

    fn get_cpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64;

    fn get_gpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64;

    fn get_gpu_virtual_address(&mut self, resource: &dyn DriverObject) -> u64;

    /// Width of the resource's description, in bytes for buffers. Sizes the
    /// GPU virtual address range recorded for the resource.
    fn resource_width(&mut self, resource: &dyn DriverObject) -> u64;

    fn map(
        &mut self,
        resource: &dyn DriverObject,
        subresource: u32,
    ) -> (HResult, Option<*mut u8>);

    fn unmap(&mut self, resource: &dyn DriverObject, subresource: u32);

    fn write_to_subresource(
        &mut self,
        resource: &dyn DriverObject,
        dst_subresource: u32,
        src_data: &[u8],
        src_row_pitch: u32,
        src_depth_pitch: u32,
    ) -> HResult;

    fn read_from_subresource(
        &mut self,
        resource: &dyn DriverObject,
        dst_row_pitch: u32,
        dst_depth_pitch: u32,
        src_subresource: u32,
    ) -> HResult;

    fn create_swapchain(
        &mut self,
        factory: &dyn DriverObject,
        device: Option<&dyn DriverObject>,
        window: isize,
        desc: &SwapchainDesc,
    ) -> (HResult, Option<DriverObjectRef>);

    fn present(&mut self, swapchain: &dyn DriverObject, sync_interval: u32, flags: u32)
        -> HResult;
}
