//! [`Driver`] implementation over the live D3D12/DXGI runtime.
//!
//! Replay objects are COM interface pointers wrapped in [`ComObject`]; every
//! trait method downcasts its operands back to the wrapper and casts to the
//! interface the call expects via `QueryInterface`.

use std::ffi::c_void;
use std::rc::Rc;

use tracing::error;
use windows::core::{IUnknown, Interface};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, ID3D12DescriptorHeap, ID3D12Device, ID3D12Resource,
    D3D12_CONSTANT_BUFFER_VIEW_DESC, D3D12_CPU_DESCRIPTOR_HANDLE, D3D12_CPU_PAGE_PROPERTY,
    D3D12_DESCRIPTOR_HEAP_DESC, D3D12_DESCRIPTOR_HEAP_FLAGS, D3D12_DESCRIPTOR_HEAP_TYPE,
    D3D12_HEAP_FLAGS, D3D12_HEAP_PROPERTIES, D3D12_HEAP_TYPE, D3D12_MEMORY_POOL,
    D3D12_RESOURCE_DESC, D3D12_RESOURCE_DIMENSION, D3D12_RESOURCE_FLAGS, D3D12_RESOURCE_STATES,
    D3D12_TEXTURE_LAYOUT,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIFactory2, IDXGIOutput, IDXGISwapChain, DXGI_CREATE_FACTORY_FLAGS,
    DXGI_PRESENT, DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_EFFECT, DXGI_USAGE,
};

use crate::driver::{
    ConstantBufferViewDesc, DescriptorHeapDesc, Driver, DriverObject, DriverObjectRef, HResult,
    HeapProperties, ResourceDesc, SwapchainDesc,
};

pub(crate) struct ComObject {
    unknown: IUnknown,
}

impl DriverObject for ComObject {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Wraps a freshly created interface. The trace's creating call logically
/// owns one driver reference and the consumer forwards every trace Release
/// verbatim, so take an extra reference here to keep the wrapper's copy
/// independently alive.
fn adopt(unknown: IUnknown) -> DriverObjectRef {
    std::mem::forget(unknown.clone());
    Rc::new(ComObject { unknown })
}

fn as_com(object: &dyn DriverObject) -> Option<&ComObject> {
    let com = object.as_any().downcast_ref::<ComObject>();
    if com.is_none() {
        error!("replay object is not a COM object wrapper");
    }
    com
}

fn cast<T: Interface>(object: &dyn DriverObject, interface: &'static str) -> Option<T> {
    let com = as_com(object)?;
    match com.unknown.cast::<T>() {
        Ok(typed) => Some(typed),
        Err(_) => {
            error!(interface, "replay object does not implement the expected interface");
            None
        }
    }
}

fn code(error: windows::core::Error) -> HResult {
    HResult(error.code().0)
}

pub(crate) struct D3d12Driver;

impl D3d12Driver {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl Driver for D3d12Driver {
    fn create_device(
        &mut self,
        adapter: Option<&dyn DriverObject>,
        minimum_feature_level: u32,
    ) -> (HResult, Option<DriverObjectRef>) {
        let adapter = adapter.and_then(as_com).map(|com| com.unknown.clone());
        let mut device: Option<ID3D12Device> = None;
        let result = unsafe {
            D3D12CreateDevice(
                adapter.as_ref(),
                D3D_FEATURE_LEVEL(minimum_feature_level as i32),
                &mut device,
            )
        };
        match (result, device) {
            (Ok(()), Some(device)) => (HResult::OK, Some(adopt(IUnknown::from(device)))),
            (Ok(()), None) => (HResult::E_FAIL, None),
            (Err(error), _) => (code(error), None),
        }
    }

    fn create_dxgi_factory(&mut self, flags: u32) -> (HResult, Option<DriverObjectRef>) {
        match unsafe { CreateDXGIFactory2::<IDXGIFactory2>(DXGI_CREATE_FACTORY_FLAGS(flags)) } {
            Ok(factory) => (HResult::OK, Some(adopt(IUnknown::from(factory)))),
            Err(error) => (code(error), None),
        }
    }

    fn add_ref(&mut self, object: &dyn DriverObject) -> u32 {
        if let Some(com) = as_com(object) {
            // Taking another owned copy of the interface is the COM AddRef.
            std::mem::forget(com.unknown.clone());
        }
        0
    }

    fn release(&mut self, object: &dyn DriverObject) -> u32 {
        if let Some(com) = as_com(object) {
            // SAFETY: assumes ownership of one of the references taken by
            // `adopt`/`add_ref`; dropping it forwards exactly one driver-side
            // Release.
            unsafe { drop(IUnknown::from_raw(com.unknown.as_raw())) };
        }
        0
    }

    fn create_descriptor_heap(
        &mut self,
        device: &dyn DriverObject,
        desc: &DescriptorHeapDesc,
    ) -> (HResult, Option<DriverObjectRef>) {
        let Some(device) = cast::<ID3D12Device>(device, "ID3D12Device") else {
            return (HResult::E_FAIL, None);
        };
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: D3D12_DESCRIPTOR_HEAP_TYPE(desc.heap_type as i32),
            NumDescriptors: desc.descriptor_count,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAGS(desc.flags as i32),
            NodeMask: desc.node_mask,
        };
        match unsafe { device.CreateDescriptorHeap::<ID3D12DescriptorHeap>(&heap_desc) } {
            Ok(heap) => (HResult::OK, Some(adopt(IUnknown::from(heap)))),
            Err(error) => (code(error), None),
        }
    }

    fn get_descriptor_handle_increment_size(
        &mut self,
        device: &dyn DriverObject,
        heap_type: u32,
    ) -> u32 {
        let Some(device) = cast::<ID3D12Device>(device, "ID3D12Device") else {
            return 0;
        };
        unsafe {
            device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE(heap_type as i32))
        }
    }

    fn create_committed_resource(
        &mut self,
        device: &dyn DriverObject,
        heap_properties: &HeapProperties,
        heap_flags: u32,
        desc: &ResourceDesc,
        initial_state: u32,
    ) -> (HResult, Option<DriverObjectRef>) {
        let Some(device) = cast::<ID3D12Device>(device, "ID3D12Device") else {
            return (HResult::E_FAIL, None);
        };
        let properties = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE(heap_properties.heap_type as i32),
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY(heap_properties.cpu_page_property as i32),
            MemoryPoolPreference: D3D12_MEMORY_POOL(heap_properties.memory_pool as i32),
            CreationNodeMask: heap_properties.creation_node_mask,
            VisibleNodeMask: heap_properties.visible_node_mask,
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION(desc.dimension as i32),
            Alignment: desc.alignment,
            Width: desc.width,
            Height: desc.height,
            DepthOrArraySize: desc.depth_or_array_size,
            MipLevels: desc.mip_levels,
            Format: DXGI_FORMAT(desc.format as i32),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count,
                Quality: desc.sample_quality,
            },
            Layout: D3D12_TEXTURE_LAYOUT(desc.layout as i32),
            Flags: D3D12_RESOURCE_FLAGS(desc.flags as i32),
        };
        let mut resource: Option<ID3D12Resource> = None;
        let result = unsafe {
            device.CreateCommittedResource(
                &properties,
                D3D12_HEAP_FLAGS(heap_flags as i32),
                &resource_desc,
                D3D12_RESOURCE_STATES(initial_state as i32),
                None,
                &mut resource,
            )
        };
        match (result, resource) {
            (Ok(()), Some(resource)) => (HResult::OK, Some(adopt(IUnknown::from(resource)))),
            (Ok(()), None) => (HResult::E_FAIL, None),
            (Err(error), _) => (code(error), None),
        }
    }

    fn create_constant_buffer_view(
        &mut self,
        device: &dyn DriverObject,
        desc: &ConstantBufferViewDesc,
        dest_descriptor: u64,
    ) {
        let Some(device) = cast::<ID3D12Device>(device, "ID3D12Device") else {
            return;
        };
        let view_desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: desc.buffer_location,
            SizeInBytes: desc.size_in_bytes,
        };
        unsafe {
            device.CreateConstantBufferView(
                Some(&view_desc),
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: dest_descriptor as usize,
                },
            );
        }
    }

    fn get_cpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64 {
        let Some(heap) = cast::<ID3D12DescriptorHeap>(heap, "ID3D12DescriptorHeap") else {
            return 0;
        };
        unsafe { heap.GetCPUDescriptorHandleForHeapStart().ptr as u64 }
    }

    fn get_gpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64 {
        let Some(heap) = cast::<ID3D12DescriptorHeap>(heap, "ID3D12DescriptorHeap") else {
            return 0;
        };
        unsafe { heap.GetGPUDescriptorHandleForHeapStart().ptr }
    }

    fn get_gpu_virtual_address(&mut self, resource: &dyn DriverObject) -> u64 {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return 0;
        };
        unsafe { resource.GetGPUVirtualAddress() }
    }

    fn resource_width(&mut self, resource: &dyn DriverObject) -> u64 {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return 0;
        };
        unsafe { resource.GetDesc().Width }
    }

    fn map(
        &mut self,
        resource: &dyn DriverObject,
        subresource: u32,
    ) -> (HResult, Option<*mut u8>) {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return (HResult::E_FAIL, None);
        };
        let mut data: *mut c_void = std::ptr::null_mut();
        match unsafe { resource.Map(subresource, None, Some(&mut data)) } {
            Ok(()) if !data.is_null() => (HResult::OK, Some(data as *mut u8)),
            Ok(()) => (HResult::OK, None),
            Err(error) => (code(error), None),
        }
    }

    fn unmap(&mut self, resource: &dyn DriverObject, subresource: u32) {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return;
        };
        unsafe { resource.Unmap(subresource, None) };
    }

    fn write_to_subresource(
        &mut self,
        resource: &dyn DriverObject,
        dst_subresource: u32,
        src_data: &[u8],
        src_row_pitch: u32,
        src_depth_pitch: u32,
    ) -> HResult {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return HResult::E_FAIL;
        };
        match unsafe {
            resource.WriteToSubresource(
                dst_subresource,
                None,
                src_data.as_ptr().cast(),
                src_row_pitch,
                src_depth_pitch,
            )
        } {
            Ok(()) => HResult::OK,
            Err(error) => code(error),
        }
    }

    fn read_from_subresource(
        &mut self,
        resource: &dyn DriverObject,
        dst_row_pitch: u32,
        dst_depth_pitch: u32,
        src_subresource: u32,
    ) -> HResult {
        let Some(resource) = cast::<ID3D12Resource>(resource, "ID3D12Resource") else {
            return HResult::E_FAIL;
        };
        // The captured destination buffer is gone; read into scratch sized
        // from the captured pitches and discard the contents.
        let scratch_size = dst_depth_pitch.max(dst_row_pitch) as usize;
        if scratch_size == 0 {
            return HResult::OK;
        }
        let mut scratch = vec![0u8; scratch_size];
        match unsafe {
            resource.ReadFromSubresource(
                scratch.as_mut_ptr().cast(),
                dst_row_pitch,
                dst_depth_pitch,
                src_subresource,
                None,
            )
        } {
            Ok(()) => HResult::OK,
            Err(error) => code(error),
        }
    }

    fn create_swapchain(
        &mut self,
        factory: &dyn DriverObject,
        device: Option<&dyn DriverObject>,
        window: isize,
        desc: &SwapchainDesc,
    ) -> (HResult, Option<DriverObjectRef>) {
        let Some(factory) = cast::<IDXGIFactory2>(factory, "IDXGIFactory2") else {
            return (HResult::E_FAIL, None);
        };
        let Some(device) = device.and_then(as_com).map(|com| com.unknown.clone()) else {
            error!("swapchain creation requires a device or command queue object");
            return (HResult::E_FAIL, None);
        };
        let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: DXGI_FORMAT(desc.format as i32),
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count.max(1),
                Quality: desc.sample_quality,
            },
            BufferUsage: DXGI_USAGE(desc.buffer_usage),
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT(desc.swap_effect as i32),
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: desc.flags,
        };
        let hwnd = HWND(window as _);
        match unsafe {
            factory.CreateSwapChainForHwnd(&device, hwnd, &swapchain_desc, None, None::<&IDXGIOutput>)
        } {
            Ok(swapchain) => (HResult::OK, Some(adopt(IUnknown::from(swapchain)))),
            Err(error) => (code(error), None),
        }
    }

    fn present(
        &mut self,
        swapchain: &dyn DriverObject,
        sync_interval: u32,
        flags: u32,
    ) -> HResult {
        let Some(swapchain) = cast::<IDXGISwapChain>(swapchain, "IDXGISwapChain") else {
            return HResult::E_FAIL;
        };
        let result = unsafe { swapchain.Present(sync_interval, DXGI_PRESENT(flags)) };
        HResult(result.0)
    }
}
