//! The replay consumer: object remapping and per-call override dispatch.
//!
//! Every recognized driver call has exactly one override, and each override
//! follows the same five-phase pattern: resolve captured object ids against
//! the object table, rewrite embedded capture-time addresses, invoke the
//! injected driver, compare the returned code against the captured one, and
//! record any produced handles in the side tables.

use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::address_map::{DescriptorAddressMap, DescriptorHeapBinding, GpuVaMap};
use crate::driver::{
    ConstantBufferViewDesc, DescriptorHeapDesc, Driver, DriverObjectRef, HResult, HeapProperties,
    ResourceDesc, SwapchainDesc,
};
use crate::error::{ReplayError, ReplayResult};
use crate::file_processor::ApiCallConsumer;
use crate::format::{ApiCallId, BlockHeader, ByteReader, MetaDataId};
use crate::object_info::{
    DescriptorHeapInfo, DeviceInfo, DxObjectInfo, ObjectExtraInfo, ObjectTable, ResourceInfo,
    SharedIncrements, SwapchainInfo,
};
use crate::window::{Window, WindowFactory, WindowHandleKind, WindowId};

const DEFAULT_WINDOW_POSITION_X: i32 = 0;
const DEFAULT_WINDOW_POSITION_Y: i32 = 0;

/// Single mutable state object threaded through the block loop. Owns every
/// side table; the driver and window factory are injected at construction.
pub struct ReplayConsumer {
    driver: Box<dyn Driver>,
    window_factory: Box<dyn WindowFactory>,
    objects: ObjectTable,
    mapped_memory: FxHashMap<u64, *mut u8>,
    descriptor_cpu_addresses: DescriptorAddressMap,
    descriptor_gpu_addresses: DescriptorAddressMap,
    gpu_va_map: GpuVaMap,
    active_windows: FxHashMap<WindowId, Box<dyn Window>>,
}

impl ReplayConsumer {
    pub fn new(driver: Box<dyn Driver>, window_factory: Box<dyn WindowFactory>) -> Self {
        Self {
            driver,
            window_factory,
            objects: ObjectTable::new(),
            mapped_memory: FxHashMap::default(),
            descriptor_cpu_addresses: DescriptorAddressMap::new(),
            descriptor_gpu_addresses: DescriptorAddressMap::new(),
            gpu_va_map: GpuVaMap::new(),
            active_windows: FxHashMap::default(),
        }
    }

    pub fn object(&self, capture_id: u64) -> Option<&DxObjectInfo> {
        self.objects.get(capture_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_memory_mapped(&self, memory_id: u64) -> bool {
        self.mapped_memory.contains_key(&memory_id)
    }

    pub fn remap_cpu_descriptor(&self, handle: u64) -> u64 {
        self.descriptor_cpu_addresses.remap(handle)
    }

    pub fn remap_gpu_descriptor(&self, handle: u64) -> u64 {
        self.descriptor_gpu_addresses.remap(handle)
    }

    pub fn remap_gpu_va(&self, address: u64) -> u64 {
        self.gpu_va_map.remap(address)
    }

    pub fn active_window_count(&self) -> usize {
        self.active_windows.len()
    }

    /// Purges an object and every dependent address-map entry in a single
    /// step. Driven by the replay-side ref count, not by external lifetime
    /// signals.
    pub fn remove_object(&mut self, capture_id: u64) {
        let Some(info) = self.objects.remove(capture_id) else {
            return;
        };
        match info.extra_info {
            ObjectExtraInfo::Resource(resource_info) => {
                if resource_info.capture_va != 0 {
                    self.gpu_va_map.remove(resource_info.capture_va);
                }
                for mapped in resource_info.mapped_memory.values() {
                    self.mapped_memory.remove(&mapped.memory_id);
                }
            }
            ObjectExtraInfo::DescriptorHeap(heap_info) => {
                if heap_info.capture_cpu_begin != 0 {
                    self.descriptor_cpu_addresses
                        .remove(heap_info.capture_cpu_begin);
                }
                if heap_info.capture_gpu_begin != 0 {
                    self.descriptor_gpu_addresses
                        .remove(heap_info.capture_gpu_begin);
                }
            }
            ObjectExtraInfo::Swapchain(swapchain_info) => {
                if let Some(window) = self.active_windows.remove(&swapchain_info.window) {
                    self.window_factory.destroy(window);
                }
            }
            ObjectExtraInfo::Device(_) | ObjectExtraInfo::None => {}
        }
    }

    /// Writes a captured region into a live mapped memory range. Unknown
    /// memory ids drop the write and replay continues.
    pub fn process_fill_memory(&mut self, memory_id: u64, offset: u64, data: &[u8]) {
        match self.mapped_memory.get(&memory_id) {
            Some(pointer) => {
                let pointer = *pointer;
                // SAFETY: the pointer was produced by the driver's Map for
                // this memory id and stays valid until the matching Unmap;
                // offset and length describe the capture-time write into the
                // same range.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        pointer.add(offset as usize),
                        data.len(),
                    );
                }
            }
            None => {
                warn!(
                    memory_id,
                    "skipping memory fill for unrecognized mapped memory object"
                );
            }
        }
    }

    fn object_ref(&self, capture_id: u64) -> ReplayResult<DriverObjectRef> {
        self.objects
            .get(capture_id)
            .map(|info| info.object.clone())
            .ok_or(ReplayError::UnknownObject(capture_id))
    }

    fn optional_object_ref(&self, capture_id: u64) -> Option<DriverObjectRef> {
        if capture_id == 0 {
            return None;
        }
        let object = self.objects.get(capture_id).map(|info| info.object.clone());
        if object.is_none() {
            debug!(capture_id, "optional object id is not in the object table");
        }
        object
    }

    fn check_replay_result(
        &self,
        call_name: &'static str,
        capture_result: HResult,
        replay_result: HResult,
    ) {
        if capture_result != replay_result {
            error!(
                call = call_name,
                replay = %replay_result,
                capture = %capture_result,
                "call returned a value that does not match the value returned at capture"
            );
        }
    }

    /// Looks up a device's shared increment tables.
    fn device_increments(
        &self,
        device_id: u64,
    ) -> ReplayResult<(SharedIncrements, SharedIncrements)> {
        match self.objects.get(device_id).map(|info| &info.extra_info) {
            Some(ObjectExtraInfo::Device(device_info)) => Ok((
                device_info.capture_increments.clone(),
                device_info.replay_increments.clone(),
            )),
            _ => Err(ReplayError::MissingObjectInfo(device_id)),
        }
    }

    /// Resource extra info, created lazily on first use the way the driver
    /// reveals it.
    fn resource_info_mut(
        objects: &mut ObjectTable,
        capture_id: u64,
    ) -> ReplayResult<&mut ResourceInfo> {
        let info = objects
            .get_mut(capture_id)
            .ok_or(ReplayError::UnknownObject(capture_id))?;
        if matches!(info.extra_info, ObjectExtraInfo::None) {
            info.extra_info = ObjectExtraInfo::Resource(ResourceInfo::default());
        }
        match &mut info.extra_info {
            ObjectExtraInfo::Resource(resource_info) => Ok(resource_info),
            _ => Err(ReplayError::MissingObjectInfo(capture_id)),
        }
    }

    fn destroy_active_windows(&mut self) {
        for (_, window) in self.active_windows.drain() {
            self.window_factory.destroy(window);
        }
    }

    fn override_create_device(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let adapter_id = reader.read_u64()?;
        let minimum_feature_level = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);
        let device_id = reader.read_u64()?;

        let adapter = self.optional_object_ref(adapter_id);
        let (replay_result, device) = self
            .driver
            .create_device(adapter.as_deref(), minimum_feature_level);
        self.check_replay_result("D3D12CreateDevice", capture_result, replay_result);

        if replay_result.is_success() {
            if let Some(device) = device {
                let mut info = DxObjectInfo::new(device_id, device);
                info.extra_info = ObjectExtraInfo::Device(DeviceInfo::new());
                self.objects.insert(info);
            }
        }
        Ok(())
    }

    fn override_create_dxgi_factory(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let flags = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);
        let factory_id = reader.read_u64()?;

        let (replay_result, factory) = self.driver.create_dxgi_factory(flags);
        self.check_replay_result("CreateDXGIFactory2", capture_result, replay_result);

        if replay_result.is_success() {
            if let Some(factory) = factory {
                self.objects.insert(DxObjectInfo::new(factory_id, factory));
            }
        }
        Ok(())
    }

    fn override_add_ref(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let _capture_result = reader.read_u32()?;

        let object = self.object_ref(this_id)?;
        let info = self
            .objects
            .get_mut(this_id)
            .ok_or(ReplayError::UnknownObject(this_id))?;
        info.ref_count += 1;
        self.driver.add_ref(&*object);
        Ok(())
    }

    fn override_release(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let _capture_result = reader.read_u32()?;

        let info = self
            .objects
            .get_mut(this_id)
            .ok_or(ReplayError::UnknownObject(this_id))?;
        if info.ref_count == 0 {
            return Err(ReplayError::InvalidTrace(format!(
                "Release on object {this_id} holding no trace references"
            )));
        }
        info.ref_count -= 1;
        let object = info.object.clone();
        let remove = info.ref_count == 0;
        if remove {
            self.remove_object(this_id);
        }
        self.driver.release(&*object);
        Ok(())
    }

    fn override_create_descriptor_heap(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let desc = DescriptorHeapDesc {
            heap_type: reader.read_u32()?,
            descriptor_count: reader.read_u32()?,
            flags: reader.read_u32()?,
            node_mask: reader.read_u32()?,
        };
        let capture_result = HResult(reader.read_i32()?);
        let heap_id = reader.read_u64()?;

        let device = self.object_ref(this_id)?;
        let (replay_result, heap) = self.driver.create_descriptor_heap(&*device, &desc);
        self.check_replay_result(
            "ID3D12Device::CreateDescriptorHeap",
            capture_result,
            replay_result,
        );

        if replay_result.is_success() {
            if let Some(heap) = heap {
                let (capture_increments, replay_increments) = self.device_increments(this_id)?;
                let mut info = DxObjectInfo::new(heap_id, heap);
                info.extra_info = ObjectExtraInfo::DescriptorHeap(DescriptorHeapInfo::new(
                    desc.heap_type,
                    desc.descriptor_count,
                    capture_increments,
                    replay_increments,
                ));
                self.objects.insert(info);
            }
        }
        Ok(())
    }

    fn override_get_descriptor_handle_increment_size(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let heap_type = reader.read_u32()?;
        let capture_result = reader.read_u32()?;

        let device = self.object_ref(this_id)?;
        let replay_result = self
            .driver
            .get_descriptor_handle_increment_size(&*device, heap_type);

        let (capture_increments, replay_increments) = self.device_increments(this_id)?;
        capture_increments
            .borrow_mut()
            .insert(heap_type, capture_result);
        replay_increments
            .borrow_mut()
            .insert(heap_type, replay_result);
        Ok(())
    }

    fn override_create_committed_resource(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let heap_properties = HeapProperties {
            heap_type: reader.read_u32()?,
            cpu_page_property: reader.read_u32()?,
            memory_pool: reader.read_u32()?,
            creation_node_mask: reader.read_u32()?,
            visible_node_mask: reader.read_u32()?,
        };
        let heap_flags = reader.read_u32()?;
        let desc = ResourceDesc {
            dimension: reader.read_u32()?,
            alignment: reader.read_u64()?,
            width: reader.read_u64()?,
            height: reader.read_u32()?,
            depth_or_array_size: reader.read_u16()?,
            mip_levels: reader.read_u16()?,
            format: reader.read_u32()?,
            sample_count: reader.read_u32()?,
            sample_quality: reader.read_u32()?,
            layout: reader.read_u32()?,
            flags: reader.read_u32()?,
        };
        let initial_state = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);
        let resource_id = reader.read_u64()?;

        let device = self.object_ref(this_id)?;
        let (replay_result, resource) = self.driver.create_committed_resource(
            &*device,
            &heap_properties,
            heap_flags,
            &desc,
            initial_state,
        );
        self.check_replay_result(
            "ID3D12Device::CreateCommittedResource",
            capture_result,
            replay_result,
        );

        if replay_result.is_success() {
            if let Some(resource) = resource {
                self.objects
                    .insert(DxObjectInfo::new(resource_id, resource));
            }
        }
        Ok(())
    }

    fn override_create_constant_buffer_view(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let buffer_location = reader.read_u64()?;
        let size_in_bytes = reader.read_u32()?;
        let dest_descriptor = reader.read_u64()?;

        let device = self.object_ref(this_id)?;
        let desc = ConstantBufferViewDesc {
            buffer_location: self.gpu_va_map.remap(buffer_location),
            size_in_bytes,
        };
        let dest_descriptor = self.descriptor_cpu_addresses.remap(dest_descriptor);
        self.driver
            .create_constant_buffer_view(&*device, &desc, dest_descriptor);
        Ok(())
    }

    fn override_get_cpu_descriptor_handle_for_heap_start(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let capture_ptr = reader.read_u64()?;

        let heap = self.object_ref(this_id)?;
        let replay_ptr = self.driver.get_cpu_descriptor_handle_for_heap_start(&*heap);

        let info = self
            .objects
            .get_mut(this_id)
            .ok_or(ReplayError::UnknownObject(this_id))?;
        let ObjectExtraInfo::DescriptorHeap(heap_info) = &mut info.extra_info else {
            return Err(ReplayError::MissingObjectInfo(this_id));
        };
        // Only initialize on the first call.
        if heap_info.capture_cpu_begin == 0 {
            heap_info.capture_cpu_begin = capture_ptr;
            heap_info.replay_cpu_begin = replay_ptr;
            self.descriptor_cpu_addresses.record(
                capture_ptr,
                DescriptorHeapBinding {
                    replay_begin: replay_ptr,
                    heap_type: heap_info.heap_type,
                    descriptor_count: heap_info.descriptor_count,
                    capture_increments: heap_info.capture_increments.clone(),
                    replay_increments: heap_info.replay_increments.clone(),
                },
            );
        }
        Ok(())
    }

    fn override_get_gpu_descriptor_handle_for_heap_start(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let capture_ptr = reader.read_u64()?;

        let heap = self.object_ref(this_id)?;
        let replay_ptr = self.driver.get_gpu_descriptor_handle_for_heap_start(&*heap);

        let info = self
            .objects
            .get_mut(this_id)
            .ok_or(ReplayError::UnknownObject(this_id))?;
        let ObjectExtraInfo::DescriptorHeap(heap_info) = &mut info.extra_info else {
            return Err(ReplayError::MissingObjectInfo(this_id));
        };
        // Only initialize on the first call.
        if heap_info.capture_gpu_begin == 0 {
            heap_info.capture_gpu_begin = capture_ptr;
            heap_info.replay_gpu_begin = replay_ptr;
            self.descriptor_gpu_addresses.record(
                capture_ptr,
                DescriptorHeapBinding {
                    replay_begin: replay_ptr,
                    heap_type: heap_info.heap_type,
                    descriptor_count: heap_info.descriptor_count,
                    capture_increments: heap_info.capture_increments.clone(),
                    replay_increments: heap_info.replay_increments.clone(),
                },
            );
        }
        Ok(())
    }

    fn override_get_gpu_virtual_address(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let capture_va = reader.read_u64()?;

        let resource = self.object_ref(this_id)?;
        let replay_va = self.driver.get_gpu_virtual_address(&*resource);

        if capture_va != 0 && replay_va != 0 {
            let width = self.driver.resource_width(&*resource);
            let resource_info = Self::resource_info_mut(&mut self.objects, this_id)?;
            // Only initialize on the first call.
            if resource_info.capture_va == 0 {
                resource_info.capture_va = capture_va;
                resource_info.replay_va = replay_va;
                self.gpu_va_map.add(capture_va, replay_va, width);
            }
        }
        Ok(())
    }

    fn override_map(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let subresource = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);
        let memory_id = reader.read_u64()?;

        let resource = self.object_ref(this_id)?;
        let (replay_result, pointer) = self.driver.map(&*resource, subresource);
        self.check_replay_result("ID3D12Resource::Map", capture_result, replay_result);

        if replay_result.is_success() && memory_id != 0 {
            if let Some(pointer) = pointer {
                let resource_info = Self::resource_info_mut(&mut self.objects, this_id)?;
                let entry = resource_info.mapped_memory.entry(subresource).or_default();
                entry.memory_id = memory_id;
                entry.map_count += 1;
                self.mapped_memory.insert(memory_id, pointer);
            }
        }
        Ok(())
    }

    fn override_unmap(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let subresource = reader.read_u32()?;

        let resource = self.object_ref(this_id)?;
        if let Some(info) = self.objects.get_mut(this_id) {
            if let ObjectExtraInfo::Resource(resource_info) = &mut info.extra_info {
                if let Some(entry) = resource_info.mapped_memory.get_mut(&subresource) {
                    if entry.map_count == 0 {
                        warn!(
                            capture_id = this_id,
                            subresource, "Unmap without a matching Map"
                        );
                    } else {
                        entry.map_count -= 1;
                        if entry.map_count == 0 {
                            let memory_id = entry.memory_id;
                            resource_info.mapped_memory.remove(&subresource);
                            self.mapped_memory.remove(&memory_id);
                        }
                    }
                }
            }
        }
        self.driver.unmap(&*resource, subresource);
        Ok(())
    }

    fn override_write_to_subresource(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let dst_subresource = reader.read_u32()?;
        let src_row_pitch = reader.read_u32()?;
        let src_depth_pitch = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);
        let data_size = reader.read_u64()? as usize;
        let data = reader.read_bytes(data_size)?;

        let resource = self.object_ref(this_id)?;
        let replay_result = self.driver.write_to_subresource(
            &*resource,
            dst_subresource,
            data,
            src_row_pitch,
            src_depth_pitch,
        );
        self.check_replay_result(
            "ID3D12Resource::WriteToSubresource",
            capture_result,
            replay_result,
        );
        Ok(())
    }

    fn override_read_from_subresource(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let dst_row_pitch = reader.read_u32()?;
        let dst_depth_pitch = reader.read_u32()?;
        let src_subresource = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);

        let resource = self.object_ref(this_id)?;
        let replay_result = self.driver.read_from_subresource(
            &*resource,
            dst_row_pitch,
            dst_depth_pitch,
            src_subresource,
        );
        self.check_replay_result(
            "ID3D12Resource::ReadFromSubresource",
            capture_result,
            replay_result,
        );
        Ok(())
    }

    fn override_create_swapchain(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let device_id = reader.read_u64()?;
        let desc = SwapchainDesc {
            width: reader.read_u32()?,
            height: reader.read_u32()?,
            format: reader.read_u32()?,
            buffer_count: reader.read_u32()?,
            buffer_usage: reader.read_u32()?,
            swap_effect: reader.read_u32()?,
            flags: reader.read_u32()?,
            sample_count: reader.read_u32()?,
            sample_quality: reader.read_u32()?,
            windowed: reader.read_u8()? != 0,
        };
        let _output_window = reader.read_u64()?;
        let capture_result = HResult(reader.read_i32()?);
        let swapchain_id = reader.read_u64()?;

        self.create_swapchain_common(
            "IDXGIFactory::CreateSwapChain",
            this_id,
            device_id,
            desc,
            capture_result,
            swapchain_id,
        )
    }

    fn override_create_swapchain_for_hwnd(
        &mut self,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let device_id = reader.read_u64()?;
        let _hwnd_id = reader.read_u64()?;
        let desc = SwapchainDesc {
            width: reader.read_u32()?,
            height: reader.read_u32()?,
            format: reader.read_u32()?,
            buffer_count: reader.read_u32()?,
            buffer_usage: reader.read_u32()?,
            swap_effect: reader.read_u32()?,
            flags: reader.read_u32()?,
            sample_count: reader.read_u32()?,
            sample_quality: reader.read_u32()?,
            windowed: true,
        };
        let _restrict_to_output_id = reader.read_u64()?;
        let capture_result = HResult(reader.read_i32()?);
        let swapchain_id = reader.read_u64()?;

        self.create_swapchain_common(
            "IDXGIFactory2::CreateSwapChainForHwnd",
            this_id,
            device_id,
            desc,
            capture_result,
            swapchain_id,
        )
    }

    fn create_swapchain_common(
        &mut self,
        call_name: &'static str,
        factory_id: u64,
        device_id: u64,
        desc: SwapchainDesc,
        capture_result: HResult,
        swapchain_id: u64,
    ) -> ReplayResult<()> {
        let factory = self.object_ref(factory_id)?;
        let device = self.optional_object_ref(device_id);

        // Sizes come from the captured swapchain description.
        let window = self.window_factory.create(
            DEFAULT_WINDOW_POSITION_X,
            DEFAULT_WINDOW_POSITION_Y,
            desc.width,
            desc.height,
        )?;
        let Some(hwnd) = window.native_handle(WindowHandleKind::Win32Hwnd) else {
            self.window_factory.destroy(window);
            return Err(ReplayError::WindowCreation(
                "window did not provide a native handle".to_string(),
            ));
        };

        let (replay_result, swapchain) =
            self.driver
                .create_swapchain(&*factory, device.as_deref(), hwnd, &desc);
        self.check_replay_result(call_name, capture_result, replay_result);

        match swapchain {
            Some(swapchain) if replay_result.is_success() => {
                let window_id = window.id();
                self.active_windows.insert(window_id, window);
                let mut info = DxObjectInfo::new(swapchain_id, swapchain);
                info.extra_info = ObjectExtraInfo::Swapchain(SwapchainInfo { window: window_id });
                self.objects.insert(info);
            }
            _ => {
                error!(call = call_name, "swapchain creation failed during replay");
                self.window_factory.destroy(window);
            }
        }
        Ok(())
    }

    fn override_present(
        &mut self,
        call_name: &'static str,
        reader: &mut ByteReader<'_>,
    ) -> ReplayResult<()> {
        let this_id = reader.read_u64()?;
        let sync_interval = reader.read_u32()?;
        let flags = reader.read_u32()?;
        let capture_result = HResult(reader.read_i32()?);

        let swapchain = self.object_ref(this_id)?;
        let replay_result = self.driver.present(&*swapchain, sync_interval, flags);
        self.check_replay_result(call_name, capture_result, replay_result);
        Ok(())
    }

    fn decode_fill_memory(&mut self, reader: &mut ByteReader<'_>) -> ReplayResult<()> {
        let memory_id = reader.read_u64()?;
        let offset = reader.read_u64()?;
        let size = reader.read_u64()? as usize;
        let data = reader.read_bytes(size)?;
        self.process_fill_memory(memory_id, offset, data);
        Ok(())
    }
}

impl ApiCallConsumer for ReplayConsumer {
    fn process_function_call(
        &mut self,
        _header: &BlockHeader,
        call_id: ApiCallId,
        parameters: &[u8],
    ) -> ReplayResult<()> {
        let mut reader = ByteReader::new(parameters);
        match call_id {
            ApiCallId::D3D12_CREATE_DEVICE => self.override_create_device(&mut reader),
            ApiCallId::CREATE_DXGI_FACTORY => self.override_create_dxgi_factory(&mut reader),
            other => {
                debug!(call_id = other.0, "skipping unimplemented function call");
                Ok(())
            }
        }
    }

    fn process_method_call(
        &mut self,
        _header: &BlockHeader,
        call_id: ApiCallId,
        parameters: &[u8],
    ) -> ReplayResult<()> {
        let mut reader = ByteReader::new(parameters);
        match call_id {
            ApiCallId::FILL_MEMORY => self.decode_fill_memory(&mut reader),
            ApiCallId::IUNKNOWN_ADD_REF => self.override_add_ref(&mut reader),
            ApiCallId::IUNKNOWN_RELEASE => self.override_release(&mut reader),
            ApiCallId::ID3D12DEVICE_CREATE_DESCRIPTOR_HEAP => {
                self.override_create_descriptor_heap(&mut reader)
            }
            ApiCallId::ID3D12DEVICE_GET_DESCRIPTOR_HANDLE_INCREMENT_SIZE => {
                self.override_get_descriptor_handle_increment_size(&mut reader)
            }
            ApiCallId::ID3D12DEVICE_CREATE_COMMITTED_RESOURCE => {
                self.override_create_committed_resource(&mut reader)
            }
            ApiCallId::ID3D12DEVICE_CREATE_CONSTANT_BUFFER_VIEW => {
                self.override_create_constant_buffer_view(&mut reader)
            }
            ApiCallId::ID3D12DESCRIPTOR_HEAP_GET_CPU_HANDLE_FOR_HEAP_START => {
                self.override_get_cpu_descriptor_handle_for_heap_start(&mut reader)
            }
            ApiCallId::ID3D12DESCRIPTOR_HEAP_GET_GPU_HANDLE_FOR_HEAP_START => {
                self.override_get_gpu_descriptor_handle_for_heap_start(&mut reader)
            }
            ApiCallId::ID3D12RESOURCE_GET_GPU_VIRTUAL_ADDRESS => {
                self.override_get_gpu_virtual_address(&mut reader)
            }
            ApiCallId::ID3D12RESOURCE_MAP => self.override_map(&mut reader),
            ApiCallId::ID3D12RESOURCE_UNMAP => self.override_unmap(&mut reader),
            ApiCallId::ID3D12RESOURCE_WRITE_TO_SUBRESOURCE => {
                self.override_write_to_subresource(&mut reader)
            }
            ApiCallId::ID3D12RESOURCE_READ_FROM_SUBRESOURCE => {
                self.override_read_from_subresource(&mut reader)
            }
            ApiCallId::IDXGI_FACTORY_CREATE_SWAP_CHAIN => self.override_create_swapchain(&mut reader),
            ApiCallId::IDXGI_FACTORY2_CREATE_SWAP_CHAIN_FOR_HWND => {
                self.override_create_swapchain_for_hwnd(&mut reader)
            }
            ApiCallId::IDXGI_SWAP_CHAIN_PRESENT => {
                self.override_present("IDXGISwapChain::Present", &mut reader)
            }
            ApiCallId::IDXGI_SWAP_CHAIN1_PRESENT1 => {
                self.override_present("IDXGISwapChain1::Present1", &mut reader)
            }
            other => {
                debug!(call_id = other.0, "skipping unimplemented method call");
                Ok(())
            }
        }
    }

    fn process_metadata(
        &mut self,
        _header: &BlockHeader,
        meta_data_id: MetaDataId,
        _body: &[u8],
    ) -> ReplayResult<()> {
        debug!(
            meta_data_id = meta_data_id.0,
            "skipping unimplemented meta-data command"
        );
        Ok(())
    }
}

impl Drop for ReplayConsumer {
    fn drop(&mut self) {
        self.destroy_active_windows();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::driver::DriverObject;
    use crate::format::{BlockType, ByteWriter};

    struct MockObject {
        serial: u64,
    }

    impl DriverObject for MockObject {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn serial_of(object: &dyn DriverObject) -> u64 {
        object
            .as_any()
            .downcast_ref::<MockObject>()
            .expect("mock driver received a foreign object")
            .serial
    }

    type Buffers = Rc<RefCell<FxHashMap<(u64, u32), Box<[u8]>>>>;
    type CbvLog = Rc<RefCell<Vec<(u64, u64)>>>;

    /// Hands out deterministic replay-side addresses so tests can predict
    /// remap results: heap starts and virtual addresses derive from the
    /// object's creation serial.
    struct MockDriver {
        next_serial: u64,
        resource_widths: FxHashMap<u64, u64>,
        buffers: Buffers,
        cbv_log: CbvLog,
        fail_create_swapchain: bool,
    }

    impl MockDriver {
        fn replay_increment() -> u32 {
            64
        }

        fn new_object(&mut self) -> (u64, DriverObjectRef) {
            self.next_serial += 1;
            let object: DriverObjectRef = Rc::new(MockObject {
                serial: self.next_serial,
            });
            (self.next_serial, object)
        }
    }

    impl Driver for MockDriver {
        fn create_device(
            &mut self,
            _adapter: Option<&dyn DriverObject>,
            _minimum_feature_level: u32,
        ) -> (HResult, Option<DriverObjectRef>) {
            let (_, object) = self.new_object();
            (HResult::OK, Some(object))
        }

        fn create_dxgi_factory(&mut self, _flags: u32) -> (HResult, Option<DriverObjectRef>) {
            let (_, object) = self.new_object();
            (HResult::OK, Some(object))
        }

        fn add_ref(&mut self, _object: &dyn DriverObject) -> u32 {
            0
        }

        fn release(&mut self, _object: &dyn DriverObject) -> u32 {
            0
        }

        fn create_descriptor_heap(
            &mut self,
            _device: &dyn DriverObject,
            _desc: &DescriptorHeapDesc,
        ) -> (HResult, Option<DriverObjectRef>) {
            let (_, object) = self.new_object();
            (HResult::OK, Some(object))
        }

        fn get_descriptor_handle_increment_size(
            &mut self,
            _device: &dyn DriverObject,
            _heap_type: u32,
        ) -> u32 {
            Self::replay_increment()
        }

        fn create_committed_resource(
            &mut self,
            _device: &dyn DriverObject,
            _heap_properties: &HeapProperties,
            _heap_flags: u32,
            desc: &ResourceDesc,
            _initial_state: u32,
        ) -> (HResult, Option<DriverObjectRef>) {
            let (serial, object) = self.new_object();
            self.resource_widths.insert(serial, desc.width);
            (HResult::OK, Some(object))
        }

        fn create_constant_buffer_view(
            &mut self,
            _device: &dyn DriverObject,
            desc: &ConstantBufferViewDesc,
            dest_descriptor: u64,
        ) {
            self.cbv_log
                .borrow_mut()
                .push((desc.buffer_location, dest_descriptor));
        }

        fn get_cpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64 {
            serial_of(heap) * 0x1_0000 + 0x9000
        }

        fn get_gpu_descriptor_handle_for_heap_start(&mut self, heap: &dyn DriverObject) -> u64 {
            serial_of(heap) * 0x1_0000 + 0x5_0000
        }

        fn get_gpu_virtual_address(&mut self, resource: &dyn DriverObject) -> u64 {
            serial_of(resource) * 0x10_0000 + 0x800_0000
        }

        fn resource_width(&mut self, resource: &dyn DriverObject) -> u64 {
            self.resource_widths
                .get(&serial_of(resource))
                .copied()
                .unwrap_or(0x1000)
        }

        fn map(
            &mut self,
            resource: &dyn DriverObject,
            subresource: u32,
        ) -> (HResult, Option<*mut u8>) {
            let serial = serial_of(resource);
            let mut buffers = self.buffers.borrow_mut();
            let buffer = buffers
                .entry((serial, subresource))
                .or_insert_with(|| vec![0u8; 1024].into_boxed_slice());
            (HResult::OK, Some(buffer.as_mut_ptr()))
        }

        fn unmap(&mut self, _resource: &dyn DriverObject, _subresource: u32) {}

        fn write_to_subresource(
            &mut self,
            _resource: &dyn DriverObject,
            _dst_subresource: u32,
            _src_data: &[u8],
            _src_row_pitch: u32,
            _src_depth_pitch: u32,
        ) -> HResult {
            HResult::OK
        }

        fn read_from_subresource(
            &mut self,
            _resource: &dyn DriverObject,
            _dst_row_pitch: u32,
            _dst_depth_pitch: u32,
            _src_subresource: u32,
        ) -> HResult {
            HResult::OK
        }

        fn create_swapchain(
            &mut self,
            _factory: &dyn DriverObject,
            _device: Option<&dyn DriverObject>,
            _window: isize,
            _desc: &SwapchainDesc,
        ) -> (HResult, Option<DriverObjectRef>) {
            if self.fail_create_swapchain {
                return (HResult::E_FAIL, None);
            }
            let (_, object) = self.new_object();
            (HResult::OK, Some(object))
        }

        fn present(
            &mut self,
            _swapchain: &dyn DriverObject,
            _sync_interval: u32,
            _flags: u32,
        ) -> HResult {
            HResult::OK
        }
    }

    struct MockWindow {
        id: WindowId,
    }

    impl Window for MockWindow {
        fn id(&self) -> WindowId {
            self.id
        }

        fn native_handle(&self, _kind: WindowHandleKind) -> Option<isize> {
            Some(self.id.raw() as isize)
        }
    }

    struct MockWindowFactory {
        next_id: u64,
        fail_create: bool,
        created: Rc<RefCell<Vec<(u32, u32)>>>,
        destroyed: Rc<RefCell<Vec<WindowId>>>,
    }

    impl WindowFactory for MockWindowFactory {
        fn create(
            &mut self,
            _x: i32,
            _y: i32,
            width: u32,
            height: u32,
        ) -> ReplayResult<Box<dyn Window>> {
            if self.fail_create {
                return Err(ReplayError::WindowCreation("mock window failure".to_string()));
            }
            self.next_id += 1;
            self.created.borrow_mut().push((width, height));
            Ok(Box::new(MockWindow {
                id: WindowId::from_raw(self.next_id),
            }))
        }

        fn destroy(&mut self, window: Box<dyn Window>) {
            self.destroyed.borrow_mut().push(window.id());
        }
    }

    struct Harness {
        consumer: ReplayConsumer,
        buffers: Buffers,
        cbv_log: CbvLog,
        created_windows: Rc<RefCell<Vec<(u32, u32)>>>,
        destroyed_windows: Rc<RefCell<Vec<WindowId>>>,
    }

    fn harness() -> Harness {
        harness_with(false, false)
    }

    fn harness_with(fail_create_swapchain: bool, fail_create_window: bool) -> Harness {
        let buffers: Buffers = Rc::new(RefCell::new(FxHashMap::default()));
        let cbv_log: CbvLog = Rc::new(RefCell::new(Vec::new()));
        let created_windows = Rc::new(RefCell::new(Vec::new()));
        let destroyed_windows = Rc::new(RefCell::new(Vec::new()));
        let driver = MockDriver {
            next_serial: 0,
            resource_widths: FxHashMap::default(),
            buffers: buffers.clone(),
            cbv_log: cbv_log.clone(),
            fail_create_swapchain,
        };
        let window_factory = MockWindowFactory {
            next_id: 0,
            fail_create: fail_create_window,
            created: created_windows.clone(),
            destroyed: destroyed_windows.clone(),
        };
        Harness {
            consumer: ReplayConsumer::new(Box::new(driver), Box::new(window_factory)),
            buffers,
            cbv_log,
            created_windows,
            destroyed_windows,
        }
    }

    fn function(consumer: &mut ReplayConsumer, call_id: ApiCallId, parameters: &[u8]) {
        let header = BlockHeader::new(BlockType::FunctionCall, (4 + parameters.len()) as u64);
        consumer
            .process_function_call(&header, call_id, parameters)
            .unwrap();
    }

    fn method(consumer: &mut ReplayConsumer, call_id: ApiCallId, parameters: &[u8]) {
        method_result(consumer, call_id, parameters).unwrap();
    }

    fn method_result(
        consumer: &mut ReplayConsumer,
        call_id: ApiCallId,
        parameters: &[u8],
    ) -> ReplayResult<()> {
        let header = BlockHeader::new(BlockType::MethodCall, (4 + parameters.len()) as u64);
        consumer.process_method_call(&header, call_id, parameters)
    }

    fn create_device(consumer: &mut ReplayConsumer, device_id: u64) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(0)
            .write_u32(0xb000)
            .write_i32(0)
            .write_u64(device_id);
        function(consumer, ApiCallId::D3D12_CREATE_DEVICE, &writer.into_vec());
    }

    fn create_dxgi_factory(consumer: &mut ReplayConsumer, factory_id: u64) {
        let mut writer = ByteWriter::new();
        writer.write_u32(0).write_i32(0).write_u64(factory_id);
        function(consumer, ApiCallId::CREATE_DXGI_FACTORY, &writer.into_vec());
    }

    fn record_increment(consumer: &mut ReplayConsumer, device_id: u64, capture_increment: u32) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(device_id)
            .write_u32(0)
            .write_u32(capture_increment);
        method(
            consumer,
            ApiCallId::ID3D12DEVICE_GET_DESCRIPTOR_HANDLE_INCREMENT_SIZE,
            &writer.into_vec(),
        );
    }

    fn create_descriptor_heap(
        consumer: &mut ReplayConsumer,
        device_id: u64,
        heap_id: u64,
        descriptor_count: u32,
    ) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(device_id)
            .write_u32(0)
            .write_u32(descriptor_count)
            .write_u32(0)
            .write_u32(0)
            .write_i32(0)
            .write_u64(heap_id);
        method(
            consumer,
            ApiCallId::ID3D12DEVICE_CREATE_DESCRIPTOR_HEAP,
            &writer.into_vec(),
        );
    }

    fn cpu_heap_start(consumer: &mut ReplayConsumer, heap_id: u64, capture_ptr: u64) {
        let mut writer = ByteWriter::new();
        writer.write_u64(heap_id).write_u64(capture_ptr);
        method(
            consumer,
            ApiCallId::ID3D12DESCRIPTOR_HEAP_GET_CPU_HANDLE_FOR_HEAP_START,
            &writer.into_vec(),
        );
    }

    fn create_committed_resource(
        consumer: &mut ReplayConsumer,
        device_id: u64,
        resource_id: u64,
        width: u64,
        capture_result: i32,
    ) {
        let mut writer = ByteWriter::new();
        writer.write_u64(device_id);
        // Heap properties: upload heap, defaults elsewhere.
        writer
            .write_u32(2)
            .write_u32(0)
            .write_u32(0)
            .write_u32(1)
            .write_u32(1);
        writer.write_u32(0); // heap flags
        writer
            .write_u32(1) // buffer dimension
            .write_u64(0)
            .write_u64(width)
            .write_u32(1)
            .write_u16(1)
            .write_u16(1)
            .write_u32(0)
            .write_u32(1)
            .write_u32(0)
            .write_u32(1) // row-major layout
            .write_u32(0);
        writer.write_u32(0); // initial state
        writer.write_i32(capture_result);
        writer.write_u64(resource_id);
        method(
            consumer,
            ApiCallId::ID3D12DEVICE_CREATE_COMMITTED_RESOURCE,
            &writer.into_vec(),
        );
    }

    fn gpu_virtual_address(consumer: &mut ReplayConsumer, resource_id: u64, capture_va: u64) {
        let mut writer = ByteWriter::new();
        writer.write_u64(resource_id).write_u64(capture_va);
        method(
            consumer,
            ApiCallId::ID3D12RESOURCE_GET_GPU_VIRTUAL_ADDRESS,
            &writer.into_vec(),
        );
    }

    fn map(consumer: &mut ReplayConsumer, resource_id: u64, subresource: u32, memory_id: u64) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(resource_id)
            .write_u32(subresource)
            .write_i32(0)
            .write_u64(memory_id);
        method(consumer, ApiCallId::ID3D12RESOURCE_MAP, &writer.into_vec());
    }

    fn unmap(consumer: &mut ReplayConsumer, resource_id: u64, subresource: u32) {
        let mut writer = ByteWriter::new();
        writer.write_u64(resource_id).write_u32(subresource);
        method(consumer, ApiCallId::ID3D12RESOURCE_UNMAP, &writer.into_vec());
    }

    fn fill_memory(consumer: &mut ReplayConsumer, memory_id: u64, offset: u64, data: &[u8]) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(memory_id)
            .write_u64(offset)
            .write_u64(data.len() as u64)
            .write_bytes(data);
        method(consumer, ApiCallId::FILL_MEMORY, &writer.into_vec());
    }

    fn add_ref(consumer: &mut ReplayConsumer, object_id: u64) {
        let mut writer = ByteWriter::new();
        writer.write_u64(object_id).write_u32(2);
        method(consumer, ApiCallId::IUNKNOWN_ADD_REF, &writer.into_vec());
    }

    fn release(consumer: &mut ReplayConsumer, object_id: u64) {
        let mut writer = ByteWriter::new();
        writer.write_u64(object_id).write_u32(0);
        method(consumer, ApiCallId::IUNKNOWN_RELEASE, &writer.into_vec());
    }

    fn create_swapchain(
        consumer: &mut ReplayConsumer,
        factory_id: u64,
        device_id: u64,
        swapchain_id: u64,
        width: u32,
        height: u32,
    ) {
        let mut writer = ByteWriter::new();
        writer
            .write_u64(factory_id)
            .write_u64(device_id)
            .write_u32(width)
            .write_u32(height)
            .write_u32(28) // DXGI_FORMAT_R8G8B8A8_UNORM
            .write_u32(2)
            .write_u32(0x20)
            .write_u32(4) // flip-discard
            .write_u32(0)
            .write_u32(1)
            .write_u32(0)
            .write_u8(1)
            .write_u64(0xbadf00d) // capture-time output window
            .write_i32(0)
            .write_u64(swapchain_id);
        method(
            consumer,
            ApiCallId::IDXGI_FACTORY_CREATE_SWAP_CHAIN,
            &writer.into_vec(),
        );
    }

    #[test]
    fn descriptor_heap_lifetime_records_and_remaps_handles() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        record_increment(consumer, 7, 32);
        create_descriptor_heap(consumer, 7, 8, 16);
        cpu_heap_start(consumer, 8, 0x1000);

        let info = consumer.object(8).expect("heap 8 is registered");
        let ObjectExtraInfo::DescriptorHeap(heap_info) = &info.extra_info else {
            panic!("heap 8 is missing descriptor heap info");
        };
        assert_eq!(heap_info.capture_cpu_begin, 0x1000);

        // Heap is the second mock object, so its replay begin is 0x2_9000.
        // Descriptor index 2 maps with the replay increment.
        let replay_begin = 2 * 0x1_0000 + 0x9000;
        assert_eq!(
            consumer.remap_cpu_descriptor(0x1000 + 2 * 32),
            replay_begin + 2 * u64::from(MockDriver::replay_increment())
        );
    }

    #[test]
    fn heap_start_addresses_are_recorded_on_first_observation_only() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        record_increment(consumer, 7, 32);
        create_descriptor_heap(consumer, 7, 8, 16);
        cpu_heap_start(consumer, 8, 0x1000);
        cpu_heap_start(consumer, 8, 0x2000);

        let info = consumer.object(8).unwrap();
        let ObjectExtraInfo::DescriptorHeap(heap_info) = &info.extra_info else {
            panic!("heap 8 is missing descriptor heap info");
        };
        assert_eq!(heap_info.capture_cpu_begin, 0x1000);
        // The second observation must not have re-keyed the address map.
        assert_eq!(consumer.remap_cpu_descriptor(0x2000), 0x2000);
    }

    #[test]
    fn map_fill_unmap_tracks_mapped_memory() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        create_committed_resource(consumer, 7, 9, 0x1000, 0);
        map(consumer, 9, 0, 42);
        assert!(consumer.is_memory_mapped(42));

        fill_memory(consumer, 42, 8, &[1, 2, 3, 4]);
        fill_memory(consumer, 42, 16, &[9, 9]);
        assert!(consumer.is_memory_mapped(42));

        // The resource is the second mock object.
        {
            let buffers = harness.buffers.borrow();
            let buffer = buffers.get(&(2, 0)).expect("subresource 0 was mapped");
            assert_eq!(&buffer[8..12], &[1, 2, 3, 4]);
            assert_eq!(&buffer[16..18], &[9, 9]);
        }

        unmap(consumer, 9, 0);
        assert!(!consumer.is_memory_mapped(42));
        let info = consumer.object(9).unwrap();
        let ObjectExtraInfo::Resource(resource_info) = &info.extra_info else {
            panic!("resource 9 is missing resource info");
        };
        assert!(resource_info.mapped_memory.is_empty());
    }

    #[test]
    fn nested_maps_keep_memory_mapped_until_the_final_unmap() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        create_committed_resource(consumer, 7, 9, 0x1000, 0);
        map(consumer, 9, 0, 42);
        map(consumer, 9, 0, 42);
        unmap(consumer, 9, 0);
        assert!(consumer.is_memory_mapped(42));
        unmap(consumer, 9, 0);
        assert!(!consumer.is_memory_mapped(42));
    }

    #[test]
    fn fill_memory_with_unknown_id_is_dropped_and_replay_continues() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        fill_memory(consumer, 999, 0, &[1, 2, 3]);

        // Replay keeps going after the dropped write.
        create_device(consumer, 7);
        assert!(consumer.object(7).is_some());
    }

    #[test]
    fn final_release_purges_gpu_va_and_extra_info() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        create_committed_resource(consumer, 7, 9, 0x1000, 0);
        gpu_virtual_address(consumer, 9, 0x10_0000);

        // Resource is the second mock object.
        let replay_va = 2 * 0x10_0000 + 0x800_0000;
        assert_eq!(consumer.remap_gpu_va(0x10_0800), replay_va + 0x800);

        add_ref(consumer, 9);
        release(consumer, 9);
        assert!(consumer.object(9).is_some());

        release(consumer, 9);
        assert!(consumer.object(9).is_none());
        // The old capture address now falls through unchanged.
        assert_eq!(consumer.remap_gpu_va(0x10_0800), 0x10_0800);
    }

    #[test]
    fn heap_release_purges_descriptor_addresses() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        record_increment(consumer, 7, 32);
        create_descriptor_heap(consumer, 7, 8, 16);
        cpu_heap_start(consumer, 8, 0x1000);
        assert_ne!(consumer.remap_cpu_descriptor(0x1020), 0x1020);

        release(consumer, 8);
        assert!(consumer.object(8).is_none());
        assert_eq!(consumer.remap_cpu_descriptor(0x1020), 0x1020);
    }

    #[test]
    fn swapchain_creation_builds_a_window_from_the_captured_size() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_dxgi_factory(consumer, 2);
        create_device(consumer, 7);
        create_swapchain(consumer, 2, 7, 11, 640, 480);

        assert_eq!(harness.created_windows.borrow().as_slice(), &[(640, 480)]);
        assert_eq!(consumer.active_window_count(), 1);
        let info = consumer.object(11).unwrap();
        assert!(matches!(info.extra_info, ObjectExtraInfo::Swapchain(_)));
    }

    #[test]
    fn releasing_a_swapchain_destroys_its_window() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_dxgi_factory(consumer, 2);
        create_device(consumer, 7);
        create_swapchain(consumer, 2, 7, 11, 640, 480);
        release(consumer, 11);

        assert_eq!(consumer.active_window_count(), 0);
        assert_eq!(harness.destroyed_windows.borrow().len(), 1);
    }

    #[test]
    fn remaining_windows_are_destroyed_on_teardown() {
        let harness = {
            let mut harness = harness();
            let consumer = &mut harness.consumer;
            create_dxgi_factory(consumer, 2);
            create_device(consumer, 7);
            create_swapchain(consumer, 2, 7, 11, 640, 480);
            harness
        };

        let destroyed = harness.destroyed_windows.clone();
        drop(harness);
        assert_eq!(destroyed.borrow().len(), 1);
    }

    #[test]
    fn driver_swapchain_failure_destroys_the_window_and_continues() {
        let mut harness = harness_with(true, false);
        let consumer = &mut harness.consumer;

        create_dxgi_factory(consumer, 2);
        create_device(consumer, 7);
        create_swapchain(consumer, 2, 7, 11, 640, 480);

        assert!(consumer.object(11).is_none());
        assert_eq!(consumer.active_window_count(), 0);
        assert_eq!(harness.destroyed_windows.borrow().len(), 1);
    }

    #[test]
    fn window_factory_failure_is_fatal() {
        let mut harness = harness_with(false, true);
        let consumer = &mut harness.consumer;

        create_dxgi_factory(consumer, 2);
        create_device(consumer, 7);

        let mut writer = ByteWriter::new();
        writer
            .write_u64(2)
            .write_u64(7)
            .write_u32(640)
            .write_u32(480)
            .write_u32(28)
            .write_u32(2)
            .write_u32(0x20)
            .write_u32(4)
            .write_u32(0)
            .write_u32(1)
            .write_u32(0)
            .write_u8(1)
            .write_u64(0)
            .write_i32(0)
            .write_u64(11);
        let result = method_result(
            consumer,
            ApiCallId::IDXGI_FACTORY_CREATE_SWAP_CHAIN,
            &writer.into_vec(),
        );
        assert!(matches!(result, Err(ReplayError::WindowCreation(_))));
    }

    #[test]
    fn capture_result_mismatch_is_not_fatal() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        // Captured call failed, replay succeeds: logged, replay keeps the
        // object the driver actually produced.
        create_committed_resource(consumer, 7, 9, 0x1000, HResult::E_FAIL.0);
        assert!(consumer.object(9).is_some());
    }

    #[test]
    fn constant_buffer_view_rewrites_embedded_addresses() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        create_device(consumer, 7);
        record_increment(consumer, 7, 32);
        create_descriptor_heap(consumer, 7, 8, 16);
        cpu_heap_start(consumer, 8, 0x1000);
        create_committed_resource(consumer, 7, 9, 0x1000, 0);
        gpu_virtual_address(consumer, 9, 0x10_0000);

        let mut writer = ByteWriter::new();
        writer
            .write_u64(7)
            .write_u64(0x10_0040)
            .write_u32(256)
            .write_u64(0x1000 + 32);
        method(
            consumer,
            ApiCallId::ID3D12DEVICE_CREATE_CONSTANT_BUFFER_VIEW,
            &writer.into_vec(),
        );

        // Heap is mock object 2, resource is mock object 3.
        let replay_heap_begin = 2 * 0x1_0000 + 0x9000;
        let replay_va = 3 * 0x10_0000 + 0x800_0000;
        assert_eq!(
            harness.cbv_log.borrow().as_slice(),
            &[(
                replay_va + 0x40,
                replay_heap_begin + u64::from(MockDriver::replay_increment())
            )]
        );
    }

    #[test]
    fn unimplemented_calls_are_skipped() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        method(consumer, ApiCallId(0xdead), &[0xff; 16]);
        function(consumer, ApiCallId(0xbeef), &[]);
        assert_eq!(consumer.object_count(), 0);
    }

    #[test]
    fn calls_on_unknown_objects_fail_fast() {
        let mut harness = harness();
        let consumer = &mut harness.consumer;

        let mut writer = ByteWriter::new();
        writer.write_u64(55).write_u32(0).write_i32(0).write_u64(42);
        let result = method_result(consumer, ApiCallId::ID3D12RESOURCE_MAP, &writer.into_vec());
        assert!(matches!(result, Err(ReplayError::UnknownObject(55))));
    }
}
