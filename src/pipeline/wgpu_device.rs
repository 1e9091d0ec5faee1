//! wgpu-backed implementation of [`GpuDevice`].
//!
//! Each buffer region owns a vertex and an index `wgpu::Buffer` sized to the
//! region's capacity, shadowed by CPU-side copies the pipeline writes into.
//! Dirty regions are pushed to the GPU with `queue.write_buffer` when
//! [`WgpuDevice::flush_uploads`] runs, so a frame's worth of mesh edits
//! becomes a handful of queued copies.

use std::sync::Arc;

use wgpu::{Buffer, BufferUsages, Device, Queue};

use crate::pipeline::device::{BufferRegion, DeviceError, GpuDevice, MeshViews};
use crate::pipeline::properties::{PropertyKind, PropertyTable};
use crate::pipeline::vertex::GpuVertex;

const PROPERTY_KINDS: [PropertyKind; 5] = [
    PropertyKind::Transform,
    PropertyKind::ClipRect,
    PropertyKind::Opacity,
    PropertyKind::Color,
    PropertyKind::TextEffect,
];

struct GpuRegion {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    vertex_capacity: u32,
    index_capacity: u32,
    vertex_count: u32,
    index_count: u32,
    dirty: bool,
}

struct GpuSlot {
    generation: u32,
    region: Option<GpuRegion>,
}

/// Mesh and property storage on a real wgpu device.
pub struct WgpuDevice {
    device: Arc<Device>,
    queue: Arc<Queue>,
    slots: Vec<GpuSlot>,
    free_indices: Vec<u32>,
    max_vertices: u32,
    property_buffers: [Option<(Buffer, usize)>; 5],
}

impl WgpuDevice {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        // Indices are u32, so the addressable limit; kept well below any
        // buffer-size limit by the per-node declaration cap upstream.
        let max_vertices = u32::MAX / 2;
        Self {
            device,
            queue,
            slots: Vec::new(),
            free_indices: Vec::new(),
            max_vertices,
            property_buffers: [const { None }; 5],
        }
    }

    /// Create a device without a surface, for offscreen rendering.
    pub fn headless() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| DeviceError::Setup(err.to_string()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Glaze Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|err| DeviceError::Setup(err.to_string()))?;
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    fn region(&self, handle: &BufferRegion) -> Option<&GpuRegion> {
        self.slots
            .get(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.region.as_ref())
    }

    fn region_mut(&mut self, handle: &BufferRegion) -> Option<&mut GpuRegion> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.region.as_mut())
    }

    /// Push all pending mesh writes to the GPU. Call once per frame, after
    /// the pipeline flush and before encoding the render pass.
    pub fn flush_uploads(&mut self) {
        for slot in &mut self.slots {
            let region = match slot.region.as_mut() {
                Some(r) if r.dirty => r,
                _ => continue,
            };
            self.queue.write_buffer(
                &region.vertex_buffer,
                0,
                bytemuck::cast_slice(&region.vertices[..region.vertex_count as usize]),
            );
            self.queue.write_buffer(
                &region.index_buffer,
                0,
                bytemuck::cast_slice(&region.indices[..region.index_count as usize]),
            );
            region.dirty = false;
        }
    }

    /// The vertex and index buffers backing a live region, for the
    /// command executor.
    pub fn region_buffers(&self, handle: &BufferRegion) -> Option<(&Buffer, &Buffer)> {
        self.region(handle)
            .map(|r| (&r.vertex_buffer, &r.index_buffer))
    }

    /// The storage buffer holding one property category, if it has been
    /// uploaded at least once.
    pub fn property_buffer(&self, kind: PropertyKind) -> Option<&Buffer> {
        self.property_buffers[kind as usize]
            .as_ref()
            .map(|(buffer, _)| buffer)
    }
}

impl GpuDevice for WgpuDevice {
    fn allocate(
        &mut self,
        vertex_count: u32,
        index_count: u32,
    ) -> Result<BufferRegion, DeviceError> {
        if vertex_count > self.max_vertices {
            return Err(DeviceError::VertexLimitExceeded {
                requested: vertex_count,
                limit: self.max_vertices,
            });
        }
        let vertex_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Glaze Region Vertices"),
            size: (vertex_count.max(1) as u64) * std::mem::size_of::<GpuVertex>() as u64,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let index_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Glaze Region Indices"),
            size: (index_count.max(1) as u64) * std::mem::size_of::<u32>() as u64,
            usage: BufferUsages::INDEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let region = GpuRegion {
            vertex_buffer,
            index_buffer,
            vertices: vec![GpuVertex::DEGENERATE; vertex_count as usize],
            indices: vec![0; index_count as usize],
            vertex_capacity: vertex_count,
            index_capacity: index_count,
            vertex_count,
            index_count,
            dirty: true,
        };
        let handle = if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.region = Some(region);
            BufferRegion::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(GpuSlot {
                generation: 0,
                region: Some(region),
            });
            BufferRegion::new(index, 0)
        };
        Ok(handle)
    }

    fn update(
        &mut self,
        region: &BufferRegion,
        vertex_count: u32,
        index_count: u32,
    ) -> Result<MeshViews<'_>, DeviceError> {
        let r = self.region_mut(region).ok_or(DeviceError::StaleRegion)?;
        if vertex_count > r.vertex_capacity {
            return Err(DeviceError::CapacityExceeded {
                requested: vertex_count,
                capacity: r.vertex_capacity,
            });
        }
        if index_count > r.index_capacity {
            return Err(DeviceError::CapacityExceeded {
                requested: index_count,
                capacity: r.index_capacity,
            });
        }
        r.vertex_count = vertex_count;
        r.index_count = index_count;
        r.dirty = true;
        Ok(MeshViews {
            vertices: &mut r.vertices[..vertex_count as usize],
            indices: &mut r.indices[..index_count as usize],
        })
    }

    fn free(&mut self, region: BufferRegion) {
        let live = self
            .slots
            .get(region.index() as usize)
            .map(|s| s.generation == region.generation() && s.region.is_some())
            .unwrap_or(false);
        debug_assert!(live, "double free or stale buffer region");
        if !live {
            return;
        }
        // Dropping the GpuRegion drops its wgpu buffers.
        self.slots[region.index() as usize].region = None;
        self.free_indices.push(region.index());
    }

    fn capacity(&self, region: &BufferRegion) -> Option<(u32, u32)> {
        self.region(region)
            .map(|r| (r.vertex_capacity, r.index_capacity))
    }

    fn max_vertices_per_allocation(&self) -> u32 {
        self.max_vertices
    }

    fn upload_properties(&mut self, table: &PropertyTable) {
        for kind in PROPERTY_KINDS {
            let data = table.category_data(kind);
            let byte_len = std::mem::size_of_val(data);
            let needs_realloc = match &self.property_buffers[kind as usize] {
                Some((_, capacity)) => byte_len > *capacity,
                None => true,
            };
            if needs_realloc {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Glaze Property Buffer"),
                    size: byte_len.max(16) as u64,
                    usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.property_buffers[kind as usize] = Some((buffer, byte_len.max(16)));
            }
            if let Some((buffer, _)) = &self.property_buffers[kind as usize] {
                self.queue
                    .write_buffer(buffer, 0, bytemuck::cast_slice(data));
            }
        }
    }
}
