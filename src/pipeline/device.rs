//! The GPU device collaborator boundary.
//!
//! The pipeline writes meshes into opaque buffer regions and uploads the
//! property table through this trait; it never talks to a graphics API
//! directly. `CpuDevice` is the in-memory reference implementation used by
//! tests and headless runs; `WgpuDevice` (see `wgpu_device`) stages the same
//! writes for a real GPU.

use crate::pipeline::properties::{PropertyKind, PropertyTable};
use crate::pipeline::vertex::GpuVertex;

/// Opaque handle to a device buffer region holding vertices and indices.
///
/// Generational: a freed region's handle goes stale and is rejected in
/// debug builds. Double-free and use-after-free are contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRegion {
    index: u32,
    generation: u32,
}

impl BufferRegion {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

/// Writable views into a region's current vertex and index ranges.
pub struct MeshViews<'a> {
    pub vertices: &'a mut [GpuVertex],
    pub indices: &'a mut [u32],
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("requested {requested} vertices exceeds the device limit of {limit}")]
    VertexLimitExceeded { requested: u32, limit: u32 },
    #[error("buffer region handle is stale")]
    StaleRegion,
    #[error("update of {requested} exceeds region capacity {capacity}")]
    CapacityExceeded { requested: u32, capacity: u32 },
    #[error("device setup failed: {0}")]
    Setup(String),
}

/// Contract with the external GPU device/buffer allocator.
pub trait GpuDevice {
    /// Allocate a region with capacity for the given counts.
    fn allocate(&mut self, vertex_count: u32, index_count: u32)
        -> Result<BufferRegion, DeviceError>;

    /// Set a region's live counts (within its capacity) and return writable
    /// views. Existing contents up to the new counts are preserved.
    fn update(
        &mut self,
        region: &BufferRegion,
        vertex_count: u32,
        index_count: u32,
    ) -> Result<MeshViews<'_>, DeviceError>;

    /// Release a region. The caller must guarantee no command still
    /// references it.
    fn free(&mut self, region: BufferRegion);

    /// `(vertex_capacity, index_capacity)` of a live region.
    fn capacity(&self, region: &BufferRegion) -> Option<(u32, u32)>;

    /// Largest vertex count a single allocation may request.
    fn max_vertices_per_allocation(&self) -> u32;

    /// Upload the property table's flat image.
    fn upload_properties(&mut self, table: &PropertyTable);
}

struct CpuRegion {
    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    vertex_capacity: u32,
    index_capacity: u32,
    vertex_count: u32,
    index_count: u32,
}

struct CpuSlot {
    generation: u32,
    region: Option<CpuRegion>,
}

/// In-memory reference device.
pub struct CpuDevice {
    slots: Vec<CpuSlot>,
    free_indices: Vec<u32>,
    max_vertices: u32,
    property_uploads: u64,
    property_floats: [usize; 5],
}

impl CpuDevice {
    pub fn new(max_vertices: u32) -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            max_vertices,
            property_uploads: 0,
            property_floats: [0; 5],
        }
    }

    fn region(&self, handle: &BufferRegion) -> Option<&CpuRegion> {
        self.slots
            .get(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.region.as_ref())
    }

    fn region_mut(&mut self, handle: &BufferRegion) -> Option<&mut CpuRegion> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.region.as_mut())
    }

    /// Number of live regions (tests).
    pub fn live_regions(&self) -> usize {
        self.slots.iter().filter(|s| s.region.is_some()).count()
    }

    /// How many times the property table was uploaded (tests).
    pub fn property_uploads(&self) -> u64 {
        self.property_uploads
    }

    /// Read back a region's current vertices (tests).
    pub fn read_vertices(&self, handle: &BufferRegion) -> Option<&[GpuVertex]> {
        self.region(handle)
            .map(|r| &r.vertices[..r.vertex_count as usize])
    }

    /// Read back a region's current indices (tests).
    pub fn read_indices(&self, handle: &BufferRegion) -> Option<&[u32]> {
        self.region(handle)
            .map(|r| &r.indices[..r.index_count as usize])
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new(65536)
    }
}

impl GpuDevice for CpuDevice {
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
        let region = CpuRegion {
            vertices: vec![GpuVertex::DEGENERATE; vertex_count as usize],
            indices: vec![0; index_count as usize],
            vertex_capacity: vertex_count,
            index_capacity: index_count,
            vertex_count,
            index_count,
        };
        let handle = if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.region = Some(region);
            BufferRegion::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(CpuSlot {
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
            debug_assert!(false, "region update past vertex capacity");
            return Err(DeviceError::CapacityExceeded {
                requested: vertex_count,
                capacity: r.vertex_capacity,
            });
        }
        if index_count > r.index_capacity {
            debug_assert!(false, "region update past index capacity");
            return Err(DeviceError::CapacityExceeded {
                requested: index_count,
                capacity: r.index_capacity,
            });
        }
        r.vertex_count = vertex_count;
        r.index_count = index_count;
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
        self.property_uploads += 1;
        self.property_floats = [
            table.category_data(PropertyKind::Transform).len(),
            table.category_data(PropertyKind::ClipRect).len(),
            table.category_data(PropertyKind::Opacity).len(),
            table.category_data(PropertyKind::Color).len(),
            table.category_data(PropertyKind::TextEffect).len(),
        ];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_update() {
        let mut device = CpuDevice::default();
        let region = device.allocate(4, 6).unwrap();
        {
            let views = device.update(&region, 4, 6).unwrap();
            views.vertices[0].position = [1.0, 2.0];
            views.indices[0] = 3;
        }
        assert_eq!(device.read_vertices(&region).unwrap()[0].position, [1.0, 2.0]);
        assert_eq!(device.read_indices(&region).unwrap()[0], 3);
    }

    #[test]
    fn test_update_preserves_contents_when_shrinking() {
        let mut device = CpuDevice::default();
        let region = device.allocate(4, 6).unwrap();
        device.update(&region, 4, 6).unwrap().vertices[1].uv = [0.5, 0.5];
        device.update(&region, 2, 3).unwrap();
        let views = device.update(&region, 4, 6).unwrap();
        assert_eq!(views.vertices[1].uv, [0.5, 0.5]);
    }

    #[test]
    fn test_vertex_limit() {
        let mut device = CpuDevice::new(8);
        assert!(matches!(
            device.allocate(9, 0),
            Err(DeviceError::VertexLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_freed_handle_goes_stale() {
        let mut device = CpuDevice::default();
        let region = device.allocate(4, 6).unwrap();
        device.free(region);
        assert!(device.capacity(&region).is_none());
        assert!(matches!(
            device.update(&region, 1, 1),
            Err(DeviceError::StaleRegion)
        ));

        // Slot reuse bumps the generation, so the old handle stays stale.
        let fresh = device.allocate(2, 3).unwrap();
        assert!(device.capacity(&fresh).is_some());
        assert!(device.capacity(&region).is_none());
    }
}
