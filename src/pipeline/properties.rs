//! GPU-resident property table.
//!
//! Small shared "pages" of per-node attributes (transform, clip rect,
//! opacity, color, text-effect settings) that vertices reference by handle.
//! The table is an append-only slot allocator per category with a free list;
//! its flat f32 image is uploaded verbatim to the GPU after each propagation.
//!
//! Slot 0 of every category is a permanently allocated default (identity
//! transform, unbounded clip rect, opacity 1, white color, zero effect) used
//! as the inherited-from-nothing root value.

use crate::geometry::{Color, Rect};
use crate::transform::Transform;

/// Handle to one slot in a property category.
///
/// Handles are plain slot indices; they are only meaningful together with
/// the category they were allocated from. Freed handles may be reused by
/// later allocations, so callers must free a slot only after no in-flight
/// command references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyHandle(u32);

impl PropertyHandle {
    /// The shared default slot of every category.
    pub const DEFAULT: PropertyHandle = PropertyHandle(0);

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Property categories, each with its own slot space and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Transform,
    ClipRect,
    Opacity,
    Color,
    TextEffect,
}

/// Allocation failure: the bounded category is out of slots.
///
/// Callers recover locally (scissor fallback for clip rects, baked opacity
/// for opacity slots); this is never fatal.
#[derive(Debug, thiserror::Error)]
#[error("property table {kind:?} is full ({capacity} slots)")]
pub struct PropertyTableFull {
    pub kind: PropertyKind,
    pub capacity: u32,
}

/// Bounded slot capacities per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyCapacities {
    pub transforms: u32,
    pub clip_rects: u32,
    pub opacities: u32,
    pub colors: u32,
    pub text_effects: u32,
}

impl Default for PropertyCapacities {
    fn default() -> Self {
        Self {
            transforms: 4096,
            clip_rects: 4096,
            opacities: 4096,
            colors: 8192,
            text_effects: 1024,
        }
    }
}

struct Pool {
    kind: PropertyKind,
    stride: usize,
    data: Vec<f32>,
    live: Vec<bool>,
    free: Vec<u32>,
    capacity: u32,
}

impl Pool {
    fn new(kind: PropertyKind, stride: usize, capacity: u32, default_value: &[f32]) -> Self {
        debug_assert_eq!(default_value.len(), stride);
        debug_assert!(capacity >= 1);
        Self {
            kind,
            stride,
            data: default_value.to_vec(),
            live: vec![true],
            free: Vec::new(),
            capacity,
        }
    }

    fn alloc(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        if let Some(index) = self.free.pop() {
            self.live[index as usize] = true;
            return Ok(PropertyHandle(index));
        }
        let index = self.live.len() as u32;
        if index >= self.capacity {
            return Err(PropertyTableFull {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        self.live.push(true);
        self.data.extend(std::iter::repeat(0.0).take(self.stride));
        Ok(PropertyHandle(index))
    }

    fn free(&mut self, handle: PropertyHandle) {
        debug_assert_ne!(handle.0, 0, "the default slot is never freed");
        debug_assert!(
            self.live[handle.0 as usize],
            "double free of {:?} slot {}",
            self.kind,
            handle.0
        );
        if handle.0 == 0 {
            return;
        }
        self.live[handle.0 as usize] = false;
        self.free.push(handle.0);
    }

    fn set(&mut self, handle: PropertyHandle, value: &[f32]) {
        debug_assert_eq!(value.len(), self.stride);
        debug_assert!(
            self.live[handle.0 as usize],
            "write to freed {:?} slot {}",
            self.kind,
            handle.0
        );
        let start = handle.0 as usize * self.stride;
        self.data[start..start + self.stride].copy_from_slice(value);
    }

    fn get(&self, handle: PropertyHandle) -> &[f32] {
        let start = handle.0 as usize * self.stride;
        &self.data[start..start + self.stride]
    }
}

/// The CPU image of the GPU-resident property buffer.
pub struct PropertyTable {
    transforms: Pool,
    clip_rects: Pool,
    opacities: Pool,
    colors: Pool,
    text_effects: Pool,
    dirty: bool,
}

impl PropertyTable {
    /// Stride of a transform slot: a 2x3 affine matrix padded to 8 floats.
    pub const TRANSFORM_STRIDE: usize = 8;
    /// Stride of a clip-rect slot: `[x, y, width, height]`.
    pub const CLIP_RECT_STRIDE: usize = 4;
    /// Stride of an opacity slot: opacity in `.x`, padded to 4 floats.
    pub const OPACITY_STRIDE: usize = 4;
    /// Stride of a color slot: `[r, g, b, a]`.
    pub const COLOR_STRIDE: usize = 4;
    /// Stride of a text-effect slot: `[off_x, off_y, softness, thickness, r, g, b, a]`.
    pub const TEXT_EFFECT_STRIDE: usize = 8;

    pub fn new(capacities: PropertyCapacities) -> Self {
        Self {
            transforms: Pool::new(
                PropertyKind::Transform,
                Self::TRANSFORM_STRIDE,
                capacities.transforms,
                &transform_page(&Transform::IDENTITY),
            ),
            clip_rects: Pool::new(
                PropertyKind::ClipRect,
                Self::CLIP_RECT_STRIDE,
                capacities.clip_rects,
                &Rect::UNBOUNDED.to_array(),
            ),
            opacities: Pool::new(
                PropertyKind::Opacity,
                Self::OPACITY_STRIDE,
                capacities.opacities,
                &[1.0, 0.0, 0.0, 0.0],
            ),
            colors: Pool::new(
                PropertyKind::Color,
                Self::COLOR_STRIDE,
                capacities.colors,
                &Color::WHITE.to_array(),
            ),
            text_effects: Pool::new(
                PropertyKind::TextEffect,
                Self::TEXT_EFFECT_STRIDE,
                capacities.text_effects,
                &[0.0; 8],
            ),
            dirty: true,
        }
    }

    pub fn alloc_transform(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        self.dirty = true;
        self.transforms.alloc()
    }

    pub fn alloc_clip_rect(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        self.dirty = true;
        self.clip_rects.alloc()
    }

    pub fn alloc_opacity(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        self.dirty = true;
        self.opacities.alloc()
    }

    pub fn alloc_color(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        self.dirty = true;
        self.colors.alloc()
    }

    pub fn alloc_text_effect(&mut self) -> Result<PropertyHandle, PropertyTableFull> {
        self.dirty = true;
        self.text_effects.alloc()
    }

    pub fn free_transform(&mut self, handle: PropertyHandle) {
        self.transforms.free(handle);
    }

    pub fn free_clip_rect(&mut self, handle: PropertyHandle) {
        self.clip_rects.free(handle);
    }

    pub fn free_opacity(&mut self, handle: PropertyHandle) {
        self.opacities.free(handle);
    }

    pub fn free_color(&mut self, handle: PropertyHandle) {
        self.colors.free(handle);
    }

    pub fn free_text_effect(&mut self, handle: PropertyHandle) {
        self.text_effects.free(handle);
    }

    pub fn set_transform(&mut self, handle: PropertyHandle, value: &Transform) {
        self.transforms.set(handle, &transform_page(value));
        self.dirty = true;
    }

    pub fn set_clip_rect(&mut self, handle: PropertyHandle, value: Rect) {
        self.clip_rects.set(handle, &value.to_array());
        self.dirty = true;
    }

    pub fn set_opacity(&mut self, handle: PropertyHandle, value: f32) {
        self.opacities.set(handle, &[value, 0.0, 0.0, 0.0]);
        self.dirty = true;
    }

    pub fn set_color(&mut self, handle: PropertyHandle, value: Color) {
        self.colors.set(handle, &value.to_array());
        self.dirty = true;
    }

    pub fn set_text_effect(&mut self, handle: PropertyHandle, value: &[f32; 8]) {
        self.text_effects.set(handle, value);
        self.dirty = true;
    }

    /// Read back a slot's current value (tests, debugging).
    pub fn slot_values(&self, kind: PropertyKind, handle: PropertyHandle) -> &[f32] {
        self.pool(kind).get(handle)
    }

    /// The flat f32 image of one category, uploaded verbatim to the GPU.
    pub fn category_data(&self, kind: PropertyKind) -> &[f32] {
        &self.pool(kind).data
    }

    /// Number of live slots in one category.
    pub fn live_count(&self, kind: PropertyKind) -> usize {
        self.pool(kind).live.iter().filter(|&&l| l).count()
    }

    /// Whether a handle currently refers to a live slot.
    pub fn is_live(&self, kind: PropertyKind, handle: PropertyHandle) -> bool {
        self.pool(kind)
            .live
            .get(handle.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Clears and returns the needs-upload flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    fn pool(&self, kind: PropertyKind) -> &Pool {
        match kind {
            PropertyKind::Transform => &self.transforms,
            PropertyKind::ClipRect => &self.clip_rects,
            PropertyKind::Opacity => &self.opacities,
            PropertyKind::Color => &self.colors,
            PropertyKind::TextEffect => &self.text_effects,
        }
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new(PropertyCapacities::default())
    }
}

/// The 8-float page written for a transform slot: `[a, b, tx, c, d, ty, 0, 0]`.
fn transform_page(t: &Transform) -> [f32; 8] {
    let [a, b, tx, c, d, ty] = t.affine_2d();
    [a, b, tx, c, d, ty, 0.0, 0.0]
}
