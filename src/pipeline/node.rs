//! Per-node render-derived state.
//!
//! Pure data: every field here is written by the dirty-propagation passes
//! or the mesh/command generator and read by later passes, the splicer, and
//! the nudge optimizer. Created when a node enters the tree, destroyed when
//! it leaves.

use crate::geometry::Rect;
use crate::pipeline::clip::ClipMethod;
use crate::pipeline::commands::CommandId;
use crate::pipeline::device::BufferRegion;
use crate::pipeline::properties::PropertyHandle;
use crate::transform::Transform;

/// A node either owns its own slot in the property table or shares the
/// nearest owning ancestor's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Owned(PropertyHandle),
    Inherited(PropertyHandle),
}

impl SlotRef {
    /// The effective handle, owned or not.
    pub fn handle(self) -> PropertyHandle {
        match self {
            SlotRef::Owned(h) | SlotRef::Inherited(h) => h,
        }
    }

    pub fn is_owned(self) -> bool {
        matches!(self, SlotRef::Owned(_))
    }

    /// The handle if this node owns it.
    pub fn owned(self) -> Option<PropertyHandle> {
        match self {
            SlotRef::Owned(h) => Some(h),
            SlotRef::Inherited(_) => None,
        }
    }
}

impl Default for SlotRef {
    fn default() -> Self {
        SlotRef::Inherited(PropertyHandle::DEFAULT)
    }
}

/// The four propagation passes, in the order they run within a frame. The
/// visuals stage that follows them is driven by dirty flags alone and
/// carries no stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Clipping = 0,
    Opacity = 1,
    Color = 2,
    TransformSize = 3,
}

impl Pass {
    pub const COUNT: usize = 4;
}

/// Per-pass "last processed" generation stamps.
///
/// A node already stamped with the current generation is skipped by that
/// pass (unless an ancestor forces recursion), bounding each pass to the
/// affected subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStamps([u64; Pass::COUNT]);

impl PassStamps {
    pub fn get(&self, pass: Pass) -> u64 {
        self.0[pass as usize]
    }

    pub fn set(&mut self, pass: Pass, generation: u64) {
        self.0[pass as usize] = generation;
    }
}

/// Color slot channels a node may own when `dynamic_colors` is set.
pub const COLOR_CHANNEL_BACKGROUND: usize = 0;
pub const COLOR_CHANNEL_BORDER_TOP: usize = 1;
pub const COLOR_CHANNEL_BORDER_RIGHT: usize = 2;
pub const COLOR_CHANNEL_BORDER_BOTTOM: usize = 3;
pub const COLOR_CHANNEL_BORDER_LEFT: usize = 4;
pub const COLOR_CHANNEL_TINT: usize = 5;
pub const COLOR_CHANNEL_COUNT: usize = 6;

/// Render-derived state for one scene node.
#[derive(Debug)]
pub struct NodeRenderData {
    /// Transform-table slot: owned by the root of each rigid subtree,
    /// inherited everywhere below it.
    pub transform_slot: SlotRef,
    /// Clip-rect slot; owned when this node clips via a rect-based method.
    pub clip_rect_slot: SlotRef,
    /// Opacity slot; owned while composite opacity diverges from the parent.
    pub opacity_slot: SlotRef,
    /// Owned color slots (background, border x4, tint) when colors are
    /// dynamic; `None` channels are baked into vertices instead.
    pub color_slots: [Option<PropertyHandle>; COLOR_CHANNEL_COUNT],
    /// Owned text-effect slot while text entries carry effects.
    pub text_effect_slot: Option<PropertyHandle>,

    /// Multiplicative opacity of this node and all ancestors.
    pub composite_opacity: f32,
    /// Share of the composite not carried by the referenced opacity slot,
    /// folded into vertex alpha by the painter. 1 except on and below the
    /// slot-exhaustion fallback.
    pub baked_opacity: f32,
    /// Effectively hidden (invisible style or near-zero composite opacity).
    pub hidden: bool,

    /// Resolved clip enforcement strategy.
    pub clip_method: ClipMethod,
    /// World-space clip rectangle written into the owned clip slot (also
    /// the scissor rectangle for `Scissor` nodes).
    pub world_clip_rect: Rect,
    /// Stencil nesting depth at this node; `0 <= stencil_ref <= mask_depth <= budget`.
    pub mask_depth: u8,
    /// Stencil comparison value for this node's content.
    pub stencil_ref: u8,

    /// World transform (composition of all ancestor transforms and the
    /// node's geometry offset and local transform).
    pub world_transform: Transform,
    /// Transform actually baked into current vertex positions, relative to
    /// the owning transform slot's space.
    pub vertices_space: Transform,
    /// Whether the local transform's scale has negative determinant.
    pub local_flips_winding: bool,
    /// Whether the accumulated world scale has negative determinant.
    pub world_flips_winding: bool,

    /// First/last command of this node's opening run.
    pub first_command: Option<CommandId>,
    pub last_command: Option<CommandId>,
    /// First/last command of this node's closing run (pop-style commands
    /// emitted after all descendants).
    pub first_closing_command: Option<CommandId>,
    pub last_closing_command: Option<CommandId>,

    /// Buffer region holding this node's content mesh.
    pub mesh: Option<BufferRegion>,
    /// Live vertex/index counts written into `mesh`.
    pub mesh_vertex_count: u32,
    pub mesh_index_count: u32,
    /// Buffer region holding the stencil mask shape shared by the
    /// register/unregister commands.
    pub closing_mesh: Option<BufferRegion>,

    /// Per-pass generation stamps.
    pub stamps: PassStamps,

    /// Nudging permanently disabled for this node (non-partitionable mix of
    /// position-only and displacement vertices).
    pub nudge_disabled: bool,
    /// Contiguous vertex range whose UV channel encodes displacement
    /// vectors, if any.
    pub displacement_range: Option<(u32, u32)>,
}

impl Default for NodeRenderData {
    fn default() -> Self {
        Self {
            transform_slot: SlotRef::default(),
            clip_rect_slot: SlotRef::default(),
            opacity_slot: SlotRef::default(),
            color_slots: [None; COLOR_CHANNEL_COUNT],
            text_effect_slot: None,
            composite_opacity: 1.0,
            baked_opacity: 1.0,
            hidden: false,
            clip_method: ClipMethod::Undetermined,
            world_clip_rect: Rect::UNBOUNDED,
            mask_depth: 0,
            stencil_ref: 0,
            world_transform: Transform::IDENTITY,
            vertices_space: Transform::IDENTITY,
            local_flips_winding: false,
            world_flips_winding: false,
            first_command: None,
            last_command: None,
            first_closing_command: None,
            last_closing_command: None,
            mesh: None,
            mesh_vertex_count: 0,
            mesh_index_count: 0,
            closing_mesh: None,
            stamps: PassStamps::default(),
            nudge_disabled: false,
            displacement_range: None,
        }
    }
}

impl NodeRenderData {
    /// Whether the node currently contributes any commands.
    pub fn has_commands(&self) -> bool {
        self.first_command.is_some() || self.first_closing_command.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_ref_accessors() {
        let owned = SlotRef::Owned(PropertyHandle::DEFAULT);
        let inherited = SlotRef::Inherited(PropertyHandle::DEFAULT);
        assert!(owned.is_owned());
        assert!(!inherited.is_owned());
        assert_eq!(owned.owned(), Some(PropertyHandle::DEFAULT));
        assert_eq!(inherited.owned(), None);
        assert_eq!(owned.handle(), inherited.handle());
    }

    #[test]
    fn test_stamps_per_pass() {
        let mut stamps = PassStamps::default();
        stamps.set(Pass::Opacity, 7);
        assert_eq!(stamps.get(Pass::Opacity), 7);
        assert_eq!(stamps.get(Pass::Clipping), 0);
    }

    #[test]
    fn test_defaults_inherit() {
        let data = NodeRenderData::default();
        assert!(!data.transform_slot.is_owned());
        assert_eq!(data.composite_opacity, 1.0);
        assert_eq!(data.clip_method, ClipMethod::Undetermined);
        assert!(!data.has_commands());
    }
}
