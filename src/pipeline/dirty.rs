//! Incremental dirty propagation.
//!
//! Input changes mark nodes with dirty categories; each flush runs four
//! propagation passes (clipping, opacity, color, transform/size) over the
//! dirty subtrees, in that order, followed by the visuals stage (mesh and
//! command regeneration, see `painter`). Passes are generation-stamped so a
//! node is processed at most once per flush even when several dirty entries
//! cover the same subtree, and recursion descends only while an inherited
//! output actually changed.
//!
//! The passes write derived state and property-table values; they never
//! touch meshes or commands directly. Anything that invalidates generated
//! output raises `VISUALS` on the node, which the visuals stage consumes.

use bitflags::bitflags;

use crate::geometry::Rect;
use crate::pipeline::clip::{determine_self_clip_method, ClipMethod};
use crate::pipeline::node::{
    Pass, SlotRef, COLOR_CHANNEL_BACKGROUND, COLOR_CHANNEL_BORDER_TOP, COLOR_CHANNEL_COUNT,
    COLOR_CHANNEL_TINT,
};
use crate::pipeline::properties::{PropertyHandle, PropertyTable};
use crate::pipeline::PipelineConfig;
use crate::scene::{NodeId, SceneTree};
use crate::style::NodeInputs;
use crate::transform::Transform;

bitflags! {
    /// Dirty categories accumulated on a node between flushes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u16 {
        /// Clip inputs changed (clips_children, radii, clip hints).
        const CLIPPING   = 1 << 0;
        /// Own opacity changed.
        const OPACITY    = 1 << 1;
        /// A color input changed.
        const COLOR      = 1 << 2;
        /// Position or local transform changed.
        const TRANSFORM  = 1 << 3;
        /// Width or height changed.
        const SIZE       = 1 << 4;
        /// Generated mesh/commands are invalid and must be rebuilt (or
        /// nudged). Raised by input diffing and by the earlier passes.
        const VISUALS    = 1 << 5;
        /// The node was just attached; every derived value is unset.
        const HIERARCHY  = 1 << 6;
        /// Visibility toggled.
        const VISIBILITY = 1 << 7;
        /// Baked vertex space drifted but nothing else changed; the visuals
        /// stage may patch vertices in place instead of repainting.
        const NUDGE      = 1 << 8;
    }
}

impl DirtyFlags {
    /// Categories invalidated by swapping `old` inputs for `new`.
    pub fn from_input_change(old: &NodeInputs, new: &NodeInputs) -> DirtyFlags {
        let mut flags = DirtyFlags::empty();

        if old.geometry.x != new.geometry.x || old.geometry.y != new.geometry.y {
            flags |= DirtyFlags::TRANSFORM;
        }
        if old.geometry.width != new.geometry.width
            || old.geometry.height != new.geometry.height
        {
            flags |= DirtyFlags::SIZE | DirtyFlags::CLIPPING | DirtyFlags::VISUALS;
        }
        if old.local_transform != new.local_transform {
            flags |= DirtyFlags::TRANSFORM;
        }

        if old.style.opacity != new.style.opacity {
            flags |= DirtyFlags::OPACITY;
        }
        if old.style.visible != new.style.visible {
            flags |= DirtyFlags::OPACITY | DirtyFlags::VISIBILITY;
        }

        if old.style.background != new.style.background
            || old.style.border_colors != new.style.border_colors
            || old.style.tint != new.style.tint
            || old.style.dynamic_colors != new.style.dynamic_colors
        {
            flags |= DirtyFlags::COLOR;
        }
        if old.style.border_widths != new.style.border_widths {
            // Border geometry changes with the widths, not just the colors.
            flags |= DirtyFlags::COLOR | DirtyFlags::VISUALS;
        }

        if old.style.clips_children != new.style.clips_children || old.hints != new.hints {
            flags |= DirtyFlags::CLIPPING;
        }
        if old.style.radii != new.style.radii {
            flags |= DirtyFlags::CLIPPING | DirtyFlags::VISUALS;
        }

        if old.style.override_material != new.style.override_material
            || old.render_target != new.render_target
        {
            flags |= DirtyFlags::VISUALS;
        }

        flags
    }
}

/// World-space AABB of a node's local content rectangle.
pub(crate) fn world_bounds(world: &Transform, width: f32, height: f32) -> Rect {
    let corners = [
        world.transform_point(0.0, 0.0),
        world.transform_point(width, 0.0),
        world.transform_point(width, height),
        world.transform_point(0.0, height),
    ];
    Rect::aabb_from_points(&corners)
}

/// The space a node's vertices must be baked in, relative to the transform
/// slot its page channel references. Identity for slot owners; the offset
/// from the nearest owning ancestor otherwise.
pub(crate) fn target_vertex_space(tree: &SceneTree, id: NodeId) -> Transform {
    let node = match tree.get(id) {
        Some(n) => n,
        None => return Transform::IDENTITY,
    };
    if node.render.transform_slot.is_owned() {
        return Transform::IDENTITY;
    }
    let world = node.render.world_transform;
    let mut current = tree.parent(id);
    while let Some(a) = current {
        if let Some(n) = tree.get(a) {
            if n.render.transform_slot.is_owned() {
                return n.render.world_transform.inverse().then(&world);
            }
        }
        current = tree.parent(a);
    }
    world
}

/// Run the clipping pass over the dirty entries, ancestors first.
///
/// Resolves each node's clip strategy, clip-slot ownership, mask depth and
/// stencil reference, and the inherited world clip rectangle.
pub(crate) fn clipping_pass(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    config: &PipelineConfig,
    generation: u64,
    dirty: &[NodeId],
) {
    for &id in dirty {
        process_clipping(tree, table, config, generation, id, false);
    }
}

fn process_clipping(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    config: &PipelineConfig,
    generation: u64,
    id: NodeId,
    forced: bool,
) {
    let (inputs, dirty, stamp, old_method, old_slot, old_mask_depth, old_stencil_ref, old_clip, world)
        = match tree.get(id) {
            Some(n) => (
                n.inputs,
                n.dirty,
                n.render.stamps.get(Pass::Clipping),
                n.render.clip_method,
                n.render.clip_rect_slot,
                n.render.mask_depth,
                n.render.stencil_ref,
                n.render.world_clip_rect,
                n.render.world_transform,
            ),
            None => return,
        };
    if stamp == generation {
        return;
    }
    let relevant = DirtyFlags::CLIPPING | DirtyFlags::HIERARCHY | DirtyFlags::SIZE;
    if !forced && !dirty.intersects(relevant) {
        return;
    }

    let (parent_mask_depth, inherited_handle, parent_clip) = match tree.parent(id) {
        Some(p) => match tree.get(p) {
            Some(n) => (
                n.render.mask_depth,
                n.render.clip_rect_slot.handle(),
                n.render.world_clip_rect,
            ),
            None => (0, PropertyHandle::DEFAULT, Rect::UNBOUNDED),
        },
        None => (0, PropertyHandle::DEFAULT, Rect::UNBOUNDED),
    };

    let mut method = determine_self_clip_method(
        &inputs.style,
        &inputs.hints,
        parent_mask_depth,
        config.max_mask_depth,
    );

    // Slot ownership follows the strategy: only shader-discard reads a clip
    // rect from the property table. Scissor and stencil enforce on the
    // command level, so those nodes pass the inherited handle through.
    let mut slot = old_slot;
    if method == ClipMethod::ShaderDiscard {
        if slot.owned().is_none() {
            match table.alloc_clip_rect() {
                Ok(handle) => slot = SlotRef::Owned(handle),
                Err(err) => {
                    log::warn!("clip slot allocation failed for {:?}: {err}", id.as_u64());
                    crate::pipeline_stats::record_property_exhausted();
                    crate::pipeline_stats::record_clip_downgrade();
                    method = ClipMethod::Scissor;
                    slot = SlotRef::Inherited(inherited_handle);
                }
            }
        }
    } else {
        if let Some(handle) = slot.owned() {
            table.free_clip_rect(handle);
        }
        slot = SlotRef::Inherited(inherited_handle);
    }

    let mask_depth = parent_mask_depth + u8::from(method.uses_stencil());
    let stencil_ref = mask_depth;

    let world_clip = if method == ClipMethod::NotClipped {
        parent_clip
    } else {
        world_bounds(&world, inputs.geometry.width, inputs.geometry.height).intersect(&parent_clip)
    };
    if let Some(handle) = slot.owned() {
        table.set_clip_rect(handle, world_clip);
    }

    let repaint = method != old_method
        || slot.handle() != old_slot.handle()
        || stencil_ref != old_stencil_ref;
    let recurse = forced
        || slot.handle() != old_slot.handle()
        || mask_depth != old_mask_depth
        || world_clip != old_clip;

    if let Some(n) = tree.get_mut(id) {
        n.render.clip_method = method;
        n.render.clip_rect_slot = slot;
        n.render.mask_depth = mask_depth;
        n.render.stencil_ref = stencil_ref;
        n.render.world_clip_rect = world_clip;
        n.render.stamps.set(Pass::Clipping, generation);
        if repaint {
            n.dirty |= DirtyFlags::VISUALS;
        }
    }

    if recurse {
        for child in tree.children(id) {
            process_clipping(tree, table, config, generation, child, true);
        }
    }
}

/// Run the opacity pass over the dirty entries, ancestors first.
///
/// Maintains composite opacity, slot promotion/demotion against the parent,
/// and the effective-hidden flag.
pub(crate) fn opacity_pass(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    config: &PipelineConfig,
    generation: u64,
    dirty: &[NodeId],
) {
    for &id in dirty {
        process_opacity(tree, table, config, generation, id, false);
    }
}

fn process_opacity(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    config: &PipelineConfig,
    generation: u64,
    id: NodeId,
    forced: bool,
) {
    let (style, dirty, stamp, old_slot, old_composite, old_hidden, old_baked) = match tree.get(id)
    {
        Some(n) => (
            n.inputs.style,
            n.dirty,
            n.render.stamps.get(Pass::Opacity),
            n.render.opacity_slot,
            n.render.composite_opacity,
            n.render.hidden,
            n.render.baked_opacity,
        ),
        None => return,
    };
    if stamp == generation {
        return;
    }
    let relevant = DirtyFlags::OPACITY | DirtyFlags::VISIBILITY | DirtyFlags::HIERARCHY;
    if !forced && !dirty.intersects(relevant) {
        return;
    }

    let (parent_composite, inherited_handle, parent_hidden, parent_baked) = match tree.parent(id) {
        Some(p) => match tree.get(p) {
            Some(n) => (
                n.render.composite_opacity,
                n.render.opacity_slot.handle(),
                n.render.hidden,
                n.render.baked_opacity,
            ),
            None => (1.0, PropertyHandle::DEFAULT, false, 1.0),
        },
        None => (1.0, PropertyHandle::DEFAULT, false, 1.0),
    };

    let composite = parent_composite * style.opacity;
    let hidden = parent_hidden || !style.visible || composite <= config.opacity_epsilon;

    // Promotion: a node whose own opacity diverges from 1 owns a slot so
    // later opacity animation is a pure table write. Demotion returns the
    // slot once the node is back at full opacity.
    let mut slot = old_slot;
    if style.opacity != 1.0 {
        if slot.owned().is_none() {
            match table.alloc_opacity() {
                Ok(handle) => slot = SlotRef::Owned(handle),
                Err(err) => {
                    log::warn!("opacity slot allocation failed for {:?}: {err}", id.as_u64());
                    crate::pipeline_stats::record_property_exhausted();
                    slot = SlotRef::Inherited(inherited_handle);
                }
            }
        }
    } else {
        if let Some(handle) = slot.owned() {
            table.free_opacity(handle);
        }
        slot = SlotRef::Inherited(inherited_handle);
    }
    if let Some(handle) = slot.owned() {
        table.set_opacity(handle, composite);
    }

    // The share of the composite the referenced slot does not carry. Slot
    // owners write the full composite into the table; everything below an
    // exhausted (un-slotted) node folds the missing factor into vertex
    // alpha instead, so the factor inherits like the composite does.
    let baked = match slot {
        SlotRef::Owned(_) => 1.0,
        SlotRef::Inherited(_) => parent_baked * style.opacity,
    };

    // Slot-value updates are free; identity changes, visibility flips and
    // baked-opacity changes all invalidate the generated output.
    let repaint = slot.handle() != old_slot.handle()
        || hidden != old_hidden
        || baked != old_baked;
    let recurse = forced
        || composite != old_composite
        || hidden != old_hidden
        || baked != old_baked
        || slot.handle() != old_slot.handle();

    if let Some(n) = tree.get_mut(id) {
        n.render.opacity_slot = slot;
        n.render.composite_opacity = composite;
        n.render.hidden = hidden;
        n.render.baked_opacity = baked;
        n.render.stamps.set(Pass::Opacity, generation);
        if repaint {
            n.dirty |= DirtyFlags::VISUALS;
        }
    }

    if recurse {
        for child in tree.children(id) {
            process_opacity(tree, table, config, generation, child, true);
        }
    }
}

/// Run the color pass over the dirty entries.
///
/// Colors do not inherit, so this pass never recurses: it reconciles each
/// dirty node's owned color slots against its style.
pub(crate) fn color_pass(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    generation: u64,
    dirty: &[NodeId],
) {
    for &id in dirty {
        process_color(tree, table, generation, id);
    }
}

fn process_color(tree: &mut SceneTree, table: &mut PropertyTable, generation: u64, id: NodeId) {
    let (style, dirty, stamp, old_slots) = match tree.get(id) {
        Some(n) => (
            n.inputs.style,
            n.dirty,
            n.render.stamps.get(Pass::Color),
            n.render.color_slots,
        ),
        None => return,
    };
    if stamp == generation {
        return;
    }
    if !dirty.intersects(DirtyFlags::COLOR | DirtyFlags::HIERARCHY) {
        return;
    }

    let mut slots = old_slots;
    let mut repaint = false;

    if style.dynamic_colors {
        let values = channel_colors(&style);
        let mut exhausted = false;
        for channel in 0..COLOR_CHANNEL_COUNT {
            let wanted = channel_in_use(&style, channel);
            match (wanted, slots[channel]) {
                (true, Some(handle)) => table.set_color(handle, values[channel]),
                (true, None) => match table.alloc_color() {
                    Ok(handle) => {
                        table.set_color(handle, values[channel]);
                        slots[channel] = Some(handle);
                        repaint = true;
                    }
                    Err(err) => {
                        if !exhausted {
                            log::warn!(
                                "color slot allocation failed for {:?}: {err}",
                                id.as_u64()
                            );
                            crate::pipeline_stats::record_property_exhausted();
                            exhausted = true;
                        }
                        // Baked fallback: the painter writes the color into
                        // vertices, so value changes keep repainting.
                        repaint = true;
                    }
                },
                (false, Some(handle)) => {
                    table.free_color(handle);
                    slots[channel] = None;
                    repaint = true;
                }
                (false, None) => {}
            }
        }
    } else {
        for slot in slots.iter_mut() {
            if let Some(handle) = slot.take() {
                table.free_color(handle);
            }
        }
        // Baked colors: any color change is a repaint.
        repaint = true;
    }

    if let Some(n) = tree.get_mut(id) {
        n.render.color_slots = slots;
        n.render.stamps.set(Pass::Color, generation);
        if repaint {
            n.dirty |= DirtyFlags::VISUALS;
        }
    }
}

fn channel_colors(style: &crate::style::ResolvedStyle) -> [crate::geometry::Color; COLOR_CHANNEL_COUNT] {
    [
        style.background,
        style.border_colors[0],
        style.border_colors[1],
        style.border_colors[2],
        style.border_colors[3],
        style.tint,
    ]
}

fn channel_in_use(style: &crate::style::ResolvedStyle, channel: usize) -> bool {
    match channel {
        COLOR_CHANNEL_BACKGROUND | COLOR_CHANNEL_TINT => true,
        c if (COLOR_CHANNEL_BORDER_TOP..COLOR_CHANNEL_TINT).contains(&c) => {
            style.border_widths[c - COLOR_CHANNEL_BORDER_TOP] > 0.0
        }
        _ => false,
    }
}

/// Run the transform/size pass over the dirty entries, ancestors first.
///
/// Maintains world transforms, transform-slot ownership (one owned slot per
/// rigid subtree), winding parity, and refreshes the world clip rectangles
/// that depend on the new transforms.
pub(crate) fn transform_pass(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    generation: u64,
    dirty: &[NodeId],
) {
    for &id in dirty {
        let ctx = match transform_context(tree, id) {
            Some(ctx) => ctx,
            None => continue,
        };
        process_transform(tree, table, generation, id, &ctx, false);
    }
}

/// Inherited transform state at a node, derived from its (already
/// processed) ancestors.
struct TransformCtx {
    parent_world: Transform,
    owner_world: Transform,
    owner_handle: PropertyHandle,
}

fn transform_context(tree: &SceneTree, id: NodeId) -> Option<TransformCtx> {
    if !tree.contains(id) {
        return None;
    }
    let parent_world = match tree.parent(id) {
        Some(p) => tree.get(p).map(|n| n.render.world_transform)?,
        None => Transform::IDENTITY,
    };

    // Nearest ancestor owning a transform slot; roots always own, so the
    // walk terminates. A brand-new root has no owner yet and falls back to
    // the shared identity slot.
    let mut current = tree.parent(id);
    while let Some(a) = current {
        if let Some(node) = tree.get(a) {
            if let Some(handle) = node.render.transform_slot.owned() {
                return Some(TransformCtx {
                    parent_world,
                    owner_world: node.render.world_transform,
                    owner_handle: handle,
                });
            }
        }
        current = tree.parent(a);
    }
    Some(TransformCtx {
        parent_world,
        owner_world: Transform::IDENTITY,
        owner_handle: PropertyHandle::DEFAULT,
    })
}

fn process_transform(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    generation: u64,
    id: NodeId,
    ctx: &TransformCtx,
    forced: bool,
) {
    let (inputs, dirty, stamp, old) = match tree.get(id) {
        Some(n) => (
            n.inputs,
            n.dirty,
            n.render.stamps.get(Pass::TransformSize),
            (
                n.render.transform_slot,
                n.render.world_transform,
                n.render.vertices_space,
                n.render.world_flips_winding,
                n.render.clip_rect_slot,
                n.render.clip_method,
                n.render.world_clip_rect,
            ),
        ),
        None => return,
    };
    let (old_slot, old_world, vertices_space, old_flips, clip_slot, clip_method, old_world_clip) =
        old;
    if stamp == generation {
        return;
    }
    let relevant = DirtyFlags::TRANSFORM | DirtyFlags::SIZE | DirtyFlags::HIERARCHY;
    if !forced && !dirty.intersects(relevant) {
        return;
    }

    let is_root = tree.parent(id).is_none();
    let world = ctx
        .parent_world
        .then(&Transform::translate(inputs.geometry.x, inputs.geometry.y))
        .then(&inputs.local_transform);
    let local_flips = inputs.local_transform.flips_winding();
    let world_flips = world.flips_winding();

    // One owned slot per rigid subtree: a node owns iff it bends space
    // itself (non-identity local transform) or roots a tree. Everything
    // rigidly attached below shares the owner's slot, so moving the owner
    // is a single table write.
    let should_own = is_root || !inputs.local_transform.is_identity();
    let mut slot = old_slot;
    if should_own {
        if slot.owned().is_none() {
            match table.alloc_transform() {
                Ok(handle) => slot = SlotRef::Owned(handle),
                Err(err) => {
                    log::warn!(
                        "transform slot allocation failed for {:?}: {err}",
                        id.as_u64()
                    );
                    crate::pipeline_stats::record_property_exhausted();
                    slot = SlotRef::Inherited(ctx.owner_handle);
                }
            }
        }
    } else {
        if let Some(handle) = slot.owned() {
            table.free_transform(handle);
        }
        slot = SlotRef::Inherited(ctx.owner_handle);
    }
    match slot {
        SlotRef::Owned(handle) => table.set_transform(handle, &world),
        SlotRef::Inherited(_) => slot = SlotRef::Inherited(ctx.owner_handle),
    }

    // The space vertices must be baked in: the owner's own space for slot
    // owners, the offset from the owning ancestor otherwise.
    let target_space = match slot {
        SlotRef::Owned(_) => Transform::IDENTITY,
        SlotRef::Inherited(_) => ctx.owner_world.inverse().then(&world),
    };

    // World clip rectangles trail the transforms they were computed from.
    let world_clip = {
        let parent_clip = match tree.parent(id) {
            Some(p) => tree
                .get(p)
                .map(|n| n.render.world_clip_rect)
                .unwrap_or(Rect::UNBOUNDED),
            None => Rect::UNBOUNDED,
        };
        if clip_method == ClipMethod::NotClipped {
            parent_clip
        } else {
            world_bounds(&world, inputs.geometry.width, inputs.geometry.height)
                .intersect(&parent_clip)
        }
    };
    if let Some(handle) = clip_slot.owned() {
        table.set_clip_rect(handle, world_clip);
    }

    // Scissor rectangles are embedded in the command by value, not read
    // from the table, so a moved scissor clipper re-emits its commands.
    let repaint = slot.handle() != old_slot.handle()
        || world_flips != old_flips
        || dirty.intersects(DirtyFlags::SIZE)
        || (clip_method == ClipMethod::Scissor && world_clip != old_world_clip);
    let drifted = !target_space.approx_eq(&vertices_space, 1e-6);
    let recurse = forced || world != old_world || slot.handle() != old_slot.handle();

    if let Some(n) = tree.get_mut(id) {
        n.render.transform_slot = slot;
        n.render.world_transform = world;
        n.render.local_flips_winding = local_flips;
        n.render.world_flips_winding = world_flips;
        n.render.world_clip_rect = world_clip;
        n.render.stamps.set(Pass::TransformSize, generation);
        if repaint {
            n.dirty |= DirtyFlags::VISUALS;
        } else if drifted {
            n.dirty |= DirtyFlags::NUDGE;
        }
    }

    if recurse {
        let child_ctx = match slot {
            SlotRef::Owned(handle) => TransformCtx {
                parent_world: world,
                owner_world: world,
                owner_handle: handle,
            },
            SlotRef::Inherited(handle) => TransformCtx {
                parent_world: world,
                owner_world: ctx.owner_world,
                owner_handle: handle,
            },
        };
        for child in tree.children(id) {
            process_transform(tree, table, generation, child, &child_ctx, true);
        }
    }
}
