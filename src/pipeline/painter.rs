//! Mesh and command generation.
//!
//! Turns one node's resolved style plus its visual-content callback into
//! baked vertices in a device buffer region and a spliced run of commands
//! in the global list. Regeneration is per node: repainting a node never
//! touches its neighbors' meshes or commands.

use crate::geometry::{Color, Rect};
use crate::pipeline::clip::ClipMethod;
use crate::pipeline::commands::{
    find_closing_insertion_point, find_insertion_point, reset_commands, CommandKind, CommandList,
    CustomCommand, MaterialId, TextureId,
};
use crate::pipeline::device::{DeviceError, GpuDevice};
use crate::pipeline::dirty::target_vertex_space;
use crate::pipeline::node::{
    COLOR_CHANNEL_BACKGROUND, COLOR_CHANNEL_BORDER_TOP, COLOR_CHANNEL_TINT,
};
use crate::pipeline::nudge::{MASK_QUAD_INDICES, MASK_QUAD_VERTICES};
use crate::pipeline::properties::{PropertyHandle, PropertyTable};
use crate::pipeline::vertex::GpuVertex;
use crate::scene::{NodeId, SceneTree};
use crate::transform::Transform;

/// Visual-content callback attached to a scene node.
///
/// Implementations record everything the node draws beyond its styled box
/// (images, text runs, custom geometry). The recorder owns all buffer and
/// command bookkeeping; callbacks never see the device.
pub trait PaintContent {
    fn paint(&self, rec: &mut PaintRecorder);
}

/// Text-effect settings (shadow/outline) applied to a text entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextEffect {
    pub offset: [f32; 2],
    pub softness: f32,
    pub thickness: f32,
    pub color: Color,
}

impl TextEffect {
    pub(crate) fn to_page(self) -> [f32; 8] {
        [
            self.offset[0],
            self.offset[1],
            self.softness,
            self.thickness,
            self.color.r,
            self.color.g,
            self.color.b,
            self.color.a,
        ]
    }
}

/// One vertex as recorded by a content callback, in node-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: Color,
}

/// A free-form geometry entry.
#[derive(Debug, Default)]
pub struct ShapeEntry {
    declared_vertices: u32,
    declared_indices: u32,
    vertices: Vec<RecordedVertex>,
    indices: Vec<u32>,
    material: Option<MaterialId>,
    texture: Option<TextureId>,
}

/// A text entry: glyph quads against an atlas texture, optionally carrying
/// an effect and displacement-encoded UVs.
#[derive(Debug)]
pub struct TextEntry {
    declared_vertices: u32,
    declared_indices: u32,
    vertices: Vec<RecordedVertex>,
    indices: Vec<u32>,
    texture: TextureId,
    effect: Option<TextEffect>,
    /// When set, the UV channel carries per-vertex displacement vectors
    /// instead of atlas coordinates and is baked with the linear part of
    /// the vertex space.
    displacement: bool,
}

/// One recorded unit of content, tagged by kind.
#[derive(Debug)]
pub enum Entry {
    Shape(ShapeEntry),
    Text(TextEntry),
    Custom(CustomCommand),
}

/// Collects entries from a content callback.
#[derive(Debug, Default)]
pub struct PaintRecorder {
    entries: Vec<Entry>,
}

impl PaintRecorder {
    /// Start a geometry entry declaring its vertex and index counts.
    pub fn begin_shape(&mut self, vertex_count: u32, index_count: u32) {
        self.entries.push(Entry::Shape(ShapeEntry {
            declared_vertices: vertex_count,
            declared_indices: index_count,
            vertices: Vec::with_capacity(vertex_count as usize),
            indices: Vec::with_capacity(index_count as usize),
            material: None,
            texture: None,
        }));
    }

    /// Start a text entry declaring its counts and atlas texture.
    pub fn begin_text(
        &mut self,
        vertex_count: u32,
        index_count: u32,
        texture: TextureId,
        effect: Option<TextEffect>,
        displacement: bool,
    ) {
        self.entries.push(Entry::Text(TextEntry {
            declared_vertices: vertex_count,
            declared_indices: index_count,
            vertices: Vec::with_capacity(vertex_count as usize),
            indices: Vec::with_capacity(index_count as usize),
            texture,
            effect,
            displacement,
        }));
    }

    /// Material override for the current shape entry.
    pub fn set_material(&mut self, material: MaterialId) {
        if let Some(Entry::Shape(shape)) = self.entries.last_mut() {
            shape.material = Some(material);
        }
    }

    /// Texture for the current shape entry.
    pub fn set_texture(&mut self, texture: TextureId) {
        if let Some(Entry::Shape(shape)) = self.entries.last_mut() {
            shape.texture = Some(texture);
        }
    }

    /// Append a vertex to the current entry.
    pub fn push_vertex(&mut self, position: [f32; 2], uv: [f32; 2], color: Color) {
        let vertex = RecordedVertex {
            position,
            uv,
            color,
        };
        match self.entries.last_mut() {
            Some(Entry::Shape(shape)) => shape.vertices.push(vertex),
            Some(Entry::Text(text)) => text.vertices.push(vertex),
            _ => log::warn!("push_vertex without an open shape or text entry"),
        }
    }

    /// Append a triangle (counter-clockwise front face) to the current
    /// entry, with indices local to the entry.
    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        match self.entries.last_mut() {
            Some(Entry::Shape(shape)) => shape.indices.extend_from_slice(&[a, b, c]),
            Some(Entry::Text(text)) => text.indices.extend_from_slice(&[a, b, c]),
            _ => log::warn!("push_triangle without an open shape or text entry"),
        }
    }

    /// Convenience: a solid axis-aligned quad as its own shape entry.
    pub fn push_rect(&mut self, rect: Rect, color: Color) {
        self.begin_shape(4, 6);
        self.push_quad_vertices(rect, [0.0, 0.0], [1.0, 1.0], color);
    }

    /// Four vertices and two triangles for a quad within the current entry.
    pub fn push_quad_vertices(
        &mut self,
        rect: Rect,
        uv_min: [f32; 2],
        uv_max: [f32; 2],
        color: Color,
    ) {
        let base = match self.entries.last() {
            Some(Entry::Shape(shape)) => shape.vertices.len() as u32,
            Some(Entry::Text(text)) => text.vertices.len() as u32,
            _ => 0,
        };
        let (x0, y0) = (rect.x, rect.y);
        let (x1, y1) = (rect.x + rect.width, rect.y + rect.height);
        self.push_vertex([x0, y0], uv_min, color);
        self.push_vertex([x1, y0], [uv_max[0], uv_min[1]], color);
        self.push_vertex([x1, y1], uv_max, color);
        self.push_vertex([x0, y1], [uv_min[0], uv_max[1]], color);
        self.push_triangle(base, base + 1, base + 2);
        self.push_triangle(base, base + 2, base + 3);
    }

    /// Append an opaque pass-through command at this point of the entry
    /// sequence.
    pub fn push_custom(&mut self, command: CustomCommand) {
        self.entries.push(Entry::Custom(command));
    }
}

/// Regenerate one node's mesh and command runs from scratch.
///
/// The node's previous runs are unlinked first, so a node that became
/// hidden or empty simply ends up with no commands. Never touches other
/// nodes' state.
pub(crate) fn paint_node(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    list: &mut CommandList,
    device: &mut dyn GpuDevice,
    id: NodeId,
) {
    reset_commands(list, tree, id);

    let (inputs, render_hidden) = match tree.get(id) {
        Some(n) => (n.inputs, n.render.hidden),
        None => return,
    };

    if render_hidden {
        release_meshes(tree, table, device, id);
        return;
    }

    // Collect entries: the styled box first, then the content callback.
    let mut recorder = PaintRecorder::default();
    record_style_entries(&mut recorder, &inputs);
    if let Some(content) = tree.take_content(id) {
        content.paint(&mut recorder);
        tree.put_content(id, content);
    }

    let mut entries = std::mem::take(&mut recorder.entries);
    complete_declarations(id, &mut entries);

    let (mut total_vertices, mut total_indices) = totals(&entries);
    if total_vertices > device.max_vertices_per_allocation() {
        log::error!(
            "node {:?} declares {total_vertices} vertices, over the device limit of {}; dropping content",
            id.as_u64(),
            device.max_vertices_per_allocation()
        );
        entries.clear();
        total_vertices = 0;
        total_indices = 0;
    }

    // Bake into the owning slot's space.
    let space = target_vertex_space(tree, id);
    let (pages, flips, method, stencil_ref, world_clip, baked_alpha) = match tree.get(id) {
        Some(n) => (
            base_pages(n),
            n.render.world_flips_winding,
            n.render.clip_method,
            n.render.stencil_ref,
            n.render.world_clip_rect,
            n.render.baked_opacity,
        ),
        None => return,
    };

    // Text-effect slot: owned while any text entry carries an effect.
    let effect = entries.iter().find_map(|e| match e {
        Entry::Text(t) => t.effect,
        _ => None,
    });
    let effect_handle = reconcile_text_effect(tree, table, id, effect);

    let mesh = if total_vertices > 0 {
        match ensure_region(tree, device, id, total_vertices, total_indices) {
            Ok(region) => Some(region),
            Err(err) => {
                log::error!("mesh allocation failed for {:?}: {err}", id.as_u64());
                entries.clear();
                None
            }
        }
    } else {
        release_content_mesh(tree, device, id);
        None
    };

    // Write vertices/indices and collect per-entry draw ranges. Style
    // entries come first and map onto the node's color channels; dynamic
    // channels reference the table, everything else is baked.
    let color_slots = match tree.get(id) {
        Some(n) => n.render.color_slots,
        None => return,
    };
    let style_channels = style_entry_channels(&inputs);
    let mut draws: Vec<DrawRange> = Vec::new();
    let mut displacement_ranges: Vec<(u32, u32)> = Vec::new();
    if let Some(region) = mesh {
        match device.update(&region, total_vertices, total_indices) {
            Ok(views) => {
                let mut ctx = BakeCtx {
                    space: &space,
                    flips,
                    pages,
                    effect_handle,
                    baked_alpha,
                    vertex_cursor: 0,
                    index_cursor: 0,
                };
                for (i, entry) in entries.iter().enumerate() {
                    let color_handle = entry_color_handle(entry, i, &style_channels, &color_slots);
                    bake_entry(
                        entry,
                        &mut ctx,
                        views.vertices,
                        views.indices,
                        color_handle,
                        &mut draws,
                        &mut displacement_ranges,
                    );
                }
            }
            Err(err) => {
                log::error!("mesh update failed for {:?}: {err}", id.as_u64());
                entries.clear();
                draws.clear();
            }
        }
    }

    // One contiguous displacement range or none: anything else can never be
    // nudged again.
    let displacement_range = match displacement_ranges.len() {
        0 => None,
        1 => Some(displacement_ranges[0]),
        _ => {
            if let Some(n) = tree.get_mut(id) {
                n.render.nudge_disabled = true;
            }
            None
        }
    };

    // Mask quad for stencil clips, kept alive for the closing unregister.
    let mask = if method == ClipMethod::Stencil {
        build_mask_quad(tree, device, id, &inputs, &space, &pages, flips)
    } else {
        release_mask_mesh(tree, device, id);
        None
    };

    // Opening run.
    let mut anchor = find_insertion_point(tree, id);
    let mut first = None;
    let mut push = |list: &mut CommandList, kind: CommandKind| {
        let cid = list.insert_after(anchor, id, kind);
        first.get_or_insert(cid);
        anchor = Some(cid);
    };

    if let Some(target) = inputs.render_target {
        push(list, CommandKind::PushRenderTarget(target));
    }
    if let Some(material) = inputs.style.override_material {
        push(list, CommandKind::PushMaterial(material));
    }
    if method == ClipMethod::Scissor {
        push(list, CommandKind::SetScissor(world_clip));
    }
    if let Some(region) = mask {
        push(
            list,
            CommandKind::RegisterMask {
                region,
                index_start: 0,
                index_count: MASK_QUAD_INDICES,
                stencil_ref,
            },
        );
    }
    let mut draw_iter = draws.iter();
    for entry in &entries {
        match entry {
            Entry::Custom(command) => push(list, CommandKind::Custom(*command)),
            Entry::Shape(_) | Entry::Text(_) => {
                if let (Some(region), Some(draw)) = (mesh, draw_iter.next()) {
                    push(
                        list,
                        CommandKind::Draw {
                            region,
                            index_start: draw.index_start,
                            index_count: draw.index_count,
                            material: draw.material,
                            texture: draw.texture,
                            stencil_ref,
                        },
                    );
                }
            }
        }
    }
    let last = anchor;
    let opening_made = first.is_some();
    if let Some(n) = tree.get_mut(id) {
        n.render.first_command = first;
        n.render.last_command = if opening_made { last } else { None };
        n.render.vertices_space = space;
        n.render.mesh_vertex_count = total_vertices;
        n.render.mesh_index_count = total_indices;
        n.render.displacement_range = displacement_range;
    }

    // Closing run, in reverse nesting order of the opening.
    let needs_closing = mask.is_some()
        || method == ClipMethod::Scissor
        || inputs.style.override_material.is_some()
        || inputs.render_target.is_some();
    if needs_closing {
        let mut anchor = find_closing_insertion_point(tree, id);
        let mut first = None;
        let mut push = |list: &mut CommandList, kind: CommandKind| {
            let cid = list.insert_after(anchor, id, kind);
            first.get_or_insert(cid);
            anchor = Some(cid);
        };
        if let Some(region) = mask {
            push(
                list,
                CommandKind::UnregisterMask {
                    region,
                    index_start: 0,
                    index_count: MASK_QUAD_INDICES,
                    stencil_ref,
                },
            );
        }
        if method == ClipMethod::Scissor {
            push(list, CommandKind::ClearScissor);
        }
        if inputs.style.override_material.is_some() {
            push(list, CommandKind::PopMaterial);
        }
        if inputs.render_target.is_some() {
            push(list, CommandKind::PopRenderTarget);
        }
        if let Some(n) = tree.get_mut(id) {
            n.render.first_closing_command = first;
            n.render.last_closing_command = anchor;
        }
    }

    crate::pipeline_stats::record_node_painted();
}

/// Index range drawn out of the node's mesh region for one entry.
struct DrawRange {
    index_start: u32,
    index_count: u32,
    material: MaterialId,
    texture: Option<TextureId>,
}

struct BakeCtx<'a> {
    space: &'a Transform,
    flips: bool,
    pages: [u32; 3],
    effect_handle: PropertyHandle,
    baked_alpha: f32,
    vertex_cursor: u32,
    index_cursor: u32,
}

/// The transform/clip/opacity page indices shared by all of a node's
/// vertices.
fn base_pages(node: &crate::scene::SceneNode) -> [u32; 3] {
    [
        node.render.transform_slot.handle().index(),
        node.render.clip_rect_slot.handle().index(),
        node.render.opacity_slot.handle().index(),
    ]
}

fn totals(entries: &[Entry]) -> (u32, u32) {
    entries.iter().fold((0, 0), |(v, i), entry| match entry {
        Entry::Shape(s) => (v + s.vertices.len() as u32, i + s.indices.len() as u32),
        Entry::Text(t) => (v + t.vertices.len() as u32, i + t.indices.len() as u32),
        Entry::Custom(_) => (v, i),
    })
}

/// Pad under-filled entries up to their declared counts with degenerate
/// data so the declared layout stays valid.
fn complete_declarations(id: NodeId, entries: &mut [Entry]) {
    for entry in entries.iter_mut() {
        let (vertices, indices, declared_v, declared_i) = match entry {
            Entry::Shape(s) => (
                &mut s.vertices,
                &mut s.indices,
                s.declared_vertices,
                s.declared_indices,
            ),
            Entry::Text(t) => (
                &mut t.vertices,
                &mut t.indices,
                t.declared_vertices,
                t.declared_indices,
            ),
            Entry::Custom(_) => continue,
        };
        if (vertices.len() as u32) < declared_v || (indices.len() as u32) < declared_i {
            log::warn!(
                "content for {:?} declared {declared_v}v/{declared_i}i but wrote {}v/{}i; padding with degenerate data",
                id.as_u64(),
                vertices.len(),
                indices.len()
            );
            while (vertices.len() as u32) < declared_v {
                vertices.push(RecordedVertex {
                    position: [0.0, 0.0],
                    uv: [0.0, 0.0],
                    color: Color::TRANSPARENT,
                });
            }
            while (indices.len() as u32) < declared_i {
                indices.push(0);
            }
        }
    }
}

/// Style-derived entries: background fill and border edges.
fn record_style_entries(recorder: &mut PaintRecorder, inputs: &crate::style::NodeInputs) {
    let style = &inputs.style;
    let rect = Rect::new(0.0, 0.0, inputs.geometry.width, inputs.geometry.height);

    if style.background.a > 0.0 || style.dynamic_colors {
        recorder.push_rect(rect, style.background);
    }

    let [top, right, bottom, left] = style.border_widths;
    if top > 0.0 {
        recorder.push_rect(Rect::new(0.0, 0.0, rect.width, top), style.border_colors[0]);
    }
    if right > 0.0 {
        recorder.push_rect(
            Rect::new(rect.width - right, 0.0, right, rect.height),
            style.border_colors[1],
        );
    }
    if bottom > 0.0 {
        recorder.push_rect(
            Rect::new(0.0, rect.height - bottom, rect.width, bottom),
            style.border_colors[2],
        );
    }
    if left > 0.0 {
        recorder.push_rect(Rect::new(0.0, 0.0, left, rect.height), style.border_colors[3]);
    }
}

/// Number of style-derived entries painted ahead of the content callback,
/// used to map entry order onto color channels.
fn style_entry_channels(inputs: &crate::style::NodeInputs) -> Vec<usize> {
    let style = &inputs.style;
    let mut channels = Vec::new();
    if style.background.a > 0.0 || style.dynamic_colors {
        channels.push(COLOR_CHANNEL_BACKGROUND);
    }
    for (side, &width) in style.border_widths.iter().enumerate() {
        if width > 0.0 {
            channels.push(COLOR_CHANNEL_BORDER_TOP + side);
        }
    }
    channels
}

/// Color-table handle an entry's vertices reference: style entries map to
/// the node's owned color channels, textured content to the tint channel,
/// everything else bakes its recorded color.
fn entry_color_handle(
    entry: &Entry,
    index: usize,
    style_channels: &[usize],
    color_slots: &[Option<PropertyHandle>; crate::pipeline::node::COLOR_CHANNEL_COUNT],
) -> PropertyHandle {
    match entry {
        Entry::Shape(_) if index < style_channels.len() => {
            color_slots[style_channels[index]].unwrap_or(PropertyHandle::DEFAULT)
        }
        Entry::Shape(s) if s.texture.is_some() => {
            color_slots[COLOR_CHANNEL_TINT].unwrap_or(PropertyHandle::DEFAULT)
        }
        Entry::Text(_) => color_slots[COLOR_CHANNEL_TINT].unwrap_or(PropertyHandle::DEFAULT),
        _ => PropertyHandle::DEFAULT,
    }
}

#[allow(clippy::too_many_arguments)]
fn bake_entry(
    entry: &Entry,
    ctx: &mut BakeCtx<'_>,
    vertices: &mut [GpuVertex],
    indices: &mut [u32],
    color_handle: PropertyHandle,
    draws: &mut Vec<DrawRange>,
    displacement_ranges: &mut Vec<(u32, u32)>,
) {
    let (entry_vertices, entry_indices, material, texture, displacement) = match entry {
        Entry::Shape(s) => (
            &s.vertices,
            &s.indices,
            s.material.unwrap_or(MaterialId(0)),
            s.texture,
            false,
        ),
        Entry::Text(t) => (
            &t.vertices,
            &t.indices,
            MaterialId(0),
            Some(t.texture),
            t.displacement,
        ),
        Entry::Custom(_) => return,
    };

    let base = ctx.vertex_cursor;
    let color_page = GpuVertex::pack_color_pages(color_handle, ctx.effect_handle);
    // Table-driven colors render white vertices; the shader multiplies in
    // the page value, so recolors are pure table writes.
    let table_color = color_handle != PropertyHandle::DEFAULT;

    for recorded in entry_vertices {
        let (x, y) = ctx
            .space
            .transform_point(recorded.position[0], recorded.position[1]);
        let uv = if displacement {
            let (u, v) = ctx.space.transform_vector(recorded.uv[0], recorded.uv[1]);
            [u, v]
        } else {
            recorded.uv
        };
        let color = if table_color {
            [1.0, 1.0, 1.0, ctx.baked_alpha]
        } else {
            [
                recorded.color.r,
                recorded.color.g,
                recorded.color.b,
                recorded.color.a * ctx.baked_alpha,
            ]
        };
        let slot = &mut vertices[ctx.vertex_cursor as usize];
        *slot = GpuVertex {
            position: [x, y],
            uv,
            color,
            pages: [ctx.pages[0], ctx.pages[1], ctx.pages[2], color_page],
        };
        ctx.vertex_cursor += 1;
    }

    if displacement && !entry_vertices.is_empty() {
        displacement_ranges.push((base, ctx.vertex_cursor));
    }

    let index_start = ctx.index_cursor;
    for triangle in entry_indices.chunks_exact(3) {
        let (a, b, c) = (triangle[0], triangle[1], triangle[2]);
        // Reversed winding under a mirroring transform keeps front faces
        // front-facing.
        let (b, c) = if ctx.flips { (c, b) } else { (b, c) };
        indices[ctx.index_cursor as usize] = base + a;
        indices[ctx.index_cursor as usize + 1] = base + b;
        indices[ctx.index_cursor as usize + 2] = base + c;
        ctx.index_cursor += 3;
    }

    draws.push(DrawRange {
        index_start,
        index_count: ctx.index_cursor - index_start,
        material,
        texture,
    });
}

/// Reuse the node's mesh region when its capacity suffices, otherwise
/// free-then-reallocate.
fn ensure_region(
    tree: &mut SceneTree,
    device: &mut dyn GpuDevice,
    id: NodeId,
    vertex_count: u32,
    index_count: u32,
) -> Result<crate::pipeline::device::BufferRegion, DeviceError> {
    let existing = tree.get(id).and_then(|n| n.render.mesh);
    if let Some(region) = existing {
        if let Some((vcap, icap)) = device.capacity(&region) {
            if vcap >= vertex_count && icap >= index_count {
                return Ok(region);
            }
        }
        device.free(region);
        if let Some(n) = tree.get_mut(id) {
            n.render.mesh = None;
        }
    }
    let region = device.allocate(vertex_count, index_count)?;
    if let Some(n) = tree.get_mut(id) {
        n.render.mesh = Some(region);
    }
    Ok(region)
}

fn release_content_mesh(tree: &mut SceneTree, device: &mut dyn GpuDevice, id: NodeId) {
    if let Some(n) = tree.get_mut(id) {
        if let Some(region) = n.render.mesh.take() {
            n.render.mesh_vertex_count = 0;
            n.render.mesh_index_count = 0;
            device.free(region);
        }
    }
}

fn release_mask_mesh(tree: &mut SceneTree, device: &mut dyn GpuDevice, id: NodeId) {
    if let Some(n) = tree.get_mut(id) {
        if let Some(region) = n.render.closing_mesh.take() {
            device.free(region);
        }
    }
}

/// Free both meshes and return the text-effect slot (hidden nodes and
/// removals).
pub(crate) fn release_meshes(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    device: &mut dyn GpuDevice,
    id: NodeId,
) {
    release_content_mesh(tree, device, id);
    release_mask_mesh(tree, device, id);
    if let Some(n) = tree.get_mut(id) {
        if let Some(handle) = n.render.text_effect_slot.take() {
            table.free_text_effect(handle);
        }
        n.render.displacement_range = None;
    }
}

fn reconcile_text_effect(
    tree: &mut SceneTree,
    table: &mut PropertyTable,
    id: NodeId,
    effect: Option<TextEffect>,
) -> PropertyHandle {
    let current = tree.get(id).and_then(|n| n.render.text_effect_slot);
    match (effect, current) {
        (Some(effect), Some(handle)) => {
            table.set_text_effect(handle, &effect.to_page());
            handle
        }
        (Some(effect), None) => match table.alloc_text_effect() {
            Ok(handle) => {
                table.set_text_effect(handle, &effect.to_page());
                if let Some(n) = tree.get_mut(id) {
                    n.render.text_effect_slot = Some(handle);
                }
                handle
            }
            Err(err) => {
                log::warn!("text-effect slot allocation failed for {:?}: {err}", id.as_u64());
                crate::pipeline_stats::record_property_exhausted();
                PropertyHandle::DEFAULT
            }
        },
        (None, Some(handle)) => {
            table.free_text_effect(handle);
            if let Some(n) = tree.get_mut(id) {
                n.render.text_effect_slot = None;
            }
            PropertyHandle::DEFAULT
        }
        (None, None) => PropertyHandle::DEFAULT,
    }
}

/// Allocate (or reuse) and fill the 4-vertex mask quad used by both the
/// register and unregister stencil commands.
fn build_mask_quad(
    tree: &mut SceneTree,
    device: &mut dyn GpuDevice,
    id: NodeId,
    inputs: &crate::style::NodeInputs,
    space: &Transform,
    pages: &[u32; 3],
    flips: bool,
) -> Option<crate::pipeline::device::BufferRegion> {
    let region = match tree.get(id).and_then(|n| n.render.closing_mesh) {
        Some(region) => region,
        None => match device.allocate(MASK_QUAD_VERTICES, MASK_QUAD_INDICES) {
            Ok(region) => {
                if let Some(n) = tree.get_mut(id) {
                    n.render.closing_mesh = Some(region);
                }
                region
            }
            Err(err) => {
                log::error!("mask quad allocation failed for {:?}: {err}", id.as_u64());
                return None;
            }
        },
    };

    let views = match device.update(&region, MASK_QUAD_VERTICES, MASK_QUAD_INDICES) {
        Ok(views) => views,
        Err(err) => {
            log::error!("mask quad update failed for {:?}: {err}", id.as_u64());
            return None;
        }
    };

    let (w, h) = (inputs.geometry.width, inputs.geometry.height);
    let corners = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]];
    for (slot, corner) in views.vertices.iter_mut().zip(corners) {
        let (x, y) = space.transform_point(corner[0], corner[1]);
        *slot = GpuVertex {
            position: [x, y],
            uv: [corner[0] / w.max(1.0), corner[1] / h.max(1.0)],
            color: Color::WHITE.to_array(),
            pages: [
                pages[0],
                pages[1],
                pages[2],
                GpuVertex::pack_color_pages(PropertyHandle::DEFAULT, PropertyHandle::DEFAULT),
            ],
        };
    }
    let tris: [u32; 6] = if flips {
        [0, 2, 1, 0, 3, 2]
    } else {
        [0, 1, 2, 0, 2, 3]
    };
    views.indices.copy_from_slice(&tris);
    Some(region)
}
