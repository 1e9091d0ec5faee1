//! The retained-mode rendering pipeline.
//!
//! `RenderPipeline` owns the scene tree, the GPU-resident property table
//! and the global command list. External systems push resolved inputs and
//! hierarchy changes in, then call [`RenderPipeline::flush`] once per frame;
//! the pipeline runs the propagation passes over the dirty subtrees,
//! regenerates (or nudges) the affected meshes, and leaves an ordered
//! command list ready for execution.

pub mod clip;
pub mod commands;
pub mod device;
pub mod dirty;
pub mod node;
pub mod nudge;
pub mod painter;
pub mod properties;
pub mod vertex;
pub mod wgpu_device;

use std::collections::HashSet;

use crate::pipeline::commands::{reset_commands, CommandIter, CommandList};
use crate::pipeline::device::GpuDevice;
use crate::pipeline::dirty::DirtyFlags;
use crate::pipeline::node::NodeRenderData;
use crate::pipeline::nudge::{try_nudge, NudgeOutcome};
use crate::pipeline::painter::{paint_node, PaintContent};
use crate::pipeline::properties::{PropertyCapacities, PropertyTable};
use crate::scene::{NodeId, SceneTree};
use crate::style::NodeInputs;

/// Tunables of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Stencil nesting budget (hardware stencil bits constrain this).
    pub max_mask_depth: u8,
    /// Composite opacities at or below this are treated as invisible.
    pub opacity_epsilon: f32,
    /// Round-trip tolerance for the nudge delta check.
    pub nudge_epsilon: f32,
    /// Property-table slot capacities per category.
    pub capacities: PropertyCapacities,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_mask_depth: 7,
            opacity_epsilon: 1e-30,
            nudge_epsilon: 1e-4,
            capacities: PropertyCapacities::default(),
        }
    }
}

/// The pipeline facade.
pub struct RenderPipeline {
    tree: SceneTree,
    table: PropertyTable,
    list: CommandList,
    config: PipelineConfig,
    /// Monotonic flush counter; pass stamps compare against it.
    generation: u64,
    /// Nodes explicitly marked since the last flush, in marking order.
    dirty_nodes: Vec<NodeId>,
    dirty_set: HashSet<NodeId>,
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl RenderPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            tree: SceneTree::new(),
            table: PropertyTable::new(config.capacities),
            list: CommandList::new(),
            config,
            generation: 0,
            dirty_nodes: Vec::new(),
            dirty_set: HashSet::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Add a root node. New nodes start fully dirty.
    pub fn insert_root(&mut self, inputs: NodeInputs) -> NodeId {
        let id = self.tree.insert_root(inputs);
        self.mark(id);
        id
    }

    /// Add a child at the end of `parent`'s child list.
    pub fn insert_child(&mut self, parent: NodeId, inputs: NodeInputs) -> Option<NodeId> {
        let id = self.tree.insert_child(parent, inputs)?;
        self.mark(id);
        Some(id)
    }

    /// Add a child at a specific sibling index.
    pub fn insert_child_at(
        &mut self,
        parent: NodeId,
        index: usize,
        inputs: NodeInputs,
    ) -> Option<NodeId> {
        let id = self.tree.insert_child_at(parent, index, inputs)?;
        self.mark(id);
        Some(id)
    }

    /// Attach (or replace) a node's visual-content callback.
    pub fn set_content(&mut self, id: NodeId, content: Box<dyn PaintContent>) {
        if let Some(n) = self.tree.get_mut(id) {
            n.content = Some(content);
            n.dirty |= DirtyFlags::VISUALS;
            self.mark(id);
        }
    }

    /// Drop a node's visual-content callback; only the styled box remains.
    pub fn clear_content(&mut self, id: NodeId) {
        if let Some(n) = self.tree.get_mut(id) {
            if n.content.take().is_some() {
                n.dirty |= DirtyFlags::VISUALS;
                self.mark(id);
            }
        }
    }

    /// Replace a node's resolved inputs, diffing them into dirty
    /// categories. Returns `false` for a stale id.
    pub fn update_inputs(&mut self, id: NodeId, inputs: NodeInputs) -> bool {
        let flags = match self.tree.get(id) {
            Some(n) => DirtyFlags::from_input_change(&n.inputs, &inputs),
            None => return false,
        };
        if let Some(n) = self.tree.get_mut(id) {
            n.inputs = inputs;
            if !flags.is_empty() {
                n.dirty |= flags;
            }
        }
        if !flags.is_empty() {
            self.mark(id);
        }
        true
    }

    /// Explicitly mark dirty categories on a node (escape hatch for inputs
    /// mutated in place).
    pub fn mark_dirty(&mut self, id: NodeId, flags: DirtyFlags) {
        if let Some(n) = self.tree.get_mut(id) {
            n.dirty |= flags;
            self.mark(id);
        }
    }

    /// Remove a subtree, releasing its commands, buffer regions and
    /// property slots.
    pub fn remove(&mut self, device: &mut dyn GpuDevice, id: NodeId) {
        for removed in self.tree.collect_subtree(id) {
            reset_commands(&mut self.list, &mut self.tree, removed);
            painter::release_meshes(&mut self.tree, &mut self.table, device, removed);
            self.release_property_slots(removed);
        }
        self.tree.remove_subtree(id);
    }

    fn release_property_slots(&mut self, id: NodeId) {
        let render = match self.tree.get(id) {
            Some(n) => &n.render,
            None => return,
        };
        let transform = render.transform_slot.owned();
        let clip = render.clip_rect_slot.owned();
        let opacity = render.opacity_slot.owned();
        let colors = render.color_slots;

        if let Some(handle) = transform {
            self.table.free_transform(handle);
        }
        if let Some(handle) = clip {
            self.table.free_clip_rect(handle);
        }
        if let Some(handle) = opacity {
            self.table.free_opacity(handle);
        }
        for handle in colors.into_iter().flatten() {
            self.table.free_color(handle);
        }
    }

    fn mark(&mut self, id: NodeId) {
        if self.dirty_set.insert(id) {
            self.dirty_nodes.push(id);
        }
    }

    /// Run one frame: propagate dirty state, regenerate or nudge affected
    /// meshes, splice commands, and upload the property table if it
    /// changed.
    pub fn flush(&mut self, device: &mut dyn GpuDevice) {
        self.generation += 1;
        self.dirty_set.clear();
        let mut roots: Vec<NodeId> = std::mem::take(&mut self.dirty_nodes)
            .into_iter()
            .filter(|&id| self.tree.contains(id))
            .collect();
        // Ancestors before descendants; the passes rely on it.
        roots.sort_by_key(|&id| self.tree.depth(id));

        dirty::clipping_pass(
            &mut self.tree,
            &mut self.table,
            &self.config,
            self.generation,
            &roots,
        );
        dirty::opacity_pass(
            &mut self.tree,
            &mut self.table,
            &self.config,
            self.generation,
            &roots,
        );
        dirty::color_pass(&mut self.tree, &mut self.table, self.generation, &roots);
        dirty::transform_pass(&mut self.tree, &mut self.table, self.generation, &roots);

        // Visuals stage: the passes may have raised VISUALS/NUDGE anywhere
        // inside the dirty subtrees.
        let mut seen = HashSet::new();
        for &root in &roots {
            for id in self.tree.collect_subtree(root) {
                if !seen.insert(id) {
                    continue;
                }
                let flags = match self.tree.get(id) {
                    Some(n) => n.dirty,
                    None => continue,
                };
                if flags.contains(DirtyFlags::VISUALS) {
                    paint_node(
                        &mut self.tree,
                        &mut self.table,
                        &mut self.list,
                        device,
                        id,
                    );
                } else if flags.contains(DirtyFlags::NUDGE) {
                    if try_nudge(&mut self.tree, device, &self.config, id) == NudgeOutcome::Repaint
                    {
                        paint_node(
                            &mut self.tree,
                            &mut self.table,
                            &mut self.list,
                            device,
                            id,
                        );
                    }
                }
                if let Some(n) = self.tree.get_mut(id) {
                    n.dirty = DirtyFlags::empty();
                }
            }
        }

        if self.table.take_dirty() {
            device.upload_properties(&self.table);
            crate::pipeline_stats::record_property_upload();
        }
        crate::pipeline_stats::end_flush();
    }

    /// Commands in execution order.
    pub fn commands(&self) -> CommandIter<'_> {
        self.list.iter()
    }

    pub fn command_count(&self) -> usize {
        self.list.len()
    }

    /// Number of live scene nodes.
    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.tree.contains(id)
    }

    /// A node's current render-derived state.
    pub fn render_data(&self, id: NodeId) -> Option<&NodeRenderData> {
        self.tree.get(id).map(|n| &n.render)
    }

    /// The CPU image of the property table (read-only).
    pub fn property_table(&self) -> &PropertyTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Color, Rect};
    use crate::pipeline::device::CpuDevice;

    fn styled(x: f32, y: f32, w: f32, h: f32, background: Color) -> NodeInputs {
        let mut inputs = NodeInputs {
            geometry: Rect::new(x, y, w, h),
            ..NodeInputs::default()
        };
        inputs.style.background = background;
        inputs
    }

    #[test]
    fn test_flush_paints_new_nodes_in_order() {
        let mut pipeline = RenderPipeline::default();
        let mut device = CpuDevice::default();

        let root = pipeline.insert_root(styled(0.0, 0.0, 100.0, 100.0, Color::BLACK));
        let a = pipeline
            .insert_child(root, styled(0.0, 0.0, 10.0, 10.0, Color::WHITE))
            .unwrap();
        let b = pipeline
            .insert_child(root, styled(20.0, 0.0, 10.0, 10.0, Color::WHITE))
            .unwrap();
        pipeline.flush(&mut device);

        let owners: Vec<_> = pipeline.commands().map(|(_, c)| c.owner).collect();
        assert_eq!(owners, vec![root, a, b]);
        assert_eq!(device.property_uploads(), 1);
    }

    #[test]
    fn test_clean_flush_is_no_op() {
        let mut pipeline = RenderPipeline::default();
        let mut device = CpuDevice::default();
        pipeline.insert_root(styled(0.0, 0.0, 100.0, 100.0, Color::BLACK));
        pipeline.flush(&mut device);

        let commands_before = pipeline.command_count();
        pipeline.flush(&mut device);
        assert_eq!(pipeline.command_count(), commands_before);
        // Nothing changed, so the table was not re-uploaded.
        assert_eq!(device.property_uploads(), 1);
    }

    #[test]
    fn test_remove_releases_everything() {
        let mut pipeline = RenderPipeline::default();
        let mut device = CpuDevice::default();
        let root = pipeline.insert_root(styled(0.0, 0.0, 100.0, 100.0, Color::BLACK));
        let child = pipeline
            .insert_child(root, styled(0.0, 0.0, 10.0, 10.0, Color::WHITE))
            .unwrap();
        pipeline.flush(&mut device);
        assert!(device.live_regions() > 0);

        pipeline.remove(&mut device, root);
        assert!(!pipeline.contains(root));
        assert!(!pipeline.contains(child));
        assert_eq!(pipeline.command_count(), 0);
        assert_eq!(device.live_regions(), 0);
        assert_eq!(pipeline.node_count(), 0);
    }

    #[test]
    fn test_update_inputs_diffs_categories() {
        let mut pipeline = RenderPipeline::default();
        let mut device = CpuDevice::default();
        let root = pipeline.insert_root(styled(0.0, 0.0, 100.0, 100.0, Color::BLACK));
        pipeline.flush(&mut device);

        let moved = styled(50.0, 0.0, 100.0, 100.0, Color::BLACK);
        assert!(pipeline.update_inputs(root, moved));
        assert!(pipeline
            .render_data(root)
            .is_some_and(|_| pipeline.tree.get(root).unwrap().dirty.contains(DirtyFlags::TRANSFORM)));

        pipeline.flush(&mut device);
        let (x, _) = pipeline
            .render_data(root)
            .unwrap()
            .world_transform
            .transform_point(0.0, 0.0);
        assert_eq!(x, 50.0);
    }
}
