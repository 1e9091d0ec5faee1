//! Nudge fast path: patch baked vertices in place after a transform drift.
//!
//! When a node's target vertex space moved but nothing else about it
//! changed, regenerating the mesh and re-splicing commands is wasted work.
//! The nudge computes the delta between the old baked space and the new
//! one, verifies it round-trips within tolerance, and rewrites positions
//! (and displacement UVs) directly in the existing buffer region.

use crate::pipeline::device::GpuDevice;
use crate::pipeline::dirty::target_vertex_space;
use crate::pipeline::PipelineConfig;
use crate::scene::{NodeId, SceneTree};
use crate::transform::Transform;

/// What the visuals stage should do with the node after a nudge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NudgeOutcome {
    /// Vertices were patched; mesh and commands are current again.
    Patched,
    /// The delta could not be applied; regenerate the node fully.
    Repaint,
}

/// Try to patch a node's baked vertices into its new target space.
///
/// Falls back to `Repaint` when the node has no mesh yet, nudging was
/// permanently disabled, or the delta does not round-trip the old space
/// onto the new one within `config.nudge_epsilon` (accumulated float error
/// would otherwise creep into the geometry, one nudge at a time).
pub(crate) fn try_nudge(
    tree: &mut SceneTree,
    device: &mut dyn GpuDevice,
    config: &PipelineConfig,
    id: NodeId,
) -> NudgeOutcome {
    let (mesh, vertex_count, index_count, closing_mesh, old_space, disabled, displacement_range) =
        match tree.get(id) {
            Some(n) => (
                n.render.mesh,
                n.render.mesh_vertex_count,
                n.render.mesh_index_count,
                n.render.closing_mesh,
                n.render.vertices_space,
                n.render.nudge_disabled,
                n.render.displacement_range,
            ),
            None => return NudgeOutcome::Repaint,
        };

    if disabled {
        crate::pipeline_stats::record_nudge_fallback();
        return NudgeOutcome::Repaint;
    }
    let region = match mesh {
        Some(region) => region,
        None => return NudgeOutcome::Repaint,
    };

    let new_space = target_vertex_space(tree, id);
    let delta = new_space.then(&old_space.inverse());

    // Round-trip guard: a degenerate or ill-conditioned old space produces
    // a delta that does not actually map old onto new.
    if !delta.then(&old_space).approx_eq(&new_space, config.nudge_epsilon) {
        crate::pipeline_stats::record_nudge_fallback();
        return NudgeOutcome::Repaint;
    }

    match device.update(&region, vertex_count, index_count) {
        Ok(views) => {
            patch_vertices(views.vertices, &delta, displacement_range);
        }
        Err(err) => {
            log::warn!("nudge update failed for {:?}: {err}", id.as_u64());
            crate::pipeline_stats::record_nudge_fallback();
            return NudgeOutcome::Repaint;
        }
    }

    // The mask quad is baked in the same space as the content mesh.
    if let Some(closing) = closing_mesh {
        match device.update(&closing, MASK_QUAD_VERTICES, MASK_QUAD_INDICES) {
            Ok(views) => patch_vertices(views.vertices, &delta, None),
            Err(err) => {
                log::warn!("nudge of mask quad failed for {:?}: {err}", id.as_u64());
                crate::pipeline_stats::record_nudge_fallback();
                return NudgeOutcome::Repaint;
            }
        }
    }

    if let Some(n) = tree.get_mut(id) {
        n.render.vertices_space = new_space;
    }
    crate::pipeline_stats::record_node_nudged();
    NudgeOutcome::Patched
}

/// Vertex/index counts of the stencil mask quad (see `painter`).
pub(crate) const MASK_QUAD_VERTICES: u32 = 4;
pub(crate) const MASK_QUAD_INDICES: u32 = 6;

fn patch_vertices(
    vertices: &mut [crate::pipeline::vertex::GpuVertex],
    delta: &Transform,
    displacement_range: Option<(u32, u32)>,
) {
    for (i, vertex) in vertices.iter_mut().enumerate() {
        let (x, y) = delta.transform_point(vertex.position[0], vertex.position[1]);
        vertex.position = [x, y];

        // Displacement UVs carry offsets, not positions: only the linear
        // part of the delta applies.
        if let Some((start, end)) = displacement_range {
            let i = i as u32;
            if i >= start && i < end {
                let (u, v) = delta.transform_vector(vertex.uv[0], vertex.uv[1]);
                vertex.uv = [u, v];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::pipeline::device::CpuDevice;
    use crate::pipeline::vertex::GpuVertex;
    use crate::style::NodeInputs;

    fn node_with_mesh(
        tree: &mut SceneTree,
        device: &mut CpuDevice,
        positions: &[[f32; 2]],
    ) -> NodeId {
        let root = tree.insert_root(NodeInputs {
            geometry: Rect::new(0.0, 0.0, 100.0, 100.0),
            ..NodeInputs::default()
        });
        let id = tree.insert_child(root, NodeInputs::default()).unwrap();

        let region = device
            .allocate(positions.len() as u32, positions.len() as u32)
            .unwrap();
        {
            let views = device
                .update(&region, positions.len() as u32, positions.len() as u32)
                .unwrap();
            for (v, &p) in views.vertices.iter_mut().zip(positions) {
                *v = GpuVertex {
                    position: p,
                    ..GpuVertex::DEGENERATE
                };
            }
        }
        let n = tree.get_mut(id).unwrap();
        n.render.mesh = Some(region);
        n.render.mesh_vertex_count = positions.len() as u32;
        n.render.mesh_index_count = positions.len() as u32;
        id
    }

    fn prepare_drift(tree: &mut SceneTree, id: NodeId, dx: f32, dy: f32) {
        // Parent owns the identity slot; the child's world moved by (dx, dy)
        // while its baked space is still identity.
        let root = tree.parent(id).unwrap();
        tree.get_mut(root).unwrap().render.transform_slot =
            crate::pipeline::node::SlotRef::Owned(
                crate::pipeline::properties::PropertyHandle::DEFAULT,
            );
        let n = tree.get_mut(id).unwrap();
        n.render.world_transform = Transform::translate(dx, dy);
        n.render.vertices_space = Transform::IDENTITY;
    }

    #[test]
    fn test_nudge_patches_positions() {
        let mut tree = SceneTree::new();
        let mut device = CpuDevice::default();
        let id = node_with_mesh(&mut tree, &mut device, &[[0.0, 0.0], [10.0, 5.0]]);
        prepare_drift(&mut tree, id, 7.0, -2.0);

        let outcome = try_nudge(&mut tree, &mut device, &PipelineConfig::default(), id);
        assert_eq!(outcome, NudgeOutcome::Patched);

        let region = tree.get(id).unwrap().render.mesh.unwrap();
        let vertices = device.read_vertices(&region).unwrap();
        assert_eq!(vertices[0].position, [7.0, -2.0]);
        assert_eq!(vertices[1].position, [17.0, 3.0]);
        assert_eq!(
            tree.get(id).unwrap().render.vertices_space,
            Transform::translate(7.0, -2.0)
        );
    }

    #[test]
    fn test_nudge_without_mesh_repaints() {
        let mut tree = SceneTree::new();
        let mut device = CpuDevice::default();
        let root = tree.insert_root(NodeInputs::default());
        let outcome = try_nudge(&mut tree, &mut device, &PipelineConfig::default(), root);
        assert_eq!(outcome, NudgeOutcome::Repaint);
    }

    #[test]
    fn test_disabled_node_repaints() {
        let mut tree = SceneTree::new();
        let mut device = CpuDevice::default();
        let id = node_with_mesh(&mut tree, &mut device, &[[0.0, 0.0]]);
        prepare_drift(&mut tree, id, 1.0, 0.0);
        tree.get_mut(id).unwrap().render.nudge_disabled = true;

        let outcome = try_nudge(&mut tree, &mut device, &PipelineConfig::default(), id);
        assert_eq!(outcome, NudgeOutcome::Repaint);
    }

    #[test]
    fn test_degenerate_old_space_fails_round_trip() {
        let mut tree = SceneTree::new();
        let mut device = CpuDevice::default();
        let id = node_with_mesh(&mut tree, &mut device, &[[0.0, 0.0]]);
        prepare_drift(&mut tree, id, 3.0, 0.0);
        // Zero-scale old space cannot be inverted onto the new one.
        tree.get_mut(id).unwrap().render.vertices_space = Transform::scale(0.0);

        let outcome = try_nudge(&mut tree, &mut device, &PipelineConfig::default(), id);
        assert_eq!(outcome, NudgeOutcome::Repaint);
    }

    #[test]
    fn test_displacement_uvs_get_linear_part_only() {
        let mut tree = SceneTree::new();
        let mut device = CpuDevice::default();
        let id = node_with_mesh(&mut tree, &mut device, &[[0.0, 0.0], [1.0, 1.0]]);
        let region = tree.get(id).unwrap().render.mesh.unwrap();
        {
            let views = device.update(&region, 2, 2).unwrap();
            views.vertices[1].uv = [2.0, 0.0];
        }
        tree.get_mut(id).unwrap().render.displacement_range = Some((1, 2));

        // Drift by scale 2: positions scale, displacement UVs scale, but the
        // translation part must not leak into the UVs.
        let root = tree.parent(id).unwrap();
        tree.get_mut(root).unwrap().render.transform_slot =
            crate::pipeline::node::SlotRef::Owned(
                crate::pipeline::properties::PropertyHandle::DEFAULT,
            );
        let n = tree.get_mut(id).unwrap();
        n.render.world_transform = Transform::translate(5.0, 0.0).then(&Transform::scale(2.0));
        n.render.vertices_space = Transform::IDENTITY;

        let outcome = try_nudge(&mut tree, &mut device, &PipelineConfig::default(), id);
        assert_eq!(outcome, NudgeOutcome::Patched);

        let vertices = device.read_vertices(&region).unwrap();
        assert_eq!(vertices[1].position, [7.0, 2.0]);
        assert_eq!(vertices[1].uv, [4.0, 0.0]);
        // The position-only vertex kept its UV untouched.
        assert_eq!(vertices[0].uv, [0.0, 0.0]);
    }
}
