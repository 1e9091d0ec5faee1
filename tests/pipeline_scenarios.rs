//! End-to-end pipeline scenarios against the in-memory device.

use glaze::pipeline::node::SlotRef;
use glaze::prelude::*;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn boxed(x: f32, y: f32, w: f32, h: f32) -> NodeInputs {
    let mut inputs = NodeInputs {
        geometry: Rect::new(x, y, w, h),
        ..NodeInputs::default()
    };
    inputs.style.background = Color::WHITE;
    inputs
}

fn owners(pipeline: &RenderPipeline) -> Vec<NodeId> {
    pipeline.commands().map(|(_, c)| c.owner).collect()
}

fn command_ids(pipeline: &RenderPipeline) -> Vec<CommandId> {
    pipeline.commands().map(|(id, _)| id).collect()
}

#[test]
fn test_composite_opacity_multiplies_down_the_tree() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let mut root_inputs = boxed(0.0, 0.0, 100.0, 100.0);
    root_inputs.style.opacity = 0.8;
    let root = pipeline.insert_root(root_inputs);

    let mut a_inputs = boxed(0.0, 0.0, 50.0, 50.0);
    a_inputs.style.opacity = 0.5;
    let a = pipeline.insert_child(root, a_inputs).unwrap();

    let b = pipeline.insert_child(a, boxed(0.0, 0.0, 25.0, 25.0)).unwrap();

    let mut c_inputs = boxed(0.0, 0.0, 10.0, 10.0);
    c_inputs.style.opacity = 0.25;
    let c = pipeline.insert_child(b, c_inputs).unwrap();

    pipeline.flush(&mut device);

    let composite =
        |id: NodeId| pipeline.render_data(id).unwrap().composite_opacity;
    assert!((composite(root) - 0.8).abs() < 1e-6);
    assert!((composite(a) - 0.4).abs() < 1e-6);
    assert!((composite(b) - 0.4).abs() < 1e-6);
    assert!((composite(c) - 0.1).abs() < 1e-6);

    // A node's composite never exceeds its parent's.
    for (parent, child) in [(root, a), (a, b), (b, c)] {
        assert!(composite(child) <= composite(parent) + 1e-6);
    }

    // Only nodes whose own opacity diverges from 1 hold a slot; the
    // passthrough node shares its parent's.
    let slot = |id: NodeId| pipeline.render_data(id).unwrap().opacity_slot;
    assert!(slot(root).is_owned());
    assert!(slot(a).is_owned());
    assert!(matches!(slot(b), SlotRef::Inherited(h) if h == slot(a).handle()));
    assert!(slot(c).is_owned());

    // The slot carries the composite, not the local value.
    let table = pipeline.property_table();
    let value = table.slot_values(PropertyKind::Opacity, slot(c).handle())[0];
    assert!((value - 0.1).abs() < 1e-6);
}

#[test]
fn test_stencil_depth_respects_budget() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let clipper = |i: u32| {
        let size = 200.0 - i as f32 * 10.0;
        let mut inputs = boxed(2.0, 2.0, size, size);
        inputs.style.clips_children = true;
        inputs.style.radii = CornerRadii::uniform(4.0);
        inputs.hints.content_overflows = true;
        inputs
    };

    let root = pipeline.insert_root(boxed(0.0, 0.0, 220.0, 220.0));
    let mut parent = root;
    let mut chain = Vec::new();
    for i in 0..10 {
        parent = pipeline.insert_child(parent, clipper(i)).unwrap();
        chain.push(parent);
    }
    pipeline.flush(&mut device);

    for (i, &id) in chain.iter().enumerate() {
        let render = pipeline.render_data(id).unwrap();
        assert!(render.stencil_ref <= render.mask_depth);
        assert!(render.mask_depth <= 7);
        if i < 7 {
            assert_eq!(render.clip_method, ClipMethod::Stencil);
            assert_eq!(render.mask_depth, i as u8 + 1);
            assert_eq!(render.stencil_ref, i as u8 + 1);
        } else {
            // Budget exhausted: the shape is enforced in the shader instead.
            assert_eq!(render.clip_method, ClipMethod::ShaderDiscard);
            assert_eq!(render.mask_depth, 7);
        }
    }
}

#[test]
fn test_second_flush_changes_nothing() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let mut root_inputs = boxed(0.0, 0.0, 100.0, 100.0);
    root_inputs.style.opacity = 0.5;
    let root = pipeline.insert_root(root_inputs);
    let mut clip_inputs = boxed(10.0, 10.0, 50.0, 50.0);
    clip_inputs.style.clips_children = true;
    clip_inputs.style.radii = CornerRadii::uniform(3.0);
    clip_inputs.hints.content_overflows = true;
    let clip = pipeline.insert_child(root, clip_inputs).unwrap();
    let leaf = pipeline.insert_child(clip, boxed(0.0, 0.0, 80.0, 20.0)).unwrap();

    pipeline.flush(&mut device);
    let ids = command_ids(&pipeline);
    let uploads = device.property_uploads();
    let regions = device.live_regions();
    let leaf_region = pipeline.render_data(leaf).unwrap().mesh.unwrap();
    let leaf_vertices = device.read_vertices(&leaf_region).unwrap().to_vec();

    pipeline.flush(&mut device);
    assert_eq!(command_ids(&pipeline), ids);
    assert_eq!(device.property_uploads(), uploads);
    assert_eq!(device.live_regions(), regions);
    assert_eq!(device.read_vertices(&leaf_region).unwrap(), &leaf_vertices[..]);
    assert_eq!(
        pipeline.render_data(root).unwrap().composite_opacity,
        0.5
    );
}

#[test]
fn test_command_order_tracks_paint_order_across_edits() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let root = pipeline.insert_root(boxed(0.0, 0.0, 300.0, 300.0));
    let a = pipeline.insert_child(root, boxed(0.0, 0.0, 100.0, 100.0)).unwrap();
    let a1 = pipeline.insert_child(a, boxed(5.0, 5.0, 10.0, 10.0)).unwrap();
    let b = pipeline.insert_child(root, boxed(100.0, 0.0, 100.0, 100.0)).unwrap();
    let b1 = pipeline.insert_child(b, boxed(5.0, 5.0, 10.0, 10.0)).unwrap();
    pipeline.flush(&mut device);
    assert_eq!(owners(&pipeline), vec![root, a, a1, b, b1]);

    // A sibling spliced between existing subtrees lands between them.
    let m = pipeline
        .insert_child_at(root, 1, boxed(50.0, 0.0, 100.0, 100.0))
        .unwrap();
    let m1 = pipeline.insert_child(m, boxed(5.0, 5.0, 10.0, 10.0)).unwrap();
    pipeline.flush(&mut device);
    assert_eq!(owners(&pipeline), vec![root, a, a1, m, m1, b, b1]);

    pipeline.remove(&mut device, a);
    pipeline.flush(&mut device);
    assert_eq!(owners(&pipeline), vec![root, m, m1, b, b1]);
}

#[test]
fn test_moving_a_leaf_patches_vertices_in_place() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();
    let root = pipeline.insert_root(boxed(0.0, 0.0, 300.0, 300.0));
    let child = pipeline.insert_child(root, boxed(10.0, 10.0, 20.0, 20.0)).unwrap();
    pipeline.flush(&mut device);

    let region = pipeline.render_data(child).unwrap().mesh.unwrap();
    let ids = command_ids(&pipeline);

    assert!(pipeline.update_inputs(child, boxed(17.0, 6.0, 20.0, 20.0)));
    pipeline.flush(&mut device);

    // Same region, same commands: only the vertex data moved.
    assert_eq!(pipeline.render_data(child).unwrap().mesh, Some(region));
    assert_eq!(command_ids(&pipeline), ids);

    // The patched vertices match a scene built at the destination.
    let mut fresh = RenderPipeline::default();
    let mut fresh_device = CpuDevice::default();
    let fresh_root = fresh.insert_root(boxed(0.0, 0.0, 300.0, 300.0));
    let fresh_child = fresh
        .insert_child(fresh_root, boxed(17.0, 6.0, 20.0, 20.0))
        .unwrap();
    fresh.flush(&mut fresh_device);
    let fresh_region = fresh.render_data(fresh_child).unwrap().mesh.unwrap();

    let nudged: Vec<[f32; 2]> = device
        .read_vertices(&region)
        .unwrap()
        .iter()
        .map(|v| v.position)
        .collect();
    let rebuilt: Vec<[f32; 2]> = fresh_device
        .read_vertices(&fresh_region)
        .unwrap()
        .iter()
        .map(|v| v.position)
        .collect();
    assert_eq!(nudged, rebuilt);
}

#[test]
fn test_translucent_stencil_clipper_scenario() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let root = pipeline.insert_root(boxed(0.0, 0.0, 200.0, 200.0));
    let mut clip_inputs = boxed(20.0, 20.0, 100.0, 100.0);
    clip_inputs.style.opacity = 0.5;
    clip_inputs.style.clips_children = true;
    clip_inputs.style.radii = CornerRadii::uniform(8.0);
    clip_inputs.hints.content_overflows = true;
    let clip = pipeline.insert_child(root, clip_inputs).unwrap();
    let leaf = pipeline.insert_child(clip, boxed(0.0, 0.0, 150.0, 30.0)).unwrap();
    pipeline.flush(&mut device);

    let clip_render = pipeline.render_data(clip).unwrap();
    assert_eq!(clip_render.clip_method, ClipMethod::Stencil);
    assert!(clip_render.opacity_slot.is_owned());
    let value = pipeline
        .property_table()
        .slot_values(PropertyKind::Opacity, clip_render.opacity_slot.handle())[0];
    assert!((value - 0.5).abs() < 1e-6);

    let leaf_render = pipeline.render_data(leaf).unwrap();
    assert_eq!(leaf_render.composite_opacity, 0.5);
    assert_eq!(leaf_render.mask_depth, 1);

    // root draw, mask registration, clipper and leaf content, mask release.
    let kinds: Vec<&CommandKind> = pipeline.commands().map(|(_, c)| &c.kind).collect();
    assert_eq!(kinds.len(), 5);
    assert!(matches!(kinds[0], CommandKind::Draw { stencil_ref: 0, .. }));
    assert!(matches!(kinds[1], CommandKind::RegisterMask { stencil_ref: 1, .. }));
    assert!(matches!(kinds[2], CommandKind::Draw { stencil_ref: 1, .. }));
    assert!(matches!(kinds[3], CommandKind::Draw { stencil_ref: 1, .. }));
    assert!(matches!(kinds[4], CommandKind::UnregisterMask { stencil_ref: 1, .. }));

    // Register and unregister share the same mask shape.
    let (register_region, unregister_region) = match (kinds[1], kinds[4]) {
        (
            CommandKind::RegisterMask { region: a, .. },
            CommandKind::UnregisterMask { region: b, .. },
        ) => (*a, *b),
        _ => unreachable!(),
    };
    assert_eq!(register_region, unregister_region);
}

#[test]
fn test_removal_returns_to_baseline() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();
    let root = pipeline.insert_root(boxed(0.0, 0.0, 200.0, 200.0));
    pipeline.flush(&mut device);

    let baseline_regions = device.live_regions();
    let baseline_commands = pipeline.command_count();
    let baseline_slots: Vec<usize> = [
        PropertyKind::Transform,
        PropertyKind::ClipRect,
        PropertyKind::Opacity,
        PropertyKind::Color,
        PropertyKind::TextEffect,
    ]
    .iter()
    .map(|&kind| pipeline.property_table().live_count(kind))
    .collect();

    // A child that owns something in every category it can.
    let mut fancy = boxed(10.0, 10.0, 50.0, 50.0);
    fancy.local_transform = Transform::rotate_degrees(30.0);
    fancy.style.opacity = 0.7;
    fancy.style.dynamic_colors = true;
    let child = pipeline.insert_child(root, fancy).unwrap();
    pipeline.insert_child(child, boxed(0.0, 0.0, 10.0, 10.0)).unwrap();
    pipeline.flush(&mut device);
    assert!(device.live_regions() > baseline_regions);

    pipeline.remove(&mut device, child);
    pipeline.flush(&mut device);

    assert_eq!(device.live_regions(), baseline_regions);
    assert_eq!(pipeline.command_count(), baseline_commands);
    for (i, &kind) in [
        PropertyKind::Transform,
        PropertyKind::ClipRect,
        PropertyKind::Opacity,
        PropertyKind::Color,
        PropertyKind::TextEffect,
    ]
    .iter()
    .enumerate()
    {
        assert_eq!(
            pipeline.property_table().live_count(kind),
            baseline_slots[i],
            "leaked {:?} slots",
            kind
        );
    }
}

#[test]
fn test_scissor_rect_follows_a_moved_clipper() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();

    let mut inputs = boxed(10.0, 10.0, 50.0, 50.0);
    inputs.style.clips_children = true;
    inputs.hints.content_overflows = true;
    inputs.hints.bounds_unstable = true;
    let clipper = pipeline.insert_root(inputs);
    pipeline.insert_child(clipper, boxed(0.0, 0.0, 80.0, 20.0)).unwrap();
    pipeline.flush(&mut device);

    let scissor_rect = |pipeline: &RenderPipeline| {
        pipeline
            .commands()
            .find_map(|(_, c)| match &c.kind {
                CommandKind::SetScissor(rect) => Some(*rect),
                _ => None,
            })
            .unwrap()
    };
    assert_eq!(scissor_rect(&pipeline), Rect::new(10.0, 10.0, 50.0, 50.0));

    // The enforced rectangle must track the move, not stay at the old
    // screen location.
    let mut moved = boxed(110.0, 10.0, 50.0, 50.0);
    moved.style.clips_children = true;
    moved.hints.content_overflows = true;
    moved.hints.bounds_unstable = true;
    assert!(pipeline.update_inputs(clipper, moved));
    pipeline.flush(&mut device);

    let rect = scissor_rect(&pipeline);
    assert_eq!(rect, Rect::new(110.0, 10.0, 50.0, 50.0));
    assert_eq!(rect, pipeline.render_data(clipper).unwrap().world_clip_rect);
}

#[test]
fn test_opacity_exhaustion_still_dims_descendants() {
    init_logs();
    let mut config = PipelineConfig::default();
    config.capacities.opacities = 1;
    let mut pipeline = RenderPipeline::new(config);
    let mut device = CpuDevice::default();

    let mut root_inputs = boxed(0.0, 0.0, 100.0, 100.0);
    root_inputs.style.opacity = 0.5;
    let root = pipeline.insert_root(root_inputs);
    let child = pipeline.insert_child(root, boxed(0.0, 0.0, 20.0, 20.0)).unwrap();
    pipeline.flush(&mut device);

    // No slot to carry the composite, so the whole subtree bakes it into
    // vertex alpha.
    assert!(!pipeline.render_data(root).unwrap().opacity_slot.is_owned());
    for id in [root, child] {
        let render = pipeline.render_data(id).unwrap();
        assert!((render.composite_opacity - 0.5).abs() < 1e-6);
        let region = render.mesh.unwrap();
        let vertices = device.read_vertices(&region).unwrap();
        assert!((vertices[0].color[3] - 0.5).abs() < 1e-6);
    }
}

struct DisplacedGlyphs;

impl PaintContent for DisplacedGlyphs {
    fn paint(&self, rec: &mut PaintRecorder) {
        rec.begin_text(3, 3, TextureId(7), None, true);
        rec.push_vertex([0.0, 0.0], [1.0, 0.0], Color::BLACK);
        rec.push_vertex([4.0, 0.0], [0.0, 2.0], Color::BLACK);
        rec.push_vertex([0.0, 4.0], [-1.0, 0.0], Color::BLACK);
        rec.push_triangle(0, 1, 2);
    }
}

#[test]
fn test_displacement_uvs_survive_translation_nudge() {
    init_logs();
    let mut pipeline = RenderPipeline::default();
    let mut device = CpuDevice::default();
    let root = pipeline.insert_root(boxed(0.0, 0.0, 300.0, 300.0));

    let mut inputs = NodeInputs {
        geometry: Rect::new(10.0, 10.0, 20.0, 20.0),
        ..NodeInputs::default()
    };
    inputs.style.background = Color::TRANSPARENT;
    let child = pipeline.insert_child(root, inputs).unwrap();
    pipeline.set_content(child, Box::new(DisplacedGlyphs));
    pipeline.flush(&mut device);

    let region = pipeline.render_data(child).unwrap().mesh.unwrap();
    let before: Vec<GpuVertex> = device.read_vertices(&region).unwrap().to_vec();
    assert_eq!(before.len(), 3);
    assert_eq!(before[0].uv, [1.0, 0.0]);

    let mut moved = NodeInputs {
        geometry: Rect::new(25.0, 10.0, 20.0, 20.0),
        ..NodeInputs::default()
    };
    moved.style.background = Color::TRANSPARENT;
    assert!(pipeline.update_inputs(child, moved));
    pipeline.flush(&mut device);

    // Same region: the move was a patch, not a repaint.
    assert_eq!(pipeline.render_data(child).unwrap().mesh, Some(region));
    let after = device.read_vertices(&region).unwrap();
    for (b, a) in before.iter().zip(after) {
        assert_eq!(a.position[0], b.position[0] + 15.0);
        assert_eq!(a.position[1], b.position[1]);
        // Displacement vectors ignore the translation part of the delta.
        assert_eq!(a.uv, b.uv);
    }
}
