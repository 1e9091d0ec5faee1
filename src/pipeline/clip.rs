//! Clip strategy resolution.
//!
//! Decides, per node, how visibility clipping is enforced. The decision is
//! a pure function of the node's resolved style, its hints, and the
//! ancestor mask depth; it is re-evaluated only when clip-affecting dirty
//! flags are set.

use crate::style::{NodeHints, ResolvedStyle};

/// How a node's content is restricted to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipMethod {
    /// Content fits or overflow is visible; nothing to enforce.
    NotClipped,
    /// Conservative rectangular scissor. Cheap, no shape fidelity; used
    /// while bounds are unstable or as the slot-exhaustion fallback.
    Scissor,
    /// Fragment-level discard against an axis-aligned rectangle from the
    /// clip-rect property table.
    ShaderDiscard,
    /// Stencil-buffer mask; the only strategy with shape fidelity for
    /// rounded rectangles and vector masks.
    Stencil,
    /// Not yet resolved by the clipping pass.
    #[default]
    Undetermined,
}

impl ClipMethod {
    /// Whether this strategy consumes a stencil nesting level.
    pub fn uses_stencil(self) -> bool {
        self == ClipMethod::Stencil
    }
}

/// Resolve the clip strategy for a node.
///
/// `parent_mask_depth` is the stencil nesting depth already consumed by
/// ancestors; `max_mask_depth` is the hardware budget (see
/// `PipelineConfig`). Total: every input combination yields a strategy.
pub fn determine_self_clip_method(
    style: &ResolvedStyle,
    hints: &NodeHints,
    parent_mask_depth: u8,
    max_mask_depth: u8,
) -> ClipMethod {
    if !style.clips_children || !hints.content_overflows {
        return ClipMethod::NotClipped;
    }

    // Bounds still settling this frame: a shape-accurate clip would be
    // recomputed next frame anyway, take the cheap rectangle.
    if hints.bounds_unstable {
        return ClipMethod::Scissor;
    }

    let shaped = hints.vector_mask || !style.radii.is_zero();
    if shaped && parent_mask_depth < max_mask_depth && !hints.shared_camera_target {
        return ClipMethod::Stencil;
    }

    ClipMethod::ShaderDiscard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CornerRadii;

    fn clipping_style() -> ResolvedStyle {
        ResolvedStyle {
            clips_children: true,
            ..ResolvedStyle::default()
        }
    }

    fn overflowing() -> NodeHints {
        NodeHints {
            content_overflows: true,
            ..NodeHints::default()
        }
    }

    #[test]
    fn test_no_clip_when_content_fits() {
        let method =
            determine_self_clip_method(&clipping_style(), &NodeHints::default(), 0, 7);
        assert_eq!(method, ClipMethod::NotClipped);

        let method =
            determine_self_clip_method(&ResolvedStyle::default(), &overflowing(), 0, 7);
        assert_eq!(method, ClipMethod::NotClipped);
    }

    #[test]
    fn test_rectangular_clip_uses_shader_discard() {
        let method = determine_self_clip_method(&clipping_style(), &overflowing(), 0, 7);
        assert_eq!(method, ClipMethod::ShaderDiscard);
    }

    #[test]
    fn test_unstable_bounds_force_scissor() {
        let mut style = clipping_style();
        style.radii = CornerRadii::uniform(8.0);
        let hints = NodeHints {
            bounds_unstable: true,
            ..overflowing()
        };
        assert_eq!(
            determine_self_clip_method(&style, &hints, 0, 7),
            ClipMethod::Scissor
        );
    }

    #[test]
    fn test_rounded_clip_upgrades_to_stencil() {
        let mut style = clipping_style();
        style.radii = CornerRadii::uniform(8.0);
        assert_eq!(
            determine_self_clip_method(&style, &overflowing(), 0, 7),
            ClipMethod::Stencil
        );
    }

    #[test]
    fn test_stencil_budget_exhausted_stays_shader_discard() {
        let mut style = clipping_style();
        style.radii = CornerRadii::uniform(8.0);
        assert_eq!(
            determine_self_clip_method(&style, &overflowing(), 7, 7),
            ClipMethod::ShaderDiscard
        );
    }

    #[test]
    fn test_shared_camera_target_disables_stencil() {
        let mut style = clipping_style();
        style.radii = CornerRadii::uniform(8.0);
        let hints = NodeHints {
            shared_camera_target: true,
            ..overflowing()
        };
        assert_eq!(
            determine_self_clip_method(&style, &hints, 0, 7),
            ClipMethod::ShaderDiscard
        );
    }

    #[test]
    fn test_vector_mask_counts_as_shaped() {
        let hints = NodeHints {
            vector_mask: true,
            ..overflowing()
        };
        assert_eq!(
            determine_self_clip_method(&clipping_style(), &hints, 0, 7),
            ClipMethod::Stencil
        );
    }
}
