//! Resolved per-node inputs consumed from the external style/layout system.
//!
//! The pipeline never computes styles or layout itself: an external system
//! hands over fully resolved values per node, and marks nodes dirty when
//! any of them change.

use crate::geometry::{Color, CornerRadii, Rect};
use crate::pipeline::commands::{MaterialId, RenderTargetId};
use crate::transform::Transform;

/// Resolved style values for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedStyle {
    /// The node's own opacity (0.0..=1.0), before composition with ancestors.
    pub opacity: f32,
    /// Whether the node is shown at all. Hidden nodes contribute no commands.
    pub visible: bool,
    /// Background fill color.
    pub background: Color,
    /// Border colors: top, right, bottom, left.
    pub border_colors: [Color; 4],
    /// Border widths: top, right, bottom, left (logical pixels).
    pub border_widths: [f32; 4],
    /// Tint applied to textured content.
    pub tint: Color,
    /// Whether descendants are clipped to this node's bounds.
    pub clips_children: bool,
    /// Corner radii of the node's shape (and of its clip, when clipping).
    pub radii: CornerRadii,
    /// When set, colors live in the property table and recolors never force
    /// a repaint. When unset, colors are baked into generated vertices.
    pub dynamic_colors: bool,
    /// Material pushed as an override for this node's subtree, popped after
    /// all descendants have painted.
    pub override_material: Option<MaterialId>,
}

impl Default for ResolvedStyle {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            visible: true,
            background: Color::TRANSPARENT,
            border_colors: [Color::TRANSPARENT; 4],
            border_widths: [0.0; 4],
            tint: Color::WHITE,
            clips_children: false,
            radii: CornerRadii::ZERO,
            dynamic_colors: false,
            override_material: None,
        }
    }
}

/// Per-frame hints from the external layout/render system.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeHints {
    /// The node's bounds are still animating/settling this frame; prefer the
    /// cheap conservative scissor clip over shape-accurate strategies.
    pub bounds_unstable: bool,
    /// The node renders into a shared camera target where the stencil buffer
    /// is not available.
    pub shared_camera_target: bool,
    /// Content actually extends past the node's bounds. When false, no clip
    /// enforcement is needed regardless of `clips_children`.
    pub content_overflows: bool,
    /// The clip shape is a vector mask rather than a (rounded) rectangle.
    pub vector_mask: bool,
}

/// Everything the external system resolves for one node.
///
/// The visual-content callback is held separately on the scene node (it is
/// a trait object and not comparable/copyable).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeInputs {
    /// Resolved geometry rectangle, positioned in the parent's space.
    pub geometry: Rect,
    /// Transform relative to parent (identity by default). A node with a
    /// non-identity local transform owns its own transform-table slot;
    /// rigid descendants share it.
    pub local_transform: Transform,
    /// Resolved style values.
    pub style: ResolvedStyle,
    /// Layout/render hints.
    pub hints: NodeHints,
    /// Render target this subtree is redirected into, if any.
    pub render_target: Option<RenderTargetId>,
}
