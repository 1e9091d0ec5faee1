pub mod geometry;
pub mod pipeline;
pub mod scene;
pub mod style;
pub mod transform;

// Public for diagnostics tooling; a no-op unless the `render-stats`
// feature is enabled.
pub mod pipeline_stats;

pub mod prelude {
    pub use crate::geometry::{Color, CornerRadii, Rect};
    pub use crate::pipeline::clip::ClipMethod;
    pub use crate::pipeline::commands::{
        Command, CommandId, CommandKind, CustomCommand, MaterialId, RenderTargetId, TextureId,
    };
    pub use crate::pipeline::device::{BufferRegion, CpuDevice, DeviceError, GpuDevice, MeshViews};
    pub use crate::pipeline::dirty::DirtyFlags;
    pub use crate::pipeline::painter::{PaintContent, PaintRecorder, TextEffect};
    pub use crate::pipeline::properties::{PropertyCapacities, PropertyHandle, PropertyKind};
    pub use crate::pipeline::vertex::GpuVertex;
    pub use crate::pipeline::wgpu_device::WgpuDevice;
    pub use crate::pipeline::{PipelineConfig, RenderPipeline};
    pub use crate::scene::NodeId;
    pub use crate::style::{NodeHints, NodeInputs, ResolvedStyle};
    pub use crate::transform::Transform;
}
