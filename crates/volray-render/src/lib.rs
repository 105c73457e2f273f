//! CPU ray marching renderers for the volray volume renderer.
//!
//! This crate provides:
//! - The adaptive step controller and stepping policy
//! - Per-ray traversal (isosurface, fixed-step reference, direct volume)
//! - Renderer variants behind one [`VolumeRenderer`]
//! - The swappable acceleration structure handle
//! - Camera, debug modes and screenshot utilities

pub mod accel_handle;
pub mod camera;
pub mod debug;
pub mod frame;
pub mod renderer;
pub mod screenshot;
pub mod stepping;
pub mod transfer;
pub mod traversal;

pub use accel_handle::AccelHandle;
pub use camera::Camera;
pub use debug::DebugMode;
pub use frame::{Frame, GBuffer, GBufferTexel, PixelSample};
pub use renderer::{
    DeferredStage, DirectVolumeStage, FrameContext, IsosurfaceStage, RenderConfig, RendererKind,
    TraversalStage, VolumeRenderer,
};
pub use screenshot::{parse_frame_indices, save_frame, ScreenshotConfig};
pub use stepping::{choose_step, choose_step_in_band, StepDecision, SteppingPolicy};
pub use transfer::TransferFunction;
pub use traversal::{
    march_dvr, march_isosurface, march_isosurface_with, march_reference, MarchContext,
    MarchParams, RayResult, RayState, SampleFilter, TraversalOutcome, TraversalStats,
};
