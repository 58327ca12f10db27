//! ponto-hw — Camera capture for the attendance checkpoint.
//!
//! Provides V4L2-based color capture, frame conversion helpers, and
//! exclusive capture sessions so only one flow holds the camera at a time.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use session::{
    CameraDevice, CaptureSession, DeviceSlot, FrameSource, SessionError, SlotGuard, V4lCameraDevice,
};
