//! Exclusive capture sessions.
//!
//! At most one session holds the camera at a time. Opening while another
//! session is active fails immediately with [`SessionError::Busy`]; the
//! device is released when the session is dropped, whatever path got there.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture device busy")]
    Busy,
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// A stream of frames from an open device.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Something that can be opened into a [`FrameSource`].
pub trait CameraDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;

    /// Human-readable device name for logs.
    fn describe(&self) -> String;
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// A V4L2 device node.
#[derive(Debug, Clone)]
pub struct V4lCameraDevice {
    path: String,
}

impl V4lCameraDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraDevice for V4lCameraDevice {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(Camera::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

/// In-process ownership flag for the capture device.
#[derive(Debug, Clone, Default)]
pub struct DeviceSlot {
    in_use: Arc<AtomicBool>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if another session holds it.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                in_use: Arc::clone(&self.in_use),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Frees its [`DeviceSlot`] on drop.
#[derive(Debug)]
pub struct SlotGuard {
    in_use: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}

/// Exclusive ownership of an open capture device.
pub struct CaptureSession {
    // Dropped before the guard so the device is closed before the slot frees.
    source: Box<dyn FrameSource>,
    _guard: SlotGuard,
    device: String,
    opened_at: Instant,
    frames_read: u64,
}

impl CaptureSession {
    /// Claim `slot` and open `device`. Fails fast when either is taken.
    pub fn open(device: &dyn CameraDevice, slot: &DeviceSlot) -> Result<Self, SessionError> {
        let guard = slot.try_acquire().ok_or(SessionError::Busy)?;
        Self::open_with_guard(device, guard)
    }

    /// Open `device` under a slot claimed earlier. The slot frees if opening fails.
    pub fn open_with_guard(device: &dyn CameraDevice, guard: SlotGuard) -> Result<Self, SessionError> {
        let source = device.open().map_err(|e| match e {
            CameraError::DeviceBusy => SessionError::Busy,
            other => SessionError::Camera(other),
        })?;

        let name = device.describe();
        tracing::debug!(device = %name, "capture session opened");

        Ok(Self {
            source,
            _guard: guard,
            device: name,
            opened_at: Instant::now(),
            frames_read: 0,
        })
    }

    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let frame = self.source.read_frame()?;
        self.frames_read += 1;
        Ok(frame)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        tracing::debug!(
            device = %self.device,
            frames = self.frames_read,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "capture session released"
        );
    }
}
