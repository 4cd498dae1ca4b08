use crate::{Error, Result};

/// Pinhole intrinsics of the RGB-D sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One RGB-D frame: per-pixel depth in millimetres and interleaved 8-bit
/// RGB, both in row-major pixel order.
#[derive(Debug, Clone)]
pub struct RgbdFrame {
    pub depth: Vec<u16>,
    pub color: Vec<u8>,
    pub intrinsics: CameraIntrinsics,
}

impl RgbdFrame {
    pub fn new(depth: Vec<u16>, color: Vec<u8>, intrinsics: CameraIntrinsics) -> Result<Self> {
        let pixels = intrinsics.pixel_count();
        if depth.len() != pixels {
            return Err(Error::invalid_argument(format!(
                "depth buffer has {} entries, expected {}",
                depth.len(),
                pixels
            )));
        }
        if color.len() != pixels * 3 {
            return Err(Error::invalid_argument(format!(
                "color buffer has {} bytes, expected {}",
                color.len(),
                pixels * 3
            )));
        }
        Ok(Self {
            depth,
            color,
            intrinsics,
        })
    }
}

/// A blocking producer of RGB-D frames. Camera backends implement this
/// outside the core; device loss surfaces as `Error::DeviceError`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbdFrame>;

    fn intrinsics(&self) -> CameraIntrinsics;
}
