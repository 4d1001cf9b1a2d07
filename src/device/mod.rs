//! Device capability interface
//!
//! Everything the session needs from a tethered camera, expressed as a trait
//! so the hardware binding can be swapped for a simulator or a test double.

mod simulated;

#[cfg(feature = "gphoto2")]
mod gphoto;

pub use simulated::{SimulatedCamera, SimulatedDriver};

#[cfg(feature = "gphoto2")]
pub use gphoto::GphotoDriver;

use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera error: {0}")]
    Backend(String),

    #[error("camera disconnected")]
    Disconnected,
}

/// Value of a camera setting as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Text(String),
    Number(f32),
    Toggle(bool),
}

/// Location of a captured image in the camera's own storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub folder: String,
    pub name: String,
}

impl ImageDescriptor {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    /// True when the camera already produced a JPEG for this capture.
    pub fn is_standard_format(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        name.ends_with(".jpg") || name.ends_with(".jpeg")
    }
}

/// An open connection to one camera.
///
/// Calls are never issued concurrently; the session serializes them.
pub trait Device: Send {
    fn get_setting(&mut self, group: &str, key: &str) -> Result<SettingValue, DeviceError>;

    fn set_setting(&mut self, group: &str, key: &str, value: &str) -> Result<(), DeviceError>;

    /// Grab one live-view frame (JPEG) into `sink`.
    fn capture_live_view(&mut self, sink: &mut dyn Write) -> Result<(), DeviceError>;

    /// Close the current session with the camera. Required before a full
    /// capture when live view is active; the next call reopens the link.
    fn disconnect(&mut self) -> Result<(), DeviceError>;

    fn trigger_capture(&mut self) -> Result<ImageDescriptor, DeviceError>;

    fn download(
        &mut self,
        image: &ImageDescriptor,
        sink: &mut dyn Write,
        delete_after: bool,
    ) -> Result<(), DeviceError>;

    /// Release driver resources. The device is unusable afterwards.
    fn free(&mut self);
}

/// Opens devices by name. An empty name selects the first camera found.
pub trait DeviceDriver: Send + Sync {
    fn connect(&self, name: &str) -> Result<Box<dyn Device>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_format_detection() {
        assert!(ImageDescriptor::new("/", "capt0001.jpg").is_standard_format());
        assert!(ImageDescriptor::new("/", "IMG_0001.JPG").is_standard_format());
        assert!(ImageDescriptor::new("/", "IMG_0001.jpeg").is_standard_format());
        assert!(!ImageDescriptor::new("/", "IMG_0001.CR2").is_standard_format());
        assert!(!ImageDescriptor::new("/", "jpg").is_standard_format());
    }
}
