//! Tethered camera server
//!
//! Drives one USB-tethered camera and exposes it over HTTP:
//! - live view as a `multipart/x-mixed-replace` JPEG stream
//! - single and timed still captures, persisted as raw + JPEG pairs
//! - the manual ISO used for captures
//!
//! All device access is serialized through [`CameraSession`].
//!
//! # Example
//!
//! ```no_run
//! use tethercam::device::SimulatedDriver;
//! use tethercam::session::{CameraSession, SessionOptions};
//!
//! let session = CameraSession::connect(&SimulatedDriver::default(), "", SessionOptions::default())?;
//! let mut frame = Vec::new();
//! session.capture_preview_frame(&mut frame)?;
//! session.shutdown();
//! # Ok::<(), tethercam::error::SessionError>(())
//! ```

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod web;

pub use config::Config;
pub use error::SessionError;
pub use pipeline::{CapturePipeline, CapturedImage};
pub use session::{CameraSession, SensitivityMode, SessionOptions};
