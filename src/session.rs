//! Camera session coordinator
//!
//! Owns the one device handle of the process. Every device call goes through
//! a single mutex, so preview frames, still captures, ISO changes and
//! teardown never interleave. Contending callers wait their turn.
//!
//! The camera is kept in auto ISO for live view. A still capture switches to
//! the saved manual value for the duration of the shot; the switch back is
//! done by [`SensitivityOverride`] on drop, before the mutex is released, so
//! it happens on every exit path.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info, warn};

use crate::codec::{cr2, encode_jpeg};
use crate::config::Config;
use crate::device::{Device, DeviceDriver, DeviceError, SettingValue};
use crate::error::SessionError;

/// ISO setting of the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensitivityMode {
    /// Camera picks the sensitivity; used for live view and while idle
    Auto,
    /// Fixed value, only held while a still capture runs
    Manual(String),
}

impl SensitivityMode {
    /// The string written to the device for this mode.
    pub fn setting_value<'a>(&'a self, auto_value: &'a str) -> &'a str {
        match self {
            SensitivityMode::Auto => auto_value,
            SensitivityMode::Manual(value) => value,
        }
    }
}

/// Where the ISO setting lives on the device and how raw captures are rendered.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub iso_group: String,
    pub iso_key: String,
    pub auto_value: String,
    pub jpeg_quality: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            iso_group: "imgsettings".to_string(),
            iso_key: "iso".to_string(),
            auto_value: "Auto".to_string(),
            jpeg_quality: 90,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            iso_group: config.camera.iso_group.clone(),
            iso_key: config.camera.iso_key.clone(),
            auto_value: config.camera.auto_value.clone(),
            jpeg_quality: config.image.jpeg_quality,
        }
    }
}

struct SessionState {
    device: Box<dyn Device>,
    /// ISO read from the camera at connect; restored for captures and at exit
    baseline: String,
    closed: bool,
}

impl SessionState {
    /// Write failures are logged, never returned: restoring auto ISO must not
    /// be able to fail a capture or block teardown.
    fn set_sensitivity(&mut self, options: &SessionOptions, mode: &SensitivityMode) {
        let value = mode.setting_value(&options.auto_value);
        info!(iso = %value, "Set ISO");

        if let Err(source) = self.device.set_setting(&options.iso_group, &options.iso_key, value) {
            let err = SessionError::SettingWrite {
                key: options.iso_key.clone(),
                value: value.to_string(),
                source,
            };
            warn!(error = %err, "ISO change failed");
        }
    }

    fn teardown(&mut self, options: &SessionOptions) {
        if self.closed {
            debug!("Camera session already closed");
            return;
        }

        let baseline = SensitivityMode::Manual(self.baseline.clone());
        self.set_sensitivity(options, &baseline);

        if let Err(e) = self.device.disconnect() {
            warn!(error = %e, "Failed to disconnect camera");
        }
        self.device.free();
        self.closed = true;

        info!("Camera session closed");
    }
}

/// Holds the session lock with the camera switched to manual ISO. Dropping
/// it switches back to auto, then releases the lock.
struct SensitivityOverride<'a> {
    state: MutexGuard<'a, SessionState>,
    options: &'a SessionOptions,
}

impl<'a> SensitivityOverride<'a> {
    fn engage(mut state: MutexGuard<'a, SessionState>, options: &'a SessionOptions) -> Self {
        let manual = SensitivityMode::Manual(state.baseline.clone());
        state.set_sensitivity(options, &manual);
        Self { state, options }
    }
}

impl Deref for SensitivityOverride<'_> {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}

impl DerefMut for SensitivityOverride<'_> {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

impl Drop for SensitivityOverride<'_> {
    fn drop(&mut self) {
        self.state.set_sensitivity(self.options, &SensitivityMode::Auto);
    }
}

/// The single, serialized handle to the tethered camera.
pub struct CameraSession {
    state: Mutex<SessionState>,
    options: SessionOptions,
}

impl CameraSession {
    /// Open the camera, remember its current ISO and switch it to auto.
    pub fn connect(
        driver: &dyn DeviceDriver,
        name: &str,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut device = driver.connect(name).map_err(SessionError::Connection)?;

        let baseline = match read_text_setting(device.as_mut(), &options) {
            Ok(value) => value,
            Err(e) => {
                device.free();
                return Err(e);
            }
        };
        info!(iso = %baseline, "Current ISO");

        let mut state = SessionState {
            device,
            baseline,
            closed: false,
        };
        state.set_sensitivity(&options, &SensitivityMode::Auto);

        Ok(Self {
            state: Mutex::new(state),
            options,
        })
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.state.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }
        Ok(state)
    }

    /// Grab one live-view JPEG into `sink`.
    pub fn capture_preview_frame(&self, sink: &mut dyn Write) -> Result<(), SessionError> {
        let mut state = self.lock_open()?;
        state.device.capture_live_view(sink).map_err(SessionError::Preview)
    }

    /// Take a full-resolution picture at the saved ISO.
    ///
    /// Raw captures are copied verbatim into `raw_sink` and rendered to JPEG
    /// into `viewable_sink`. When the camera itself produced a JPEG it goes
    /// straight to `viewable_sink` and `raw_sink` is not touched.
    pub fn capture_still(
        &self,
        raw_sink: &mut dyn Write,
        viewable_sink: &mut dyn Write,
        leave_on_device: bool,
    ) -> Result<(), SessionError> {
        let state = self.lock_open()?;
        let mut state = SensitivityOverride::engage(state, &self.options);
        let device = &mut state.device;

        // Live view has to be closed before the camera accepts a capture
        device.disconnect().map_err(SessionError::Capture)?;

        let image = device.trigger_capture().map_err(SessionError::Capture)?;
        info!(folder = %image.folder, name = %image.name, "Image captured");

        let delete_after = !leave_on_device;
        if image.is_standard_format() {
            return device
                .download(&image, viewable_sink, delete_after)
                .map_err(SessionError::Download);
        }

        let mut staging = Vec::new();
        device
            .download(&image, &mut staging, delete_after)
            .map_err(SessionError::Download)?;
        debug!(bytes = staging.len(), "Raw image downloaded");

        raw_sink
            .write_all(&staging)
            .and_then(|_| raw_sink.flush())
            .map_err(|e| SessionError::storage("error writing raw image", e))?;

        let decoded = cr2::decode(&staging).map_err(SessionError::Decode)?;
        encode_jpeg(&decoded, self.options.jpeg_quality, viewable_sink).map_err(SessionError::Encode)?;

        Ok(())
    }

    /// Leave live view, e.g. when the last preview client goes away.
    pub fn end_live_view(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Err(e) = state.device.disconnect() {
            warn!(error = %e, "Failed to leave live view");
        }
    }

    /// ISO value used for manual captures.
    pub fn baseline(&self) -> String {
        self.state.lock().baseline.clone()
    }

    /// Replace the ISO used for future captures. Takes effect on the next
    /// capture; the camera itself stays in auto.
    pub fn set_baseline(&self, value: impl Into<String>) -> Result<(), SessionError> {
        let mut state = self.lock_open()?;
        state.baseline = value.into();
        info!(iso = %state.baseline, "Capture ISO changed");
        Ok(())
    }

    /// Restore the saved ISO and release the camera.
    ///
    /// Safe to call more than once; later calls do nothing. Every other
    /// operation fails with [`SessionError::Closed`] afterwards.
    pub fn shutdown(&self) {
        self.state.lock().teardown(&self.options);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.state.get_mut().teardown(&self.options);
    }
}

fn read_text_setting(device: &mut dyn Device, options: &SessionOptions) -> Result<String, SessionError> {
    let read_error = |source| SessionError::SettingRead {
        key: options.iso_key.clone(),
        source,
    };

    match device.get_setting(&options.iso_group, &options.iso_key) {
        Ok(SettingValue::Text(value)) => Ok(value),
        Ok(other) => Err(read_error(DeviceError::Backend(format!(
            "expected a text value, got {:?}",
            other
        )))),
        Err(e) => Err(read_error(e)),
    }
}
