//! Test doubles for the device layer

#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tethercam::codec::{cr2, encode_jpeg};
use tethercam::device::{Device, DeviceDriver, DeviceError, ImageDescriptor, SettingValue};

pub const GROUP: &str = "imgsettings";
pub const KEY: &str = "iso";
pub const BASELINE: &str = "400";

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    GetSetting,
    SetSetting,
    LiveView,
    Disconnect,
    Trigger,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    Set(String),
    LiveView,
    Disconnect,
    Trigger,
    Download { name: String, delete: bool },
    Free,
}

/// Shared view into a [`RecordingDevice`]: call log, current ISO, injected
/// failures and a check that device calls never overlap.
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    iso: Mutex<String>,
    fail: Mutex<HashSet<Step>>,
    setting_override: Mutex<Option<SettingValue>>,
    capture: Mutex<(String, Vec<u8>)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_delay: Mutex<Duration>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            iso: Mutex::new(BASELINE.to_string()),
            fail: Mutex::new(HashSet::new()),
            setting_override: Mutex::new(None),
            capture: Mutex::new(("IMG_0001.CR2".to_string(), raw_capture())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn iso(&self) -> String {
        self.iso.lock().clone()
    }

    /// Values written to the ISO setting, in order.
    pub fn iso_writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Set(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn fail(&self, step: Step) {
        self.fail.lock().insert(step);
    }

    pub fn heal(&self, step: Step) {
        self.fail.lock().remove(&step);
    }

    pub fn report_setting(&self, value: SettingValue) {
        *self.setting_override.lock() = Some(value);
    }

    /// What the next capture produces on the card.
    pub fn set_capture(&self, name: &str, data: Vec<u8>) {
        *self.capture.lock() = (name.to_string(), data);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, call: Call, step: Option<Step>) -> Result<(), DeviceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(call);

        let delay = *self.call_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Some(step) if self.fail.lock().contains(&step) => {
                Err(DeviceError::Backend(format!("injected {:?} failure", step)))
            }
            _ => Ok(()),
        }
    }
}

pub struct RecordingDevice {
    recorder: Arc<Recorder>,
}

impl Device for RecordingDevice {
    fn get_setting(&mut self, group: &str, key: &str) -> Result<SettingValue, DeviceError> {
        self.recorder.enter(Call::Get(format!("{}/{}", group, key)), Some(Step::GetSetting))?;
        if let Some(value) = self.recorder.setting_override.lock().clone() {
            return Ok(value);
        }
        Ok(SettingValue::Text(self.recorder.iso()))
    }

    fn set_setting(&mut self, _group: &str, _key: &str, value: &str) -> Result<(), DeviceError> {
        self.recorder.enter(Call::Set(value.to_string()), Some(Step::SetSetting))?;
        *self.recorder.iso.lock() = value.to_string();
        Ok(())
    }

    fn capture_live_view(&mut self, sink: &mut dyn Write) -> Result<(), DeviceError> {
        self.recorder.enter(Call::LiveView, Some(Step::LiveView))?;
        sink.write_all(&jpeg(32, 24))?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.recorder.enter(Call::Disconnect, Some(Step::Disconnect))
    }

    fn trigger_capture(&mut self) -> Result<ImageDescriptor, DeviceError> {
        self.recorder.enter(Call::Trigger, Some(Step::Trigger))?;
        let name = self.recorder.capture.lock().0.clone();
        Ok(ImageDescriptor::new("/store_00010001/DCIM/100CANON", name))
    }

    fn download(
        &mut self,
        image: &ImageDescriptor,
        sink: &mut dyn Write,
        delete_after: bool,
    ) -> Result<(), DeviceError> {
        self.recorder.enter(
            Call::Download {
                name: image.name.clone(),
                delete: delete_after,
            },
            Some(Step::Download),
        )?;
        let data = self.recorder.capture.lock().1.clone();
        sink.write_all(&data)?;
        Ok(())
    }

    fn free(&mut self) {
        let _ = self.recorder.enter(Call::Free, None);
    }
}

pub struct RecordingDriver {
    pub recorder: Arc<Recorder>,
}

impl RecordingDriver {
    pub fn new() -> (Self, Arc<Recorder>) {
        let recorder = Recorder::new();
        (Self { recorder: Arc::clone(&recorder) }, recorder)
    }
}

impl DeviceDriver for RecordingDriver {
    fn connect(&self, name: &str) -> Result<Box<dyn Device>, DeviceError> {
        if self.recorder.fail.lock().contains(&Step::Connect) {
            return Err(DeviceError::NotFound(name.to_string()));
        }
        Ok(Box::new(RecordingDevice {
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

/// Sink that rejects every write.
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7) as u8, (y * 5) as u8, 200])
    }));
    let mut buf = Vec::new();
    encode_jpeg(&image, 90, &mut buf).unwrap();
    buf
}

/// A minimal CR2 holding a 48x32 JPEG.
pub fn raw_capture() -> Vec<u8> {
    cr2::build_container(&jpeg(48, 32))
}
