//! Software camera
//!
//! Behaves like a tethered DSLR closely enough to run the service without
//! hardware: it keeps a settings table, renders moving live-view frames,
//! refuses to shoot while live view is open and stores captures on a
//! virtual card until they are downloaded.

use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Write;
use tracing::debug;

use super::{Device, DeviceDriver, DeviceError, ImageDescriptor, SettingValue};
use crate::codec::{cr2, encode_jpeg};

pub const MODEL: &str = "Simulated Camera";

const CARD_FOLDER: &str = "/store_00010001/DCIM/100CANON";

/// Opens [`SimulatedCamera`]s.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    pub iso: String,
    /// Produce JPEG captures instead of CR2
    pub jpeg_output: bool,
    pub live_view_size: (u32, u32),
    pub still_size: (u32, u32),
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self {
            iso: "100".to_string(),
            jpeg_output: false,
            live_view_size: (640, 424),
            still_size: (1200, 800),
        }
    }
}

impl DeviceDriver for SimulatedDriver {
    fn connect(&self, name: &str) -> Result<Box<dyn Device>, DeviceError> {
        if !name.is_empty() && name != MODEL {
            return Err(DeviceError::NotFound(name.to_string()));
        }
        Ok(Box::new(SimulatedCamera::new(self.clone())))
    }
}

pub struct SimulatedCamera {
    config: SimulatedDriver,
    settings: HashMap<(String, String), String>,
    live_view: bool,
    frame: u32,
    shots: u32,
    card: HashMap<String, Vec<u8>>,
    freed: bool,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedDriver) -> Self {
        let mut settings = HashMap::new();
        settings.insert(("imgsettings".to_string(), "iso".to_string()), config.iso.clone());
        settings.insert(("imgsettings".to_string(), "imageformat".to_string()), "RAW".to_string());

        Self {
            config,
            settings,
            live_view: false,
            frame: 0,
            shots: 0,
            card: HashMap::new(),
            freed: false,
        }
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.freed {
            Err(DeviceError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn render(&self, (width, height): (u32, u32), phase: u32, tint: u8) -> DynamicImage {
        let (width, height) = (width.max(1), height.max(1));
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let band = (x.wrapping_add(phase) % width) * 255 / width;
            Rgb([band as u8, (y * 255 / height) as u8, tint])
        }))
    }

    fn iso_tint(&self) -> u8 {
        self.settings
            .get(&("imgsettings".to_string(), "iso".to_string()))
            .and_then(|iso| iso.parse::<u32>().ok())
            .map(|iso| (iso / 25).min(255) as u8)
            .unwrap_or(128)
    }
}

fn encode(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, DeviceError> {
    let mut buf = Vec::new();
    encode_jpeg(image, quality, &mut buf).map_err(|e| DeviceError::Backend(e.to_string()))?;
    Ok(buf)
}

impl Device for SimulatedCamera {
    fn get_setting(&mut self, group: &str, key: &str) -> Result<SettingValue, DeviceError> {
        self.check_alive()?;
        self.settings
            .get(&(group.to_string(), key.to_string()))
            .map(|v| SettingValue::Text(v.clone()))
            .ok_or_else(|| DeviceError::Backend(format!("no such setting {}/{}", group, key)))
    }

    fn set_setting(&mut self, group: &str, key: &str, value: &str) -> Result<(), DeviceError> {
        self.check_alive()?;
        let slot = self
            .settings
            .get_mut(&(group.to_string(), key.to_string()))
            .ok_or_else(|| DeviceError::Backend(format!("no such setting {}/{}", group, key)))?;
        *slot = value.to_string();
        Ok(())
    }

    fn capture_live_view(&mut self, sink: &mut dyn Write) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.live_view = true;
        self.frame = self.frame.wrapping_add(4);

        let frame = self.render(self.config.live_view_size, self.frame, 96);
        sink.write_all(&encode(&frame, 70)?)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.live_view = false;
        Ok(())
    }

    fn trigger_capture(&mut self) -> Result<ImageDescriptor, DeviceError> {
        self.check_alive()?;
        if self.live_view {
            return Err(DeviceError::Backend("camera busy: live view is active".into()));
        }

        self.shots += 1;
        let image = self.render(self.config.still_size, self.shots.wrapping_mul(40), self.iso_tint());
        let jpeg = encode(&image, 92)?;

        let (name, data) = if self.config.jpeg_output {
            (format!("IMG_{:04}.JPG", self.shots), jpeg)
        } else {
            (format!("IMG_{:04}.CR2", self.shots), cr2::build_container(&jpeg))
        };

        debug!(name = %name, bytes = data.len(), "Simulated capture stored on card");
        self.card.insert(name.clone(), data);
        Ok(ImageDescriptor::new(CARD_FOLDER, name))
    }

    fn download(
        &mut self,
        image: &ImageDescriptor,
        sink: &mut dyn Write,
        delete_after: bool,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let data = if delete_after {
            self.card.remove(&image.name)
        } else {
            self.card.get(&image.name).cloned()
        }
        .ok_or_else(|| DeviceError::Backend(format!("no file {}/{}", image.folder, image.name)))?;

        sink.write_all(&data)?;
        Ok(())
    }

    fn free(&mut self) {
        self.card.clear();
        self.freed = true;
    }
}
