//! libgphoto2 backend

use gphoto2::widget::RadioWidget;
use gphoto2::{Camera, Context};
use std::io::Write;
use tracing::{debug, info};

use super::{Device, DeviceDriver, DeviceError, ImageDescriptor, SettingValue};

fn backend(e: gphoto2::Error) -> DeviceError {
    DeviceError::Backend(e.to_string())
}

/// Opens USB cameras through libgphoto2.
#[derive(Debug, Default, Clone, Copy)]
pub struct GphotoDriver;

impl DeviceDriver for GphotoDriver {
    fn connect(&self, name: &str) -> Result<Box<dyn Device>, DeviceError> {
        let context = Context::new().map_err(backend)?;
        let camera = open(&context, name)?;
        info!(name = %name, "Opened camera");

        Ok(Box::new(GphotoCamera {
            context,
            name: name.to_string(),
            camera: Some(camera),
        }))
    }
}

fn open(context: &Context, name: &str) -> Result<Camera, DeviceError> {
    if name.is_empty() {
        return context
            .autodetect_camera()
            .wait()
            .map_err(|_| DeviceError::NotFound("no camera detected".to_string()));
    }

    let descriptor = context
        .list_cameras()
        .wait()
        .map_err(backend)?
        .find(|d| d.model == name)
        .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;

    context.get_camera(&descriptor).wait().map_err(backend)
}

pub struct GphotoCamera {
    context: Context,
    name: String,
    /// Dropped on disconnect and reopened by the next call
    camera: Option<Camera>,
}

// SAFETY: the libgphoto2 handles are only used by one thread at a time; the
// session serializes every call behind its mutex.
unsafe impl Send for GphotoCamera {}

impl GphotoCamera {
    fn handles(&mut self) -> Result<(&Camera, &Context), DeviceError> {
        if self.camera.is_none() {
            debug!("Reopening camera");
            self.camera = Some(open(&self.context, &self.name)?);
        }
        match &self.camera {
            Some(camera) => Ok((camera, &self.context)),
            None => Err(DeviceError::Disconnected),
        }
    }
}

impl Device for GphotoCamera {
    fn get_setting(&mut self, group: &str, key: &str) -> Result<SettingValue, DeviceError> {
        let (camera, _) = self.handles()?;
        let widget = camera
            .config_key::<RadioWidget>(key)
            .wait()
            .map_err(|e| DeviceError::Backend(format!("{}/{}: {}", group, key, e)))?;
        Ok(SettingValue::Text(widget.choice()))
    }

    fn set_setting(&mut self, group: &str, key: &str, value: &str) -> Result<(), DeviceError> {
        let (camera, _) = self.handles()?;
        let widget = camera
            .config_key::<RadioWidget>(key)
            .wait()
            .map_err(|e| DeviceError::Backend(format!("{}/{}: {}", group, key, e)))?;
        widget.set_choice(value).map_err(backend)?;
        camera.set_config(&widget).wait().map_err(backend)
    }

    fn capture_live_view(&mut self, sink: &mut dyn Write) -> Result<(), DeviceError> {
        let (camera, context) = self.handles()?;
        let file = camera.capture_preview().wait().map_err(backend)?;
        let data = file.get_data(context).wait().map_err(backend)?;
        sink.write_all(&data)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        // Dropping the handle runs gp_camera_exit
        self.camera = None;
        Ok(())
    }

    fn trigger_capture(&mut self) -> Result<ImageDescriptor, DeviceError> {
        let (camera, _) = self.handles()?;
        let path = camera.capture_image().wait().map_err(backend)?;
        Ok(ImageDescriptor::new(path.folder(), path.name()))
    }

    fn download(
        &mut self,
        image: &ImageDescriptor,
        sink: &mut dyn Write,
        delete_after: bool,
    ) -> Result<(), DeviceError> {
        let (camera, context) = self.handles()?;
        let fs = camera.fs();
        let file = fs.download(&image.folder, &image.name).wait().map_err(backend)?;
        let data = file.get_data(context).wait().map_err(backend)?;
        sink.write_all(&data)?;

        if delete_after {
            fs.delete_file(&image.folder, &image.name).wait().map_err(backend)?;
        }
        Ok(())
    }

    fn free(&mut self) {
        self.camera = None;
    }
}
