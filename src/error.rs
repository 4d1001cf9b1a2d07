use thiserror::Error;

use crate::codec::CodecError;
use crate::device::DeviceError;

/// Failures surfaced by the camera session and capture pipeline.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to connect to camera: {0}")]
    Connection(#[source] DeviceError),

    #[error("error reading setting '{key}': {source}")]
    SettingRead {
        key: String,
        #[source]
        source: DeviceError,
    },

    #[error("error writing setting '{key}' = '{value}': {source}")]
    SettingWrite {
        key: String,
        value: String,
        #[source]
        source: DeviceError,
    },

    #[error("error capturing preview: {0}")]
    Preview(#[source] DeviceError),

    #[error("error capturing image: {0}")]
    Capture(#[source] DeviceError),

    #[error("error downloading image from camera: {0}")]
    Download(#[source] DeviceError),

    #[error("error decoding raw image: {0}")]
    Decode(#[source] CodecError),

    #[error("error encoding JPEG image: {0}")]
    Encode(#[source] CodecError),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("camera session is closed")]
    Closed,
}

impl SessionError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Storage {
            context: context.into(),
            source,
        }
    }
}
