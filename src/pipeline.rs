//! Still capture to disk
//!
//! Turns one [`CameraSession::capture_still`] into a `<stamp>.<raw>` +
//! `<stamp>.jpg` pair in the captures directory, and hands the JPEG back for
//! the HTTP response.

use bytes::Bytes;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::session::CameraSession;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const VIEWABLE_EXTENSION: &str = "jpg";

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Result of a persisted capture.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub stem: String,
    /// `None` when the camera delivered a JPEG and there was no raw data
    pub raw_path: Option<PathBuf>,
    pub viewable_path: PathBuf,
    pub viewable: Bytes,
}

pub struct CapturePipeline {
    session: Arc<CameraSession>,
    captures_dir: PathBuf,
    raw_extension: String,
    leave_on_device: bool,
}

struct Targets {
    stem: String,
    raw_path: PathBuf,
    raw_file: File,
    viewable_path: PathBuf,
    viewable_file: File,
}

impl CapturePipeline {
    pub fn new(session: Arc<CameraSession>, captures_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            captures_dir: captures_dir.into(),
            raw_extension: "cr2".to_string(),
            leave_on_device: true,
        }
    }

    pub fn with_raw_extension(mut self, extension: impl Into<String>) -> Self {
        self.raw_extension = extension.into();
        self
    }

    pub fn with_leave_on_device(mut self, leave: bool) -> Self {
        self.leave_on_device = leave;
        self
    }

    pub fn session(&self) -> &Arc<CameraSession> {
        &self.session
    }

    /// Capture a still and persist the raw and JPEG files.
    ///
    /// Blocks for the whole capture, including any wait for the session lock.
    pub fn capture_and_persist(&self) -> Result<CapturedImage, SessionError> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let Targets {
            stem,
            raw_path,
            raw_file,
            viewable_path,
            mut viewable_file,
        } = self.create_targets(&stamp)?;

        let mut raw_writer = BufWriter::new(raw_file);
        let mut viewable = Vec::new();
        let result = self
            .session
            .capture_still(&mut raw_writer, &mut viewable, self.leave_on_device)
            .and_then(|_| {
                raw_writer
                    .flush()
                    .map_err(|e| SessionError::storage("error writing raw file", e))
            });
        drop(raw_writer);

        if let Err(e) = result {
            remove_quietly(&raw_path);
            remove_quietly(&viewable_path);
            return Err(e);
        }

        let raw_path = match fs::metadata(&raw_path) {
            Ok(meta) if meta.len() == 0 => {
                remove_quietly(&raw_path);
                None
            }
            _ => {
                info!(path = %raw_path.display(), "Saved");
                Some(raw_path)
            }
        };

        write_viewable(&mut viewable_file, &viewable, raw_path.as_deref(), &viewable_path)?;
        info!(path = %viewable_path.display(), "Saved");

        Ok(CapturedImage {
            stem,
            raw_path,
            viewable_path,
            viewable: Bytes::from(viewable),
        })
    }

    /// Create both output files, adding a `_N` suffix when a capture with the
    /// same timestamp already exists.
    fn create_targets(&self, stamp: &str) -> Result<Targets, SessionError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stem = if attempt == 0 {
                stamp.to_string()
            } else {
                format!("{}_{}", stamp, attempt)
            };

            let viewable_path = self.path_for(&stem, VIEWABLE_EXTENSION);
            let viewable_file = match OpenOptions::new().write(true).create_new(true).open(&viewable_path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SessionError::storage("error creating output jpg file", e)),
            };

            let raw_path = self.path_for(&stem, &self.raw_extension);
            let raw_file = match File::create(&raw_path) {
                Ok(file) => file,
                Err(e) => {
                    remove_quietly(&viewable_path);
                    return Err(SessionError::storage("error creating output raw file", e));
                }
            };

            return Ok(Targets {
                stem,
                raw_path,
                raw_file,
                viewable_path,
                viewable_file,
            });
        }

        Err(SessionError::storage(
            "error creating output jpg file",
            std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("too many captures named {}", stamp),
            ),
        ))
    }

    fn path_for(&self, stem: &str, extension: &str) -> PathBuf {
        self.captures_dir.join(format!("{}.{}", stem, extension))
    }
}

/// Write the JPEG file. On failure the whole capture is removed from disk.
fn write_viewable(
    sink: &mut dyn Write,
    data: &[u8],
    raw_path: Option<&Path>,
    viewable_path: &Path,
) -> Result<(), SessionError> {
    if let Err(e) = sink.write_all(data).and_then(|_| sink.flush()) {
        if let Some(raw_path) = raw_path {
            remove_quietly(raw_path);
        }
        remove_quietly(viewable_path);
        return Err(SessionError::storage("error writing jpg file", e));
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial capture");
        }
    }
}
