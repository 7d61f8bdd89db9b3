use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::{error::ProbeError, metadata};

/// Resolved facts about one clip, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTiming {
    pub duration: f64,
    /// Seconds since the Unix epoch, possibly fractional.
    pub capture_timestamp: f64,
}

impl ClipTiming {
    pub fn end(&self) -> f64 {
        self.capture_timestamp + self.duration
    }
}

/// One source video file. Identity is the path; timing is filled in by
/// [`ClipFile::resolve`] and cached.
#[derive(Debug, Clone)]
pub struct ClipFile {
    folder: PathBuf,
    file_name: String,
    timing: Option<ClipTiming>,
}

impl PartialEq for ClipFile {
    fn eq(&self, other: &Self) -> bool {
        self.folder == other.folder && self.file_name == other.file_name
    }
}

impl Eq for ClipFile {}

impl Hash for ClipFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folder.hash(state);
        self.file_name.hash(state);
    }
}

impl ClipFile {
    pub fn new(folder: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file_name: file_name.into(),
            timing: None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Some(Self::new(folder, file_name))
    }

    /// Builds an already-resolved clip; used when timing is known up front.
    pub fn with_timing(mut self, timing: ClipTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.file_name)
    }

    pub fn timing(&self) -> Option<ClipTiming> {
        self.timing
    }

    pub fn duration(&self) -> Option<f64> {
        self.timing.map(|t| t.duration)
    }

    pub fn capture_timestamp(&self) -> Option<f64> {
        self.timing.map(|t| t.capture_timestamp)
    }

    /// Probes once and caches the result. Later calls return the cached value.
    pub fn resolve(&mut self, probe: &dyn ClipProbe) -> Result<ClipTiming, ProbeError> {
        if let Some(timing) = self.timing {
            return Ok(timing);
        }
        let timing = probe.probe(self)?;
        self.timing = Some(timing);
        Ok(timing)
    }
}

/// Reads duration and capture time for a clip.
pub trait ClipProbe: Send + Sync {
    fn duration(&self, clip: &ClipFile) -> Result<f64, ProbeError>;

    fn capture_timestamp(&self, clip: &ClipFile, duration: f64) -> Result<f64, ProbeError>;

    fn probe(&self, clip: &ClipFile) -> Result<ClipTiming, ProbeError> {
        let duration = self.duration(clip)?;
        let capture_timestamp = self.capture_timestamp(clip, duration)?;
        Ok(ClipTiming {
            duration,
            capture_timestamp,
        })
    }
}

fn local_timestamp(naive: NaiveDateTime) -> Option<f64> {
    let dt = Local.from_local_datetime(&naive).earliest()?;
    Some(dt.timestamp() as f64 + dt.timestamp_subsec_micros() as f64 / 1_000_000.0)
}

/// Capture time encoded in a dashcam file name, interpreted as local time.
///
/// Recognised stems: `2023_05_02_143015`, `VID_20230502_143015` and
/// `20230502_143015` with an optional `_<camera>` suffix.
pub fn timestamp_from_file_name(file_name: &str) -> Option<f64> {
    let stem = match file_name.rfind('.') {
        Some(i) => &file_name[..i],
        None => file_name,
    };

    if let Ok(naive) = NaiveDateTime::parse_from_str(stem, "%Y_%m_%d_%H%M%S") {
        return local_timestamp(naive);
    }

    let compact = stem.strip_prefix("VID_").unwrap_or(stem);
    let head = match compact.get(..15) {
        Some(head) if compact.len() == 15 || compact[15..].starts_with('_') => head,
        _ => return None,
    };
    NaiveDateTime::parse_from_str(head, "%Y%m%d_%H%M%S")
        .ok()
        .and_then(local_timestamp)
}

/// Ordered fallback: file name, then creation time, then modification time
/// minus the clip's duration.
pub fn choose_timestamp(
    from_name: Option<f64>,
    created: Option<f64>,
    modified: Option<f64>,
    duration: f64,
) -> Option<f64> {
    from_name
        .or(created)
        .or_else(|| modified.map(|m| m - duration))
}

fn epoch_secs(t: std::io::Result<SystemTime>) -> Option<f64> {
    let t = t.ok()?;
    t.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

/// Probes real files through FFmpeg and the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaClipProbe;

impl ClipProbe for MediaClipProbe {
    fn duration(&self, clip: &ClipFile) -> Result<f64, ProbeError> {
        let path = clip.path();
        let info = metadata::probe(&path).map_err(|e| ProbeError::Media(e.to_string()))?;
        let duration = info
            .duration_secs()
            .or_else(|| {
                info.video()
                    .and_then(|v| v.duration_us)
                    .map(|d| d as f64 / 1_000_000.0)
            })
            .unwrap_or(0.0);
        if duration <= 0.0 {
            return Err(ProbeError::EmptyClip(path.display().to_string()));
        }
        Ok(duration)
    }

    fn capture_timestamp(&self, clip: &ClipFile, duration: f64) -> Result<f64, ProbeError> {
        let from_name = timestamp_from_file_name(clip.file_name());
        let (created, modified) = match std::fs::metadata(clip.path()) {
            Ok(meta) => (epoch_secs(meta.created()), epoch_secs(meta.modified())),
            Err(e) => {
                log::debug!("no filesystem metadata for {}: {}", clip.path().display(), e);
                (None, None)
            }
        };
        choose_timestamp(from_name, created, modified, duration)
            .ok_or_else(|| ProbeError::Unresolvable(clip.path().display().to_string()))
    }
}
