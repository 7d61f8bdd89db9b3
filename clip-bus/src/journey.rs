use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::{
    clip::{ClipFile, ClipProbe, ClipTiming},
    discovery,
    error::{DeleteError, NameStoreError, SegmentError},
    names::JourneyNames,
};

/// Largest gap, in seconds, between one clip's end and the next clip's start
/// that still counts as the same journey. The comparison is strict: a gap of
/// exactly this value joins.
pub const JOURNEY_GAP_SECS: f64 = 5.0;

/// A run of clips recorded back to back.
#[derive(Debug, Clone)]
pub struct Journey {
    clips: Vec<ClipFile>,
    creation_date: f64,
    name: Option<String>,
}

/// How hard [`Journey::delete_clips`] tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Normal,
    /// Clears the read-only flag and retries when the first attempt is refused.
    Force,
}

impl Journey {
    /// `clips` must be non-empty, resolved and in capture order.
    fn from_clips(clips: Vec<ClipFile>) -> Option<Self> {
        let creation_date = clips.first()?.capture_timestamp()?;
        Some(Self {
            clips,
            creation_date,
            name: None,
        })
    }

    pub fn clips(&self) -> &[ClipFile] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Capture time of the first clip, seconds since the epoch.
    pub fn creation_date(&self) -> f64 {
        self.creation_date
    }

    pub fn duration(&self) -> f64 {
        self.clips.iter().filter_map(ClipFile::duration).sum()
    }

    /// Key under which the journey's name is stored: the first clip's path.
    pub fn key(&self) -> PathBuf {
        self.clips
            .first()
            .map(ClipFile::path)
            .unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn load_name(&mut self, names: &dyn JourneyNames) {
        self.name = names.get(&self.key());
    }

    pub fn rename(&mut self, names: &dyn JourneyNames, name: &str) -> Result<(), NameStoreError> {
        names.set(&self.key(), name)?;
        self.name = Some(name.to_string());
        Ok(())
    }

    /// Default output file name, e.g. `2023-05-02 14-30-15 Joined.mp4`.
    pub fn merged_name(&self, resampled: bool) -> String {
        let mut name = String::new();
        let micros = (self.creation_date * 1e6).round() as i64;
        if let Some(date) = DateTime::from_timestamp_micros(micros).map(|d| d.with_timezone(&Local)) {
            name.push_str(&date.format("%Y-%m-%d %H-%M-%S ").to_string());
        }
        name.push_str(if resampled { "Resampled.mp4" } else { "Joined.mp4" });
        name
    }

    /// Deletes every clip file. Returns the clips that could not be removed.
    pub fn delete_clips(&self, mode: DeleteMode) -> Vec<DeleteError> {
        let mut failures = Vec::new();
        for clip in &self.clips {
            let path = clip.path();
            if let Err(source) = delete_file(&path, mode) {
                log::warn!("failed to delete {}: {}", path.display(), source);
                failures.push(DeleteError { path, source });
            }
        }
        failures
    }
}

fn delete_file(path: &Path, mode: DeleteMode) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && mode == DeleteMode::Force => {
            let mut permissions = std::fs::metadata(path)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            std::fs::set_permissions(path, permissions)?;
            std::fs::remove_file(path)
        }
        other => other,
    }
}

/// A clip is usable when it has length and a plausible capture time.
pub fn is_usable(timing: &ClipTiming) -> bool {
    timing.duration > 0.0
        && timing.duration.is_finite()
        && timing.capture_timestamp.is_finite()
        && timing.capture_timestamp >= 0.0
}

/// Groups resolved clips into journeys. Unresolved or unusable clips are
/// dropped; equal timestamps keep their input order.
pub fn segment(clips: Vec<ClipFile>, gap_threshold: f64) -> Vec<Journey> {
    let mut accepted: Vec<(ClipFile, ClipTiming)> = clips
        .into_iter()
        .filter_map(|clip| {
            let timing = clip.timing()?;
            if is_usable(&timing) {
                Some((clip, timing))
            } else {
                log::debug!("dropping {}: unusable timing {:?}", clip.file_name(), timing);
                None
            }
        })
        .collect();
    accepted.sort_by(|a, b| a.1.capture_timestamp.total_cmp(&b.1.capture_timestamp));

    let mut journeys = Vec::new();
    let mut current = Vec::new();
    let mut prev_end: Option<f64> = None;
    for (clip, timing) in accepted {
        if let Some(end) = prev_end {
            if (timing.capture_timestamp - end).abs() > gap_threshold && !current.is_empty() {
                journeys.extend(Journey::from_clips(std::mem::take(&mut current)));
            }
        }
        prev_end = Some(timing.end());
        current.push(clip);
    }
    journeys.extend(Journey::from_clips(current));
    journeys
}

/// Probes clips in parallel and groups them into journeys.
pub struct JourneySegmenter {
    probe: Arc<dyn ClipProbe>,
    gap_threshold: f64,
}

impl JourneySegmenter {
    pub fn new(probe: Arc<dyn ClipProbe>) -> Self {
        Self {
            probe,
            gap_threshold: JOURNEY_GAP_SECS,
        }
    }

    pub fn with_gap_threshold(mut self, secs: f64) -> Self {
        self.gap_threshold = secs;
        self
    }

    pub fn gap_threshold(&self) -> f64 {
        self.gap_threshold
    }

    /// Resolves every clip on the blocking pool, then segments. Clips that
    /// fail to probe are excluded, never fatal.
    pub async fn segment_clips(&self, clips: Vec<ClipFile>) -> Vec<Journey> {
        let tasks = clips.into_iter().map(|mut clip| {
            let probe = self.probe.clone();
            tokio::task::spawn_blocking(move || {
                let result = clip.resolve(probe.as_ref());
                (clip, result)
            })
        });

        let mut resolved = Vec::new();
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok((clip, Ok(_))) => resolved.push(clip),
                Ok((clip, Err(e))) => log::debug!("excluding {}: {}", clip.file_name(), e),
                Err(e) => log::warn!("probe task failed: {}", e),
            }
        }

        let journeys = segment(resolved, self.gap_threshold);
        log::info!("segmented into {} journeys", journeys.len());
        journeys
    }

    pub async fn segment_folder(&self, folder: &Path) -> Result<Vec<Journey>, SegmentError> {
        let clips = discovery::scan_folder(folder)?;
        Ok(self.segment_clips(clips).await)
    }
}

/// `hh:mm:s.ss`, hours wrapping at a day. Seconds are not zero padded.
pub fn format_time_interval(secs: f64) -> String {
    let whole = secs.max(0.0) as u64;
    let h = (whole / 3600) % 24;
    let m = (whole / 60) % 60;
    let s = secs.max(0.0) % 60.0;
    format!("{:02}:{:02}:{:02.2}", h, m, s)
}
