//! Virtual concatenated timeline over a journey's clips.
//!
//! All times are microseconds. Video and audio are laid out independently so
//! a clip missing one kind does not shift the other.

use std::path::{Path, PathBuf};

use crate::{error::CompositionError, input::AvInput, journey::Journey, stream::AvStream};

/// Half-open interval on a timeline, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_us: i64,
    pub end_us: i64,
}

impl TimeRange {
    pub fn new(start_us: i64, end_us: i64) -> Self {
        Self {
            start_us,
            end_us: end_us.max(start_us),
        }
    }

    pub fn from_secs(start: f64, end: f64) -> Self {
        Self::new((start * 1e6).round() as i64, (end * 1e6).round() as i64)
    }

    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    pub fn clamp_to(&self, outer: &TimeRange) -> TimeRange {
        TimeRange::new(
            self.start_us.clamp(outer.start_us, outer.end_us),
            self.end_us.clamp(outer.start_us, outer.end_us),
        )
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_us < other.end_us && other.start_us < self.end_us
    }
}

/// Usable part of one source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTrack {
    pub stream_index: usize,
    /// First presentation time in the source, microseconds.
    pub start_us: i64,
    pub duration_us: i64,
}

/// Picture facts of the first video clip; drive the resampled frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Counter-clockwise display rotation in degrees.
    pub rotation: f64,
    pub fps: f64,
}

/// Track facts for one clip, as read from its container.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipTracks {
    pub path: PathBuf,
    pub video: Option<SourceTrack>,
    pub audio: Option<SourceTrack>,
    pub video_format: Option<VideoFormat>,
}

fn source_track(stream: &AvStream, container_duration_us: Option<i64>) -> Option<SourceTrack> {
    let duration_us = stream.duration_us().or(container_duration_us)?;
    if duration_us <= 0 {
        return None;
    }
    Some(SourceTrack {
        stream_index: stream.index(),
        start_us: stream.start_us(),
        duration_us,
    })
}

impl ClipTracks {
    pub fn read(path: &Path) -> Result<Self, CompositionError> {
        let input = AvInput::new(path).map_err(|e| CompositionError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let container_duration = input.duration_us();
        let video_stream = input.first_video();
        let video = video_stream.and_then(|s| source_track(s, container_duration));
        let audio = input
            .first_audio()
            .and_then(|s| source_track(s, container_duration));
        let video_format = video_stream.map(|s| VideoFormat {
            width: s.width(),
            height: s.height(),
            rotation: s.rotation(),
            fps: s.fps() as f64,
        });
        Ok(Self {
            path: path.to_path_buf(),
            video,
            audio,
            video_format,
        })
    }
}

/// One source range placed on the output timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSegment {
    pub clip: PathBuf,
    pub source: SourceTrack,
    pub offset_us: i64,
}

impl TrackSegment {
    pub fn timeline(&self) -> TimeRange {
        TimeRange::new(self.offset_us, self.offset_us + self.source.duration_us)
    }

    /// Source presentation time to timeline time.
    pub fn to_timeline(&self, source_us: i64) -> i64 {
        source_us - self.source.start_us + self.offset_us
    }

    pub fn to_source(&self, timeline_us: i64) -> i64 {
        timeline_us - self.offset_us + self.source.start_us
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    video: Vec<TrackSegment>,
    audio: Vec<TrackSegment>,
    video_format: Option<VideoFormat>,
    metadata_source: PathBuf,
}

fn append(segments: &mut Vec<TrackSegment>, clip: &Path, source: SourceTrack) {
    let offset_us = segments.last().map(|s| s.timeline().end_us).unwrap_or(0);
    segments.push(TrackSegment {
        clip: clip.to_path_buf(),
        source,
        offset_us,
    });
}

impl Composition {
    /// Lays clips end to end in the order given.
    pub fn from_tracks(clips: &[ClipTracks]) -> Result<Self, CompositionError> {
        let first = clips.first().ok_or(CompositionError::Empty)?;
        let mut video = Vec::new();
        let mut audio = Vec::new();
        let mut video_format = None;
        for clip in clips {
            if let Some(track) = clip.video {
                append(&mut video, &clip.path, track);
                video_format = video_format.or(clip.video_format);
            }
            if let Some(track) = clip.audio {
                append(&mut audio, &clip.path, track);
            }
        }
        // audio alone is not an export
        if video.is_empty() {
            return Err(CompositionError::NoExportableTracks);
        }
        Ok(Self {
            video,
            audio,
            video_format,
            metadata_source: first.path.clone(),
        })
    }

    /// A one-clip composition, for exporting a single file.
    pub fn single_clip(path: &Path) -> Result<Self, CompositionError> {
        Self::from_tracks(&[ClipTracks::read(path)?])
    }

    pub fn video(&self) -> &[TrackSegment] {
        &self.video
    }

    pub fn audio(&self) -> &[TrackSegment] {
        &self.audio
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        self.video_format
    }

    /// Clip whose container tags are copied to the output.
    pub fn metadata_source(&self) -> &Path {
        &self.metadata_source
    }

    fn track_end(segments: &[TrackSegment]) -> i64 {
        segments.last().map(|s| s.timeline().end_us).unwrap_or(0)
    }

    pub fn video_duration_us(&self) -> i64 {
        Self::track_end(&self.video)
    }

    pub fn audio_duration_us(&self) -> i64 {
        Self::track_end(&self.audio)
    }

    pub fn duration_us(&self) -> i64 {
        self.video_duration_us().max(self.audio_duration_us())
    }

    pub fn full_range(&self) -> TimeRange {
        TimeRange::new(0, self.duration_us())
    }
}

/// Builds compositions from journeys by reading each clip's tracks.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositionBuilder;

impl CompositionBuilder {
    /// Blocking: opens every clip. Run on the blocking pool from async code.
    pub fn build(&self, journey: &Journey) -> Result<Composition, CompositionError> {
        if journey.is_empty() {
            return Err(CompositionError::Empty);
        }
        let tracks = journey
            .clips()
            .iter()
            .map(|clip| ClipTracks::read(&clip.path()))
            .collect::<Result<Vec<_>, _>>()?;
        Composition::from_tracks(&tracks)
    }

    pub async fn build_async(&self, journey: Journey) -> Result<Composition, CompositionError> {
        let builder = *self;
        tokio::task::spawn_blocking(move || builder.build(&journey))
            .await
            .map_err(|e| CompositionError::Probe {
                path: PathBuf::new(),
                reason: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: usize, start: i64, duration: i64) -> Option<SourceTrack> {
        Some(SourceTrack {
            stream_index: index,
            start_us: start,
            duration_us: duration,
        })
    }

    fn clip(name: &str, video: Option<SourceTrack>, audio: Option<SourceTrack>) -> ClipTracks {
        ClipTracks {
            path: PathBuf::from(name),
            video,
            audio,
            video_format: video.map(|_| VideoFormat {
                width: 1920,
                height: 1080,
                rotation: 0.0,
                fps: 30.0,
            }),
        }
    }

    #[test]
    fn test_tracks_are_contiguous() {
        let clips = vec![
            clip("a", track(0, 0, 30_000_000), track(1, 0, 29_990_000)),
            clip("b", track(0, 1_000, 30_000_000), track(1, 0, 30_010_000)),
            clip("c", track(0, 0, 10_000_000), track(1, 0, 10_000_000)),
        ];
        let composition = Composition::from_tracks(&clips).unwrap();

        let offsets: Vec<i64> = composition.video().iter().map(|s| s.offset_us).collect();
        assert_eq!(offsets, vec![0, 30_000_000, 60_000_000]);
        let offsets: Vec<i64> = composition.audio().iter().map(|s| s.offset_us).collect();
        assert_eq!(offsets, vec![0, 29_990_000, 60_000_000]);

        for track in [composition.video(), composition.audio()] {
            for pair in track.windows(2) {
                assert_eq!(pair[0].timeline().end_us, pair[1].offset_us);
            }
        }
        assert_eq!(composition.duration_us(), 70_000_000);
        assert_eq!(composition.metadata_source(), Path::new("a"));
    }

    #[test]
    fn test_missing_track_kind_does_not_shift_the_other() {
        let clips = vec![
            clip("a", track(0, 0, 10_000_000), None),
            clip("b", track(0, 0, 10_000_000), track(1, 0, 10_000_000)),
        ];
        let composition = Composition::from_tracks(&clips).unwrap();
        assert_eq!(composition.audio().len(), 1);
        assert_eq!(composition.audio()[0].offset_us, 0);
        assert_eq!(composition.video()[1].offset_us, 10_000_000);
    }

    #[test]
    fn test_build_is_idempotent() {
        let clips = vec![
            clip("a", track(0, 500, 5_000_000), track(1, 0, 5_000_000)),
            clip("b", track(0, 0, 7_000_000), None),
        ];
        assert_eq!(
            Composition::from_tracks(&clips).unwrap(),
            Composition::from_tracks(&clips).unwrap()
        );
    }

    #[test]
    fn test_empty_and_trackless() {
        assert_eq!(Composition::from_tracks(&[]), Err(CompositionError::Empty));
        assert_eq!(
            Composition::from_tracks(&[clip("a", None, None)]),
            Err(CompositionError::NoExportableTracks)
        );
    }

    #[test]
    fn test_audio_only_journey_is_not_exportable() {
        let clips = vec![
            clip("a", None, track(1, 0, 10_000_000)),
            clip("b", None, track(1, 0, 10_000_000)),
        ];
        assert_eq!(
            Composition::from_tracks(&clips),
            Err(CompositionError::NoExportableTracks)
        );
    }

    #[test]
    fn test_segment_time_mapping() {
        let segment = TrackSegment {
            clip: PathBuf::from("a"),
            source: SourceTrack {
                stream_index: 0,
                start_us: 1_000,
                duration_us: 10_000,
            },
            offset_us: 50_000,
        };
        assert_eq!(segment.to_timeline(1_000), 50_000);
        assert_eq!(segment.to_source(55_000), 6_000);
        assert_eq!(segment.timeline(), TimeRange::new(50_000, 60_000));
    }

    #[test]
    fn test_time_range_helpers() {
        let outer = TimeRange::new(0, 100);
        assert_eq!(TimeRange::new(-5, 500).clamp_to(&outer), outer);
        assert_eq!(TimeRange::new(10, 5).duration_us(), 0);
        assert!(TimeRange::new(0, 10).overlaps(&TimeRange::new(9, 20)));
        assert!(!TimeRange::new(0, 10).overlaps(&TimeRange::new(10, 20)));
        assert_eq!(TimeRange::from_secs(1.5, 2.0), TimeRange::new(1_500_000, 2_000_000));
    }
}
