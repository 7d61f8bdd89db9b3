//! Export of a composition into one output file.
//!
//! Each track has a reader on the blocking pool and an async pump. A pump
//! moves one sample at a time into the muxer's bounded queue for that track
//! and suspends while the queue is full. The muxer writes whichever queued
//! sample comes first in time, so a track that runs ahead stalls until the
//! other catches up. The job ends once both pumps have finished.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ffmpeg_next::{
    Rational,
    util::mathematics::rescale::{Rescale, TIME_BASE},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    composition::{Composition, TimeRange, TrackSegment},
    compositor::Compositor,
    encoder::{self, AudioEncoder, VideoEncoder},
    error::PipelineError,
    input::AvInput,
    layout::{RenderLayout, TargetFrame},
    output::{AvOutput, OutputContainer},
    packet::{RawPacket, SampleReceiver, TrackKind},
    reader::{FrameRateLimiter, TrackMode, TrackReader},
};

/// Samples buffered between a reader and its pump.
const READER_QUEUE: usize = 16;
/// Samples a pump may queue ahead of the muxer.
const MUX_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Configured,
    Running,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => JobState::Configured,
            2 => JobState::Running,
            3 => JobState::Draining,
            4 => JobState::Completed,
            5 => JobState::Cancelled,
            6 => JobState::Failed,
            _ => JobState::Idle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }
}

#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Fraction of the export done, in `[0, 1]`. Never decreases.
#[derive(Debug, Default)]
pub struct ProgressCell(AtomicU64);

impl ProgressCell {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Raises the fraction to `fraction` if that is higher. Non-negative
    /// floats order the same as their bit patterns.
    pub fn advance(&self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.0.fetch_max(fraction.to_bits(), Ordering::AcqRel);
    }
}

/// Terminal result of an export. Cancellation is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed,
    Cancelled,
    Failed(PipelineError),
}

impl std::fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportOutcome::Completed => write!(f, "completed"),
            ExportOutcome::Cancelled => write!(f, "cancelled"),
            ExportOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncodeSettings {
    pub target: TargetFrame,
    /// Frames arriving faster than this rate are dropped.
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<usize>,
    pub codec: String,
}

/// Per-track encode settings. `None` copies the track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportSettings {
    pub video: Option<VideoEncodeSettings>,
    pub reencode_audio: bool,
}

impl ExportSettings {
    /// Copies both tracks bit for bit.
    pub fn joined() -> Self {
        Self::default()
    }

    /// Re-encodes at the source's upright size.
    pub fn resampled() -> Self {
        Self {
            video: Some(VideoEncodeSettings {
                target: TargetFrame::natural(),
                frame_rate: None,
                bit_rate: None,
                codec: "libx265".to_string(),
            }),
            reencode_audio: true,
        }
    }

    /// Re-encodes into a fixed frame, boxing the picture to keep its aspect.
    pub fn custom(width: u32, height: Option<u32>, frame_rate: Option<f64>, bit_rate: Option<usize>) -> Self {
        Self {
            video: Some(VideoEncodeSettings {
                target: TargetFrame {
                    width: Some(width),
                    height,
                },
                frame_rate: frame_rate.filter(|f| *f > 0.0),
                bit_rate,
                codec: "libx265".to_string(),
            }),
            reencode_audio: true,
        }
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.codec = codec.to_string();
        }
        self
    }

    pub fn is_passthrough(&self) -> bool {
        self.video.is_none() && !self.reencode_audio
    }
}

/// An export waiting to be started.
pub struct ExportJob {
    composition: Arc<Composition>,
    output: Option<(PathBuf, OutputContainer)>,
    settings: ExportSettings,
    range: Option<TimeRange>,
    state: Arc<StateCell>,
}

impl ExportJob {
    pub fn new(composition: impl Into<Arc<Composition>>) -> Self {
        Self {
            composition: composition.into(),
            output: None,
            settings: ExportSettings::joined(),
            range: None,
            state: Arc::new(StateCell::default()),
        }
    }

    pub fn output(self, path: impl Into<PathBuf>, container: OutputContainer) -> Self {
        self.state.set(JobState::Configured);
        Self {
            output: Some((path.into(), container)),
            ..self
        }
    }

    pub fn settings(mut self, settings: ExportSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Restricts the export to part of the composition timeline.
    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    /// The range that will be exported.
    pub fn effective_range(&self) -> TimeRange {
        let full = self.composition.full_range();
        self.range.map(|r| r.clamp_to(&full)).unwrap_or(full)
    }

    /// Starts the export on the current tokio runtime.
    pub fn start(self) -> Result<JobHandle, PipelineError> {
        let (path, container) = self.output.clone().ok_or(PipelineError::OutputNotConfigured)?;
        let range = self.effective_range();
        let control = JobControl {
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressCell::default()),
            state: self.state.clone(),
            output: path.clone(),
        };
        let run = Run {
            composition: self.composition,
            path,
            container,
            settings: self.settings,
            range,
            control: control.clone(),
        };
        let task = tokio::spawn(run.execute());
        Ok(JobHandle { control, task })
    }
}

/// Shared view of a running job: cancel it, read its progress and state.
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    progress: Arc<ProgressCell>,
    state: Arc<StateCell>,
    output: PathBuf,
}

impl JobControl {
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("cancelling export to {}", self.output.display());
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

pub struct JobHandle {
    control: JobControl,
    task: tokio::task::JoinHandle<ExportOutcome>,
}

impl JobHandle {
    pub fn control(&self) -> &JobControl {
        &self.control
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn progress(&self) -> f64 {
        self.control.progress()
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    pub async fn wait(self) -> ExportOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.control.state.set(JobState::Failed);
                ExportOutcome::Failed(PipelineError::WriteFailed(format!("export task aborted: {}", e)))
            }
        }
    }
}

/// First failure seen by any part of a job.
#[derive(Debug, Default)]
struct Health(OnceLock<PipelineError>);

impl Health {
    fn fail(&self, e: PipelineError) {
        let _ = self.0.set(e);
    }

    fn failure(&self) -> Option<PipelineError> {
        self.0.get().cloned()
    }
}

enum PumpEnd {
    Finished,
    Cancelled,
    Failed(PipelineError),
}

struct Progress {
    cell: Arc<ProgressCell>,
    total_us: i64,
}

impl Progress {
    fn update(&self, packet: &RawPacket) {
        if self.total_us <= 0 {
            self.cell.advance(1.0);
            return;
        }
        if let Some(elapsed) = packet.pts_us() {
            self.cell.advance(elapsed as f64 / self.total_us as f64);
        }
    }
}

async fn pump(
    kind: TrackKind,
    mut source: SampleReceiver,
    dest: mpsc::Sender<RawPacket>,
    stop: CancellationToken,
    health: Arc<Health>,
    progress: Option<Progress>,
) -> PumpEnd {
    let mut copied = 0u64;
    let end = loop {
        if stop.is_cancelled() {
            break PumpEnd::Cancelled;
        }
        if let Some(e) = health.failure() {
            break PumpEnd::Failed(e);
        }
        // suspended here while the muxer is not ready for this track
        let permit = tokio::select! {
            biased;
            _ = stop.cancelled() => break PumpEnd::Cancelled,
            permit = dest.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break PumpEnd::Failed(health.failure().unwrap_or_else(|| {
                    PipelineError::WriteFailed("muxer stopped".to_string())
                })),
            },
        };
        let sample = tokio::select! {
            biased;
            _ = stop.cancelled() => break PumpEnd::Cancelled,
            sample = source.recv() => sample,
        };
        match sample {
            None => break PumpEnd::Finished,
            Some(Err(e)) => {
                health.fail(e.clone());
                break PumpEnd::Failed(e);
            }
            Some(Ok(packet)) => {
                if let Some(progress) = &progress {
                    progress.update(&packet);
                }
                permit.send(packet);
                copied += 1;
            }
        }
    };
    // dropping `dest` marks the track finished for the muxer
    drop(dest);
    match &end {
        PumpEnd::Finished => log::info!("{} pump finished after {} samples", kind, copied),
        PumpEnd::Cancelled => log::info!("{} pump cancelled after {} samples", kind, copied),
        PumpEnd::Failed(e) => log::warn!("{} pump failed: {}", kind, e),
    }
    end
}

struct MuxTrack {
    out_index: usize,
    rx: mpsc::Receiver<RawPacket>,
    head: Option<RawPacket>,
    open: bool,
}

fn decode_time_us(packet: &RawPacket) -> i64 {
    packet
        .dts()
        .or(packet.pts())
        .map(|t| t.rescale(packet.time_base(), TIME_BASE))
        .unwrap_or(i64::MIN)
}

/// Writes queued samples in decode-time order until every track closes.
fn mux(mut output: AvOutput, mut tracks: Vec<MuxTrack>, health: Arc<Health>) -> AvOutput {
    let mut written = 0u64;
    loop {
        for track in tracks.iter_mut().filter(|t| t.open && t.head.is_none()) {
            match track.rx.blocking_recv() {
                Some(packet) => track.head = Some(packet),
                None => track.open = false,
            }
        }
        let next = tracks
            .iter_mut()
            .filter(|t| t.head.is_some())
            .min_by_key(|t| t.head.as_ref().map(decode_time_us));
        let Some(track) = next else {
            break;
        };
        let Some(packet) = track.head.take() else {
            break;
        };
        if let Err(e) = output.write_packet(track.out_index, packet) {
            log::error!("write to {} failed: {}", output.path().display(), e);
            health.fail(PipelineError::WriteFailed(e.to_string()));
            break;
        }
        written += 1;
    }
    log::debug!("muxer wrote {} samples", written);
    output
}

struct PreparedTrack {
    kind: TrackKind,
    out_index: usize,
    reader: TrackReader,
}

fn first_stream(segment: &TrackSegment) -> Result<crate::stream::AvStream, PipelineError> {
    let input =
        AvInput::new(&segment.clip).map_err(|e| PipelineError::SourceOpenFailed(e.to_string()))?;
    input
        .streams()
        .get(&segment.source.stream_index)
        .cloned()
        .ok_or_else(|| {
            PipelineError::TrackSetupFailed(format!(
                "stream {} missing from {}",
                segment.source.stream_index,
                segment.clip.display()
            ))
        })
}

fn frame_rate_rational(fps: f64) -> Rational {
    Rational::new((fps * 1000.0).round() as i32, 1000).reduce()
}

struct Run {
    composition: Arc<Composition>,
    path: PathBuf,
    container: OutputContainer,
    settings: ExportSettings,
    range: TimeRange,
    control: JobControl,
}

impl Run {
    fn segments_in_range(&self, segments: &[TrackSegment]) -> Vec<TrackSegment> {
        segments
            .iter()
            .filter(|s| s.timeline().overlaps(&self.range))
            .cloned()
            .collect()
    }

    fn video_mode(
        &self,
        output: &mut AvOutput,
        segments: &[TrackSegment],
    ) -> Result<(usize, TrackMode), PipelineError> {
        let stream = first_stream(&segments[0])?;
        let Some(video) = &self.settings.video else {
            let index = output
                .add_copy_stream(&stream)
                .map_err(|e| PipelineError::TrackSetupFailed(e.to_string()))?;
            return Ok((index, TrackMode::Passthrough));
        };

        let format = self.composition.video_format();
        let (width, height, rotation) = format
            .map(|f| (f.width, f.height, f.rotation))
            .unwrap_or((stream.width(), stream.height(), stream.rotation()));
        let layout = RenderLayout::compute(width, height, rotation, video.target);
        let source_fps = format.map(|f| f.fps).filter(|f| *f > 0.0).unwrap_or(30.0);
        let fps = video.frame_rate.unwrap_or(source_fps);
        let settings = encoder::Settings {
            width: layout.target_width,
            height: layout.target_height,
            frame_rate: frame_rate_rational(fps),
            keyframe_interval: (fps * 2.0).round().max(1.0) as u32,
            codec: video.codec.clone(),
            bit_rate: video.bit_rate,
            global_header: output.needs_global_header(),
        };
        let encoder = VideoEncoder::new(&settings)
            .map_err(|e| PipelineError::TrackSetupFailed(format!("video encoder: {}", e)))?;
        log::info!(
            "resampling video {}x{} -> {}x{} ({:?}) with {}",
            width,
            height,
            layout.target_width,
            layout.target_height,
            layout.orientation,
            encoder.codec_name()
        );
        let index = output
            .add_encoded_stream(encoder.parameters(), encoder.time_base())
            .map_err(|e| PipelineError::TrackSetupFailed(e.to_string()))?;
        let compositor = Compositor::new(layout, encoder.pixel_format());
        Ok((
            index,
            TrackMode::EncodeVideo {
                encoder,
                compositor,
                limiter: video.frame_rate.map(FrameRateLimiter::new),
            },
        ))
    }

    fn audio_mode(
        &self,
        output: &mut AvOutput,
        segments: &[TrackSegment],
    ) -> Result<(usize, TrackMode), PipelineError> {
        if !self.settings.reencode_audio {
            let stream = first_stream(&segments[0])?;
            let index = output
                .add_copy_stream(&stream)
                .map_err(|e| PipelineError::TrackSetupFailed(e.to_string()))?;
            return Ok((index, TrackMode::Passthrough));
        }
        let encoder = AudioEncoder::new(output.needs_global_header())
            .map_err(|e| PipelineError::TrackSetupFailed(format!("audio encoder: {}", e)))?;
        let index = output
            .add_encoded_stream(encoder.parameters(), encoder.time_base())
            .map_err(|e| PipelineError::TrackSetupFailed(e.to_string()))?;
        Ok((index, TrackMode::EncodeAudio { encoder }))
    }

    fn setup_tracks(
        &self,
        output: &mut AvOutput,
        stop: &CancellationToken,
    ) -> Result<Vec<PreparedTrack>, PipelineError> {
        let mut tracks = Vec::new();

        let video = self.segments_in_range(self.composition.video());
        if !video.is_empty() {
            let (out_index, mode) = self.video_mode(output, &video)?;
            let reader = TrackReader::new(TrackKind::Video, video, self.range, mode, stop.clone());
            tracks.push(PreparedTrack {
                kind: TrackKind::Video,
                out_index,
                reader,
            });
        }

        let audio = self.segments_in_range(self.composition.audio());
        if !audio.is_empty() {
            let (out_index, mode) = self.audio_mode(output, &audio)?;
            let reader = TrackReader::new(TrackKind::Audio, audio, self.range, mode, stop.clone());
            tracks.push(PreparedTrack {
                kind: TrackKind::Audio,
                out_index,
                reader,
            });
        }

        if tracks.is_empty() {
            return Err(PipelineError::TrackSetupFailed(
                "no video or audio in the requested range".to_string(),
            ));
        }

        match AvInput::new(self.composition.metadata_source()) {
            Ok(input) => output.set_metadata(input.metadata()),
            Err(e) => log::warn!("container metadata not copied: {}", e),
        }
        Ok(tracks)
    }

    /// Blocking: opens the destination and every track's encoder or copy stream.
    fn prepare(&self, stop: &CancellationToken) -> Result<(AvOutput, Vec<PreparedTrack>), PipelineError> {
        let mut output = AvOutput::new(&self.path, self.container)
            .map_err(|e| PipelineError::DestinationOpenFailed(e.to_string()))?;
        match self.setup_tracks(&mut output, stop) {
            Ok(tracks) => Ok((output, tracks)),
            Err(e) => {
                discard(output);
                Err(e)
            }
        }
    }

    async fn execute(self) -> ExportOutcome {
        let control = self.control.clone();
        control.state.set(JobState::Running);
        log::info!(
            "export to {} started, range {}us..{}us",
            self.path.display(),
            self.range.start_us,
            self.range.end_us
        );
        let outcome = self.run().await;
        let state = match &outcome {
            ExportOutcome::Completed => {
                control.progress.advance(1.0);
                JobState::Completed
            }
            ExportOutcome::Cancelled => JobState::Cancelled,
            ExportOutcome::Failed(_) => JobState::Failed,
        };
        control.state.set(state);
        log::info!("export to {} {}", control.output.display(), outcome);
        outcome
    }

    async fn run(self) -> ExportOutcome {
        let control = self.control.clone();
        // internal stop: user cancellation or a failure in either track
        let stop = control.cancel.child_token();
        let health = Arc::new(Health::default());
        let total_us = self.range.duration_us();
        let path = self.path.clone();

        let run = Arc::new(self);
        let prepared = {
            let run = run.clone();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || run.prepare(&stop)).await
        };
        let (output, tracks) = match prepared {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(e)) => return ExportOutcome::Failed(e),
            Err(e) => return ExportOutcome::Failed(PipelineError::TrackSetupFailed(e.to_string())),
        };
        if control.cancel.is_cancelled() {
            if let Err(e) = tokio::task::spawn_blocking(move || discard(output)).await {
                log::warn!("cleanup task for {} failed: {}", path.display(), e);
                remove_partial(&path);
            }
            return ExportOutcome::Cancelled;
        }

        let mut mux_tracks = Vec::new();
        let mut pumps = Vec::new();
        let mut readers = Vec::new();
        for track in tracks {
            let (source, reader) = track.reader.spawn(READER_QUEUE);
            readers.push(reader);
            let (dest, rx) = mpsc::channel(MUX_QUEUE);
            mux_tracks.push(MuxTrack {
                out_index: track.out_index,
                rx,
                head: None,
                open: true,
            });
            let progress = (track.kind == TrackKind::Video).then(|| Progress {
                cell: control.progress.clone(),
                total_us,
            });
            pumps.push(tokio::spawn(pump(
                track.kind,
                source,
                dest,
                stop.clone(),
                health.clone(),
                progress,
            )));
        }
        let muxer = {
            let health = health.clone();
            tokio::task::spawn_blocking(move || mux(output, mux_tracks, health))
        };

        let mut failure = None;
        for joined in futures::future::join_all(pumps).await {
            match joined {
                Ok(PumpEnd::Failed(e)) => {
                    stop.cancel();
                    failure.get_or_insert(e);
                }
                Ok(PumpEnd::Finished) | Ok(PumpEnd::Cancelled) => {}
                Err(e) => {
                    stop.cancel();
                    failure.get_or_insert(PipelineError::ReadFailed(e.to_string()));
                }
            }
        }
        // a track that failed first has already told the others to stop
        let failure = health.failure().or(failure);

        control.state.set(JobState::Draining);
        let output = match muxer.await {
            Ok(output) => output,
            Err(e) => {
                stop.cancel();
                remove_partial(&path);
                return ExportOutcome::Failed(PipelineError::WriteFailed(e.to_string()));
            }
        };
        for reader in readers {
            if let Err(e) = reader.await {
                log::warn!("track reader for {} panicked: {}", path.display(), e);
            }
        }

        let outcome = if control.cancel.is_cancelled() {
            ExportOutcome::Cancelled
        } else if let Some(e) = failure.or_else(|| health.failure()) {
            ExportOutcome::Failed(e)
        } else {
            ExportOutcome::Completed
        };

        let finalised = tokio::task::spawn_blocking(move || {
            let mut output = output;
            if outcome == ExportOutcome::Completed {
                match output.finish() {
                    Ok(()) => return outcome,
                    Err(e) => {
                        discard(output);
                        return ExportOutcome::Failed(PipelineError::WriteFailed(e.to_string()));
                    }
                }
            }
            discard(output);
            outcome
        })
        .await;

        match finalised {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_partial(&path);
                ExportOutcome::Failed(PipelineError::WriteFailed(e.to_string()))
            }
        }
    }
}

/// Closes `output` without a trailer and deletes the file.
fn discard(output: AvOutput) {
    let path = output.path().to_path_buf();
    if let Err(e) = output.abort() {
        log::warn!("failed to remove partial output {}: {}", path.display(), e);
    }
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_decreases() {
        let cell = ProgressCell::default();
        assert_eq!(cell.get(), 0.0);
        cell.advance(0.4);
        cell.advance(0.2);
        assert_eq!(cell.get(), 0.4);
        cell.advance(7.0);
        assert_eq!(cell.get(), 1.0);
        cell.advance(f64::NAN);
        assert_eq!(cell.get(), 1.0);
    }

    #[test]
    fn test_zero_length_range_reports_done() {
        let progress = Progress {
            cell: Arc::new(ProgressCell::default()),
            total_us: 0,
        };
        let packet = RawPacket::from((ffmpeg_next::codec::packet::Packet::empty(), TIME_BASE));
        progress.update(&packet);
        assert_eq!(progress.cell.get(), 1.0);
    }

    #[test]
    fn test_job_state_round_trips() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), JobState::Idle);
        for state in [
            JobState::Configured,
            JobState::Running,
            JobState::Draining,
            JobState::Completed,
            JobState::Cancelled,
            JobState::Failed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Draining.is_terminal());
    }

    #[test]
    fn test_export_presets() {
        assert!(ExportSettings::joined().is_passthrough());
        let resampled = ExportSettings::resampled();
        assert!(resampled.reencode_audio);
        assert_eq!(resampled.video.as_ref().map(|v| v.target), Some(TargetFrame::natural()));
        let custom = ExportSettings::custom(1280, None, Some(0.0), Some(4_000_000)).with_codec("mpeg4");
        let video = custom.video.unwrap();
        assert_eq!(video.target.width, Some(1280));
        assert_eq!(video.frame_rate, None);
        assert_eq!(video.codec, "mpeg4");
    }

    #[tokio::test]
    async fn test_start_requires_output() {
        let composition = Composition::from_tracks(&[crate::composition::ClipTracks {
            path: PathBuf::from("a.mp4"),
            video: Some(crate::composition::SourceTrack {
                stream_index: 0,
                start_us: 0,
                duration_us: 1_000_000,
            }),
            audio: None,
            video_format: None,
        }])
        .unwrap();
        let job = ExportJob::new(composition);
        assert_eq!(job.state(), JobState::Idle);
        assert!(matches!(job.start(), Err(PipelineError::OutputNotConfigured)));
    }

    #[test]
    fn test_effective_range_is_clamped() {
        let composition = Composition::from_tracks(&[crate::composition::ClipTracks {
            path: PathBuf::from("a.mp4"),
            video: Some(crate::composition::SourceTrack {
                stream_index: 0,
                start_us: 0,
                duration_us: 10_000_000,
            }),
            audio: None,
            video_format: None,
        }])
        .unwrap();
        let job = ExportJob::new(composition)
            .output("out.mp4", OutputContainer::Mp4)
            .time_range(TimeRange::new(5_000_000, 50_000_000));
        assert_eq!(job.state(), JobState::Configured);
        assert_eq!(job.effective_range(), TimeRange::new(5_000_000, 10_000_000));
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
