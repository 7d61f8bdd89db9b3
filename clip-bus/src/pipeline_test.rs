use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::Rational;
use futures::StreamExt;

use crate::clip::{ClipFile, ClipProbe, ClipTiming, MediaClipProbe, timestamp_from_file_name};
use crate::composition::{ClipTracks, Composition, CompositionBuilder, SourceTrack, TimeRange};
use crate::compositor::black_frame;
use crate::encoder::{self, AudioEncoder, VideoEncoder};
use crate::error::{PipelineError, RegistryError};
use crate::journey::{self, Journey, JourneySegmenter};
use crate::metadata::probe;
use crate::output::{AvOutput, OutputContainer};
use crate::pipeline::{ExportJob, ExportOutcome, ExportSettings, JobState};
use crate::progress::{ExportEvent, ProgressCoordinator};
use crate::registry::JobRegistry;
use super::discard;
use crate::resampler::{PCM_FORMAT, PCM_LAYOUT, PCM_RATE};

const FPS: i32 = 25;
const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// True when the encoders used to synthesise test clips are built in.
fn encoders_available() -> bool {
    let _ = crate::init();
    let ok = ffmpeg_next::encoder::find_by_name("mpeg4").is_some()
        && ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::AAC).is_some();
    if !ok {
        eprintln!("skip: mpeg4/aac encoders not available");
    }
    ok
}

fn sine_frame(start: usize, samples: usize) -> ffmpeg_next::frame::Audio {
    let mut frame = ffmpeg_next::frame::Audio::new(PCM_FORMAT, samples, PCM_LAYOUT);
    frame.set_rate(PCM_RATE);
    for plane in 0..2 {
        let data = &mut frame.data_mut(plane)[..samples * 4];
        for (i, chunk) in data.chunks_exact_mut(4).enumerate() {
            let t = (start + i) as f32 / PCM_RATE as f32;
            let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.25;
            chunk.copy_from_slice(&v.to_ne_bytes());
        }
    }
    frame
}

/// Writes a short MPEG-4 + AAC clip.
fn write_clip(path: &Path, secs: u32, with_audio: bool) -> anyhow::Result<()> {
    write_tagged_clip(path, secs, with_audio, &[])
}

fn write_tagged_clip(path: &Path, secs: u32, with_audio: bool, tags: &[(&str, &str)]) -> anyhow::Result<()> {
    let mut output = AvOutput::new(path, OutputContainer::Mp4)?;
    if !tags.is_empty() {
        let mut dict = ffmpeg_next::Dictionary::new();
        for (key, value) in tags {
            dict.set(key, value);
        }
        output.set_metadata(dict);
    }
    let settings = encoder::Settings {
        width: WIDTH,
        height: HEIGHT,
        frame_rate: Rational(FPS, 1),
        keyframe_interval: 5,
        codec: "mpeg4".to_string(),
        bit_rate: Some(400_000),
        global_header: output.needs_global_header(),
    };
    let mut video = VideoEncoder::new(&settings)?;
    let video_index = output.add_encoded_stream(video.parameters(), video.time_base())?;
    let mut audio = if with_audio {
        let audio = AudioEncoder::new(output.needs_global_header())?;
        let index = output.add_encoded_stream(audio.parameters(), audio.time_base())?;
        Some((audio, index))
    } else {
        None
    };

    let frames = secs as i64 * FPS as i64;
    for i in 0..frames {
        let mut frame = black_frame(WIDTH, HEIGHT);
        frame.data_mut(0).fill((16 + (i * 7) % 200) as u8);
        video.send_frame(&mut frame, i * 1_000_000 / FPS as i64)?;
        while let Some(packet) = video.receive_packet()? {
            output.write_packet(video_index, packet)?;
        }
    }
    video.send_eof()?;
    while let Some(packet) = video.receive_packet()? {
        output.write_packet(video_index, packet)?;
    }

    if let Some((audio, index)) = audio.as_mut() {
        let total = secs as usize * PCM_RATE as usize;
        let mut written = 0;
        while written < total {
            let n = 1024.min(total - written);
            audio.push(&sine_frame(written, n));
            written += n;
            for packet in audio.drain(false)? {
                output.write_packet(*index, packet)?;
            }
        }
        for packet in audio.drain(true)? {
            output.write_packet(*index, packet)?;
        }
    }
    output.finish()?;
    Ok(())
}

fn journey_of(dir: &Path, clips: &[(&str, u32)]) -> anyhow::Result<Journey> {
    let mut ts = 1_700_000_000.0;
    let mut files = Vec::new();
    for (name, secs) in clips {
        write_tagged_clip(&dir.join(name), *secs, true, &[("title", *name)])?;
        files.push(ClipFile::new(dir, *name).with_timing(ClipTiming {
            duration: *secs as f64,
            capture_timestamp: ts,
        }));
        ts += *secs as f64;
    }
    journey::segment(files, journey::JOURNEY_GAP_SECS)
        .into_iter()
        .next()
        .ok_or(anyhow::anyhow!("no journey"))
}

fn duration_secs(path: &Path) -> anyhow::Result<f64> {
    probe(path)?
        .duration_secs()
        .ok_or(anyhow::anyhow!("{} has no duration", path.display()))
}

#[tokio::test]
async fn test_passthrough_join_sums_durations() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2), ("b.mp4", 2)])?;
    let composition = CompositionBuilder.build_async(journey.clone()).await?;
    assert_eq!(composition.video().len(), 2);
    assert_eq!(composition.audio().len(), 2);

    let out = dir.path().join(journey.merged_name(false));
    let handle = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .settings(ExportSettings::joined())
        .start()?;
    let control = handle.control().clone();
    let outcome = handle.wait().await;
    assert_eq!(outcome, ExportOutcome::Completed);
    assert_eq!(control.state(), JobState::Completed);
    assert_eq!(control.progress(), 1.0);

    let info = probe(&out)?;
    let duration = info.duration_secs().unwrap_or(0.0);
    assert!((duration - 4.0).abs() < 0.15, "joined duration {}", duration);
    assert_eq!(info.video().map(|v| v.codec_name.as_str()), Some("mpeg4"));
    assert!(info.audio().is_some());
    // container tags come from the first clip
    assert_eq!(info.tag("title"), Some("a.mp4"));
    Ok(())
}

#[tokio::test]
async fn test_restricted_range_progress_ends_at_range_end() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2), ("b.mp4", 2)])?;
    let composition = CompositionBuilder.build_async(journey).await?;
    let half = TimeRange::new(0, composition.video_duration_us() / 2);

    let out = dir.path().join("half.mp4");
    let job = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .time_range(half);
    let coordinator = ProgressCoordinator::new(std::time::Duration::from_millis(5));
    let (_control, events) = coordinator.start(job)?;
    let events: Vec<ExportEvent> = events.collect().await;

    assert_eq!(events.first(), Some(&ExportEvent::Started));
    assert_eq!(events.last(), Some(&ExportEvent::Done(ExportOutcome::Completed)));
    assert_eq!(events.iter().filter(|e| **e == ExportEvent::Started).count(), 1);
    assert_eq!(events.iter().filter(|e| matches!(e, ExportEvent::Done(_))).count(), 1);

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            ExportEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(progress.last(), Some(&100.0));

    let duration = duration_secs(&out)?;
    assert!((duration - 2.0).abs() < 0.25, "half duration {}", duration);
    Ok(())
}

#[tokio::test]
async fn test_range_inside_second_clip_starts_on_keyframe() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2), ("b.mp4", 2)])?;
    let composition = CompositionBuilder.build_async(journey).await?;

    let out = dir.path().join("tail.mp4");
    let outcome = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .time_range(TimeRange::from_secs(2.5, 4.0))
        .start()?
        .wait()
        .await;
    assert_eq!(outcome, ExportOutcome::Completed);
    let duration = duration_secs(&out)?;
    assert!(duration > 1.0 && duration < 1.8, "tail duration {}", duration);
    Ok(())
}

#[tokio::test]
async fn test_resampled_custom_frame() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2)])?;
    let composition = CompositionBuilder.build_async(journey).await?;

    let out = dir.path().join("custom.mp4");
    let settings = ExportSettings::custom(160, Some(160), Some(10.0), None).with_codec("mpeg4");
    let outcome = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .settings(settings)
        .start()?
        .wait()
        .await;
    assert_eq!(outcome, ExportOutcome::Completed);

    let info = probe(&out)?;
    let video = info.video().ok_or(anyhow::anyhow!("no video"))?;
    assert_eq!((video.width, video.height), (Some(160), Some(160)));
    assert!(video.fps > 8.0 && video.fps < 12.0, "fps {}", video.fps);
    let audio = info.audio().ok_or(anyhow::anyhow!("no audio"))?;
    assert_eq!(audio.codec_name, "aac");
    assert_eq!(audio.sample_rate, Some(PCM_RATE));
    let duration = info.duration_secs().unwrap_or(0.0);
    assert!((duration - 2.0).abs() < 0.25, "resampled duration {}", duration);
    Ok(())
}

#[tokio::test]
async fn test_video_only_clip_exports() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let clip = dir.path().join("silent.mp4");
    write_clip(&clip, 1, false)?;
    let composition = Composition::single_clip(&clip)?;
    assert!(composition.audio().is_empty());

    let out = dir.path().join("silent-out.mp4");
    let outcome = ExportJob::new(composition)
        .output(&out, OutputContainer::Mov)
        .start()?
        .wait()
        .await;
    assert_eq!(outcome, ExportOutcome::Completed);
    let info = probe(&out)?;
    assert!(info.video().is_some());
    assert!(info.audio().is_none());
    Ok(())
}

#[tokio::test]
async fn test_cancel_leaves_no_file() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 3)])?;
    let composition = CompositionBuilder.build_async(journey).await?;

    let out = dir.path().join("cancelled.mp4");
    let handle = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .settings(ExportSettings::resampled().with_codec("mpeg4"))
        .start()?;
    handle.cancel();
    let control = handle.control().clone();
    assert_eq!(handle.wait().await, ExportOutcome::Cancelled);
    assert_eq!(control.state(), JobState::Cancelled);
    assert!(!out.exists());
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_progress_reports_cancelled() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 3), ("b.mp4", 3)])?;
    let composition = CompositionBuilder.build_async(journey).await?;

    let out = dir.path().join("cancelled.mp4");
    let job = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .settings(ExportSettings::resampled().with_codec("mpeg4"));
    let coordinator = ProgressCoordinator::new(std::time::Duration::from_millis(1));
    let (control, mut events) = coordinator.start(job)?;

    let mut done = None;
    while let Some(event) = events.next().await {
        match event {
            ExportEvent::Progress(_) => control.cancel(),
            ExportEvent::Done(outcome) => done = Some(outcome),
            ExportEvent::Started => {}
        }
    }
    // cancellation wins unless the job had already finished
    match done {
        Some(ExportOutcome::Cancelled) => assert!(!out.exists()),
        Some(ExportOutcome::Completed) => assert!(out.exists()),
        other => panic!("unexpected outcome {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_source_fails_cleanly() -> anyhow::Result<()> {
    let _ = crate::init();
    let dir = tempfile::tempdir()?;
    let composition = Composition::from_tracks(&[ClipTracks {
        path: dir.path().join("gone.mp4"),
        video: Some(SourceTrack {
            stream_index: 0,
            start_us: 0,
            duration_us: 1_000_000,
        }),
        audio: None,
        video_format: None,
    }])?;
    let out = dir.path().join("out.mp4");
    let outcome = ExportJob::new(composition)
        .output(&out, OutputContainer::Mp4)
        .start()?
        .wait()
        .await;
    assert!(matches!(
        outcome,
        ExportOutcome::Failed(PipelineError::SourceOpenFailed(_))
    ));
    assert!(!out.exists());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_second_clip_fails_and_removes_output() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2), ("b.mp4", 2)])?;
    let composition = CompositionBuilder.build_async(journey).await?;
    // the clip is truncated after the composition was built
    std::fs::File::create(dir.path().join("b.mp4"))?;

    let out = dir.path().join("out.mp4");
    let job = ExportJob::new(composition).output(&out, OutputContainer::Mp4);
    let (_control, events) = ProgressCoordinator::new(Duration::from_millis(10)).start(job)?;
    let events: Vec<ExportEvent> = events.collect().await;

    assert_eq!(events.first(), Some(&ExportEvent::Started));
    let done: Vec<&ExportEvent> = events.iter().filter(|e| matches!(e, ExportEvent::Done(_))).collect();
    assert_eq!(done.len(), 1);
    match events.last() {
        Some(ExportEvent::Done(ExportOutcome::Failed(PipelineError::SourceOpenFailed(_))))
        | Some(ExportEvent::Done(ExportOutcome::Failed(PipelineError::ReadFailed(_)))) => {}
        other => panic!("expected a read failure, got {:?}", other),
    }
    assert!(!events.contains(&ExportEvent::Progress(100.0)));
    assert!(!out.exists());
    Ok(())
}

#[test]
fn test_discard_removes_partial_output() -> anyhow::Result<()> {
    crate::init()?;
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("partial.mp4");
    discard(AvOutput::new(&out, OutputContainer::Mp4)?);
    assert!(!out.exists());

    // already gone is fine
    let output = AvOutput::new(&out, OutputContainer::Mp4)?;
    std::fs::remove_file(&out)?;
    assert!(output.abort().is_ok());
    Ok(())
}

#[tokio::test]
async fn test_registry_refuses_same_journey_twice() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let journey = journey_of(dir.path(), &[("a.mp4", 2)])?;
    let composition = Arc::new(CompositionBuilder.build_async(journey.clone()).await?);
    let registry = JobRegistry::default();
    let coordinator = ProgressCoordinator::default();
    let key = journey.key();

    let job = |name: &str| {
        ExportJob::new(composition.clone())
            .output(dir.path().join(name), OutputContainer::Mp4)
            .settings(ExportSettings::resampled().with_codec("mpeg4"))
    };
    let events = registry.start(&key, &coordinator, job("first.mp4"))?;
    assert!(registry.is_running(&key));
    assert!(matches!(
        registry.start(&key, &coordinator, job("second.mp4")),
        Err(RegistryError::AlreadyRunning(_))
    ));
    assert!(registry.cancel(&key));

    let events: Vec<ExportEvent> = events.collect().await;
    assert_eq!(events.last(), Some(&ExportEvent::Done(ExportOutcome::Cancelled)));
    assert!(!registry.is_running(&key));
    assert!(!registry.cancel(&key));
    assert!(!dir.path().join("second.mp4").exists());
    Ok(())
}

#[tokio::test]
async fn test_clip_metadata_and_segmenter_on_real_files() -> anyhow::Result<()> {
    if !encoders_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    for name in [
        "2023_05_02_143000.mp4",
        "2023_05_02_143002.mp4",
        "2023_05_02_143100.mp4",
        "2023_05_02_143100_s.mp4",
    ] {
        write_clip(&dir.path().join(name), 2, true)?;
    }
    std::fs::write(dir.path().join("broken.mp4"), b"not a video")?;

    let clip = ClipFile::new(dir.path(), "2023_05_02_143000.mp4");
    let timing = MediaClipProbe.probe(&clip)?;
    assert!((timing.duration - 2.0).abs() < 0.1, "duration {}", timing.duration);
    assert_eq!(
        Some(timing.capture_timestamp),
        timestamp_from_file_name("2023_05_02_143000.mp4")
    );

    let journeys = JourneySegmenter::new(Arc::new(MediaClipProbe))
        .segment_folder(dir.path())
        .await?;
    let names: Vec<Vec<PathBuf>> = journeys
        .iter()
        .map(|j| j.clips().iter().map(|c| PathBuf::from(c.file_name())).collect())
        .collect();
    assert_eq!(
        names,
        vec![
            vec![
                PathBuf::from("2023_05_02_143000.mp4"),
                PathBuf::from("2023_05_02_143002.mp4")
            ],
            vec![PathBuf::from("2023_05_02_143100.mp4")],
        ]
    );
    Ok(())
}
