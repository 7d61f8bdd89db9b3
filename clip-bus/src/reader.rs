//! Per-track sample sources.
//!
//! A [`TrackReader`] walks the segments of one track on the blocking pool and
//! yields retimed packets, either copied from the sources or re-encoded. The
//! output timeline is rebased so the requested range starts at zero.

use ffmpeg_next::util::mathematics::rescale::{Rescale, TIME_BASE};
use tokio_util::sync::CancellationToken;

use crate::{
    composition::{TimeRange, TrackSegment},
    compositor::Compositor,
    decoder::Decoder,
    encoder::{AudioEncoder, VideoEncoder},
    error::PipelineError,
    frame::RawFrame,
    input::AvInput,
    packet::{RawPacket, SampleReceiver, SampleSender, TrackKind},
    resampler::Resampler,
};

/// Keeps at most one frame per slot of a target frame rate.
#[derive(Debug, Clone)]
pub struct FrameRateLimiter {
    interval_us: f64,
    next_slot: Option<f64>,
}

impl FrameRateLimiter {
    pub fn new(fps: f64) -> Self {
        Self {
            interval_us: 1_000_000.0 / fps,
            next_slot: None,
        }
    }

    /// Whether a frame at `ts_us` should be kept. Frames arriving before the
    /// next slot are dropped.
    pub fn keep(&mut self, ts_us: i64) -> bool {
        let ts = ts_us as f64;
        match self.next_slot {
            Some(slot) if ts < slot => false,
            Some(slot) => {
                let mut next = slot + self.interval_us;
                while next <= ts {
                    next += self.interval_us;
                }
                self.next_slot = Some(next);
                true
            }
            None => {
                self.next_slot = Some(ts + self.interval_us);
                true
            }
        }
    }
}

/// What a reader does with the samples it demuxes.
pub enum TrackMode {
    Passthrough,
    EncodeVideo {
        encoder: VideoEncoder,
        compositor: Compositor,
        limiter: Option<FrameRateLimiter>,
    },
    EncodeAudio {
        encoder: AudioEncoder,
    },
}

pub struct TrackReader {
    kind: TrackKind,
    segments: Vec<TrackSegment>,
    range: TimeRange,
    mode: TrackMode,
    cancel: CancellationToken,
}

/// Why a reader stopped early without an error of its own.
enum Stop {
    /// The consumer went away (cancellation or a failure elsewhere).
    Closed,
    Failed(PipelineError),
}

impl From<PipelineError> for Stop {
    fn from(e: PipelineError) -> Self {
        Stop::Failed(e)
    }
}

fn read_failed(e: anyhow::Error) -> Stop {
    Stop::Failed(PipelineError::ReadFailed(e.to_string()))
}

fn write_failed(e: anyhow::Error) -> Stop {
    Stop::Failed(PipelineError::WriteFailed(e.to_string()))
}

/// Keeps decode timestamps strictly increasing across segment joins.
#[derive(Default)]
struct DtsGuard {
    last: Option<i64>,
}

impl DtsGuard {
    fn fix(&mut self, packet: &mut RawPacket) {
        let p = packet.get_mut();
        let Some(mut dts) = p.dts().or(p.pts()) else {
            return;
        };
        if let Some(last) = self.last {
            if dts <= last {
                dts = last + 1;
            }
        }
        p.set_dts(Some(dts));
        if let Some(pts) = p.pts() {
            if pts < dts {
                p.set_pts(Some(dts));
            }
        }
        self.last = Some(dts);
    }
}

impl TrackReader {
    pub fn new(
        kind: TrackKind,
        segments: Vec<TrackSegment>,
        range: TimeRange,
        mode: TrackMode,
        cancel: CancellationToken,
    ) -> Self {
        let segments = segments
            .into_iter()
            .filter(|s| s.timeline().overlaps(&range))
            .collect();
        Self {
            kind,
            segments,
            range,
            mode,
            cancel,
        }
    }

    /// Starts reading on the blocking pool. Samples arrive on the returned
    /// channel; it closes when the track is exhausted or the reader fails.
    pub fn spawn(self, capacity: usize) -> (SampleReceiver, tokio::task::JoinHandle<()>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || self.run(tx));
        (rx, handle)
    }

    fn run(mut self, tx: SampleSender) {
        let kind = self.kind;
        match self.read_all(&tx) {
            Ok(()) => log::debug!("{} reader exhausted", kind),
            Err(Stop::Closed) => log::debug!("{} reader stopped: consumer closed", kind),
            Err(Stop::Failed(e)) => {
                log::warn!("{} reader failed: {}", kind, e);
                let _ = tx.blocking_send(Err(e));
            }
        }
    }

    fn emit(&self, tx: &SampleSender, packet: RawPacket) -> Result<(), Stop> {
        if self.cancel.is_cancelled() {
            return Err(Stop::Closed);
        }
        tx.blocking_send(Ok(packet)).map_err(|_| Stop::Closed)
    }

    fn read_all(&mut self, tx: &SampleSender) -> Result<(), Stop> {
        let segments = std::mem::take(&mut self.segments);
        let mut guard = DtsGuard::default();
        for segment in &segments {
            if self.cancel.is_cancelled() {
                return Err(Stop::Closed);
            }
            let mut input = AvInput::new(&segment.clip)
                .map_err(|e| PipelineError::SourceOpenFailed(e.to_string()))?;
            let local = segment.timeline().clamp_to(&self.range);
            if local.start_us > segment.offset_us {
                input.seek(segment.to_source(local.start_us)).map_err(read_failed)?;
            }
            match self.mode {
                TrackMode::Passthrough => {
                    self.copy_segment(&mut input, segment, local, &mut guard, tx)?
                }
                TrackMode::EncodeVideo { .. } => self.encode_video_segment(&mut input, segment, local, tx)?,
                TrackMode::EncodeAudio { .. } => self.encode_audio_segment(&mut input, segment, local, tx)?,
            }
        }
        self.flush_encoder(tx)
    }

    fn copy_segment(
        &self,
        input: &mut AvInput,
        segment: &TrackSegment,
        local: TimeRange,
        guard: &mut DtsGuard,
        tx: &SampleSender,
    ) -> Result<(), Stop> {
        // a seek lands on an earlier keyframe; video must restart on one
        let mut wait_for_key = self.kind == TrackKind::Video && local.start_us > segment.offset_us;
        let rebase = segment.offset_us - segment.source.start_us - self.range.start_us;
        while let Some(mut packet) = input
            .read_stream_packet(segment.source.stream_index)
            .map_err(read_failed)?
        {
            let Some(ts) = packet.pts_us().map(|t| segment.to_timeline(t)) else {
                continue;
            };
            if ts >= local.end_us {
                break;
            }
            if wait_for_key {
                if !(packet.is_key() && ts >= local.start_us) {
                    continue;
                }
                wait_for_key = false;
            }
            if self.kind == TrackKind::Audio && ts < local.start_us {
                continue;
            }
            packet.retime(rebase);
            guard.fix(&mut packet);
            self.emit(tx, packet)?;
        }
        Ok(())
    }

    fn encode_video_segment(
        &mut self,
        input: &mut AvInput,
        segment: &TrackSegment,
        local: TimeRange,
        tx: &SampleSender,
    ) -> Result<(), Stop> {
        let stream = input
            .streams()
            .get(&segment.source.stream_index)
            .cloned()
            .ok_or_else(|| PipelineError::ReadFailed(format!("{}: video stream missing", segment.clip.display())))?;
        let mut decoder = Decoder::new(&stream).map_err(read_failed)?;
        let time_base = decoder.time_base();
        let range_start = self.range.start_us;
        let mut eof = false;
        let mut done = false;

        while !done {
            match input
                .read_stream_packet(segment.source.stream_index)
                .map_err(read_failed)?
            {
                Some(packet) => decoder.send_packet(packet).map_err(read_failed)?,
                None => {
                    decoder.send_eof().map_err(read_failed)?;
                    eof = true;
                }
            }

            while let Some(frame) = decoder.receive_frame().map_err(read_failed)? {
                let RawFrame::Video(frame) = frame else {
                    continue;
                };
                let Some(ts) = frame.pts_us(time_base).map(|t| segment.to_timeline(t)) else {
                    continue;
                };
                if ts >= local.end_us {
                    done = true;
                    break;
                }
                if ts < local.start_us {
                    continue;
                }
                let packets = {
                    let TrackMode::EncodeVideo {
                        encoder,
                        compositor,
                        limiter,
                    } = &mut self.mode
                    else {
                        return Ok(());
                    };
                    if let Some(limiter) = limiter {
                        if !limiter.keep(ts) {
                            continue;
                        }
                    }
                    let mut composed = compositor.compose(frame.as_video()).map_err(write_failed)?;
                    encoder
                        .send_frame(&mut composed, ts - range_start)
                        .map_err(write_failed)?;
                    drain_video(encoder)?
                };
                for packet in packets {
                    self.emit(tx, packet)?;
                }
            }
            if eof {
                break;
            }
        }
        Ok(())
    }

    fn encode_audio_segment(
        &mut self,
        input: &mut AvInput,
        segment: &TrackSegment,
        local: TimeRange,
        tx: &SampleSender,
    ) -> Result<(), Stop> {
        let stream = input
            .streams()
            .get(&segment.source.stream_index)
            .cloned()
            .ok_or_else(|| PipelineError::ReadFailed(format!("{}: audio stream missing", segment.clip.display())))?;
        let mut decoder = Decoder::new(&stream).map_err(read_failed)?;
        let time_base = decoder.time_base();
        let range_start = self.range.start_us;
        let mut resampler: Option<Resampler> = None;
        let mut aligned = false;
        let mut eof = false;
        let mut done = false;

        while !done {
            match input
                .read_stream_packet(segment.source.stream_index)
                .map_err(read_failed)?
            {
                Some(packet) => decoder.send_packet(packet).map_err(read_failed)?,
                None => {
                    decoder.send_eof().map_err(read_failed)?;
                    eof = true;
                }
            }

            while let Some(frame) = decoder.receive_frame().map_err(read_failed)? {
                let RawFrame::Audio(frame) = frame else {
                    continue;
                };
                let Some(ts) = frame
                    .pts()
                    .map(|pts| segment.to_timeline(pts.rescale(time_base, TIME_BASE)))
                else {
                    continue;
                };
                if ts >= local.end_us {
                    done = true;
                    break;
                }
                if ts < local.start_us {
                    continue;
                }
                let audio = frame.as_audio();
                let rebuild = resampler.as_ref().map(|r| !r.accepts(audio)).unwrap_or(true);
                if rebuild {
                    resampler = Some(Resampler::for_frame(audio).map_err(read_failed)?);
                }
                let packets = {
                    let TrackMode::EncodeAudio { encoder } = &mut self.mode else {
                        return Ok(());
                    };
                    if !aligned {
                        encoder.align_to(ts - range_start);
                        aligned = true;
                    }
                    if let Some(r) = resampler.as_mut() {
                        let converted = r.run(audio).map_err(read_failed)?;
                        encoder.push(&converted);
                    }
                    encoder.drain(false).map_err(write_failed)?
                };
                for packet in packets {
                    self.emit(tx, packet)?;
                }
            }
            if eof {
                break;
            }
        }

        if let Some(mut r) = resampler {
            if let TrackMode::EncodeAudio { encoder } = &mut self.mode {
                if let Some(tail) = r.flush().map_err(read_failed)? {
                    encoder.push(&tail);
                }
            }
        }
        Ok(())
    }

    fn flush_encoder(&mut self, tx: &SampleSender) -> Result<(), Stop> {
        let packets = match &mut self.mode {
            TrackMode::Passthrough => return Ok(()),
            TrackMode::EncodeVideo { encoder, .. } => {
                encoder.send_eof().map_err(write_failed)?;
                drain_video(encoder)?
            }
            TrackMode::EncodeAudio { encoder } => encoder.drain(true).map_err(write_failed)?,
        };
        for packet in packets {
            self.emit(tx, packet)?;
        }
        Ok(())
    }
}

fn drain_video(encoder: &mut VideoEncoder) -> Result<Vec<RawPacket>, Stop> {
    let mut packets = Vec::new();
    while let Some(packet) = encoder.receive_packet().map_err(write_failed)? {
        packets.push(packet);
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_keeps_target_rate() {
        // 30 fps source thinned to 24 fps
        let mut limiter = FrameRateLimiter::new(24.0);
        let kept = (0..30)
            .map(|i| (i as f64 * 1_000_000.0 / 30.0).round() as i64)
            .filter(|ts| limiter.keep(*ts))
            .count();
        assert!((23..=25).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_limiter_passes_slower_sources() {
        let mut limiter = FrameRateLimiter::new(30.0);
        let kept = (0..10).filter(|i| limiter.keep(i * 100_000)).count();
        assert_eq!(kept, 10);
    }

    #[test]
    fn test_dts_guard_forces_increase() {
        let mut guard = DtsGuard::default();
        let mut stamp = |pts: i64, dts: i64| {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            packet.set_pts(Some(pts));
            packet.set_dts(Some(dts));
            let mut packet = RawPacket::from((packet, TIME_BASE));
            guard.fix(&mut packet);
            (packet.pts(), packet.dts())
        };
        assert_eq!(stamp(0, 0), (Some(0), Some(0)));
        assert_eq!(stamp(40, 20), (Some(40), Some(20)));
        // next clip starts with a negative decode offset
        assert_eq!(stamp(20, 10), (Some(21), Some(21)));
    }
}
