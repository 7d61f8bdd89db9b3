use ffmpeg_next::{
    ChannelLayout, Dictionary, Rational,
    codec::Parameters,
    util::mathematics::rescale::{Rescale, TIME_BASE},
};

use crate::{
    hw::{find_hw_encoder, pixel_format_for_encoder, software_candidates},
    packet::RawPacket,
    resampler::{PCM_FORMAT, PCM_LAYOUT, PCM_RATE},
};

/// Encoder clock for video. Fine enough for 23.976/29.97/59.94 sources and
/// small enough for codecs that cap the time base denominator at 65535.
pub const VIDEO_TIME_BASE: Rational = Rational(1, 60_000);

pub const AUDIO_BIT_RATE: usize = 128_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub keyframe_interval: u32,
    pub codec: String,
    pub bit_rate: Option<usize>,
    /// Set when the destination container stores codec headers out of band.
    pub global_header: bool,
}

fn receive(
    result: Result<(), ffmpeg_next::Error>,
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
) -> anyhow::Result<Option<RawPacket>> {
    match result {
        Ok(()) => Ok(Some(RawPacket::from((packet, time_base)))),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(None)
        }
        Err(ffmpeg_next::Error::Eof) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Video encoder with hardware-first selection and software fallback.
pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    time_base: Rational,
    last_pts: Option<i64>,
}

unsafe impl Send for VideoEncoder {}

impl VideoEncoder {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let open_encoder = |codec: ffmpeg_next::Codec| -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
            let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
            let mut encoder = ctx.encoder().video()?;
            encoder.set_width(settings.width);
            encoder.set_height(settings.height);
            encoder.set_format(pixel_format_for_encoder(codec.name()));
            encoder.set_frame_rate(Some(settings.frame_rate));
            encoder.set_time_base(VIDEO_TIME_BASE);
            encoder.set_gop(settings.keyframe_interval.max(1));
            encoder.set_max_b_frames(0);
            if let Some(bit_rate) = settings.bit_rate {
                encoder.set_bit_rate(bit_rate);
            }
            if settings.global_header {
                encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
            }

            let mut opts = Dictionary::new();
            if codec.name().starts_with("libx26") {
                opts.set("preset", "fast");
            }
            if codec.name() == "libx265" {
                opts.set("x265-params", "log-level=error");
            }
            Ok(encoder.open_with(opts)?)
        };

        let mut candidates = Vec::new();
        if let Some(hw_codec) = find_hw_encoder(&settings.codec) {
            candidates.push(hw_codec);
        }
        for name in software_candidates(&settings.codec) {
            if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
                candidates.push(codec);
            }
        }

        let mut last_error = anyhow::anyhow!("codec not found: {}", settings.codec);
        for codec in candidates {
            match open_encoder(codec) {
                Ok(encoder) => {
                    log::info!(
                        "video encoder opened: {} {}x{}",
                        codec.name(),
                        settings.width,
                        settings.height
                    );
                    let time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };
                    return Ok(Self {
                        inner: encoder,
                        codec_name: codec.name().to_string(),
                        time_base,
                        last_pts: None,
                    });
                }
                Err(e) => {
                    log::warn!("encoder {} failed to open: {}, trying next", codec.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn pixel_format(&self) -> ffmpeg_next::format::Pixel {
        self.inner.format()
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Codec parameters for the output stream this encoder feeds.
    pub fn parameters(&self) -> Parameters {
        Parameters::from(&self.inner)
    }

    /// Encodes `frame` at timeline position `pts_us`. Timestamps that do not
    /// advance are nudged forward by one tick.
    pub fn send_frame(&mut self, frame: &mut ffmpeg_next::frame::Video, pts_us: i64) -> anyhow::Result<()> {
        let mut pts = pts_us.rescale(TIME_BASE, self.time_base);
        if let Some(last) = self.last_pts {
            if pts <= last {
                pts = last + 1;
            }
        }
        self.last_pts = Some(pts);
        frame.set_pts(Some(pts));
        frame.set_kind(ffmpeg_next::picture::Type::None);
        self.inner.send_frame(frame)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    pub fn receive_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        let result = self.inner.receive_packet(&mut packet);
        receive(result, packet, self.time_base)
    }
}

/// Planar stereo sample queue between the resampler and the fixed-size AAC frames.
#[derive(Default)]
pub struct AudioFifo {
    left: Vec<f32>,
    right: Vec<f32>,
}

fn read_plane(frame: &ffmpeg_next::frame::Audio, plane: usize, samples: usize) -> impl Iterator<Item = f32> + '_ {
    frame.data(plane)[..samples * 4]
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}

fn write_plane(frame: &mut ffmpeg_next::frame::Audio, plane: usize, samples: &[f32], len: usize) {
    let data = &mut frame.data_mut(plane)[..len * 4];
    for (i, chunk) in data.chunks_exact_mut(4).enumerate() {
        let v = samples.get(i).copied().unwrap_or(0.0);
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
}

impl AudioFifo {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Appends a 44.1 kHz planar float frame. Mono input is duplicated to both channels.
    pub fn push(&mut self, frame: &ffmpeg_next::frame::Audio) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        self.left.extend(read_plane(frame, 0, n));
        let right_plane = if frame.planes() >= 2 { 1 } else { 0 };
        self.right.extend(read_plane(frame, right_plane, n));
    }

    pub fn push_silence(&mut self, samples: usize) {
        self.left.resize(self.left.len() + samples, 0.0);
        self.right.resize(self.right.len() + samples, 0.0);
    }

    /// Pops `n` samples, zero-padding when fewer are buffered.
    pub fn pop_frame(&mut self, n: usize, pts: i64) -> ffmpeg_next::frame::Audio {
        let available = self.left.len().min(n);
        let mut frame = ffmpeg_next::frame::Audio::new(PCM_FORMAT, n, PCM_LAYOUT);
        frame.set_rate(PCM_RATE);
        frame.set_pts(Some(pts));
        write_plane(&mut frame, 0, &self.left[..available], n);
        write_plane(&mut frame, 1, &self.right[..available], n);
        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

/// AAC encoder fed from an [`AudioFifo`]. Timestamps count samples at 44.1 kHz,
/// so the encoded track is gapless unless [`AudioEncoder::align_to`] inserts silence.
pub struct AudioEncoder {
    inner: ffmpeg_next::codec::encoder::Audio,
    frame_size: usize,
    fifo: AudioFifo,
    next_pts: i64,
    time_base: Rational,
}

unsafe impl Send for AudioEncoder {}

impl AudioEncoder {
    pub fn new(global_header: bool) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::AAC)
            .ok_or(anyhow::anyhow!("aac encoder not found"))?;
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx.encoder().audio()?;
        encoder.set_rate(PCM_RATE as i32);
        encoder.set_channel_layout(ChannelLayout::STEREO);
        encoder.set_format(PCM_FORMAT);
        encoder.set_bit_rate(AUDIO_BIT_RATE);
        encoder.set_time_base(Rational(1, PCM_RATE as i32));
        if global_header {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as_with(codec, Dictionary::new())?;
        let frame_size = (encoder.frame_size() as usize).max(1024);
        log::info!("audio encoder opened: {} frame_size={}", codec.name(), frame_size);

        Ok(Self {
            inner: encoder,
            frame_size,
            fifo: AudioFifo::default(),
            next_pts: 0,
            time_base: Rational(1, PCM_RATE as i32),
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn parameters(&self) -> Parameters {
        Parameters::from(&self.inner)
    }

    /// Pads with silence so the next pushed sample lands at `ts_us`.
    pub fn align_to(&mut self, ts_us: i64) {
        let target = ts_us.rescale(TIME_BASE, self.time_base);
        let queued = self.next_pts + self.fifo.len() as i64;
        if target > queued {
            self.fifo.push_silence((target - queued) as usize);
        }
    }

    pub fn push(&mut self, frame: &ffmpeg_next::frame::Audio) {
        self.fifo.push(frame);
    }

    /// Sends every full frame in the queue, or everything (zero-padded) on flush.
    pub fn drain(&mut self, flush: bool) -> anyhow::Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        while self.fifo.len() >= self.frame_size || (flush && !self.fifo.is_empty()) {
            let frame = self.fifo.pop_frame(self.frame_size, self.next_pts);
            self.next_pts += self.frame_size as i64;
            self.inner.send_frame(&frame)?;
            self.receive_all(&mut packets)?;
        }
        if flush {
            self.inner.send_eof()?;
            self.receive_all(&mut packets)?;
        }
        Ok(packets)
    }

    fn receive_all(&mut self, packets: &mut Vec<RawPacket>) -> anyhow::Result<()> {
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            let result = self.inner.receive_packet(&mut packet);
            match receive(result, packet, self.time_base)? {
                Some(p) => packets.push(p),
                None => return Ok(()),
            }
        }
    }
}
