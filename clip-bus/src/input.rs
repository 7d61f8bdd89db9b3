use std::collections::HashMap;
use std::path::Path;

use ffmpeg_next::Dictionary;

use crate::{packet::RawPacket, stream::AvStream};

/// Demultiplexer over one clip file.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
}

impl AvInput {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", path.display(), e))?;

        let mut streams = HashMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        Ok(Self {
            inner: input,
            streams,
        })
    }

    pub fn streams(&self) -> &HashMap<usize, AvStream> {
        &self.streams
    }

    /// The lowest-indexed stream of the requested kind.
    pub fn first_video(&self) -> Option<&AvStream> {
        self.first_matching(AvStream::is_video)
    }

    pub fn first_audio(&self) -> Option<&AvStream> {
        self.first_matching(AvStream::is_audio)
    }

    fn first_matching(&self, pred: impl Fn(&AvStream) -> bool) -> Option<&AvStream> {
        self.streams
            .values()
            .filter(|s| pred(s))
            .min_by_key(|s| s.index())
    }

    /// Container duration in microseconds, if known.
    pub fn duration_us(&self) -> Option<i64> {
        let d = self.inner.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d)
        }
    }

    pub fn format_name(&self) -> String {
        self.inner.format().name().to_string()
    }

    pub fn bit_rate(&self) -> i64 {
        self.inner.bit_rate()
    }

    pub fn metadata(&self) -> Dictionary<'static> {
        self.inner.metadata().to_owned()
    }

    /// Seeks to the keyframe at or before `ts_us` (microseconds, container time).
    pub fn seek(&mut self, ts_us: i64) -> anyhow::Result<()> {
        self.inner
            .seek(ts_us, ..ts_us)
            .map_err(|e| anyhow::anyhow!("seek to {}us: {}", ts_us, e))
    }

    /// Next packet of any stream; `Ok(None)` at end of file.
    pub fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(&packet.stream())
                    .map(|s| s.time_base())
                    .ok_or(anyhow::anyhow!("packet for unknown stream {}", packet.stream()))?;
                Ok(Some((packet, time_base).into()))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("read packet: {}", e)),
        }
    }

    /// Next packet belonging to `stream_index`, skipping the others.
    pub fn read_stream_packet(&mut self, stream_index: usize) -> anyhow::Result<Option<RawPacket>> {
        loop {
            match self.read_packet()? {
                Some(packet) if packet.index() == stream_index => return Ok(Some(packet)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}
