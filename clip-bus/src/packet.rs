use ffmpeg_next::{
    Rational,
    util::mathematics::rescale::{Rescale, TIME_BASE},
};

use crate::error::PipelineError;

/// Which of the two output tracks a sample belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

pub type SampleSender = tokio::sync::mpsc::Sender<Result<RawPacket, PipelineError>>;
pub type SampleReceiver = tokio::sync::mpsc::Receiver<Result<RawPacket, PipelineError>>;

/// A compressed sample plus the time base its timestamps are expressed in.
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Presentation time in microseconds, falling back to the decode time.
    pub fn pts_us(&self) -> Option<i64> {
        self.packet
            .pts()
            .or(self.packet.dts())
            .map(|t| t.rescale(self.time_base, TIME_BASE))
    }

    /// Moves the packet into microsecond time and shifts it by `offset_us`.
    pub fn retime(&mut self, offset_us: i64) {
        let tb = self.time_base;
        let p = &mut self.packet;
        p.rescale_ts(tb, TIME_BASE);
        p.set_pts(p.pts().map(|t| t + offset_us));
        p.set_dts(p.dts().map(|t| t + offset_us));
        self.time_base = TIME_BASE;
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
