use ffmpeg_next::Rational;
use ffmpeg_next::util::mathematics::rescale::{Rescale, TIME_BASE};

/// A decoded frame of either kind.
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

fn best_effort_pts(frame: &ffmpeg_next::Frame) -> Option<i64> {
    frame.timestamp().or(frame.pts())
}

pub struct RawAudioFrame(ffmpeg_next::frame::Audio);

impl RawAudioFrame {
    /// Presentation time in the decoder's time base.
    pub fn pts(&self) -> Option<i64> {
        best_effort_pts(&self.0)
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.0
    }
}

impl From<ffmpeg_next::frame::Audio> for RawAudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self(frame)
    }
}

pub struct RawVideoFrame(ffmpeg_next::frame::Video);

impl RawVideoFrame {
    pub fn pts(&self) -> Option<i64> {
        best_effort_pts(&self.0)
    }

    pub fn pts_us(&self, time_base: Rational) -> Option<i64> {
        self.pts().map(|pts| pts.rescale(time_base, TIME_BASE))
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.0
    }
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self(frame)
    }
}
