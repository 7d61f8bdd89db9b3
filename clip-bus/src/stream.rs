use ffmpeg_next::{
    Rational,
    codec::Parameters,
    format::stream,
    packet::side_data,
    util::mathematics::rescale::{Rescale, TIME_BASE},
};

use crate::layout::rotation_from_display_matrix;

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

/// Snapshot of one demuxed stream: codec parameters plus the timing and
/// orientation facts the pipeline needs after the input is gone.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
    start_time: Option<i64>,
    duration: Option<i64>,
    rotation: f64,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
    pub fn rate(&self) -> Rational {
        self.rate
    }

    /// Display rotation in degrees, counter-clockwise, from the stream's display matrix.
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Audio
    }

    pub fn width(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).width.max(0) as u32
        }
    }

    pub fn height(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).height.max(0) as u32
        }
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).sample_rate.max(0) as u32
        }
    }

    pub fn channels(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).ch_layout.nb_channels.max(0) as u32
        }
    }

    pub fn fps(&self) -> f32 {
        if self.rate.denominator() == 0 {
            return 0.0;
        }
        self.rate.numerator() as f32 / self.rate.denominator() as f32
    }

    /// First presentation time in microseconds; 0 when the container does not say.
    pub fn start_us(&self) -> i64 {
        self.start_time
            .map(|t| t.rescale(self.time_base, TIME_BASE))
            .unwrap_or(0)
    }

    /// Stream length in microseconds, if the container records one.
    pub fn duration_us(&self) -> Option<i64> {
        self.duration.map(|d| d.rescale(self.time_base, TIME_BASE))
    }
}

fn valid_ts(ts: i64) -> Option<i64> {
    if ts == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 {
        None
    } else {
        Some(ts)
    }
}

fn display_rotation(stream: &stream::Stream<'_>) -> f64 {
    for data in stream.side_data() {
        if data.kind() != side_data::Type::DisplayMatrix {
            continue;
        }
        let bytes = data.data();
        if bytes.len() < 36 {
            continue;
        }
        let mut matrix = [0i32; 9];
        for (i, chunk) in bytes.chunks_exact(4).take(9).enumerate() {
            matrix[i] = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        return rotation_from_display_matrix(&matrix);
    }
    0.0
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let rotation = display_rotation(&stream);
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
            start_time: valid_ts(stream.start_time()),
            duration: valid_ts(stream.duration()).filter(|d| *d > 0),
            rotation,
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
            start_time: self.start_time,
            duration: self.duration,
            rotation: self.rotation,
        }
    }
}
