//! ffprobe-style summary of a media file.

use std::path::Path;

use crate::{input::AvInput, stream::AvStream};

#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Demuxer name, e.g. "mov,mp4,m4a,3gp,3g2,mj2".
    pub format_name: String,
    pub duration_us: Option<i64>,
    /// Bits per second; 0 if unknown.
    pub bit_rate: i64,
    pub nb_streams: usize,
    /// Container tags such as `creation_time`.
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// "video", "audio", "data", ...
    pub codec_type: String,
    pub codec_name: String,
    pub time_base: String,
    pub duration_us: Option<i64>,
    pub start_us: i64,
    pub fps: f32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Counter-clockwise display rotation in degrees.
    pub rotation: f64,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl From<&AvStream> for StreamInfo {
    fn from(stream: &AvStream) -> Self {
        let params = stream.parameters();
        let tb = stream.time_base();
        let video = stream.is_video();
        let audio = stream.is_audio();
        Self {
            index: stream.index(),
            codec_type: format!("{:?}", params.medium()).to_lowercase(),
            codec_name: format!("{:?}", params.id()).to_lowercase(),
            time_base: format!("{}/{}", tb.numerator(), tb.denominator()),
            duration_us: stream.duration_us(),
            start_us: stream.start_us(),
            fps: stream.fps(),
            width: video.then(|| stream.width()),
            height: video.then(|| stream.height()),
            rotation: stream.rotation(),
            sample_rate: audio.then(|| stream.sample_rate()),
            channels: audio.then(|| stream.channels()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn duration_secs(&self) -> Option<f64> {
        self.format.duration_us.map(|d| d as f64 / 1_000_000.0)
    }

    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "audio")
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.format
            .tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

pub fn probe(path: &Path) -> anyhow::Result<MediaInfo> {
    let input = AvInput::new(path)?;
    let mut streams: Vec<StreamInfo> = input.streams().values().map(StreamInfo::from).collect();
    streams.sort_by_key(|s| s.index);

    Ok(MediaInfo {
        format: FormatInfo {
            format_name: input.format_name(),
            duration_us: input.duration_us(),
            bit_rate: input.bit_rate(),
            nb_streams: streams.len(),
            tags: input
                .metadata()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
        streams,
    })
}
