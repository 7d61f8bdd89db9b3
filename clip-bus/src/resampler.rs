use ffmpeg_next::{
    ChannelLayout,
    format::{Sample, sample::Type as SampleType},
    frame::Audio,
    software::resampling::Context,
};

/// Intermediate PCM rate every re-encoded audio track is normalised to.
pub const PCM_RATE: u32 = 44_100;
pub const PCM_FORMAT: Sample = Sample::F32(SampleType::Planar);
pub const PCM_LAYOUT: ChannelLayout = ChannelLayout::STEREO;

/// Converts decoded audio of any layout/rate into 44.1 kHz planar float stereo.
pub struct Resampler {
    context: Context,
    source: (Sample, ChannelLayout, u32),
}

unsafe impl Send for Resampler {}

pub fn frame_layout(frame: &Audio) -> ChannelLayout {
    let layout = frame.channel_layout();
    if layout.is_empty() {
        ChannelLayout::default(frame.channels().max(1) as i32)
    } else {
        layout
    }
}

impl Resampler {
    pub fn for_frame(frame: &Audio) -> anyhow::Result<Self> {
        let source = (frame.format(), frame_layout(frame), frame.rate());
        let context = Context::get(
            source.0, source.1, source.2, PCM_FORMAT, PCM_LAYOUT, PCM_RATE,
        )?;
        Ok(Self { context, source })
    }

    pub fn accepts(&self, frame: &Audio) -> bool {
        self.source == (frame.format(), frame_layout(frame), frame.rate())
    }

    pub fn run(&mut self, frame: &Audio) -> anyhow::Result<Audio> {
        let rate = self.source.2.max(1) as usize;
        let capacity = frame.samples() * PCM_RATE as usize / rate + 64;
        let mut converted = Audio::new(PCM_FORMAT, capacity, PCM_LAYOUT);
        self.context.run(frame, &mut converted)?;
        Ok(converted)
    }

    /// Drains samples still buffered inside the converter.
    pub fn flush(&mut self) -> anyhow::Result<Option<Audio>> {
        let mut tail = Audio::new(PCM_FORMAT, 4096, PCM_LAYOUT);
        self.context.flush(&mut tail)?;
        if tail.samples() == 0 {
            Ok(None)
        } else {
            Ok(Some(tail))
        }
    }
}
