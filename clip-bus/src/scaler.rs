use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, flag::Flags};

/// Pixel format + size conversion, rebuilt whenever the source geometry changes
/// (clips in one journey may come from different cameras).
pub struct Scaler {
    context: Context,
    source: (Pixel, u32, u32),
}

unsafe impl Send for Scaler {}

impl Scaler {
    pub fn new(source: (Pixel, u32, u32), destination: (Pixel, u32, u32)) -> anyhow::Result<Self> {
        let context = Context::get(
            source.0,
            source.1,
            source.2,
            destination.0,
            destination.1,
            destination.2,
            Flags::BILINEAR,
        )?;
        Ok(Self { context, source })
    }

    pub fn accepts(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        self.source == (frame.format(), frame.width(), frame.height())
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}
