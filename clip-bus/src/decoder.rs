use ffmpeg_next::{Rational, util::error::EAGAIN};

use crate::{
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    packet::RawPacket,
    stream::AvStream,
};

enum Inner {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

/// `Ok(true)` when a frame was produced, `Ok(false)` when the decoder wants
/// more input or has been fully drained.
fn produced(result: Result<(), ffmpeg_next::Error>) -> anyhow::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ffmpeg_next::Error::Eof) => Ok(false),
        Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Decoder for one source stream. Frames come out in the stream's time base.
pub struct Decoder {
    inner: Inner,
    time_base: Rational,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream) -> anyhow::Result<Self> {
        let mut ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        ctx.set_parameters(stream.parameters().clone())?;

        let inner = if stream.is_video() {
            let video = ctx.decoder().video()?;
            if video.format() == ffmpeg_next::format::Pixel::None || video.width() == 0 || video.height() == 0 {
                anyhow::bail!("stream {}: incomplete video parameters", stream.index());
            }
            Inner::Video(video)
        } else if stream.is_audio() {
            Inner::Audio(ctx.decoder().audio()?)
        } else {
            anyhow::bail!("stream {}: neither video nor audio", stream.index());
        };

        Ok(Self {
            inner,
            time_base: stream.time_base(),
        })
    }

    pub fn send_packet(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        let from = packet.time_base();
        let packet = packet.get_mut();
        packet.rescale_ts(from, self.time_base);
        match &mut self.inner {
            Inner::Video(d) => d.send_packet(packet)?,
            Inner::Audio(d) => d.send_packet(packet)?,
        }
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            Inner::Video(d) => d.send_eof()?,
            Inner::Audio(d) => d.send_eof()?,
        }
        Ok(())
    }

    /// Next decoded frame, or `None` until more packets arrive.
    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        match &mut self.inner {
            Inner::Video(d) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                let got = produced(d.receive_frame(&mut frame))?;
                Ok(got.then(|| RawFrame::Video(RawVideoFrame::from(frame))))
            }
            Inner::Audio(d) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                let got = produced(d.receive_frame(&mut frame))?;
                Ok(got.then(|| RawFrame::Audio(RawAudioFrame::from(frame))))
            }
        }
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }
}
