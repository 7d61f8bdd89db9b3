use std::path::{Path, PathBuf};

use ffmpeg_next::{Dictionary, Rational, codec::Parameters};

use crate::{packet::RawPacket, stream::AvStream};

/// Container formats an export can be written as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputContainer {
    Mp4,
    Mov,
}

impl OutputContainer {
    pub fn format_name(&self) -> &'static str {
        match self {
            OutputContainer::Mp4 => "mp4",
            OutputContainer::Mov => "mov",
        }
    }
}

/// Multiplexer writing one output file.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    path: PathBuf,
    interleaved: bool,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    pub fn new(path: &Path, container: OutputContainer) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output_as(&path, container.format_name())
            .map_err(|e| anyhow::anyhow!("create {}: {}", path.display(), e))?;
        Ok(Self {
            inner: output,
            path: path.to_path_buf(),
            interleaved: true,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether encoders feeding this container must emit global headers.
    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::flag::Flags::GLOBAL_HEADER)
    }

    /// Adds a stream that receives packets copied verbatim from `stream`.
    pub fn add_copy_stream(&mut self, stream: &AvStream) -> anyhow::Result<usize> {
        let codec_parameters = stream.parameters();
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(codec_parameters.id()))?;
        writer_stream.set_parameters(codec_parameters.clone());
        writer_stream.set_time_base(stream.time_base());
        // the source container's fourcc may not be valid in ours
        unsafe {
            (*writer_stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        Ok(writer_stream.index())
    }

    /// Adds a stream fed by one of our encoders.
    pub fn add_encoded_stream(
        &mut self,
        parameters: Parameters,
        time_base: Rational,
    ) -> anyhow::Result<usize> {
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(parameters.id()))?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(time_base);
        unsafe {
            (*writer_stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        Ok(writer_stream.index())
    }

    pub fn set_metadata(&mut self, metadata: Dictionary<'static>) {
        self.inner.set_metadata(metadata);
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
        }
        Ok(())
    }

    pub fn write_packet(
        &mut self,
        writer_stream_index: usize,
        mut packet: RawPacket,
    ) -> anyhow::Result<()> {
        self.write_header()?;
        let time_base = packet.time_base();
        let out_time_base = self
            .inner
            .stream(writer_stream_index)
            .ok_or(anyhow::anyhow!("stream {} not found", writer_stream_index))?
            .time_base();

        let p = packet.get_mut();
        p.set_stream(writer_stream_index);
        p.set_position(-1);
        p.rescale_ts(time_base, out_time_base);
        if self.interleaved {
            p.write_interleaved(&mut self.inner)?;
        } else {
            p.write(&mut self.inner)?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> anyhow::Result<()> {
        self.write_header()?;
        if !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }

    /// Closes the file without a trailer and deletes whatever was written.
    pub fn abort(self) -> std::io::Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("removed partial output {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
