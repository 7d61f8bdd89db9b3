use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;

use crate::{
    layout::{Orientation, RenderLayout},
    scaler::Scaler,
};

const BLACK_LUMA: u8 = 16;
const BLACK_CHROMA: u8 = 128;

/// Turns a tightly packed copy of one image plane upright.
/// Returns the pixels and the new width/height.
pub fn rotate_plane(
    src: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    orientation: Orientation,
) -> (Vec<u8>, usize, usize) {
    let at = |x: usize, y: usize| src[y * stride + x];
    match orientation {
        Orientation::Upright => {
            let mut out = Vec::with_capacity(width * height);
            for y in 0..height {
                out.extend_from_slice(&src[y * stride..y * stride + width]);
            }
            (out, width, height)
        }
        Orientation::Clockwise => {
            let (ow, oh) = (height, width);
            let mut out = vec![0u8; ow * oh];
            for y in 0..oh {
                for x in 0..ow {
                    out[y * ow + x] = at(y, height - 1 - x);
                }
            }
            (out, ow, oh)
        }
        Orientation::CounterClockwise => {
            let (ow, oh) = (height, width);
            let mut out = vec![0u8; ow * oh];
            for y in 0..oh {
                for x in 0..ow {
                    out[y * ow + x] = at(width - 1 - y, x);
                }
            }
            (out, ow, oh)
        }
        Orientation::UpsideDown => {
            let mut out = vec![0u8; width * height];
            for y in 0..height {
                for x in 0..width {
                    out[y * width + x] = at(width - 1 - x, height - 1 - y);
                }
            }
            (out, width, height)
        }
    }
}

fn blit_plane(dst: &mut [u8], dst_stride: usize, src: &[u8], width: usize, height: usize, x: usize, y: usize) {
    for row in 0..height {
        let start = (y + row) * dst_stride + x;
        dst[start..start + width].copy_from_slice(&src[row * width..(row + 1) * width]);
    }
}

/// A black YUV420P frame.
pub fn black_frame(width: u32, height: u32) -> Video {
    let mut frame = Video::new(Pixel::YUV420P, width, height);
    frame.data_mut(0).fill(BLACK_LUMA);
    frame.data_mut(1).fill(BLACK_CHROMA);
    frame.data_mut(2).fill(BLACK_CHROMA);
    frame
}

/// Places decoded pictures into the encoder's frame: scale, turn upright,
/// then letter/pillar-box onto black.
pub struct Compositor {
    layout: RenderLayout,
    output_format: Pixel,
    scaler: Option<Scaler>,
    converter: Option<Scaler>,
}

unsafe impl Send for Compositor {}

impl Compositor {
    pub fn new(layout: RenderLayout, output_format: Pixel) -> Self {
        Self {
            layout,
            output_format,
            scaler: None,
            converter: None,
        }
    }

    pub fn compose(&mut self, frame: &Video) -> anyhow::Result<Video> {
        let (pw, ph) = self.layout.pre_rotation_size();
        let rebuild = match &self.scaler {
            Some(s) => !s.accepts(frame),
            None => true,
        };
        if rebuild {
            self.scaler = Some(Scaler::new(
                (frame.format(), frame.width(), frame.height()),
                (Pixel::YUV420P, pw, ph),
            )?);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or(anyhow::anyhow!("scaler not initialised"))?;
        let mut scaled = Video::empty();
        scaler.run(frame, &mut scaled)?;

        let placed = if self.layout.orientation == Orientation::Upright && !self.layout.is_boxed() {
            scaled
        } else {
            self.place(&scaled)
        };

        if self.output_format == Pixel::YUV420P {
            return Ok(placed);
        }
        let (tw, th) = (self.layout.target_width, self.layout.target_height);
        if self.converter.is_none() {
            self.converter = Some(Scaler::new(
                (Pixel::YUV420P, tw, th),
                (self.output_format, tw, th),
            )?);
        }
        let converter = self
            .converter
            .as_mut()
            .ok_or(anyhow::anyhow!("converter not initialised"))?;
        let mut converted = Video::empty();
        converter.run(&placed, &mut converted)?;
        Ok(converted)
    }

    fn place(&self, scaled: &Video) -> Video {
        let layout = &self.layout;
        let mut canvas = black_frame(layout.target_width, layout.target_height);
        let (pw, ph) = (scaled.width() as usize, scaled.height() as usize);
        for plane in 0..3 {
            let shift = if plane == 0 { 0 } else { 1 };
            let (rotated, rw, rh) = rotate_plane(
                scaled.data(plane),
                scaled.stride(plane),
                pw >> shift,
                ph >> shift,
                layout.orientation,
            );
            let x = (layout.offset_x as usize) >> shift;
            let y = (layout.offset_y as usize) >> shift;
            let stride = canvas.stride(plane);
            blit_plane(canvas.data_mut(plane), stride, &rotated, rw, rh, x, y);
        }
        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3 wide, 2 tall:
    // a b c
    // d e f
    const PLANE: [u8; 6] = [1, 2, 3, 4, 5, 6];

    #[test]
    fn test_rotate_plane_clockwise() {
        let (out, w, h) = rotate_plane(&PLANE, 3, 3, 2, Orientation::Clockwise);
        assert_eq!((w, h), (2, 3));
        // d a
        // e b
        // f c
        assert_eq!(out, vec![4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn test_rotate_plane_counter_clockwise() {
        let (out, w, h) = rotate_plane(&PLANE, 3, 3, 2, Orientation::CounterClockwise);
        assert_eq!((w, h), (2, 3));
        // c f
        // b e
        // a d
        assert_eq!(out, vec![3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn test_rotate_plane_upside_down_and_stride() {
        // padded rows: stride 4
        let padded = [1, 2, 3, 0, 4, 5, 6, 0];
        let (out, w, h) = rotate_plane(&padded, 4, 3, 2, Orientation::UpsideDown);
        assert_eq!((w, h), (3, 2));
        assert_eq!(out, vec![6, 5, 4, 3, 2, 1]);

        let (out, _, _) = rotate_plane(&padded, 4, 3, 2, Orientation::Upright);
        assert_eq!(out, PLANE.to_vec());
    }

    #[test]
    fn test_blit_plane_offsets() {
        let mut dst = vec![0u8; 16];
        blit_plane(&mut dst, 4, &[9, 9, 9, 9], 2, 2, 1, 1);
        assert_eq!(dst, vec![0, 0, 0, 0, 0, 9, 9, 0, 0, 9, 9, 0, 0, 0, 0, 0]);
    }
}
