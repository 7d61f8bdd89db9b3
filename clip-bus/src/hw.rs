//! Encoder discovery.
//!
//! Resampled exports prefer a hardware encoder for the requested codec family
//! (NVENC/VAAPI/QSV/VideoToolbox/V4L2M2M) and fall back to software encoders
//! when none is present or it refuses to open.

/// Try to find a hardware-accelerated encoder for the given software codec name.
/// Returns the first available hardware encoder, or None if none is found.
pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_name {
        "libx264" | "h264" => &[
            "h264_videotoolbox",
            "h264_nvenc",
            "h264_vaapi",
            "h264_qsv",
            "h264_v4l2m2m",
        ],
        "libx265" | "hevc" | "h265" => &[
            "hevc_videotoolbox",
            "hevc_nvenc",
            "hevc_vaapi",
            "hevc_qsv",
            "hevc_v4l2m2m",
        ],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Software encoders to try, in order, for a requested codec name.
pub fn software_candidates(codec_name: &str) -> Vec<&str> {
    let mut names = vec![codec_name];
    match codec_name {
        "libx265" | "hevc" | "h265" => names.extend(["libx265", "libx264", "mpeg4"]),
        "libx264" | "h264" => names.extend(["libx264", "mpeg4"]),
        _ => {}
    }
    let mut seen = Vec::new();
    names.retain(|n| {
        if seen.contains(n) {
            false
        } else {
            seen.push(*n);
            true
        }
    });
    names
}

pub fn is_hw_encoder(codec_name: &str) -> bool {
    codec_name.contains("nvenc")
        || codec_name.contains("vaapi")
        || codec_name.contains("qsv")
        || codec_name.contains("videotoolbox")
        || codec_name.contains("v4l2m2m")
}

/// Pixel format the encoder is fed with. Hardware encoders generally prefer NV12.
pub fn pixel_format_for_encoder(codec_name: &str) -> ffmpeg_next::format::Pixel {
    if is_hw_encoder(codec_name) && !codec_name.contains("videotoolbox") {
        ffmpeg_next::format::Pixel::NV12
    } else {
        ffmpeg_next::format::Pixel::YUV420P
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_candidates_fall_back_in_order() {
        assert_eq!(software_candidates("libx265"), vec!["libx265", "libx264", "mpeg4"]);
        assert_eq!(software_candidates("hevc"), vec!["hevc", "libx265", "libx264", "mpeg4"]);
        assert_eq!(software_candidates("mpeg4"), vec!["mpeg4"]);
    }

    #[test]
    fn test_hw_encoder_names() {
        assert!(is_hw_encoder("hevc_nvenc"));
        assert!(is_hw_encoder("h264_videotoolbox"));
        assert!(!is_hw_encoder("libx264"));
        assert_eq!(pixel_format_for_encoder("h264_vaapi"), ffmpeg_next::format::Pixel::NV12);
        assert_eq!(pixel_format_for_encoder("libx265"), ffmpeg_next::format::Pixel::YUV420P);
    }
}
