//! Render geometry for re-encoded video: orientation correction and
//! aspect-preserving placement inside a destination frame.

/// Rotation encoded in a 3x3 display matrix (16.16 fixed point), in degrees
/// counter-clockwise. Same convention as `av_display_rotation_get`.
pub fn rotation_from_display_matrix(matrix: &[i32; 9]) -> f64 {
    let conv = |v: i32| v as f64 / 65536.0;
    let scale0 = conv(matrix[0]).hypot(conv(matrix[3]));
    let scale1 = conv(matrix[1]).hypot(conv(matrix[4]));
    if scale0 == 0.0 || scale1 == 0.0 {
        return 0.0;
    }
    let rotation = (conv(matrix[1]) / scale1).atan2(conv(matrix[0]) / scale0) * 180.0 / std::f64::consts::PI;
    -rotation
}

/// How decoded pixels must be turned to appear upright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    Clockwise,
    UpsideDown,
    CounterClockwise,
}

impl Orientation {
    /// From a counter-clockwise display rotation. Angles off a quarter turn snap to the nearest one.
    pub fn from_rotation(ccw_degrees: f64) -> Self {
        if !ccw_degrees.is_finite() {
            return Orientation::Upright;
        }
        let clockwise = (-ccw_degrees).round().rem_euclid(360.0);
        let quarter = ((clockwise / 90.0).round() as i64).rem_euclid(4);
        match quarter {
            1 => Orientation::Clockwise,
            2 => Orientation::UpsideDown,
            3 => Orientation::CounterClockwise,
            _ => Orientation::Upright,
        }
    }

    /// A quarter turn exchanges width and height.
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Clockwise | Orientation::CounterClockwise)
    }
}

/// Requested output frame. Missing sides are derived from the source aspect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TargetFrame {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TargetFrame {
    pub fn natural() -> Self {
        Self::default()
    }

    pub fn fixed(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }
}

/// Where the picture lands inside the encoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderLayout {
    pub orientation: Orientation,
    /// Source size after orientation correction.
    pub render_width: u32,
    pub render_height: u32,
    /// Encoded frame size.
    pub target_width: u32,
    pub target_height: u32,
    /// Picture size inside the encoded frame.
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

fn even(v: f64) -> u32 {
    let v = v.round().max(2.0) as u32;
    v & !1
}

impl RenderLayout {
    pub fn compute(natural_width: u32, natural_height: u32, rotation: f64, target: TargetFrame) -> Self {
        let orientation = Orientation::from_rotation(rotation);
        let (render_width, render_height) = if orientation.swaps_dimensions() {
            (natural_height, natural_width)
        } else {
            (natural_width, natural_height)
        };
        let rw = render_width.max(1) as f64;
        let rh = render_height.max(1) as f64;

        let (tw, th) = match (target.width, target.height) {
            (Some(w), Some(h)) => (w as f64, h as f64),
            (Some(w), None) => (w as f64, w as f64 * rh / rw),
            (None, Some(h)) => (h as f64 * rw / rh, h as f64),
            (None, None) => (rw, rh),
        };
        let target_width = even(tw);
        let target_height = even(th);

        let ratio = (target_width as f64 / rw).min(target_height as f64 / rh);
        let scaled_width = even(rw * ratio).min(target_width);
        let scaled_height = even(rh * ratio).min(target_height);
        let offset_x = ((target_width - scaled_width) / 2) & !1;
        let offset_y = ((target_height - scaled_height) / 2) & !1;

        Self {
            orientation,
            render_width,
            render_height,
            target_width,
            target_height,
            scaled_width,
            scaled_height,
            offset_x,
            offset_y,
        }
    }

    /// Size to scale decoded pixels to before they are turned upright.
    pub fn pre_rotation_size(&self) -> (u32, u32) {
        if self.orientation.swaps_dimensions() {
            (self.scaled_height, self.scaled_width)
        } else {
            (self.scaled_width, self.scaled_height)
        }
    }

    pub fn is_boxed(&self) -> bool {
        self.scaled_width != self.target_width || self.scaled_height != self.target_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_for(ccw_degrees: f64) -> [i32; 9] {
        let r = ccw_degrees.to_radians();
        let fixed = |v: f64| (v * 65536.0).round() as i32;
        // av_display_rotation_set stores the inverse (clockwise) rotation
        [
            fixed(r.cos()),
            fixed(-r.sin()),
            0,
            fixed(r.sin()),
            fixed(r.cos()),
            0,
            0,
            0,
            1 << 30,
        ]
    }

    #[test]
    fn test_rotation_from_identity_matrix() {
        let identity = [1 << 16, 0, 0, 0, 1 << 16, 0, 0, 0, 1 << 30];
        assert_eq!(rotation_from_display_matrix(&identity), 0.0);
    }

    #[test]
    fn test_rotation_round_trips_quarter_turns() {
        for angle in [90.0, -90.0, 180.0] {
            let got = rotation_from_display_matrix(&matrix_for(angle));
            let diff = (got - angle).rem_euclid(360.0);
            assert!(diff < 0.01 || diff > 359.99, "angle {} decoded as {}", angle, got);
        }
    }

    #[test]
    fn test_orientation_from_rotation() {
        assert_eq!(Orientation::from_rotation(0.0), Orientation::Upright);
        assert_eq!(Orientation::from_rotation(-90.0), Orientation::Clockwise);
        assert_eq!(Orientation::from_rotation(90.0), Orientation::CounterClockwise);
        assert_eq!(Orientation::from_rotation(180.0), Orientation::UpsideDown);
        assert_eq!(Orientation::from_rotation(-180.0), Orientation::UpsideDown);
        assert_eq!(Orientation::from_rotation(f64::NAN), Orientation::Upright);
    }

    #[test]
    fn test_natural_layout_keeps_source_size() {
        let layout = RenderLayout::compute(1920, 1080, 0.0, TargetFrame::natural());
        assert_eq!((layout.target_width, layout.target_height), (1920, 1080));
        assert_eq!((layout.scaled_width, layout.scaled_height), (1920, 1080));
        assert_eq!((layout.offset_x, layout.offset_y), (0, 0));
        assert!(!layout.is_boxed());
    }

    #[test]
    fn test_rotated_source_swaps_render_size() {
        let layout = RenderLayout::compute(1920, 1080, -90.0, TargetFrame::natural());
        assert_eq!((layout.render_width, layout.render_height), (1080, 1920));
        assert_eq!((layout.target_width, layout.target_height), (1080, 1920));
        assert_eq!(layout.pre_rotation_size(), (1920, 1080));
    }

    #[test]
    fn test_pillarbox_into_wider_frame() {
        // 4:3 into 16:9
        let layout = RenderLayout::compute(640, 480, 0.0, TargetFrame::fixed(1280, 720));
        assert_eq!((layout.scaled_width, layout.scaled_height), (960, 720));
        assert_eq!((layout.offset_x, layout.offset_y), (160, 0));
        assert!(layout.is_boxed());
    }

    #[test]
    fn test_letterbox_into_taller_frame() {
        let layout = RenderLayout::compute(1920, 1080, 0.0, TargetFrame::fixed(1080, 1080));
        assert_eq!(layout.scaled_width, 1080);
        assert_eq!(layout.scaled_height, 608);
        assert_eq!(layout.offset_x, 0);
        assert_eq!(layout.offset_y, 236);
    }

    #[test]
    fn test_width_only_target_follows_aspect() {
        let layout = RenderLayout::compute(1920, 1080, 0.0, TargetFrame { width: Some(1280), height: None });
        assert_eq!((layout.target_width, layout.target_height), (1280, 720));
        assert!(!layout.is_boxed());
    }
}
