/// A position on a rendered page surface, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfacePoint {
    pub x: f32,
    pub y: f32,
}

impl SurfacePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            x: finite_or_zero(self.x).clamp(0.0, width as f32),
            y: finite_or_zero(self.y).clamp(0.0, height as f32),
        }
    }
}

/// Axis-aligned selection box. `x,y` is always the top-left corner and the
/// size is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn at(point: SurfacePoint) -> Self {
        Self {
            x: point.x,
            y: point.y,
            width: 0.0,
            height: 0.0,
        }
    }

    pub fn from_corners(a: SurfacePoint, b: SurfacePoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_at_least(&self, min_width: f32, min_height: f32) -> bool {
        self.width >= min_width && self.height >= min_height
    }

    /// Rounds the box to whole pixels and clips it to a `surface_width` x
    /// `surface_height` surface. Returns `None` when nothing is left.
    pub fn to_pixel_rect(&self, surface_width: u32, surface_height: u32) -> Option<PixelRect> {
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return None;
        }

        let x0 = self.x.round().clamp(0.0, surface_width as f32) as u32;
        let y0 = self.y.round().clamp(0.0, surface_height as f32) as u32;
        let x1 = self.right().round().clamp(0.0, surface_width as f32) as u32;
        let y1 = self.bottom().round().clamp(0.0, surface_height as f32) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_is_identical_for_opposite_drag_directions() {
        let a = SurfacePoint::new(40.0, 25.0);
        let b = SurfacePoint::new(10.0, 90.0);

        let forward = BoundingBox::from_corners(a, b);
        let backward = BoundingBox::from_corners(b, a);

        assert_eq!(forward, backward);
        assert_eq!(forward.x, 10.0);
        assert_eq!(forward.y, 25.0);
        assert_eq!(forward.width, 30.0);
        assert_eq!(forward.height, 65.0);
    }

    #[test]
    fn box_size_is_never_negative() {
        let boxes = [
            BoundingBox::from_corners(SurfacePoint::new(5.0, 5.0), SurfacePoint::new(0.0, 0.0)),
            BoundingBox::from_corners(SurfacePoint::new(0.0, 5.0), SurfacePoint::new(5.0, 0.0)),
            BoundingBox::from_corners(SurfacePoint::new(3.0, 3.0), SurfacePoint::new(3.0, 3.0)),
        ];
        for b in boxes {
            assert!(b.width >= 0.0 && b.height >= 0.0, "{:?}", b);
        }
    }

    #[test]
    fn pixel_rect_is_clipped_to_surface() {
        let b = BoundingBox {
            x: -4.0,
            y: 10.0,
            width: 30.0,
            height: 200.0,
        };
        let rect = b.to_pixel_rect(20, 100).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 0,
                y: 10,
                width: 20,
                height: 90
            }
        );
    }

    #[test]
    fn pixel_rect_outside_surface_is_none() {
        let b = BoundingBox {
            x: 50.0,
            y: 50.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(b.to_pixel_rect(40, 40).is_none());

        let nan = BoundingBox {
            x: f32::NAN,
            ..b
        };
        assert!(nan.to_pixel_rect(100, 100).is_none());
    }

    #[test]
    fn minimum_size_check_uses_both_dimensions() {
        let wide = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 50.0,
            height: 9.0,
        };
        assert!(!wide.is_at_least(10.0, 10.0));
        let square = BoundingBox {
            width: 10.0,
            height: 10.0,
            ..wide
        };
        assert!(square.is_at_least(10.0, 10.0));
    }
}
