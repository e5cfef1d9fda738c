/// Axis-aligned box in corner form `[x1, y1, x2, y2]`, pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    corners: [f64; 4],
}

impl BoundingBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            corners: [x1, y1, x2, y2],
        }
    }

    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn x1(&self) -> f64 {
        self.corners[0]
    }

    pub fn y1(&self) -> f64 {
        self.corners[1]
    }

    pub fn x2(&self) -> f64 {
        self.corners[2]
    }

    pub fn y2(&self) -> f64 {
        self.corners[3]
    }

    pub fn width(&self) -> f64 {
        (self.corners[2] - self.corners[0]).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.corners[3] - self.corners[1]).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.corners[0] + self.corners[2]) / 2.0,
            (self.corners[1] + self.corners[3]) / 2.0,
        )
    }

    /// Finite coordinates and a strictly positive area.
    pub fn is_valid(&self) -> bool {
        self.corners.iter().all(|c| c.is_finite())
            && self.corners[2] > self.corners[0]
            && self.corners[3] > self.corners[1]
    }

    /// Intersection-over-union with another box, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.corners[0].max(other.corners[0]);
        let y1 = self.corners[1].max(other.corners[1]);
        let x2 = self.corners[2].min(other.corners[2]);
        let y2 = self.corners[3].min(other.corners[3]);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    pub fn clamp_to(&self, width: f64, height: f64) -> BoundingBox {
        BoundingBox::new(
            self.corners[0].clamp(0.0, width),
            self.corners[1].clamp(0.0, height),
            self.corners[2].clamp(0.0, width),
            self.corners[3].clamp(0.0, height),
        )
    }

    pub fn as_array(&self) -> [f64; 4] {
        self.corners
    }
}
