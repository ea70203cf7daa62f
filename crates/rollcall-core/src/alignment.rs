//! Five-point face alignment for ArcFace.
//!
//! Fits a similarity transform (scale, rotation, translation) from detected
//! landmarks onto the InsightFace reference layout and resamples the RGB
//! photo into a 112×112 crop.

use image::{Rgb, RgbImage};

/// Reference landmark positions in a 112×112 ArcFace crop.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit of `src` points onto `dst` points.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Normal equations for unknowns [a, b, tx, ty]; each point pair adds
        //   [sx, -sy, 1, 0] . x = dx
        //   [sy,  sx, 0, 1] . x = dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// Map a destination pixel back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting; `None` when singular.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one pixel; outside the image reads as black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
            let p = image.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS);
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}
