//! Edge operators for `ProcessingMode::EdgeDetect`.
//!
//! Both operators smooth with a 5-tap Gaussian and take 3x3 Sobel gradients
//! (L1 magnitude, range 0..=2040 for u8 input). Borders replicate the edge
//! pixel. `Canny` thins and links the response; `SobelThreshold` just cuts it.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Turns a luma image into one edge flag per pixel, row-major.
pub trait EdgeOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, luma: &GrayImage) -> Vec<bool>;
}

/// Which operator the pipeline builds, plus its knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub operator: EdgeKind,
    pub blur_sigma: f32,
    /// Canny weak threshold; unused by `Sobel`
    pub low_threshold: f32,
    /// Canny strong threshold, or the single cut for `Sobel`
    pub high_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Canny,
    Sobel,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            operator: EdgeKind::Canny,
            blur_sigma: 1.5,
            low_threshold: 50.0,
            high_threshold: 150.0,
        }
    }
}

impl EdgeConfig {
    pub fn build(&self) -> Box<dyn EdgeOperator> {
        match self.operator {
            EdgeKind::Canny => Box::new(Canny::new(
                self.blur_sigma,
                self.low_threshold,
                self.high_threshold,
            )),
            EdgeKind::Sobel => Box::new(SobelThreshold::new(self.blur_sigma, self.high_threshold)),
        }
    }
}

/// Normalised 5-tap Gaussian.
fn gaussian_kernel(sigma: f32) -> [f32; 5] {
    let sigma = sigma.max(0.1);
    let denom = 2.0 * sigma * sigma;
    let mut k = [0.0f32; 5];
    for (i, w) in k.iter_mut().enumerate() {
        let x = i as f32 - 2.0;
        *w = (-x * x / denom).exp();
    }
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|w| *w /= sum);
    k
}

/// Row-major f32 plane with clamped reads.
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_luma(luma: &GrayImage) -> Self {
        Self {
            width: luma.width() as usize,
            height: luma.height() as usize,
            data: luma.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    fn at(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    fn blurred(&self, kernel: &[f32; 5]) -> Self {
        let (w, h) = (self.width, self.height);
        let mut tmp = Plane {
            width: w,
            height: h,
            data: vec![0.0; w * h],
        };
        for y in 0..h {
            for x in 0..w {
                tmp.data[y * w + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, k)| k * self.at(x as isize + i as isize - 2, y as isize))
                    .sum();
            }
        }
        let mut out = Plane {
            width: w,
            height: h,
            data: vec![0.0; w * h],
        };
        for y in 0..h {
            for x in 0..w {
                out.data[y * w + x] = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, k)| k * tmp.at(x as isize, y as isize + i as isize - 2))
                    .sum();
            }
        }
        out
    }

    /// Sobel (gx, gy) at one pixel.
    #[inline]
    fn sobel(&self, x: usize, y: usize) -> (f32, f32) {
        let (x, y) = (x as isize, y as isize);
        let p = |dx: isize, dy: isize| self.at(x + dx, y + dy);
        let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
        let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
        (gx, gy)
    }
}

/// Gradient magnitude above a fixed cut.
#[derive(Debug, Clone)]
pub struct SobelThreshold {
    kernel: [f32; 5],
    threshold: f32,
}

impl SobelThreshold {
    pub fn new(sigma: f32, threshold: f32) -> Self {
        Self {
            kernel: gaussian_kernel(sigma),
            threshold,
        }
    }
}

impl EdgeOperator for SobelThreshold {
    fn name(&self) -> &'static str {
        "sobel"
    }

    fn detect(&self, luma: &GrayImage) -> Vec<bool> {
        let smooth = Plane::from_luma(luma).blurred(&self.kernel);
        let mut edges = Vec::with_capacity(smooth.data.len());
        for y in 0..smooth.height {
            for x in 0..smooth.width {
                let (gx, gy) = smooth.sobel(x, y);
                edges.push(gx.abs() + gy.abs() > self.threshold);
            }
        }
        edges
    }
}

/// Canny: blur, Sobel, non-maximum suppression, hysteresis.
#[derive(Debug, Clone)]
pub struct Canny {
    kernel: [f32; 5],
    low: f32,
    high: f32,
}

impl Canny {
    pub fn new(sigma: f32, low: f32, high: f32) -> Self {
        Self {
            kernel: gaussian_kernel(sigma),
            low: low.min(high),
            high: high.max(low),
        }
    }
}

impl Default for Canny {
    fn default() -> Self {
        let cfg = EdgeConfig::default();
        Self::new(cfg.blur_sigma, cfg.low_threshold, cfg.high_threshold)
    }
}

// tan(22.5°) and tan(67.5°)
const TAN_22_5: f32 = 0.414_213_56;
const TAN_67_5: f32 = 2.414_213_6;

impl EdgeOperator for Canny {
    fn name(&self) -> &'static str {
        "canny"
    }

    fn detect(&self, luma: &GrayImage) -> Vec<bool> {
        let smooth = Plane::from_luma(luma).blurred(&self.kernel);
        let (w, h) = (smooth.width, smooth.height);

        let mut mag = vec![0.0f32; w * h];
        let mut grad = vec![(0.0f32, 0.0f32); w * h];
        for y in 0..h {
            for x in 0..w {
                let (gx, gy) = smooth.sobel(x, y);
                mag[y * w + x] = gx.abs() + gy.abs();
                grad[y * w + x] = (gx, gy);
            }
        }

        let mag_at = |x: isize, y: isize| -> f32 {
            if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
                0.0
            } else {
                mag[y as usize * w + x as usize]
            }
        };

        // Thin: keep local maxima across the gradient direction.
        let mut thin = vec![0.0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let m = mag[y * w + x];
                if m <= self.low {
                    continue;
                }
                let (gx, gy) = grad[y * w + x];
                let (ax, ay) = (gx.abs(), gy.abs());
                let (dx, dy) = if ay <= ax * TAN_22_5 {
                    (1, 0)
                } else if ay >= ax * TAN_67_5 {
                    (0, 1)
                } else if gx * gy > 0.0 {
                    (1, 1)
                } else {
                    (1, -1)
                };
                let (xi, yi) = (x as isize, y as isize);
                if m > mag_at(xi - dx, yi - dy) && m >= mag_at(xi + dx, yi + dy) {
                    thin[y * w + x] = m;
                }
            }
        }

        // Link: grow strong seeds through weak neighbours.
        let mut edges = vec![false; w * h];
        let mut stack: Vec<usize> = thin
            .iter()
            .enumerate()
            .filter(|(_, &m)| m > self.high)
            .map(|(i, _)| i)
            .collect();
        for &i in &stack {
            edges[i] = true;
        }
        while let Some(i) = stack.pop() {
            let (x, y) = ((i % w) as isize, (i / w) as isize);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let j = ny as usize * w + nx as usize;
                    if !edges[j] && thin[j] > self.low {
                        edges[j] = true;
                        stack.push(j);
                    }
                }
            }
        }

        edges
    }
}
