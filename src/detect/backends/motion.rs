use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, ObjectClass};

const GRID_COLS: u32 = 16;
const GRID_ROWS: u32 = 12;
const DEFAULT_CELL_THRESHOLD: f32 = 24.0;

/// Frame-differencing backend.
///
/// Each image is reduced to a grid of mean luma values. Cells that moved
/// more than the threshold since the previous image are merged into one
/// bounding box. The first image, and any image whose size differs from
/// the previous one, only primes the reference grid.
pub struct MotionBackend {
    previous: Option<Grid>,
    cell_threshold: f32,
}

struct Grid {
    width: u32,
    height: u32,
    cells: Vec<f32>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            previous: None,
            cell_threshold: DEFAULT_CELL_THRESHOLD,
        }
    }

    /// Mean luma change (0..255) a cell needs to count as motion.
    pub fn with_threshold(mut self, cell_threshold: f32) -> Self {
        self.cell_threshold = cell_threshold;
        self
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult> {
        let grid = luma_grid(image);
        let previous = self.previous.replace(grid);
        let (Some(previous), Some(current)) = (previous, self.previous.as_ref()) else {
            return Ok(DetectionResult::default());
        };
        if previous.width != current.width || previous.height != current.height {
            return Ok(DetectionResult::default());
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut strongest = 0.0f32;
        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLS {
                let idx = (row * GRID_COLS + col) as usize;
                let delta = (current.cells[idx] - previous.cells[idx]).abs();
                if delta < self.cell_threshold {
                    continue;
                }
                strongest = strongest.max(delta);
                bounds = Some(match bounds {
                    None => (col, row, col, row),
                    Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
                });
            }
        }

        let Some((c0, r0, c1, r1)) = bounds else {
            return Ok(DetectionResult::default());
        };
        let detection = Detection {
            x: c0 as f32 / GRID_COLS as f32,
            y: r0 as f32 / GRID_ROWS as f32,
            w: (c1 - c0 + 1) as f32 / GRID_COLS as f32,
            h: (r1 - r0 + 1) as f32 / GRID_ROWS as f32,
            confidence: (strongest / 255.0).clamp(0.0, 1.0),
            class: ObjectClass::Motion,
        };
        Ok(DetectionResult {
            detections: vec![detection.clamped()],
        })
    }
}

fn luma_grid(image: &RgbImage) -> Grid {
    let (width, height) = image.dimensions();
    let mut sums = vec![0.0f32; (GRID_COLS * GRID_ROWS) as usize];
    let mut counts = vec![0u32; sums.len()];
    for (x, y, pixel) in image.enumerate_pixels() {
        let col = (x * GRID_COLS / width.max(1)).min(GRID_COLS - 1);
        let row = (y * GRID_ROWS / height.max(1)).min(GRID_ROWS - 1);
        let idx = (row * GRID_COLS + col) as usize;
        let [r, g, b] = pixel.0;
        sums[idx] += 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        counts[idx] += 1;
    }
    let cells = sums
        .iter()
        .zip(&counts)
        .map(|(sum, count)| if *count == 0 { 0.0 } else { sum / *count as f32 })
        .collect();
    Grid {
        width,
        height,
        cells,
    }
}
