use crate::colormap::{Gradient, Rgb};
use crate::grid::{Grid, Rotation};

/// Colour of canvas pixels not covered by the heatmap.
pub const BACKGROUND: Rgb = [0, 0, 0];

/// Everything the compositor needs to know about how a frame should look.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub value_min: f32,
    pub value_max: f32,
    pub rotation: Rotation,
    pub mirror: bool,
    /// Output size in pixels, `(width, height)`.
    pub canvas: (usize, usize),
    pub gradient: Gradient,
    /// Width / height of one heatmap cell.
    pub cell_aspect_ratio: f32,
}

/// RGB image the size of the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
}

impl Bitmap {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![BACKGROUND; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }
}

/// Pixel size of every row and column of cells, plus where the block sits on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CellLayout {
    col_widths: Vec<usize>,
    row_heights: Vec<usize>,
    offset_x: usize,
    offset_y: usize,
}

impl CellLayout {
    /// `None` when the canvas is too small to give every cell at least one pixel.
    fn fit(rows: usize, cols: usize, canvas: (usize, usize), aspect: f32) -> Option<Self> {
        let (width, height) = canvas;
        if rows == 0 || cols == 0 || width == 0 || height == 0 {
            return None;
        }
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };

        let canvas_ratio = width as f32 / height as f32;
        let grid_ratio = aspect * cols as f32 / rows as f32;
        let height_bound = canvas_ratio > grid_ratio;

        let (cell_w, cell_h) = if height_bound {
            let cell_h = height / rows;
            ((cell_h as f32 * aspect) as usize, cell_h)
        } else {
            let cell_w = width / cols;
            (cell_w, (cell_w as f32 / aspect) as usize)
        };
        if cell_w == 0 || cell_h == 0 {
            return None;
        }

        // Clamp against float rounding so the block never exceeds the canvas.
        let base_w = (cell_w * cols).min(width);
        let base_h = (cell_h * rows).min(height);
        let (extent_w, extent_h) = if height_bound {
            let leftover = height - base_h;
            ((base_w + leftover).min(width), height)
        } else {
            let leftover = width - base_w;
            (width, (base_h + leftover).min(height))
        };

        Some(Self {
            col_widths: spread(cols, extent_w),
            row_heights: spread(rows, extent_h),
            offset_x: (width - extent_w) / 2,
            offset_y: (height - extent_h) / 2,
        })
    }
}

/// Splits `extent` pixels over `cells`, handing the remainder out at evenly spaced cells.
fn spread(cells: usize, extent: usize) -> Vec<usize> {
    let base = extent / cells;
    let extra = extent - base * cells;
    (0..cells)
        .map(|k| base + (k + 1) * extra / cells - k * extra / cells)
        .collect()
}

/// Expands a pixel count per cell into the cell index of each pixel.
fn pixel_to_cell(sizes: &[usize]) -> Vec<usize> {
    sizes
        .iter()
        .enumerate()
        .flat_map(|(cell, &size)| std::iter::repeat_n(cell, size))
        .collect()
}

/// Scales colour grids onto a canvas, keeping one output buffer across frames.
#[derive(Debug, Default)]
pub struct Compositor {
    buffer: Option<Bitmap>,
    allocations: usize,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent complete render, if any.
    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.buffer.as_ref()
    }

    /// Number of times the output buffer has been (re)allocated.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Renders `colors` into the canvas-sized buffer.
    ///
    /// Returns `None` and leaves the previous bitmap untouched when the canvas
    /// cannot fit a single pixel per cell (e.g. before the UI has laid out).
    pub fn composite(&mut self, colors: &Grid<Rgb>, config: &RenderConfig) -> Option<&Bitmap> {
        let oriented = colors.rotated(config.rotation);
        let oriented = if config.mirror {
            oriented.mirrored()
        } else {
            oriented
        };

        let layout = CellLayout::fit(
            oriented.rows(),
            oriented.cols(),
            config.canvas,
            config.cell_aspect_ratio,
        )?;
        let (width, height) = config.canvas;

        let reuse = matches!(&self.buffer, Some(b) if b.width == width && b.height == height);
        if !reuse {
            tracing::debug!(width, height, "allocating heatmap buffer");
            self.buffer = Some(Bitmap::new(width, height));
            self.allocations += 1;
        }
        let bitmap = self.buffer.as_mut()?;
        bitmap.pixels.fill(BACKGROUND);

        let col_of_x = pixel_to_cell(&layout.col_widths);
        let row_of_y = pixel_to_cell(&layout.row_heights);
        for (dy, &row) in row_of_y.iter().enumerate() {
            let cells = oriented.row(row);
            let start = (layout.offset_y + dy) * width + layout.offset_x;
            let line = &mut bitmap.pixels[start..start + col_of_x.len()];
            for (pixel, &col) in line.iter_mut().zip(&col_of_x) {
                *pixel = cells[col];
            }
        }
        Some(bitmap)
    }
}
