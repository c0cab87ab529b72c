use ratatui::{
    prelude::{Buffer, Rect},
    style::{Color, Style},
    widgets::Widget,
};

use crate::colormap::{Gradient, Rgb};
use crate::compositor::Bitmap;

/// Each terminal cell shows two stacked pixels: the upper half block takes
/// the top pixel as foreground and the bottom pixel as background.
pub const PIXELS_PER_ROW: u16 = 2;

/// Canvas size in pixels for a terminal area.
pub fn canvas_for(area: Rect) -> (usize, usize) {
    (
        area.width as usize,
        area.height as usize * PIXELS_PER_ROW as usize,
    )
}

fn rgb(color: Rgb) -> Color {
    Color::Rgb(color[0], color[1], color[2])
}

/// Draws a composited [`Bitmap`].
#[derive(Debug, Clone, Copy)]
pub struct HeatmapView<'a> {
    bitmap: &'a Bitmap,
}

impl<'a> HeatmapView<'a> {
    pub fn new(bitmap: &'a Bitmap) -> Self {
        Self { bitmap }
    }
}

impl Widget for HeatmapView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Keep within terminal bounds
        let width = area.width.min(self.bitmap.width() as u16);
        let height = area
            .height
            .min(self.bitmap.height().div_ceil(PIXELS_PER_ROW as usize) as u16);

        for y in 0..height {
            for x in 0..width {
                let px = x as usize;
                let py = (y * PIXELS_PER_ROW) as usize;
                let Some(top) = self.bitmap.pixel(px, py) else {
                    continue;
                };
                let bottom = self.bitmap.pixel(px, py + 1).unwrap_or(top);
                if let Some(cell) = buf.cell_mut((area.x + x, area.y + y)) {
                    cell.set_symbol("▀").set_fg(rgb(top)).set_bg(rgb(bottom));
                }
            }
        }
    }
}

/// One-line legend: the gradient from `min` to `max`.
#[derive(Debug, Clone, Copy)]
pub struct Colorbar {
    pub gradient: Gradient,
    pub min: f32,
    pub max: f32,
}

impl Widget for Colorbar {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 || area.width == 0 {
            return;
        }
        let min_label = format!("{:.0} ", self.min);
        let max_label = format!(" {:.0}", self.max);
        let labels = (min_label.len() + max_label.len()) as u16;
        if area.width <= labels {
            return;
        }
        let bar_width = area.width - labels;

        buf.set_string(area.x, area.y, &min_label, Style::default());
        let bar_x = area.x + min_label.len() as u16;
        for i in 0..bar_width {
            let t = if bar_width > 1 {
                i as f32 / (bar_width - 1) as f32
            } else {
                1.0
            };
            if let Some(cell) = buf.cell_mut((bar_x + i, area.y)) {
                cell.set_symbol(" ").set_bg(rgb(self.gradient.sample(t)));
            }
        }
        buf.set_string(bar_x + bar_width, area.y, &max_label, Style::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{Compositor, RenderConfig};
    use crate::grid::{Grid, Rotation};

    #[test]
    fn two_pixels_per_terminal_cell() {
        let colors = Grid::from_vec(2, 1, vec![[255, 0, 0], [0, 0, 255]]).unwrap();
        let area = Rect::new(0, 0, 2, 2);
        let config = RenderConfig {
            value_min: 0.0,
            value_max: 1.0,
            rotation: Rotation::Deg0,
            mirror: false,
            canvas: canvas_for(area),
            gradient: Gradient::Inferno,
            cell_aspect_ratio: 1.0,
        };
        let mut compositor = Compositor::new();
        let bitmap = compositor.composite(&colors, &config).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (2, 4));

        let mut buf = Buffer::empty(area);
        HeatmapView::new(bitmap).render(area, &mut buf);
        let top = &buf[(0, 0)];
        assert_eq!(top.symbol(), "▀");
        assert_eq!(top.fg, Color::Rgb(255, 0, 0));
        assert_eq!(top.bg, Color::Rgb(255, 0, 0));
        let bottom = &buf[(1, 1)];
        assert_eq!(bottom.fg, Color::Rgb(0, 0, 255));
    }

    #[test]
    fn canvas_for_tall_area_does_not_overflow() {
        assert_eq!(canvas_for(Rect::new(0, 0, 80, 24)), (80, 48));
        assert_eq!(canvas_for(Rect::new(0, 0, 1, u16::MAX)), (1, 2 * u16::MAX as usize));
    }

    #[test]
    fn colorbar_spans_gradient() {
        let area = Rect::new(0, 0, 20, 1);
        let mut buf = Buffer::empty(area);
        Colorbar {
            gradient: Gradient::Grayscale,
            min: 0.0,
            max: 1023.0,
        }
        .render(area, &mut buf);
        assert_eq!(buf[(0, 0)].symbol(), "0");
        assert_eq!(buf[(2, 0)].bg, Color::Rgb(0, 0, 0));
        assert_eq!(buf[(14, 0)].bg, Color::Rgb(255, 255, 255));
        assert_eq!(buf[(19, 0)].symbol(), "3");
    }
}
