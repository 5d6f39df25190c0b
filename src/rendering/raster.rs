//! Software rasterizer for the page surface
//!
//! The surface keeps its pixels between repaints, like a canvas: a repaint
//! applies whatever the page queued since the last one on top of what is
//! already there.

use super::PaintCommand;

/// Persistent page pixels: tightly packed, premultiplied BGRA
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    background: [u8; 4],
    pixels: Vec<u8>,
}

impl Surface {
    /// A surface cleared to `background` (`0xAARRGGBB`, straight alpha).
    pub fn new(width: u32, height: u32, background: u32) -> Self {
        let [a, r, g, b] = background.to_be_bytes();
        let background = premultiply_bgra([r, g, b, a]);
        Self {
            width,
            height,
            background,
            pixels: background.repeat(width as usize * height as usize),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Change size. Like a canvas, a size change discards the content.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = self.background.repeat(width as usize * height as usize);
    }

    pub fn apply(&mut self, command: &PaintCommand) {
        match *command {
            PaintCommand::FillRect {
                x,
                y,
                width,
                height,
                color,
            } => {
                let rgba = color.map(|c| c.round().clamp(0.0, 255.0) as u8);
                let src = premultiply_bgra(rgba);
                if src[3] == 0 {
                    return;
                }
                self.for_each_in(x, y, width, height, |px| {
                    let out = over([px[0], px[1], px[2], px[3]], src);
                    px.copy_from_slice(&out);
                });
            }
            PaintCommand::ClearRect {
                x,
                y,
                width,
                height,
            } => self.for_each_in(x, y, width, height, |px| px.fill(0)),
        }
    }

    fn for_each_in(&mut self, x: f64, y: f64, w: f64, h: f64, mut f: impl FnMut(&mut [u8])) {
        let (x0, x1) = clip_span(x, w, self.width);
        let (y0, y1) = clip_span(y, h, self.height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.width as usize * 4;
        for row in self.pixels.chunks_exact_mut(stride).take(y1).skip(y0) {
            for px in row[x0 * 4..x1 * 4].chunks_exact_mut(4) {
                f(px);
            }
        }
    }
}

/// Clip `[start, start + len)` to `[0, limit)`, rounding to whole pixels.
fn clip_span(start: f64, len: f64, limit: u32) -> (usize, usize) {
    if !start.is_finite() || !len.is_finite() {
        return (0, 0);
    }
    let (a, b) = if len < 0.0 { (start + len, start) } else { (start, start + len) };
    let lo = a.round().clamp(0.0, f64::from(limit)) as usize;
    let hi = b.round().clamp(0.0, f64::from(limit)) as usize;
    (lo, hi)
}

/// Straight RGBA to premultiplied BGRA.
fn premultiply_bgra([r, g, b, a]: [u8; 4]) -> [u8; 4] {
    [
        mul_div255(b, a),
        mul_div255(g, a),
        mul_div255(r, a),
        a,
    ]
}

/// Premultiplied "source over" in 8 bits.
fn over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let inv = 255 - src[3];
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(dst[i], inv));
    }
    out
}

fn mul_div255(x: u8, y: u8) -> u8 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(x: f64, y: f64, w: f64, h: f64, color: [f64; 4]) -> PaintCommand {
        PaintCommand::FillRect { x, y, width: w, height: h, color }
    }

    #[test]
    fn new_surface_is_transparent() {
        let s = Surface::new(3, 2, 0);
        assert_eq!(s.pixels(), &[0u8; 24][..]);
    }

    #[test]
    fn background_is_premultiplied_bgra() {
        // half-transparent white
        let s = Surface::new(1, 1, 0x80FF_FFFF);
        assert_eq!(s.pixels(), &[128, 128, 128, 128]);
    }

    #[test]
    fn opaque_fill_covers_whole_surface() {
        let mut s = Surface::new(4, 3, 0);
        s.apply(&fill(0.0, 0.0, 4.0, 3.0, [255.0, 0.0, 0.0, 255.0]));
        assert_eq!(s.pixels(), [0, 0, 255, 255].repeat(12).as_slice());
    }

    #[test]
    fn fill_is_clipped_to_bounds() {
        let mut s = Surface::new(2, 2, 0);
        s.apply(&fill(1.0, -5.0, 10.0, 6.0, [0.0, 0.0, 255.0, 255.0]));
        // only the top-right pixel is covered
        assert_eq!(&s.pixels()[0..4], &[0, 0, 0, 0]);
        assert_eq!(&s.pixels()[4..8], &[255, 0, 0, 255]);
        assert_eq!(&s.pixels()[8..16], &[0u8; 8]);
    }

    #[test]
    fn translucent_fill_blends_over_existing_content() {
        let mut s = Surface::new(1, 1, 0);
        s.apply(&fill(0.0, 0.0, 1.0, 1.0, [0.0, 0.0, 255.0, 255.0]));
        s.apply(&fill(0.0, 0.0, 1.0, 1.0, [255.0, 0.0, 0.0, 128.0]));
        // red 128 premultiplied over opaque blue
        assert_eq!(s.pixels(), &[127, 0, 128, 255]);
    }

    #[test]
    fn clear_and_degenerate_rects() {
        let mut s = Surface::new(2, 1, 0);
        s.apply(&fill(0.0, 0.0, 2.0, 1.0, [9.0, 9.0, 9.0, 255.0]));
        s.apply(&PaintCommand::ClearRect { x: 1.0, y: 0.0, width: 1.0, height: 1.0 });
        s.apply(&fill(f64::NAN, 0.0, 1.0, 1.0, [255.0, 255.0, 255.0, 255.0]));
        s.apply(&fill(0.0, 0.0, 0.0, 1.0, [255.0, 255.0, 255.0, 255.0]));
        assert_eq!(s.pixels(), &[9, 9, 9, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn resize_discards_content() {
        let mut s = Surface::new(1, 1, 0);
        s.apply(&fill(0.0, 0.0, 1.0, 1.0, [1.0, 2.0, 3.0, 255.0]));
        s.resize(1, 1);
        assert_eq!(s.pixels(), &[3, 2, 1, 255]);
        s.resize(2, 1);
        assert_eq!(s.pixels(), &[0u8; 8]);
    }
}
