//! Alpha compositing of the rendered layer onto the caller's frame
//!
//! The source is the engine's bitmap: packed BGRA, alpha-premultiplied. The
//! destination is the caller's frame: packed RGBA or BGRA with straight alpha.
//! Both are tightly packed (`stride == width * 4`). Every channel is widened to
//! 16 bits (`v | v << 8`) before blending, the destination is premultiplied,
//! "source over" is applied, and the result is un-premultiplied back into the
//! destination's channel order.
//!
//! This scalar loop is the reference: results are pixel-exact and fixtures
//! depend on them bit for bit.

use crate::{Error, PixelFormat, Result};

const MASK: u32 = 0xFFFF;

/// Composite `src` over `dst` in place.
///
/// `dst` and `src` must both hold exactly `width * height` pixels. The only
/// bytes written are those of `dst`.
pub fn composite(
    dst: &mut [u8],
    dst_format: PixelFormat,
    src: &[u8],
    width: usize,
    height: usize,
) -> Result<()> {
    let len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::GeometryError(format!("{}x{} overflows", width, height)))?;
    if dst.len() != len || src.len() != len {
        return Err(Error::GeometryError(format!(
            "composite expects {} bytes for {}x{}, got dst={} src={}",
            len,
            width,
            height,
            dst.len(),
            src.len()
        )));
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        blend_pixel(d, dst_format, s);
    }
    Ok(())
}

/// Blend one premultiplied BGRA source pixel over one straight-alpha
/// destination pixel.
#[inline]
pub fn blend_pixel(dst: &mut [u8], dst_format: PixelFormat, src: &[u8]) {
    let [sr, sg, sb, sa] = read_premultiplied(src, PixelFormat::Bgra);
    let [dr, dg, db, da] = read_straight(dst, dst_format);

    // u32 wrapping arithmetic keeps out-of-range source pixels (colour above
    // alpha) bit-identical with the reference.
    let inv = MASK - sa;
    let over = |d: u32, s: u32| d.wrapping_mul(inv).wrapping_add(s.wrapping_mul(MASK)) / MASK;

    write_straight(
        dst,
        dst_format,
        [over(dr, sr), over(dg, sg), over(db, sb), over(da, sa)],
    );
}

#[inline]
fn widen(v: u8) -> u32 {
    let v = u32::from(v);
    v | (v << 8)
}

/// Read `[r, g, b, a]` widened to 16 bits, as stored.
#[inline]
fn read_premultiplied(px: &[u8], format: PixelFormat) -> [u32; 4] {
    [
        widen(px[format.red_offset()]),
        widen(px[1]),
        widen(px[format.blue_offset()]),
        widen(px[3]),
    ]
}

/// Read `[r, g, b, a]` widened to 16 bits, premultiplying the colour.
#[inline]
fn read_straight(px: &[u8], format: PixelFormat) -> [u32; 4] {
    let [r, g, b, a] = read_premultiplied(px, format);
    [r * a / MASK, g * a / MASK, b * a / MASK, a]
}

/// Un-premultiply 16-bit `[r, g, b, a]` and store it as 8-bit straight alpha.
#[inline]
fn write_straight(px: &mut [u8], format: PixelFormat, [mut r, mut g, mut b, a]: [u32; 4]) {
    if a == 0 {
        px.fill(0);
        return;
    }

    if a != MASK {
        r = r.wrapping_mul(MASK) / a;
        g = g.wrapping_mul(MASK) / a;
        b = b.wrapping_mul(MASK) / a;
    }

    px[format.red_offset()] = (r >> 8) as u8;
    px[1] = (g >> 8) as u8;
    px[format.blue_offset()] = (b >> 8) as u8;
    px[3] = (a >> 8) as u8;
}
