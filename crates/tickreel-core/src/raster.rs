use image::{Rgba, RgbaImage};

#[must_use]
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

pub fn fill(target: &mut RgbaImage, color: [u8; 3]) {
    for pixel in target.pixels_mut() {
        *pixel = Rgba([color[0], color[1], color[2], 255]);
    }
}

/// Source-over blend of `color` at `alpha` onto one pixel. Out-of-bounds
/// coordinates are ignored.
pub fn blend_pixel(target: &mut RgbaImage, x: i64, y: i64, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || alpha <= 0.0 {
        return;
    }
    let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
        return;
    };
    if x >= target.width() || y >= target.height() {
        return;
    }

    let alpha = alpha.min(1.0);
    let pixel = target.get_pixel_mut(x, y);
    for channel in 0..3 {
        let base = f32::from(pixel.0[channel]);
        let blended = base + (f32::from(color[channel]) - base) * alpha;
        pixel.0[channel] = blended.round().clamp(0.0, 255.0) as u8;
    }
    pixel.0[3] = 255;
}

pub fn fill_rect(
    target: &mut RgbaImage,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    color: [u8; 3],
    alpha: f32,
) {
    let x0 = x.floor().max(0.0) as i64;
    let y0 = y.floor().max(0.0) as i64;
    let x1 = (x + width).ceil().min(target.width() as f32) as i64;
    let y1 = (y + height).ceil().min(target.height() as f32) as i64;
    for py in y0..y1 {
        for px in x0..x1 {
            blend_pixel(target, px, py, color, alpha);
        }
    }
}

/// Filled disc. With `soft` the edge fades out towards the rim.
pub fn fill_circle(
    target: &mut RgbaImage,
    cx: f32,
    cy: f32,
    radius: f32,
    color: [u8; 3],
    alpha: f32,
    soft: bool,
) {
    if radius <= 0.0 || alpha <= 0.0 {
        return;
    }

    let x0 = (cx - radius).floor().max(0.0) as i64;
    let y0 = (cy - radius).floor().max(0.0) as i64;
    let x1 = (cx + radius).ceil().min(target.width() as f32) as i64;
    let y1 = (cy + radius).ceil().min(target.height() as f32) as i64;
    let radius_sq = radius * radius;

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f32 + 0.5 - cx;
            let dy = py as f32 + 0.5 - cy;
            let distance_sq = dx * dx + dy * dy;
            if distance_sq > radius_sq {
                continue;
            }
            let coverage = if soft {
                1.0 - (distance_sq / radius_sq).sqrt()
            } else {
                1.0
            };
            blend_pixel(target, px, py, color, alpha * coverage);
        }
    }
}

/// Draws `source` with its own alpha scaled by `alpha`, top-left at (x, y).
pub fn draw_image(target: &mut RgbaImage, source: &RgbaImage, x: i64, y: i64, alpha: f32) {
    for (sx, sy, pixel) in source.enumerate_pixels() {
        let source_alpha = f32::from(pixel.0[3]) / 255.0;
        blend_pixel(
            target,
            x + i64::from(sx),
            y + i64::from(sy),
            [pixel.0[0], pixel.0[1], pixel.0[2]],
            source_alpha * alpha,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#00d1b2"), Some([0x00, 0xd1, 0xb2]));
        assert_eq!(parse_hex_color("ff0000"), Some([255, 0, 0]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }

    #[test]
    fn opaque_circle_covers_center_only() {
        let mut image = RgbaImage::new(16, 16);
        fill(&mut image, [0, 0, 0]);
        fill_circle(&mut image, 8.0, 8.0, 3.0, [255, 255, 255], 1.0, false);

        assert_eq!(image.get_pixel(8, 8).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn half_alpha_blends_halfway() {
        let mut image = RgbaImage::new(2, 2);
        fill(&mut image, [0, 0, 0]);
        blend_pixel(&mut image, 1, 1, [200, 100, 50], 0.5);
        assert_eq!(image.get_pixel(1, 1).0, [100, 50, 25, 255]);
    }

    #[test]
    fn out_of_bounds_drawing_is_ignored() {
        let mut image = RgbaImage::new(4, 4);
        fill_rect(&mut image, -10.0, -10.0, 5.0, 5.0, [255, 0, 0], 1.0);
        blend_pixel(&mut image, 99, 0, [255, 0, 0], 1.0);
        assert!(image.pixels().all(|pixel| pixel.0 == [0, 0, 0, 0]));
    }
}
