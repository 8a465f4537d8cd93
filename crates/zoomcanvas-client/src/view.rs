//! Viewport geometry and fetch priorities.
//!
//! At zoom `z` the screen shows blocks of depth `floor(z) + 3`, so a
//! 512-pixel view at zoom 0 is the whole canvas as an 8×8 grid of blocks.
//! Fractional zoom scales smoothly between whole levels.
//!
//! Priorities are squared distances from the view centre, measured in half
//! blocks. Nearer blocks get smaller numbers and are fetched first.

use serde::Serialize;

use zoomcanvas_coord::{Coord, Precision};

/// Depth of the blocks drawn at zoom 0.
const BLOCK_LEVEL_OFFSET: u32 = 3;

/// Fixed-point bits of the per-pixel scale mantissa.
const SCALE_MANTISSA_BITS: u32 = 16;

/// log2 of the screen width, in pixels, that spans the canvas at zoom 0.
const SCREEN_BITS: u32 = 9;

/// An axis-aligned rectangle in canvas coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub left: Coord,
    pub top: Coord,
    pub right: Coord,
    pub bottom: Coord,
}

impl Rect {
    pub fn new(left: Coord, top: Coord, right: Coord, bottom: Coord) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn center(&self, precision: &Precision) -> (Coord, Coord) {
        let half = |a: &Coord, b: &Coord| precision.add(a, b).mul_pow2(-1);
        (half(&self.left, &self.right), half(&self.top, &self.bottom))
    }
}

/// A block to show, with its fetch priority.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockPosition {
    pub x: Coord,
    pub y: Coord,
    pub level: u32,
    pub priority: f64,
}

/// Block depth drawn at `zoom`. Negative zoom is treated as zero.
pub fn block_level(zoom: f64) -> u32 {
    (zoom.max(0.0).floor() as u32).saturating_add(BLOCK_LEVEL_OFFSET)
}

/// Canvas distance covered by one screen pixel at `zoom`.
pub fn pixel_scale(zoom: f64) -> Coord {
    let zoom = zoom.max(0.0);
    let whole = zoom.floor();
    let mantissa = (2f64.powf(whole - zoom) * f64::from(1u32 << SCALE_MANTISSA_BITS)).round() as i64;
    Coord::new(mantissa, (whole as u32).saturating_add(SCALE_MANTISSA_BITS + SCREEN_BITS))
}

/// The canvas rectangle covered by a `width`×`height` screen centred on
/// `(center_x, center_y)`.
pub fn compute_viewport(
    precision: &Precision,
    center_x: &Coord,
    center_y: &Coord,
    zoom: f64,
    width: u32,
    height: u32,
) -> Rect {
    let per_pixel = pixel_scale(zoom);
    let half_width = precision.mul(&per_pixel, &Coord::new(width, 1));
    let half_height = precision.mul(&per_pixel, &Coord::new(height, 1));
    Rect {
        left: precision.sub(center_x, &half_width),
        top: precision.sub(center_y, &half_height),
        right: precision.add(center_x, &half_width),
        bottom: precision.add(center_y, &half_height),
    }
}

/// Grow `rect` outward to the block grid of `zoom`.
pub fn align_rect_to_block_grid(rect: &Rect, zoom: f64) -> Rect {
    let bits = block_level(zoom) as i32;
    Rect {
        left: rect.left.truncate(bits),
        top: rect.top.truncate(bits),
        right: rect.right.ceil(bits),
        bottom: rect.bottom.ceil(bits),
    }
}

/// Every block of the canvas that `viewport` touches at `zoom`, in row-major
/// order, each with its priority relative to the viewport centre.
pub fn visible_blocks(precision: &Precision, viewport: &Rect, zoom: f64) -> Vec<BlockPosition> {
    let level = block_level(zoom);
    if level > precision.max_bits() {
        return Vec::new();
    }
    let step = Coord::new(1, level);
    let grid = align_rect_to_block_grid(viewport, zoom);
    let (origin_x, origin_y) = viewport.center(precision);

    let zero = Coord::zero();
    let one = Coord::one();
    let left = grid.left.max(zero.clone());
    let right = grid.right.min(one.clone());
    let bottom = grid.bottom.min(one);

    let mut blocks = Vec::new();
    let mut y = grid.top.max(zero);
    while y < bottom {
        let mut x = left.clone();
        while x < right {
            blocks.push(BlockPosition {
                priority: block_priority(precision, &x, &y, level, &origin_x, &origin_y),
                x: x.clone(),
                y: y.clone(),
                level,
            });
            x = precision.add(&x, &step);
        }
        y = precision.add(&y, &step);
    }
    blocks
}

/// Squared distance, in half-block units, from the centre of the block at
/// `(x, y)` and depth `level` to `(origin_x, origin_y)`.
pub fn block_priority(
    precision: &Precision,
    x: &Coord,
    y: &Coord,
    level: u32,
    origin_x: &Coord,
    origin_y: &Coord,
) -> f64 {
    let half_block = Coord::new(1, level + 1);
    let units = |at: &Coord, origin: &Coord| {
        precision
            .sub(&precision.add(at, &half_block), origin)
            .mul_pow2(level as i32 + 1)
    };
    let dx = units(x, origin_x);
    let dy = units(y, origin_y);
    precision
        .add(&precision.mul(&dx, &dx), &precision.mul(&dy, &dy))
        .truncate(16)
        .to_f64()
}
