//! Web Mercator slippy-tile math. Pure functions; tile IDs are
//! canonical "Z/X/Y" strings with x and y clamped to the tile grid.

use std::f64::consts::PI;

/// Compute the tile ID for a coordinate at the given zoom level.
pub fn tile_id(lat: f64, lon: f64, zoom: u32) -> String {
    let n = 2f64.powi(zoom as i32);
    let x = ((lon + 180.0) / 360.0 * n).floor() as i64;
    let lat_rad = lat.to_radians();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor() as i64;

    let max_tile = n as i64 - 1;
    let x = x.clamp(0, max_tile);
    let y = y.clamp(0, max_tile);

    format!("{}/{}/{}", zoom, x, y)
}

/// Bounding box of a tile: (min_lat, min_lon, max_lat, max_lon).
pub fn tile_bounds(zoom: u32, x: u32, y: u32) -> (f64, f64, f64, f64) {
    let n = 2f64.powi(zoom as i32);
    let min_lon = x as f64 / n * 360.0 - 180.0;
    let max_lon = (x + 1) as f64 / n * 360.0 - 180.0;

    let min_lat = (PI * (1.0 - 2.0 * (y + 1) as f64 / n)).sinh().atan().to_degrees();
    let max_lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan().to_degrees();
    (min_lat, min_lon, max_lat, max_lon)
}

/// Parse a "Z/X/Y" tile ID. Returns `None` for anything malformed.
pub fn parse_tile_id(tile_id: &str) -> Option<(u32, u32, u32)> {
    let mut parts = tile_id.split('/');
    let zoom = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((zoom, x, y))
}

/// The given tile plus its up-to-8 neighbors, clamped at grid edges.
pub fn adjacent_tiles(zoom: u32, x: u32, y: u32) -> Vec<String> {
    let max_tile = 2i64.pow(zoom) - 1;
    let mut tiles = Vec::with_capacity(9);

    for dx in -1i64..=1 {
        for dy in -1i64..=1 {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || nx > max_tile || ny < 0 || ny > max_tile {
                continue;
            }
            tiles.push(format!("{}/{}/{}", zoom, nx, ny));
        }
    }
    tiles
}

/// All tile IDs intersecting the bounding box at the given zoom.
/// Inverted corners are swapped rather than producing an empty cover.
pub fn tiles_in_bbox(
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
    zoom: u32,
) -> Vec<String> {
    let (min_lat, max_lat) = if min_lat > max_lat {
        (max_lat, min_lat)
    } else {
        (min_lat, max_lat)
    };
    let (min_lon, max_lon) = if min_lon > max_lon {
        (max_lon, min_lon)
    } else {
        (min_lon, max_lon)
    };

    let top_left = tile_id(max_lat, min_lon, zoom);
    let bottom_right = tile_id(min_lat, max_lon, zoom);

    let (Some((z1, x1, y1)), Some((z2, x2, y2))) =
        (parse_tile_id(&top_left), parse_tile_id(&bottom_right))
    else {
        return Vec::new();
    };
    if z1 != z2 {
        return Vec::new();
    }

    let mut tiles = Vec::with_capacity(((x2 - x1 + 1) * (y2 - y1 + 1)) as usize);
    for x in x1..=x2 {
        for y in y1..=y2 {
            tiles.push(format!("{}/{}/{}", zoom, x, y));
        }
    }
    tiles
}
