//! Map Module
//!
//! Slippy-map tile math and the view model handed to the map widget.

use serde::{Deserialize, Serialize};

use crate::location::Coordinate;

/// Latitude bound of the Web Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Tile source addressed by `{s}`, `{z}`, `{x}` and `{y}` placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayer {
    pub url_template: String,
    pub subdomains: Vec<String>,
}

impl TileLayer {
    pub const MAX_ZOOM: u8 = 19;

    /// Expand the template for a single tile.
    pub fn tile_url(&self, tile: TileCoord) -> String {
        let subdomain = if self.subdomains.is_empty() {
            ""
        } else {
            let index = (tile.x as usize + tile.y as usize) % self.subdomains.len();
            self.subdomains[index].as_str()
        };

        self.url_template
            .replace("{s}", subdomain)
            .replace("{z}", &tile.z.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }
}

impl Default for TileLayer {
    fn default() -> Self {
        Self {
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            subdomains: vec!["a".into(), "b".into(), "c".into()],
        }
    }
}

/// Tile index at a zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Tile containing `coord` at `zoom`.
    pub fn containing(coord: Coordinate, zoom: u8) -> Self {
        let zoom = zoom.min(TileLayer::MAX_ZOOM);
        let n = f64::from(1u32 << zoom);
        let max_index = (1u32 << zoom) - 1;

        let lng = coord.lng.clamp(-180.0, 180.0);
        let lat = coord.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();

        let x = ((lng + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - lat.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor();

        Self {
            z: zoom,
            x: (x.max(0.0) as u32).min(max_index),
            y: (y.max(0.0) as u32).min(max_index),
        }
    }
}

/// Map centered on the latest fix with a single marker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
    pub center: Coordinate,
    pub zoom: u8,
    pub marker: Coordinate,
    pub tiles: TileLayer,
    pub center_tile_url: String,
}

impl MapView {
    pub fn centered_on(coord: Coordinate, zoom: u8, tiles: &TileLayer) -> Self {
        let center_tile_url = tiles.tile_url(TileCoord::containing(coord, zoom));
        Self {
            center: coord,
            zoom,
            marker: coord,
            tiles: tiles.clone(),
            center_tile_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_lands_on_center_tiles() {
        let origin = Coordinate { lat: 0.0, lng: 0.0 };
        assert_eq!(TileCoord::containing(origin, 0), TileCoord { z: 0, x: 0, y: 0 });
        assert_eq!(TileCoord::containing(origin, 1), TileCoord { z: 1, x: 1, y: 1 });
    }

    #[test]
    fn san_francisco_at_city_zoom() {
        let sf = Coordinate { lat: 37.77, lng: -122.41 };
        assert_eq!(TileCoord::containing(sf, 13), TileCoord { z: 13, x: 1310, y: 3166 });
    }

    #[test]
    fn polar_and_antimeridian_coordinates_stay_in_range() {
        let edge = Coordinate { lat: -89.9, lng: 180.0 };
        assert_eq!(TileCoord::containing(edge, 3), TileCoord { z: 3, x: 7, y: 7 });
    }

    #[test]
    fn tile_url_rotates_subdomains() {
        let layer = TileLayer::default();
        let url = layer.tile_url(TileCoord { z: 10, x: 511, y: 340 });
        // (511 + 340) % 3 == 2
        assert_eq!(url, "https://c.tile.openstreetmap.org/10/511/340.png");
    }

    #[test]
    fn template_without_subdomains() {
        let layer = TileLayer {
            url_template: "https://tiles.example.com/{z}/{x}/{y}.png".into(),
            subdomains: Vec::new(),
        };
        assert_eq!(
            layer.tile_url(TileCoord { z: 1, x: 0, y: 1 }),
            "https://tiles.example.com/1/0/1.png"
        );
    }

    #[test]
    fn map_view_puts_marker_at_center() {
        let sf = Coordinate { lat: 37.77, lng: -122.41 };
        let view = MapView::centered_on(sf, 13, &TileLayer::default());
        assert_eq!(view.center, sf);
        assert_eq!(view.marker, sf);
        assert!(view.center_tile_url.ends_with("/13/1310/3166.png"));
    }
}
