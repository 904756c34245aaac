//! Ward boundary parsing and reprojection.
//!
//! Ward polygons arrive as WKT in British National Grid (EPSG:27700) or as
//! `GeoJSON` geometry already in WGS84. BNG coordinates are reprojected to
//! WGS84 (EPSG:4326) through PROJ.

use geo::{Coord, LineString, MapCoords, MultiPolygon, Polygon};
use geojson::GeoJson;
use proj::Proj;

use crate::DbError;

/// British National Grid.
pub const BNG_CRS: &str = "EPSG:27700";
/// WGS84 longitude/latitude.
pub const WGS84_CRS: &str = "EPSG:4326";

/// Parses stored ward geometry into a WGS84 (lon, lat) multipolygon.
///
/// Text starting with `{` is read as `GeoJSON` (already WGS84); anything
/// else as BNG WKT, which is reprojected.
///
/// # Errors
///
/// * [`DbError::Geometry`] if the text is neither a polygon nor a
///   multipolygon in either format
/// * [`DbError::ProjCreate`] / [`DbError::Proj`] if reprojection fails
pub fn parse_ward_geometry(text: &str) -> Result<MultiPolygon<f64>, DbError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        parse_geojson(trimmed)
    } else {
        bng_to_wgs84_polygons(&parse_wkt(trimmed)?)
    }
}

fn parse_geojson(text: &str) -> Result<MultiPolygon<f64>, DbError> {
    let geometry_error = |message: String| DbError::Geometry { message };

    let geojson: GeoJson = text
        .parse()
        .map_err(|e| geometry_error(format!("invalid GeoJSON: {e}")))?;
    let GeoJson::Geometry(geometry) = geojson else {
        return Err(geometry_error("GeoJSON is not a bare geometry".to_string()));
    };
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| geometry_error(format!("unsupported GeoJSON geometry: {e}")))?;

    match geometry {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        _ => Err(geometry_error("GeoJSON geometry is not a polygon".to_string())),
    }
}

fn bng_projection() -> Result<Proj, DbError> {
    Ok(Proj::new_known_crs(BNG_CRS, WGS84_CRS, None)?)
}

/// Reprojects every vertex from BNG (easting, northing) to WGS84
/// (longitude, latitude).
///
/// # Errors
///
/// Returns [`DbError::ProjCreate`] if PROJ has no BNG to WGS84 transform, or
/// [`DbError::Proj`] if a vertex cannot be converted.
pub fn bng_to_wgs84_polygons(polygons: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, DbError> {
    let proj = bng_projection()?;
    polygons.try_map_coords(|Coord { x, y }| {
        let (longitude, latitude) = proj.convert((x, y))?;
        Ok::<_, DbError>(Coord {
            x: longitude,
            y: latitude,
        })
    })
}

/// Converts a BNG easting/northing to WGS84 `(latitude, longitude)` in
/// degrees.
///
/// # Errors
///
/// Returns [`DbError::ProjCreate`] or [`DbError::Proj`] if PROJ fails.
pub fn bng_to_wgs84(easting: f64, northing: f64) -> Result<(f64, f64), DbError> {
    let (longitude, latitude) = bng_projection()?.convert((easting, northing))?;
    Ok((latitude, longitude))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Open,
    Close,
    Comma,
    Number(f64),
}

/// Parses a WKT `POLYGON` or `MULTIPOLYGON` without reprojecting.
///
/// # Errors
///
/// * [`DbError::Geometry`] on any other geometry type or malformed text
pub fn parse_wkt(text: &str) -> Result<MultiPolygon<f64>, DbError> {
    let keyword_end = text
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(text.len());
    let keyword = text[..keyword_end].to_ascii_uppercase();
    let body = text[keyword_end..].trim_start();

    // tolerate a "Z" dimension tag; the third ordinate is dropped below
    let (body, dimensions) = body
        .strip_prefix('Z')
        .or_else(|| body.strip_prefix('z'))
        .map_or((body, 2), |rest| (rest.trim_start(), 3));

    if body.eq_ignore_ascii_case("EMPTY") {
        return Ok(MultiPolygon(vec![]));
    }

    let tokens = tokenize(body)?;
    let mut cursor = Cursor {
        tokens: &tokens,
        pos: 0,
        dimensions,
    };

    let polygons = match keyword.as_str() {
        "POLYGON" => vec![cursor.polygon()?],
        "MULTIPOLYGON" => cursor.list(Cursor::polygon)?,
        other => {
            return Err(DbError::Geometry {
                message: format!("unsupported WKT geometry type {other:?}"),
            });
        }
    };

    if cursor.pos != tokens.len() {
        return Err(DbError::Geometry {
            message: "trailing tokens after WKT geometry".to_string(),
        });
    }

    Ok(MultiPolygon(polygons))
}

fn tokenize(text: &str) -> Result<Vec<Token>, DbError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c == '(' || c == ')' || c == ',' || c.is_whitespace() {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let word = &text[start..end];
                let value = word.parse::<f64>().map_err(|_| DbError::Geometry {
                    message: format!("unexpected WKT token {word:?}"),
                })?;
                tokens.push(Token::Number(value));
            }
        }
    }

    Ok(tokens)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    dimensions: usize,
}

impl Cursor<'_> {
    fn expect(&mut self, token: Token) -> Result<(), DbError> {
        match self.tokens.get(self.pos) {
            Some(t) if *t == token => {
                self.pos += 1;
                Ok(())
            }
            found => Err(DbError::Geometry {
                message: format!("expected {token:?} in WKT, found {found:?}"),
            }),
        }
    }

    /// `( item , item ... )`
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, DbError>) -> Result<Vec<T>, DbError> {
        self.expect(Token::Open)?;
        let mut items = vec![item(self)?];
        while self.tokens.get(self.pos) == Some(&Token::Comma) {
            self.pos += 1;
            items.push(item(self)?);
        }
        self.expect(Token::Close)?;
        Ok(items)
    }

    fn polygon(&mut self) -> Result<Polygon<f64>, DbError> {
        let mut rings = self.list(Self::ring)?.into_iter();
        let exterior = rings.next().unwrap_or_else(|| LineString(vec![]));
        Ok(Polygon::new(exterior, rings.collect()))
    }

    fn ring(&mut self) -> Result<LineString<f64>, DbError> {
        Ok(LineString(self.list(Self::coord)?))
    }

    fn coord(&mut self) -> Result<Coord<f64>, DbError> {
        let mut values = [0.0; 3];
        for value in values.iter_mut().take(self.dimensions) {
            match self.tokens.get(self.pos) {
                Some(Token::Number(v)) => {
                    *value = *v;
                    self.pos += 1;
                }
                found => {
                    return Err(DbError::Geometry {
                        message: format!("expected a coordinate in WKT, found {found:?}"),
                    });
                }
            }
        }
        Ok(Coord {
            x: values[0],
            y: values[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;

    use super::*;

    #[test]
    fn reference_point_reprojects_to_wgs84() {
        // Ordnance Survey worked example 651409.903 E, 313177.270 N, which is
        // 52.65757 N, 1.71792 E on OSGB36; the WGS84 shift is ~100 m
        let (lat, lon) = bng_to_wgs84(651_409.903, 313_177.270).unwrap();
        assert_approx_eq!(f64, lat, 52.658, epsilon = 2e-3);
        assert_approx_eq!(f64, lon, 1.716, epsilon = 3e-3);
    }

    #[test]
    fn central_london_reprojects_to_london() {
        let (lat, lon) = bng_to_wgs84(530_000.0, 180_000.0).unwrap();
        assert_approx_eq!(f64, lat, 51.503_99, epsilon = 1e-4);
        assert_approx_eq!(f64, lon, -0.128_35, epsilon = 1e-4);
    }

    #[test]
    fn parses_polygon_with_hole() {
        let mp = parse_wkt("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 3 2, 3 3, 2 2))").unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn parses_multipolygon_and_z_coordinates() {
        let mp = parse_wkt(
            "MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))",
        )
        .unwrap();
        assert_eq!(mp.0.len(), 2);

        let z = parse_wkt("POLYGON Z ((0 0 1, 1 0 1, 1 1 1, 0 0 1))").unwrap();
        assert_approx_eq!(f64, z.0[0].exterior().0[1].x, 1.0);
    }

    #[test]
    fn rejects_malformed_wkt() {
        assert!(parse_wkt("POINT (1 2)").is_err());
        assert!(parse_wkt("POLYGON ((0 0, 1 0, 1 1, 0 0)").is_err());
        assert!(parse_wkt("POLYGON ((0 0, 1 a, 1 1, 0 0))").is_err());
    }

    #[test]
    fn geojson_is_taken_as_wgs84() {
        let mp = parse_ward_geometry(
            r#"{"type":"Polygon","coordinates":[[[-0.1,51.5],[-0.09,51.5],[-0.09,51.51],[-0.1,51.5]]]}"#,
        )
        .unwrap();
        assert_approx_eq!(f64, mp.0[0].exterior().0[0].x, -0.1);
        assert_approx_eq!(f64, mp.0[0].exterior().0[0].y, 51.5);
    }

    #[test]
    fn wkt_ward_geometry_is_reprojected() {
        let mp = parse_ward_geometry(
            "POLYGON ((530000 180000, 531000 180000, 531000 181000, 530000 180000))",
        )
        .unwrap();
        let first = mp.0[0].exterior().0[0];
        assert!((51.49..51.52).contains(&first.y));
        assert!((-0.14..-0.12).contains(&first.x));
    }
}
