//! Coordinate references used by the Arizona inputs, and transforms between them.
//!
//! Every transform goes through geographic lon/lat. NAD83 and WGS84
//! geographic coordinates are treated as identical; the datum shift is well
//! under a metre in Arizona.

use std::fmt;

use geo::{Coord, MapCoords};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_ZONE_12_CENTRAL_MERIDIAN_DEG: f64 = -111.0;
const WEB_MERCATOR_MAX_LAT_DEG: f64 = 85.051_128_779_806_59;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CrsError {
    #[error("unsupported coordinate reference '{0}'")]
    Unsupported(String),
    #[error("no coordinate reference could be determined for {0}")]
    Undetermined(String),
    #[error("cannot transform ({x}, {y}) from {from} to {to}")]
    Transform { x: f64, y: f64, from: Crs, to: Crs },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Crs {
    /// EPSG:4326, the working reference of the pipeline.
    Wgs84,
    /// EPSG:4269, used by the Census TIGER/Line boundaries.
    Nad83,
    /// EPSG:3857.
    WebMercator,
    /// EPSG:32612, used to measure roof areas in metres.
    Utm12N,
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::parse(&value)
    }
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Self::Wgs84),
            4269 => Ok(Self::Nad83),
            3857 | 900913 => Ok(Self::WebMercator),
            32612 => Ok(Self::Utm12N),
            other => Err(CrsError::Unsupported(format!("EPSG:{other}"))),
        }
    }

    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::Nad83 => 4269,
            Self::WebMercator => 3857,
            Self::Utm12N => 32612,
        }
    }

    pub fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84 | Self::Nad83)
    }

    /// Parse `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326` or the OGC CRS84 URN.
    pub fn parse(s: &str) -> Result<Self, CrsError> {
        let trimmed = s.trim();
        if trimmed.to_ascii_uppercase().ends_with("CRS84") {
            return Ok(Self::Wgs84);
        }
        Self::find_in_text(trimmed).ok_or_else(|| CrsError::Unsupported(trimmed.to_string()))?
    }

    /// Locate an EPSG code (`EPSG:n` or `EPSG::n`) or CRS84 marker inside free text,
    /// such as the header of a GeoJSON document.
    pub fn find_in_text(text: &str) -> Option<Result<Self, CrsError>> {
        let upper = text.to_ascii_uppercase();
        if let Some(pos) = upper.find("EPSG:") {
            let digits: String = upper[pos + 5..]
                .trim_start_matches(':')
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            return Some(
                digits
                    .parse::<u32>()
                    .map_err(|_| CrsError::Unsupported(text.to_string()))
                    .and_then(Self::from_epsg),
            );
        }
        if upper.contains("CRS84") {
            return Some(Ok(Self::Wgs84));
        }
        None
    }

    /// Identify the reference described by ESRI/OGC WKT, as found in a `.prj` file.
    pub fn from_wkt(wkt: &str) -> Result<Self, CrsError> {
        let upper = wkt.to_ascii_uppercase();

        // The outermost AUTHORITY comes last in WKT1.
        if let Some(pos) = upper.rfind("AUTHORITY[\"EPSG\",\"") {
            let digits: String = upper[pos + 18..].chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(code) = digits.parse::<u32>() {
                return Self::from_epsg(code);
            }
        }

        let projected = upper.trim_start().starts_with("PROJCS");
        if projected {
            if upper.contains("PSEUDO-MERCATOR")
                || upper.contains("MERCATOR_AUXILIARY_SPHERE")
                || upper.contains("POPULAR VISUALISATION")
            {
                return Ok(Self::WebMercator);
            }
            if upper.contains("UTM") && (upper.contains("ZONE_12N") || upper.contains("ZONE 12N")) && upper.contains("WGS") {
                return Ok(Self::Utm12N);
            }
        } else if upper.trim_start().starts_with("GEOGCS") {
            if upper.contains("NORTH_AMERICAN_1983") || upper.contains("NAD83") {
                return Ok(Self::Nad83);
            }
            if upper.contains("WGS_1984") || upper.contains("WGS 84") || upper.contains("WGS84") {
                return Ok(Self::Wgs84);
            }
        }

        Err(CrsError::Unsupported(wkt.chars().take(80).collect()))
    }

    fn coincides_with(self, other: Crs) -> bool {
        self == other || (self.is_geographic() && other.is_geographic())
    }

    /// Coordinate in this reference to geographic lon/lat degrees.
    pub fn unproject(self, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        let out = match self {
            Self::Wgs84 | Self::Nad83 => c,
            Self::WebMercator => {
                let lon = (c.x / WGS84_A).to_degrees();
                let lat = (2.0 * (c.y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
                Coord { x: lon, y: lat }
            }
            Self::Utm12N => utm_inverse(c, UTM_ZONE_12_CENTRAL_MERIDIAN_DEG),
        };
        checked(out, c, self, Crs::Wgs84)
    }

    /// Geographic lon/lat degrees to a coordinate in this reference.
    pub fn project(self, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        if !(-90.0..=90.0).contains(&c.y) {
            return Err(CrsError::Transform {
                x: c.x,
                y: c.y,
                from: Crs::Wgs84,
                to: self,
            });
        }
        let out = match self {
            Self::Wgs84 | Self::Nad83 => c,
            Self::WebMercator => {
                let lat = c.y.clamp(-WEB_MERCATOR_MAX_LAT_DEG, WEB_MERCATOR_MAX_LAT_DEG).to_radians();
                Coord {
                    x: WGS84_A * c.x.to_radians(),
                    y: WGS84_A * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
                }
            }
            Self::Utm12N => utm_forward(c, UTM_ZONE_12_CENTRAL_MERIDIAN_DEG),
        };
        checked(out, c, Crs::Wgs84, self)
    }

    pub fn transform_coord(self, to: Crs, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        if self.coincides_with(to) {
            return checked(c, c, self, to);
        }
        to.project(self.unproject(c)?)
    }
}

fn checked(out: Coord<f64>, input: Coord<f64>, from: Crs, to: Crs) -> Result<Coord<f64>, CrsError> {
    if out.x.is_finite() && out.y.is_finite() {
        Ok(out)
    } else {
        Err(CrsError::Transform {
            x: input.x,
            y: input.y,
            from,
            to,
        })
    }
}

/// Reproject any geometry between two references.
pub fn reproject<G>(geometry: &G, from: Crs, to: Crs) -> Result<G, CrsError>
where
    G: MapCoords<f64, f64, Output = G> + Clone,
{
    if from == to {
        return Ok(geometry.clone());
    }
    geometry.try_map_coords(|c| from.transform_coord(to, c))
}

struct Ellipsoid {
    e2: f64,
    ep2: f64,
}

fn wgs84() -> Ellipsoid {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    Ellipsoid {
        e2,
        ep2: e2 / (1.0 - e2),
    }
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

// Transverse Mercator series (Snyder, USGS PP 1395), northern hemisphere zones.
fn utm_forward(c: Coord<f64>, central_meridian_deg: f64) -> Coord<f64> {
    let Ellipsoid { e2, ep2 } = wgs84();
    let phi = c.y.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let cc = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (c.x - central_meridian_deg).to_radians();
    let m = meridian_arc(phi, e2);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + cc) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * cc - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let y = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * cc + 4.0 * cc * cc) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * cc - 330.0 * ep2) * a.powi(6) / 720.0));

    Coord { x, y }
}

fn utm_inverse(c: Coord<f64>, central_meridian_deg: f64) -> Coord<f64> {
    let Ellipsoid { e2, ep2 } = wgs84();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    let m = c.y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let tan1 = phi1.tan();
    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = (c.x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * tan1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1) * d.powi(6)
                    / 720.0);
    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5) / 120.0)
        / cos1;

    Coord {
        x: central_meridian_deg + lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn parses_codes_urns_and_rejects_unknown() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::Wgs84);
        assert_eq!(Crs::parse("epsg:32612").unwrap(), Crs::Utm12N);
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::3857").unwrap(), Crs::WebMercator);
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84").unwrap(), Crs::Wgs84);
        assert!(matches!(Crs::parse("EPSG:2223"), Err(CrsError::Unsupported(_))));
        assert!(Crs::parse("mercator").is_err());
        assert_eq!(Crs::Nad83.to_string(), "EPSG:4269");
    }

    #[test]
    fn identifies_tiger_prj_as_nad83() {
        let prj = r#"GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(Crs::from_wkt(prj).unwrap(), Crs::Nad83);

        let utm = r#"PROJCS["WGS_1984_UTM_Zone_12N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]],PROJECTION["Transverse_Mercator"]]"#;
        assert_eq!(Crs::from_wkt(utm).unwrap(), Crs::Utm12N);

        let with_authority = r#"GEOGCS["WGS 84",DATUM["WGS_1984"],AUTHORITY["EPSG","4326"]]"#;
        assert_eq!(Crs::from_wkt(with_authority).unwrap(), Crs::Wgs84);
    }

    #[test]
    fn utm_central_meridian_and_equator_are_false_origin() {
        let c = Crs::Utm12N.project(Coord { x: -111.0, y: 0.0 }).unwrap();
        assert!(close(c.x, 500_000.0, 1e-6));
        assert!(close(c.y, 0.0, 1e-6));
    }

    #[test]
    fn utm_round_trips_within_centimetres_across_arizona() {
        for &(lon, lat) in &[(-112.074, 33.448), (-110.974, 32.222), (-111.651, 35.198), (-114.5, 31.4)] {
            let projected = Crs::Wgs84.transform_coord(Crs::Utm12N, Coord { x: lon, y: lat }).unwrap();
            let back = Crs::Utm12N.transform_coord(Crs::Wgs84, projected).unwrap();
            assert!(close(back.x, lon, 1e-7), "lon {lon} -> {}", back.x);
            assert!(close(back.y, lat, 1e-7), "lat {lat} -> {}", back.y);
        }
    }

    #[test]
    fn web_mercator_round_trips() {
        let c = Coord { x: -111.94, y: 33.42 };
        let m = Crs::Wgs84.transform_coord(Crs::WebMercator, c).unwrap();
        assert!(close(m.x, -12_461_103.8, 1.0));
        let back = Crs::WebMercator.transform_coord(Crs::Wgs84, m).unwrap();
        assert!(close(back.x, c.x, 1e-9) && close(back.y, c.y, 1e-9));
    }

    #[test]
    fn geographic_references_pass_through_unchanged() {
        let c = Coord { x: -111.9, y: 33.4 };
        assert_eq!(Crs::Nad83.transform_coord(Crs::Wgs84, c).unwrap(), c);
    }

    #[test]
    fn out_of_range_latitude_is_a_transform_error() {
        let err = Crs::Wgs84
            .transform_coord(Crs::Utm12N, Coord { x: -111.0, y: 95.0 })
            .unwrap_err();
        assert!(matches!(err, CrsError::Transform { .. }));
    }

    #[test]
    fn reprojected_square_has_expected_area() {
        // ~0.001 deg square near Phoenix: ~111 m tall, ~93 m wide.
        let p = polygon![
            (x: -112.074, y: 33.448), (x: -112.073, y: 33.448), (x: -112.073, y: 33.449), (x: -112.074, y: 33.449)
        ];
        let utm = reproject(&p, Crs::Wgs84, Crs::Utm12N).unwrap();
        let area = utm.unsigned_area();
        assert!(close(area, 10_306.6, 5.0), "area {area}");
    }
}
