//! Virtual point clouds: STAC-shaped JSON manifests describing a collection
//! of point-cloud files by bounding box, CRS and point count.
//!
//! Reading resolves each feature's asset href relative to the manifest and
//! yields one [Header] per file without touching the data files (unless a
//! feature omits `proj:bbox`, in which case the referenced file is opened).
//! Writing emits one feature per retained file with the `pointcloud` and
//! `projection` STAC extensions, the bbox corners reprojected to WGS84 when
//! the CRS allows it.

use crate::{Bounds, Crs, Error, Header, Result, Signature};
use chrono::{Duration, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

const STAC_VERSION: &str = "1.0.0";
const EXTENSIONS: [&str; 2] = [
    "https://stac-extensions.github.io/pointcloud/v1.0.0/schema.json",
    "https://stac-extensions.github.io/projection/v1.1.0/schema.json",
];

// Adjusted standard GPS time is standard GPS time minus one billion seconds.
const GPS_OFFSET_SECONDS: i64 = 1_000_000_000;

/// A parsed or assembled manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VirtualPointCloud {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<Feature>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: Option<String>,
    stac_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stac_extensions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<Vec<f64>>,
    properties: Option<Properties>,
    #[serde(default)]
    links: Vec<serde_json::Value>,
    assets: Option<BTreeMap<String, Asset>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Properties {
    #[serde(skip_serializing_if = "Option::is_none")]
    datetime: Option<String>,
    #[serde(rename = "pc:count", skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(rename = "pc:type", skip_serializing_if = "Option::is_none")]
    pc_type: Option<String>,
    #[serde(rename = "index:indexed", skip_serializing_if = "Option::is_none")]
    indexed: Option<bool>,
    #[serde(rename = "proj:bbox", skip_serializing_if = "Option::is_none")]
    proj_bbox: Option<Vec<f64>>,
    #[serde(rename = "proj:wkt2", skip_serializing_if = "Option::is_none")]
    wkt2: Option<String>,
    #[serde(rename = "proj:epsg", skip_serializing_if = "Option::is_none")]
    epsg: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Asset {
    href: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roles: Vec<String>,
}

impl VirtualPointCloud {
    /// Parses a manifest file.
    pub fn from_path(path: &Path) -> Result<VirtualPointCloud> {
        let content = std::fs::read_to_string(path)?;
        let vpc: VirtualPointCloud = serde_json::from_str(&content)?;
        if vpc.kind != "FeatureCollection" {
            return Err(Error::MalformedVpc(
                "the input file is not a virtual point cloud file".to_string(),
            ));
        }
        Ok(vpc)
    }

    /// The number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Is the manifest empty?
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Resolves every feature into a file path and a header.
    ///
    /// `base` is the manifest's directory, used to resolve relative hrefs.
    /// Features without `proj:bbox` fall back to opening the referenced
    /// file.
    pub fn entries(&self, base: &Path) -> Result<Vec<(PathBuf, Header)>> {
        let mut entries = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            let (Some(kind), Some(stac_version), Some(assets), Some(properties)) = (
                &feature.kind,
                &feature.stac_version,
                &feature.assets,
                &feature.properties,
            ) else {
                return Err(Error::MalformedVpc("missing properties".to_string()));
            };
            if kind != "Feature" {
                return Err(Error::MalformedVpc(
                    "'type' is not equal to 'Feature'".to_string(),
                ));
            }
            if assets.is_empty() {
                return Err(Error::MalformedVpc("empty 'assets'".to_string()));
            }
            if stac_version != STAC_VERSION {
                return Err(Error::UnsupportedStacVersion(stac_version.clone()));
            }

            let href = &assets.values().next().unwrap().href;
            let path = normalize(&base.join(href));

            let mut crs = Crs::default();
            if let Some(epsg) = properties.epsg {
                crs = Crs::from_epsg(epsg);
            }
            if let Some(wkt) = &properties.wkt2 {
                crs = Crs::from_wkt(wkt.clone());
            }

            let Some(proj_bbox) = &properties.proj_bbox else {
                // no bbox recorded: read it from the file itself
                let mut header = crate::io::open_header(&path)?;
                header.crs = crs;
                entries.push((path, header));
                continue;
            };

            let count = properties
                .count
                .ok_or_else(|| Error::MalformedVpc("missing 'pc:count'".to_string()))?;

            let bounds = match proj_bbox.len() {
                4 => Bounds::new(proj_bbox[0], proj_bbox[1], 0.0, proj_bbox[2], proj_bbox[3], 0.0),
                6 => Bounds::new(
                    proj_bbox[0],
                    proj_bbox[1],
                    proj_bbox[2],
                    proj_bbox[3],
                    proj_bbox[4],
                    proj_bbox[5],
                ),
                _ => {
                    return Err(Error::MalformedVpc(
                        "proj:bbox should be 2D or 3D".to_string(),
                    ));
                }
            };

            let mut header = Header::default();
            header.signature = Signature::Lasf;
            header.bounds = bounds;
            header.number_of_points = count;
            header.spatial_index = properties.indexed.unwrap_or(false);
            header.crs = crs;
            entries.push((path, header));
        }
        Ok(entries)
    }

    /// Assembles a manifest for a set of files.
    ///
    /// `manifest_path` is where the manifest will live; hrefs are written
    /// relative to it unless `absolute_path`. With `use_gpstime`, the
    /// feature datetime comes from the first point's GPS time when it is
    /// usable, falling back to the creation date with a warning otherwise.
    pub fn build(
        manifest_path: &Path,
        files: &[PathBuf],
        headers: &[Header],
        crs: &Crs,
        absolute_path: bool,
        use_gpstime: bool,
    ) -> Result<VirtualPointCloud> {
        if !crs.is_valid() {
            return Err(Error::InvalidCrs);
        }
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));

        let mut features = Vec::with_capacity(files.len());
        for (file, header) in files.iter().zip(headers) {
            let href = if absolute_path {
                slashed(file)
            } else {
                match relative_to(file, base) {
                    Some(relative) => format!("./{}", slashed(&relative)),
                    None => slashed(file),
                }
            };

            let bounds = &header.bounds;
            let corners = wgs84_corners(bounds, crs).unwrap_or_else(|| {
                warn!(
                    "no WGS84 transformation available for this CRS, writing untransformed corners"
                );
                [
                    (bounds.min.x, bounds.min.y),
                    (bounds.max.x, bounds.min.y),
                    (bounds.max.x, bounds.max.y),
                    (bounds.min.x, bounds.max.y),
                ]
            });
            let ring = vec![
                [corners[0].0, corners[0].1],
                [corners[1].0, corners[1].1],
                [corners[2].0, corners[2].1],
                [corners[3].0, corners[3].1],
                [corners[0].0, corners[0].1],
            ];
            let bbox = vec![
                corners[0].0.min(corners[3].0),
                corners[0].1.min(corners[1].1),
                bounds.min.z,
                corners[1].0.max(corners[2].0),
                corners[2].1.max(corners[3].1),
                bounds.max.z,
            ];

            features.push(Feature {
                kind: Some("Feature".to_string()),
                stac_version: Some(STAC_VERSION.to_string()),
                stac_extensions: EXTENSIONS.iter().map(|e| e.to_string()).collect(),
                id: Some(
                    file.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ),
                geometry: Some(Geometry {
                    kind: "Polygon".to_string(),
                    coordinates: vec![ring],
                }),
                bbox: Some(bbox),
                properties: Some(Properties {
                    datetime: Some(feature_datetime(header, use_gpstime)),
                    count: Some(header.number_of_points),
                    pc_type: Some("lidar".to_string()),
                    indexed: header.spatial_index.then_some(true),
                    proj_bbox: Some(vec![bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y]),
                    wkt2: crs.wkt().map(str::to_string),
                    epsg: crs.epsg(),
                }),
                links: Vec::new(),
                assets: Some(BTreeMap::from([(
                    "data".to_string(),
                    Asset {
                        href,
                        roles: vec!["data".to_string()],
                    },
                )])),
            });
        }

        Ok(VirtualPointCloud {
            kind: "FeatureCollection".to_string(),
            features,
        })
    }

    /// Writes the manifest, pretty-printed.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// The datetime attached to a feature, per the GPS-time fallback rules.
fn feature_datetime(header: &Header, use_gpstime: bool) -> String {
    if use_gpstime {
        if !header.adjusted_standard_gps_time {
            warn!(
                "the GPS time is not recorded as adjusted standard GPS time, \
                 cannot use it to assign a date"
            );
        } else {
            match header.gps_time {
                Some(gps_time) if gps_time != 0.0 => {
                    let gps_epoch = Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).unwrap();
                    let seconds = gps_time as i64 + GPS_OFFSET_SECONDS;
                    let datetime = gps_epoch + Duration::seconds(seconds);
                    return datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string();
                }
                _ => {
                    warn!(
                        "the GPS time of the first point is 0, \
                         cannot use it to assign a date"
                    );
                }
            }
        }
    }

    match header.date {
        Some(date) => format!("{}T00:00:00Z", date.format("%Y-%m-%d")),
        None => "0-01-01T00:00:00Z".to_string(),
    }
}

/// The bbox corners A, B, C, D (counter-clockwise from the lower-left) in
/// WGS84 degrees, when a proj-string can be derived for the source CRS.
fn wgs84_corners(bounds: &Bounds, crs: &Crs) -> Option<[(f64, f64); 4]> {
    let proj_string = crs.proj_string()?;
    let source = proj4rs::Proj::from_proj_string(&proj_string).ok()?;
    let target = proj4rs::Proj::from_proj_string("+proj=longlat +datum=WGS84 +no_defs").ok()?;

    let mut corners = [
        (bounds.min.x, bounds.min.y, 0.0),
        (bounds.max.x, bounds.min.y, 0.0),
        (bounds.max.x, bounds.max.y, 0.0),
        (bounds.min.x, bounds.max.y, 0.0),
    ];
    for corner in &mut corners {
        proj4rs::transform::transform(&source, &target, corner).ok()?;
        corner.0 = corner.0.to_degrees();
        corner.1 = corner.1.to_degrees();
    }
    Some([
        (corners[0].0, corners[0].1),
        (corners[1].0, corners[1].1),
        (corners[2].0, corners[2].1),
        (corners[3].0, corners[3].1),
    ])
}

fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// Lexical normalization: resolves `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

// A lexical relative path from `base` to `path`, or None when they share no
// prefix worth using.
fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let path = normalize(path);
    let base = normalize(base);
    if let Ok(stripped) = path.strip_prefix(&base) {
        return Some(stripped.to_path_buf());
    }
    None
}
