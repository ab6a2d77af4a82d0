//! File-level metadata shared by every input format.

use crate::{Bounds, Crs, Schema, Transform, Vector};
use chrono::NaiveDate;
use uuid::Uuid;

/// The format class a header came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Signature {
    /// A native las/laz file.
    #[default]
    Lasf,
    /// A point-cloud-data file.
    Pcdf,
    /// An in-memory frame, e.g. a point cloud built from a raster.
    Frame,
}

impl Signature {
    /// The four-character tag used in file headers and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signature::Lasf => "LASF",
            Signature::Pcdf => "PCDF",
            Signature::Frame => "FRAME",
        }
    }
}

/// Metadata describing the layout, extent and provenance of a point set.
///
/// A header is produced by opening a file (without reading its points) or by
/// a reader stage synthesizing the per-chunk schema. After bulk mutations,
/// [PointCloud::update_header](crate::PointCloud::update_header) recomputes
/// the bounds and the live point count so downstream stages see accurate
/// metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// The format class discriminator.
    pub signature: Signature,

    /// Format version, when the source file carries one.
    pub version: (u8, u8),

    /// Globally unique identifier of the source file.
    pub guid: Uuid,

    /// The extent of the points.
    pub bounds: Bounds,

    /// The number of point records.
    ///
    /// After soft deletions this tracks the *live* count, which can be
    /// smaller than the number of records held in memory.
    pub number_of_points: u64,

    /// The per-point byte layout.
    pub schema: Schema,

    /// The coordinate reference system.
    pub crs: Crs,

    /// Per-axis scale and offset for integer-coded coordinates.
    pub transforms: Vector<Transform>,

    /// The file creation date.
    pub date: Option<NaiveDate>,

    /// GPS time of the first point, when the format records one.
    pub gps_time: Option<f64>,

    /// Is GPS time adjusted standard GPS time (as opposed to GPS week time)?
    pub adjusted_standard_gps_time: bool,

    /// Does the on-disk file carry a spatial index companion?
    pub spatial_index: bool,
}

impl Header {
    /// The xy area covered by the header bounds.
    pub fn area(&self) -> f64 {
        self.bounds.area()
    }

    /// Points per square unit of coverage.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::{Bounds, Header};
    /// let mut header = Header::default();
    /// header.bounds = Bounds::new(0.0, 0.0, 0.0, 100.0, 100.0, 0.0);
    /// header.number_of_points = 50_000;
    /// assert_eq!(5.0, header.density());
    /// ```
    pub fn density(&self) -> f64 {
        self.number_of_points as f64 / self.area()
    }

    /// Appends an attribute to the schema.
    pub fn add_attribute(&mut self, attribute: crate::Attribute) {
        self.schema.add_attribute(attribute);
    }

    /// The creation date as `(year, day of year)`, when known.
    pub fn creation_day(&self) -> Option<(i32, u32)> {
        use chrono::Datelike;
        self.date.map(|date| (date.year(), date.ordinal()))
    }
}

impl Default for Header {
    fn default() -> Header {
        let transforms = Vector::new(
            Transform::default(),
            Transform::default(),
            Transform::default(),
        );
        Header {
            signature: Signature::Frame,
            version: (0, 0),
            guid: Uuid::nil(),
            bounds: Bounds::default(),
            number_of_points: 0,
            schema: Schema::core(),
            crs: Crs::default(),
            transforms,
            date: None,
            gps_time: None,
            adjusted_standard_gps_time: false,
            spatial_index: false,
        }
    }
}
