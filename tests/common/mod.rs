//! Helpers shared by the integration tests: synthetic las tiles on disk.

use laspipe::io::las::LasWriter;
use laspipe::{Crs, Header, Point, Schema, Signature, Transform, Vector};
use std::path::Path;

/// Writes a square tile of `n x n` points on a unit grid starting at
/// `(x0, y0)`, with z equal to the row index and intensity to the column.
pub fn write_tile(path: &Path, x0: f64, y0: f64, n: usize) {
    let mut header = Header::default();
    header.signature = Signature::Lasf;
    header.crs = Crs::from_epsg(32633);
    header.date = chrono::NaiveDate::from_ymd_opt(2022, 5, 15);
    header.transforms = Vector::new(
        Transform { scale: 0.01, offset: 0.0 },
        Transform { scale: 0.01, offset: 0.0 },
        Transform { scale: 0.01, offset: 0.0 },
    );
    let mut schema = Schema::core_scaled(0.01, 0.01, 0.01, 0.0, 0.0, 0.0);
    schema.add_attribute(laspipe::Attribute::new(
        "Intensity",
        laspipe::AttributeType::Uint16,
    ));
    header.schema = schema;

    let mut writer = LasWriter::from_path(path, &header).expect("tile is writable");
    let mut point = Point::new(&header.schema);
    for row in 0..n {
        for column in 0..n {
            point.set_x(x0 + column as f64 + 0.5);
            point.set_y(y0 + row as f64 + 0.5);
            point.set_z(row as f64);
            point.set_value("Intensity", column as f64);
            writer.write_point(&point.as_ref()).expect("point is writable");
        }
    }
    writer.close().expect("tile closes cleanly");
}
