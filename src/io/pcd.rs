//! Point-cloud-data (pcd) reading and writing.
//!
//! The dialect understood here is the classic header (`VERSION`, `FIELDS`,
//! `SIZE`, `TYPE`, `COUNT`, `WIDTH`, `HEIGHT`, `VIEWPOINT`, `POINTS`,
//! `DATA`) with `ascii` or `binary` payloads. At least three fields are
//! required and the first three must be x, y and z, in either case.
//!
//! A pcd header carries no bounding box, which the chunk planner cannot live
//! without. A sidecar `.bbox` file (space-separated
//! `xmin ymin zmin xmax ymax zmax`) is read when present; otherwise the
//! bounds are computed by scanning the points once and the sidecar is
//! written back for the next open.

use crate::{
    Accessor, Attribute, AttributeType, Error, Header, Point, Result, Schema, Signature,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

fn bad(path: &Path, message: impl std::fmt::Display) -> Error {
    Error::InvalidPcdFile(format!("{}: {}", path.display(), message))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Payload {
    Ascii,
    Binary,
}

#[derive(Clone, Debug)]
struct PcdLayout {
    fields: Vec<(String, AttributeType)>,
    payload: Payload,
    npoints: u64,
}

fn attribute_type(type_tag: &str, size: usize) -> Option<AttributeType> {
    use AttributeType::*;
    match (type_tag, size) {
        ("I", 1) => Some(Int8),
        ("I", 2) => Some(Int16),
        ("I", 4) => Some(Int32),
        ("I", 8) => Some(Int64),
        ("U", 1) => Some(Uint8),
        ("U", 2) => Some(Uint16),
        ("U", 4) => Some(Uint32),
        ("U", 8) => Some(Uint64),
        ("F", 4) => Some(Float),
        ("F", 8) => Some(Double),
        _ => None,
    }
}

fn read_layout<R: BufRead>(read: &mut R, path: &Path) -> Result<PcdLayout> {
    let mut fields: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut types: Vec<String> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut npoints: u64 = 0;
    let mut payload = None;

    let mut line = String::new();
    while payload.is_none() {
        line.clear();
        if read.read_line(&mut line)? == 0 {
            return Err(bad(path, "truncated header"));
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let key = tokens.next().unwrap_or_default();
        match key {
            "VERSION" => {}
            "FIELDS" => fields = tokens.map(str::to_string).collect(),
            "SIZE" => {
                sizes = tokens
                    .map(|t| t.parse().map_err(|_| bad(path, "bad SIZE")))
                    .collect::<Result<_>>()?
            }
            "TYPE" => types = tokens.map(str::to_string).collect(),
            "COUNT" => {
                counts = tokens
                    .map(|t| t.parse().map_err(|_| bad(path, "bad COUNT")))
                    .collect::<Result<_>>()?
            }
            "WIDTH" | "POINTS" => {
                npoints = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| bad(path, format!("bad {key}")))?
            }
            "HEIGHT" | "VIEWPOINT" => {}
            "DATA" => match tokens.next() {
                Some("ascii") => payload = Some(Payload::Ascii),
                Some("binary") => payload = Some(Payload::Binary),
                other => {
                    return Err(bad(
                        path,
                        format!("unsupported data format: {}", other.unwrap_or("")),
                    ));
                }
            },
            other => return Err(bad(path, format!("unknown header key: {other}"))),
        }
    }

    if fields.len() < 3 {
        return Err(bad(path, "the file must have at least 3 fields"));
    }
    for (index, expected) in ["x", "y", "z"].iter().enumerate() {
        let field = &fields[index];
        if !field.eq_ignore_ascii_case(expected) {
            return Err(bad(
                path,
                format!("field {} must be '{}' not '{}'", index + 1, expected, field),
            ));
        }
    }
    if sizes.len() != fields.len() || types.len() != fields.len() {
        return Err(bad(path, "FIELDS, SIZE and TYPE lengths differ"));
    }
    if counts.iter().any(|&count| count != 1) {
        return Err(bad(path, "COUNT above 1 is not supported"));
    }

    let mut typed = Vec::with_capacity(fields.len());
    for ((field, size), type_tag) in fields.iter().zip(&sizes).zip(&types) {
        let data_type = attribute_type(type_tag, *size)
            .ok_or_else(|| bad(path, format!("unsupported data type {type_tag}{size}")))?;
        typed.push((Schema::normalize_name(field).to_string(), data_type));
    }

    Ok(PcdLayout {
        fields: typed,
        payload: payload.unwrap(),
        npoints,
    })
}

fn schema_from_layout(layout: &PcdLayout) -> Schema {
    // x, y and z become the scaled core coordinates; everything else keeps
    // its native type
    let mut schema = Schema::core();
    for (name, data_type) in layout.fields.iter().skip(3) {
        schema.add_attribute(Attribute::new(name.clone(), *data_type));
    }
    schema
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("bbox")
}

/// Reads a pcd header without keeping the file open.
///
/// Computes and persists the `.bbox` sidecar when missing.
pub fn read_header(path: &Path) -> Result<Header> {
    let mut reader = PcdReader::from_path(path)?;
    let mut header = reader.header().clone();

    let sidecar = sidecar_path(path);
    let mut from_sidecar = false;
    if let Ok(content) = std::fs::read_to_string(&sidecar) {
        let values: Vec<f64> = content
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        if values.len() == 6 {
            header.bounds =
                crate::Bounds::new(values[0], values[1], values[2], values[3], values[4], values[5]);
            from_sidecar = true;
        }
    }

    if !from_sidecar {
        let mut bounds = crate::Bounds::default();
        let mut point = Point::new(&header.schema.clone());
        while reader.read_into(&mut point)? {
            bounds.grow(point.x(), point.y(), point.z());
        }
        header.bounds = bounds;
        let b = &bounds;
        if let Err(error) = std::fs::write(
            &sidecar,
            format!(
                "{:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
                b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z
            ),
        ) {
            warn!("could not write {}: {error}", sidecar.display());
        }
    }

    Ok(header)
}

/// Reads points from one pcd file.
#[derive(Debug)]
pub struct PcdReader {
    read: BufReader<File>,
    header: Header,
    layout: PcdLayout,
    accessors: Vec<Accessor>,
    index: u64,
}

impl PcdReader {
    /// Opens a pcd file and parses its header.
    pub fn from_path(path: &Path) -> Result<PcdReader> {
        let mut read = BufReader::new(File::open(path)?);
        let layout = read_layout(&mut read, path)?;

        let mut header = Header::default();
        header.signature = Signature::Pcdf;
        header.number_of_points = layout.npoints;
        header.schema = schema_from_layout(&layout);

        let accessors = layout
            .fields
            .iter()
            .map(|(name, _)| Accessor::new(name.clone()))
            .collect();

        Ok(PcdReader {
            read,
            header,
            layout,
            accessors,
            index: 0,
        })
    }

    /// The header of the file being read.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Reads the next point, mapping fields by name; false at the end.
    pub fn read_into(&mut self, point: &mut Point) -> Result<bool> {
        if self.index >= self.layout.npoints {
            return Ok(false);
        }
        self.index += 1;
        point.zero();

        match self.layout.payload {
            Payload::Binary => {
                for (accessor, (_, data_type)) in
                    self.accessors.iter_mut().zip(&self.layout.fields)
                {
                    use AttributeType::*;
                    let read = &mut self.read;
                    let value = match data_type {
                        Int8 => f64::from(read.read_i8()?),
                        Int16 => f64::from(read.read_i16::<LittleEndian>()?),
                        Int32 => f64::from(read.read_i32::<LittleEndian>()?),
                        Int64 => read.read_i64::<LittleEndian>()? as f64,
                        Uint8 => f64::from(read.read_u8()?),
                        Uint16 => f64::from(read.read_u16::<LittleEndian>()?),
                        Uint32 => f64::from(read.read_u32::<LittleEndian>()?),
                        Uint64 => read.read_u64::<LittleEndian>()? as f64,
                        Float => f64::from(read.read_f32::<LittleEndian>()?),
                        Double => read.read_f64::<LittleEndian>()?,
                        Bit => 0.0,
                    };
                    accessor.set(point, value);
                }
            }
            Payload::Ascii => {
                let mut line = String::new();
                loop {
                    line.clear();
                    if self.read.read_line(&mut line)? == 0 {
                        return Ok(false);
                    }
                    if !line.trim().is_empty() {
                        break;
                    }
                }
                for (token, accessor) in line.split_whitespace().zip(&mut self.accessors) {
                    let value: f64 = token
                        .parse()
                        .map_err(|_| Error::InvalidPcdFile(format!("bad value '{token}'")))?;
                    accessor.set(point, value);
                }
            }
        }

        Ok(true)
    }
}

/// Writes one pcd file, binary by default.
///
/// The `WIDTH` and `POINTS` lines are written as fixed-width placeholders
/// and patched with the final count on [close](PcdWriter::close).
#[derive(Debug)]
pub struct PcdWriter {
    write: Option<BufWriter<File>>,
    fields: Vec<(String, AttributeType)>,
    accessors: Vec<Accessor>,
    binary: bool,
    count: u64,
    width_position: u64,
    points_position: u64,
}

const COUNT_WIDTH: usize = 12;

impl PcdWriter {
    /// Creates a pcd file for the attributes of the schema.
    ///
    /// Bit attributes have no pcd representation and are skipped with a
    /// warning; the flags byte is engine state and never written.
    pub fn from_path(path: &Path, schema: &Schema, binary: bool) -> Result<PcdWriter> {
        let mut fields = Vec::new();
        for attribute in schema.attributes() {
            if attribute.name == "flags" {
                continue;
            }
            if attribute.data_type == AttributeType::Bit {
                warn!("bit attribute {} has no pcd representation", attribute.name);
                continue;
            }
            // pcd has no scale/offset concept, so scaled integers (the
            // coordinates among them) are stored as logical doubles
            let data_type = if attribute.scale_factor != 1.0 || attribute.value_offset != 0.0 {
                AttributeType::Double
            } else {
                attribute.data_type
            };
            fields.push((attribute.name.clone(), data_type));
        }

        let mut write = BufWriter::new(File::create(path)?);
        writeln!(write, "# .PCD v0.7 - Point Cloud Data file format")?;
        writeln!(write, "VERSION 0.7")?;
        let names: Vec<&str> = fields
            .iter()
            .map(|(name, _)| match name.as_str() {
                "X" => "x",
                "Y" => "y",
                "Z" => "z",
                other => other,
            })
            .collect();
        writeln!(write, "FIELDS {}", names.join(" "))?;
        let sizes: Vec<String> = fields
            .iter()
            .map(|(_, data_type)| data_type.size().to_string())
            .collect();
        writeln!(write, "SIZE {}", sizes.join(" "))?;
        let types: Vec<&str> = fields
            .iter()
            .map(|(_, data_type)| {
                use AttributeType::*;
                match data_type {
                    Float | Double => "F",
                    Uint8 | Uint16 | Uint32 | Uint64 => "U",
                    _ => "I",
                }
            })
            .collect();
        writeln!(write, "TYPE {}", types.join(" "))?;
        let counts = vec!["1"; fields.len()];
        writeln!(write, "COUNT {}", counts.join(" "))?;

        write.flush()?;
        let width_position = write.get_ref().stream_position()? + 6;
        writeln!(write, "WIDTH {:>COUNT_WIDTH$}", 0)?;
        writeln!(write, "HEIGHT 1")?;
        writeln!(write, "VIEWPOINT 0 0 0 1 0 0 0")?;
        write.flush()?;
        let points_position = write.get_ref().stream_position()? + 7;
        writeln!(write, "POINTS {:>COUNT_WIDTH$}", 0)?;
        writeln!(write, "DATA {}", if binary { "binary" } else { "ascii" })?;

        let accessors = fields
            .iter()
            .map(|(name, _)| Accessor::new(name.clone()))
            .collect();

        Ok(PcdWriter {
            write: Some(write),
            fields,
            accessors,
            binary,
            count: 0,
            width_position,
            points_position,
        })
    }

    /// The number of points written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes one point.
    pub fn write_point(&mut self, point: &crate::PointRef) -> Result<()> {
        let Some(write) = self.write.as_mut() else {
            return Err(Error::Io(std::io::Error::other("the writer is closed")));
        };
        self.count += 1;

        if self.binary {
            for (accessor, (_, data_type)) in self.accessors.iter_mut().zip(&self.fields) {
                use AttributeType::*;
                let value = accessor.get(point);
                match data_type {
                    Int8 => write.write_i8(value as i8)?,
                    Int16 => write.write_i16::<LittleEndian>(value as i16)?,
                    Int32 => write.write_i32::<LittleEndian>(value as i32)?,
                    Int64 => write.write_i64::<LittleEndian>(value as i64)?,
                    Uint8 => write.write_u8(value as u8)?,
                    Uint16 => write.write_u16::<LittleEndian>(value as u16)?,
                    Uint32 => write.write_u32::<LittleEndian>(value as u32)?,
                    Uint64 => write.write_u64::<LittleEndian>(value as u64)?,
                    Float => write.write_f32::<LittleEndian>(value as f32)?,
                    Double => write.write_f64::<LittleEndian>(value)?,
                    Bit => {}
                }
            }
        } else {
            let values: Vec<String> = self
                .accessors
                .iter_mut()
                .zip(&self.fields)
                .map(|(accessor, (_, data_type))| {
                    use AttributeType::*;
                    let value = accessor.get(point);
                    match data_type {
                        Float | Double => format!("{value}"),
                        _ => format!("{}", value as i64),
                    }
                })
                .collect();
            writeln!(write, "{}", values.join(" "))?;
        }

        Ok(())
    }

    /// Patches the point count into the header and closes the file.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut write) = self.write.take() else {
            return Ok(());
        };
        write.flush()?;
        let file = write.get_mut();
        for position in [self.width_position, self.points_position] {
            file.seek(SeekFrom::Start(position))?;
            write!(file, "{:>COUNT_WIDTH$}", self.count)?;
        }
        file.flush()?;
        Ok(())
    }
}

impl Drop for PcdWriter {
    fn drop(&mut self) {
        if self.write.is_some() {
            if let Err(error) = self.close() {
                log::error!("could not finalize the pcd header on drop: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema() -> Schema {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        schema
    }

    fn round_trip(binary: bool) {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("points.pcd");
        let schema = schema();

        let mut writer = PcdWriter::from_path(&path, &schema, binary).unwrap();
        let mut point = Point::new(&schema);
        for i in 0..5 {
            point.zero();
            point.set_x(f64::from(i));
            point.set_y(f64::from(i) * 2.0);
            point.set_z(0.5);
            point.set_value("Intensity", f64::from(i) * 10.0);
            writer.write_point(&point.as_ref()).unwrap();
        }
        writer.close().unwrap();

        let mut reader = PcdReader::from_path(&path).unwrap();
        assert_eq!(5, reader.header().number_of_points);
        let mut read_back = Point::new(&reader.header().schema.clone());
        let mut count = 0;
        while reader.read_into(&mut read_back).unwrap() {
            assert_eq!(f64::from(count) * 2.0, read_back.y());
            assert_eq!(Some(f64::from(count) * 10.0), read_back.value("Intensity"));
            count += 1;
        }
        assert_eq!(5, count);
    }

    #[test]
    fn binary_round_trip() {
        round_trip(true);
    }

    #[test]
    fn ascii_round_trip() {
        round_trip(false);
    }

    #[test]
    fn sidecar_bbox_is_written_once() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("points.pcd");
        let schema = schema();
        let mut writer = PcdWriter::from_path(&path, &schema, true).unwrap();
        let mut point = Point::new(&schema);
        point.set_x(4.0);
        point.set_y(5.0);
        point.set_z(6.0);
        writer.write_point(&point.as_ref()).unwrap();
        writer.close().unwrap();

        let header = read_header(&path).unwrap();
        assert!(path.with_extension("bbox").exists());
        assert_eq!(4.0, header.bounds.min.x);
        // second open goes through the sidecar
        let header = read_header(&path).unwrap();
        assert_eq!(5.0, header.bounds.max.y);
    }

    #[test]
    fn rejects_wrong_leading_fields() {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("bad.pcd");
        std::fs::write(
            &path,
            "VERSION 0.7\nFIELDS a y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 0\nHEIGHT 1\nPOINTS 0\nDATA ascii\n",
        )
        .unwrap();
        assert!(matches!(
            PcdReader::from_path(&path),
            Err(Error::InvalidPcdFile(_))
        ));
    }
}
