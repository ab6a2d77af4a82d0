//! Uncompressed las reading and writing.
//!
//! Supports las 1.0–1.4 headers and point formats 0–8 (formats 4, 5, 9 and
//! 10 read their core fields; waveform packets are skipped). The reader maps
//! records onto the engine schema through accessors, so points can land in a
//! schema synthesized from a different file of the same collection. The
//! writer picks the smallest point format that carries the schema's
//! attributes and rewrites the header on close, like every well-behaved las
//! producer.

use crate::{
    Accessor, Attribute, AttributeType, Crs, Error, Header, Point, Result, Schema, Signature,
    Transform, Vector,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::NaiveDate;
use log::warn;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};
use uuid::Uuid;

const HEADER_SIZE_12: u16 = 227;
const HEADER_SIZE_14: u16 = 375;

const COMPRESSION_BIT: u8 = 0x80;

fn closed_writer() -> Error {
    Error::Io(std::io::Error::other("the writer is closed"))
}

// record offset of the gps time field, used to peek the first point's time
const GPS_OFFSET_LEGACY: u64 = 20;
const GPS_OFFSET_EXTENDED: u64 = 22;

/// Parsed layout of one point record.
#[derive(Clone, Copy, Debug)]
pub struct PointLayout {
    /// The point data record format, compression bit stripped.
    pub format: u8,
    /// The record length from the header.
    pub record_length: u16,
}

impl PointLayout {
    /// Formats 6–10 use the extended record layout.
    pub fn is_extended(&self) -> bool {
        self.format >= 6
    }

    /// Does this format carry gps time?
    pub fn has_gps_time(&self) -> bool {
        matches!(self.format, 1 | 3 | 4 | 5) || self.is_extended()
    }

    /// Does this format carry color?
    pub fn has_color(&self) -> bool {
        matches!(self.format, 2 | 3 | 5 | 7 | 8 | 10)
    }

    /// Does this format carry a near-infrared channel?
    pub fn has_nir(&self) -> bool {
        matches!(self.format, 8 | 10)
    }

    /// The standard length of this format, without extra bytes.
    pub fn standard_length(&self) -> u16 {
        let mut length = if self.is_extended() { 30 } else { 20 };
        if !self.is_extended() && self.has_gps_time() {
            length += 8;
        }
        if self.has_color() {
            length += 6;
        }
        if self.has_nir() {
            length += 2;
        }
        // waveform packet descriptors
        if matches!(self.format, 4 | 5 | 9 | 10) {
            length += 29;
        }
        length
    }
}

#[derive(Debug)]
struct RawInfo {
    header: Header,
    layout: PointLayout,
    header_size: u16,
    offset_to_point_data: u32,
    number_of_vlrs: u32,
}

fn read_raw_header<R: Read>(read: &mut R, path: &Path) -> Result<RawInfo> {
    let mut signature = [0_u8; 4];
    read.read_exact(&mut signature)?;
    if &signature != b"LASF" {
        return Err(Error::InvalidLasFile(format!(
            "{}: bad file signature",
            path.display()
        )));
    }

    let _file_source_id = read.read_u16::<LittleEndian>()?;
    let global_encoding = read.read_u16::<LittleEndian>()?;
    let mut guid = [0_u8; 16];
    read.read_exact(&mut guid)?;
    let version = (read.read_u8()?, read.read_u8()?);
    let mut skip = [0_u8; 64];
    read.read_exact(&mut skip)?; // system identifier + generating software
    let file_creation_day = read.read_u16::<LittleEndian>()?;
    let file_creation_year = read.read_u16::<LittleEndian>()?;
    let header_size = read.read_u16::<LittleEndian>()?;
    let offset_to_point_data = read.read_u32::<LittleEndian>()?;
    let number_of_vlrs = read.read_u32::<LittleEndian>()?;
    let point_data_format = read.read_u8()?;
    let record_length = read.read_u16::<LittleEndian>()?;
    let legacy_number_of_points = read.read_u32::<LittleEndian>()?;
    for _ in 0..5 {
        let _ = read.read_u32::<LittleEndian>()?;
    }
    let x_scale = read.read_f64::<LittleEndian>()?;
    let y_scale = read.read_f64::<LittleEndian>()?;
    let z_scale = read.read_f64::<LittleEndian>()?;
    let x_offset = read.read_f64::<LittleEndian>()?;
    let y_offset = read.read_f64::<LittleEndian>()?;
    let z_offset = read.read_f64::<LittleEndian>()?;
    let max_x = read.read_f64::<LittleEndian>()?;
    let min_x = read.read_f64::<LittleEndian>()?;
    let max_y = read.read_f64::<LittleEndian>()?;
    let min_y = read.read_f64::<LittleEndian>()?;
    let max_z = read.read_f64::<LittleEndian>()?;
    let min_z = read.read_f64::<LittleEndian>()?;

    let mut number_of_points = u64::from(legacy_number_of_points);
    if version >= (1, 3) {
        let _start_of_waveform = read.read_u64::<LittleEndian>()?;
    }
    if version >= (1, 4) {
        let _start_of_first_evlr = read.read_u64::<LittleEndian>()?;
        let _number_of_evlrs = read.read_u32::<LittleEndian>()?;
        let extended_number_of_points = read.read_u64::<LittleEndian>()?;
        for _ in 0..15 {
            let _ = read.read_u64::<LittleEndian>()?;
        }
        if extended_number_of_points > 0 {
            number_of_points = extended_number_of_points;
        }
    }

    let layout = PointLayout {
        format: point_data_format & !COMPRESSION_BIT,
        record_length,
    };

    let mut header = Header {
        signature: Signature::Lasf,
        version,
        guid: Uuid::from_bytes_le(guid),
        number_of_points,
        transforms: Vector::new(
            Transform { scale: x_scale, offset: x_offset },
            Transform { scale: y_scale, offset: y_offset },
            Transform { scale: z_scale, offset: z_offset },
        ),
        date: NaiveDate::from_yo_opt(i32::from(file_creation_year), u32::from(file_creation_day)),
        adjusted_standard_gps_time: global_encoding & 1 == 1,
        ..Default::default()
    };
    header.bounds = crate::Bounds::new(min_x, min_y, min_z, max_x, max_y, max_z);
    header.schema = schema_from_layout(&header, &layout);
    Ok(RawInfo {
        header,
        layout,
        header_size,
        offset_to_point_data,
        number_of_vlrs,
    })
}

/// Builds the engine schema matching a las point format.
fn schema_from_layout(header: &Header, layout: &PointLayout) -> Schema {
    let t = &header.transforms;
    let mut schema = Schema::core_scaled(
        t.x.scale, t.y.scale, t.z.scale, t.x.offset, t.y.offset, t.z.offset,
    );
    schema.add_attribute(
        Attribute::new("Intensity", AttributeType::Uint16).describe("Pulse return magnitude"),
    );
    schema.add_attribute(
        Attribute::new("ReturnNumber", AttributeType::Uint8)
            .describe("Pulse return number for a given output pulse"),
    );
    schema.add_attribute(
        Attribute::new("NumberOfReturns", AttributeType::Uint8)
            .describe("Total number of returns for a given pulse"),
    );
    schema.add_attribute(
        Attribute::new("Classification", AttributeType::Uint8)
            .describe("The class attribute of a point"),
    );
    schema.add_attribute(
        Attribute::new("UserData", AttributeType::Uint8).describe("Used at the user's discretion"),
    );
    schema.add_attribute(
        Attribute::new("PointSourceID", AttributeType::Uint16)
            .describe("Source from which this point originated"),
    );
    if layout.is_extended() {
        schema.add_attribute(
            Attribute::new("ScanAngle", AttributeType::Float)
                .describe("Angle at which the laser point was output"),
        );
        schema.add_attribute(
            Attribute::new("ScannerChannel", AttributeType::Uint8)
                .describe("Channel of a multi-channel system"),
        );
    } else {
        schema.add_attribute(
            Attribute::new("ScanAngle", AttributeType::Int8)
                .describe("Rounded angle at which the laser point was output"),
        );
    }
    if layout.has_gps_time() {
        schema.add_attribute(
            Attribute::new("gpstime", AttributeType::Double)
                .describe("Time tag value at which the point was observed"),
        );
    }
    if layout.has_color() {
        schema.add_attribute(Attribute::new("R", AttributeType::Uint16).describe("Red channel"));
        schema.add_attribute(Attribute::new("G", AttributeType::Uint16).describe("Green channel"));
        schema.add_attribute(Attribute::new("B", AttributeType::Uint16).describe("Blue channel"));
    }
    if layout.has_nir() {
        schema.add_attribute(
            Attribute::new("NIR", AttributeType::Uint16).describe("Near infrared channel"),
        );
    }
    schema
}

fn read_crs_from_vlrs<R: Read>(read: &mut R, number_of_vlrs: u32) -> Result<Crs> {
    let mut crs = Crs::default();
    for _ in 0..number_of_vlrs {
        let _reserved = read.read_u16::<LittleEndian>()?;
        let mut user_id = [0_u8; 16];
        read.read_exact(&mut user_id)?;
        let record_id = read.read_u16::<LittleEndian>()?;
        let record_length = read.read_u16::<LittleEndian>()?;
        let mut description = [0_u8; 32];
        read.read_exact(&mut description)?;
        let mut data = vec![0_u8; usize::from(record_length)];
        read.read_exact(&mut data)?;

        if !user_id.starts_with(b"LASF_Projection") {
            continue;
        }
        match record_id {
            // OGC WKT
            2112 => {
                let wkt = String::from_utf8_lossy(&data)
                    .trim_end_matches('\0')
                    .to_string();
                if !wkt.is_empty() {
                    crs = Crs::from_wkt(wkt);
                }
            }
            // GeoTIFF key directory
            34735 => {
                if let Some(epsg) = epsg_from_geokeys(&data) {
                    crs = Crs::from_epsg(epsg);
                }
            }
            _ => {}
        }
    }
    Ok(crs)
}

fn epsg_from_geokeys(data: &[u8]) -> Option<u32> {
    let keys: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if keys.len() < 4 {
        return None;
    }
    let number_of_keys = usize::from(keys[3]);
    let mut geographic = None;
    for entry in 0..number_of_keys {
        let base = 4 + entry * 4;
        if base + 3 >= keys.len() {
            break;
        }
        let (key_id, location, value) = (keys[base], keys[base + 1], keys[base + 3]);
        if location != 0 {
            continue;
        }
        match key_id {
            // projected CRS wins over the geographic one
            3072 => return Some(u32::from(value)),
            2048 => geographic = Some(u32::from(value)),
            _ => {}
        }
    }
    geographic
}

/// Reads a las header without reading points.
///
/// Also records whether a `.lax` spatial-index companion sits next to the
/// file, and peeks the first point's gps time when the format has one.
pub fn read_header(path: &Path) -> Result<Header> {
    let mut read = BufReader::new(File::open(path)?);
    let raw = read_raw_header(&mut read, path)?;
    let mut header = raw.header;

    read.seek(SeekFrom::Start(u64::from(raw.header_size)))?;
    header.crs = read_crs_from_vlrs(&mut read, raw.number_of_vlrs)?;

    header.spatial_index =
        path.with_extension("lax").exists() || path.with_extension("LAX").exists();

    if raw.layout.has_gps_time() && header.number_of_points > 0 {
        let gps_offset = if raw.layout.is_extended() {
            GPS_OFFSET_EXTENDED
        } else {
            GPS_OFFSET_LEGACY
        };
        read.seek(SeekFrom::Start(u64::from(raw.offset_to_point_data) + gps_offset))?;
        header.gps_time = Some(read.read_f64::<LittleEndian>()?);
    }

    Ok(header)
}

/// Reads points from one uncompressed las file.
#[derive(Debug)]
pub struct LasReader<R> {
    read: R,
    header: Header,
    layout: PointLayout,
    index: u64,
    accessors: FieldAccessors,
}

#[derive(Clone, Debug)]
struct FieldAccessors {
    intensity: Accessor,
    return_number: Accessor,
    number_of_returns: Accessor,
    classification: Accessor,
    user_data: Accessor,
    point_source_id: Accessor,
    scan_angle: Accessor,
    scanner_channel: Accessor,
    gps_time: Accessor,
    red: Accessor,
    green: Accessor,
    blue: Accessor,
    nir: Accessor,
}

impl Default for FieldAccessors {
    fn default() -> FieldAccessors {
        FieldAccessors {
            intensity: Accessor::new("Intensity"),
            return_number: Accessor::new("ReturnNumber"),
            number_of_returns: Accessor::new("NumberOfReturns"),
            classification: Accessor::new("Classification"),
            user_data: Accessor::new("UserData"),
            point_source_id: Accessor::new("PointSourceID"),
            scan_angle: Accessor::new("ScanAngle"),
            scanner_channel: Accessor::new("ScannerChannel"),
            gps_time: Accessor::new("gpstime"),
            red: Accessor::new("R"),
            green: Accessor::new("G"),
            blue: Accessor::new("B"),
            nir: Accessor::new("NIR"),
        }
    }
}

impl LasReader<BufReader<File>> {
    /// Opens a las file for point reading.
    ///
    /// Compressed files are rejected here, not at header-opening time, so
    /// collection planning still works on compressed inputs.
    pub fn from_path(path: &Path) -> Result<LasReader<BufReader<File>>> {
        let mut read = BufReader::new(File::open(path)?);
        let mut format_probe = [0_u8; 105];
        read.read_exact(&mut format_probe)?;
        if format_probe[104] & COMPRESSION_BIT != 0 {
            return Err(Error::CompressedPoints(path.to_path_buf()));
        }
        read.seek(SeekFrom::Start(0))?;
        LasReader::new(read, path)
    }
}

impl<R: Read + Seek> LasReader<R> {
    /// Creates a reader over any seekable byte source.
    pub fn new(mut read: R, path: &Path) -> Result<LasReader<R>> {
        let raw = read_raw_header(&mut read, path)?;
        if raw.layout.record_length > raw.layout.standard_length() {
            warn!(
                "{}: {} extra bytes per point are not described and will be skipped",
                path.display(),
                raw.layout.record_length - raw.layout.standard_length()
            );
        }
        read.seek(SeekFrom::Start(u64::from(raw.offset_to_point_data)))?;
        Ok(LasReader {
            read,
            header: raw.header,
            layout: raw.layout,
            index: 0,
            accessors: FieldAccessors::default(),
        })
    }

    /// The header of the file being read.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Reads the next record into `point`, mapping fields by name.
    ///
    /// Returns false at the end of the points.
    pub fn read_into(&mut self, point: &mut Point) -> Result<bool> {
        if self.index >= self.header.number_of_points {
            return Ok(false);
        }
        self.index += 1;

        let read = &mut self.read;
        let raw_x = read.read_i32::<LittleEndian>()?;
        let raw_y = read.read_i32::<LittleEndian>()?;
        let raw_z = read.read_i32::<LittleEndian>()?;
        let intensity = read.read_u16::<LittleEndian>()?;

        point.zero();
        let a = &mut self.accessors;
        let t = &self.header.transforms;
        point.set_x(t.x.direct(raw_x));
        point.set_y(t.y.direct(raw_y));
        point.set_z(t.z.direct(raw_z));
        a.intensity.set(point, f64::from(intensity));

        if self.layout.is_extended() {
            let returns = read.read_u8()?;
            let flags = read.read_u8()?;
            let classification = read.read_u8()?;
            let user_data = read.read_u8()?;
            let scan_angle = read.read_i16::<LittleEndian>()?;
            let point_source_id = read.read_u16::<LittleEndian>()?;
            let gps_time = read.read_f64::<LittleEndian>()?;
            a.return_number.set(point, f64::from(returns & 0x0F));
            a.number_of_returns.set(point, f64::from(returns >> 4));
            a.scanner_channel.set(point, f64::from((flags >> 4) & 0x03));
            a.classification.set(point, f64::from(classification));
            a.user_data.set(point, f64::from(user_data));
            a.scan_angle.set(point, f64::from(scan_angle) * 0.006);
            a.point_source_id.set(point, f64::from(point_source_id));
            a.gps_time.set(point, gps_time);
        } else {
            let returns = read.read_u8()?;
            let classification = read.read_u8()?;
            let scan_angle = read.read_i8()?;
            let user_data = read.read_u8()?;
            let point_source_id = read.read_u16::<LittleEndian>()?;
            a.return_number.set(point, f64::from(returns & 0x07));
            a.number_of_returns.set(point, f64::from((returns >> 3) & 0x07));
            a.classification.set(point, f64::from(classification & 0x1F));
            a.scan_angle.set(point, f64::from(scan_angle));
            a.user_data.set(point, f64::from(user_data));
            a.point_source_id.set(point, f64::from(point_source_id));
            if self.layout.has_gps_time() {
                a.gps_time.set(point, read.read_f64::<LittleEndian>()?);
            }
        }

        if self.layout.has_color() {
            let red = self.read.read_u16::<LittleEndian>()?;
            let green = self.read.read_u16::<LittleEndian>()?;
            let blue = self.read.read_u16::<LittleEndian>()?;
            a.red.set(point, f64::from(red));
            a.green.set(point, f64::from(green));
            a.blue.set(point, f64::from(blue));
        }
        if self.layout.has_nir() {
            a.nir.set(point, f64::from(self.read.read_u16::<LittleEndian>()?));
        }

        // waveform descriptors are not carried by the engine
        if matches!(self.layout.format, 4 | 5 | 9 | 10) {
            self.read.seek(SeekFrom::Current(29))?;
        }

        let extra = self.layout.record_length.saturating_sub(self.layout.standard_length());
        if extra > 0 {
            self.read.seek(SeekFrom::Current(i64::from(extra)))?;
        }

        Ok(true)
    }
}

/// Picks the smallest point format carrying the schema's attributes.
fn layout_for_schema(schema: &Schema) -> PointLayout {
    let gps = schema.has_attribute("gpstime");
    let rgb = schema.has_attribute("R");
    let nir = schema.has_attribute("NIR");
    let format = if nir {
        8
    } else if gps && rgb {
        3
    } else if rgb {
        2
    } else if gps {
        1
    } else {
        0
    };
    let mut layout = PointLayout {
        format,
        record_length: 0,
    };
    layout.record_length = layout.standard_length();
    layout
}

/// Writes one uncompressed las file.
///
/// The header is written with placeholder counts and bounds, then rewritten
/// on [close](LasWriter::close). Dropping an unclosed writer finalizes it
/// and logs any error instead of panicking.
#[derive(Debug)]
pub struct LasWriter<W: Write + Seek> {
    write: Option<W>,
    header: Header,
    layout: PointLayout,
    count: u64,
    bounds: crate::Bounds,
    accessors: FieldAccessors,
}

impl LasWriter<BufWriter<File>> {
    /// Creates a las file configured by the header.
    pub fn from_path(path: &Path, header: &Header) -> Result<LasWriter<BufWriter<File>>> {
        LasWriter::new(BufWriter::new(File::create(path)?), header)
    }
}

impl<W: Write + Seek> LasWriter<W> {
    /// Creates a writer over any seekable sink.
    pub fn new(mut write: W, header: &Header) -> Result<LasWriter<W>> {
        let layout = layout_for_schema(&header.schema);
        write_header(&mut write, header, &layout, 0, &crate::Bounds::default())?;
        Ok(LasWriter {
            write: Some(write),
            header: header.clone(),
            layout,
            count: 0,
            bounds: crate::Bounds::default(),
            accessors: FieldAccessors::default(),
        })
    }

    /// The number of points written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes one point.
    pub fn write_point(&mut self, point: &crate::PointRef) -> Result<()> {
        let a = &mut self.accessors;
        let t = &self.header.transforms;
        let (x, y, z) = (point.x(), point.y(), point.z());
        self.bounds.grow(x, y, z);
        self.count += 1;

        let Some(write) = self.write.as_mut() else {
            return Err(closed_writer());
        };
        write.write_i32::<LittleEndian>(t.x.inverse(x))?;
        write.write_i32::<LittleEndian>(t.y.inverse(y))?;
        write.write_i32::<LittleEndian>(t.z.inverse(z))?;
        write.write_u16::<LittleEndian>(a.intensity.get(point) as u16)?;

        if self.layout.is_extended() {
            let return_number = (a.return_number.get(point) as u8) & 0x0F;
            let number_of_returns = (a.number_of_returns.get(point) as u8) & 0x0F;
            let channel = (a.scanner_channel.get(point) as u8) & 0x03;
            write.write_u8(return_number | (number_of_returns << 4))?;
            write.write_u8(channel << 4)?;
            write.write_u8(a.classification.get(point) as u8)?;
            write.write_u8(a.user_data.get(point) as u8)?;
            write.write_i16::<LittleEndian>((a.scan_angle.get(point) / 0.006).round() as i16)?;
            write.write_u16::<LittleEndian>(a.point_source_id.get(point) as u16)?;
            write.write_f64::<LittleEndian>(a.gps_time.get(point))?;
        } else {
            let return_number = (a.return_number.get(point) as u8) & 0x07;
            let number_of_returns = (a.number_of_returns.get(point) as u8) & 0x07;
            write.write_u8(return_number | (number_of_returns << 3))?;
            write.write_u8((a.classification.get(point) as u8) & 0x1F)?;
            write.write_i8(a.scan_angle.get(point) as i8)?;
            write.write_u8(a.user_data.get(point) as u8)?;
            write.write_u16::<LittleEndian>(a.point_source_id.get(point) as u16)?;
            if self.layout.has_gps_time() {
                write.write_f64::<LittleEndian>(a.gps_time.get(point))?;
            }
        }

        if self.layout.has_color() {
            write.write_u16::<LittleEndian>(a.red.get(point) as u16)?;
            write.write_u16::<LittleEndian>(a.green.get(point) as u16)?;
            write.write_u16::<LittleEndian>(a.blue.get(point) as u16)?;
        }
        if self.layout.has_nir() {
            write.write_u16::<LittleEndian>(a.nir.get(point) as u16)?;
        }

        Ok(())
    }

    /// Rewrites the header with the final count and bounds and returns the
    /// sink.
    pub fn close(&mut self) -> Result<W> {
        let Some(mut write) = self.write.take() else {
            return Err(closed_writer());
        };
        write.flush()?;
        write.seek(SeekFrom::Start(0))?;
        write_header(&mut write, &self.header, &self.layout, self.count, &self.bounds)?;
        write.flush()?;
        Ok(write)
    }
}

impl<W: Write + Seek> Drop for LasWriter<W> {
    fn drop(&mut self) {
        if self.write.is_some() {
            if let Err(error) = self.close() {
                log::error!("could not rewrite the las header on drop: {error}");
            }
        }
    }
}

fn write_header<W: Write>(
    write: &mut W,
    header: &Header,
    layout: &PointLayout,
    count: u64,
    bounds: &crate::Bounds,
) -> Result<()> {
    let extended = layout.is_extended();
    let version: (u8, u8) = if extended { (1, 4) } else { (1, 2) };
    let header_size = if extended { HEADER_SIZE_14 } else { HEADER_SIZE_12 };
    let bounds = if count == 0 {
        crate::Bounds::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    } else {
        *bounds
    };

    // the CRS rides in a single projection VLR
    let wkt = header.crs.wkt().map(str::to_string).or_else(|| {
        header.crs.epsg().map(|epsg| format!("EPSG:{epsg}"))
    });
    let vlr_payload: Option<Vec<u8>> = header.crs.epsg().map(geokey_directory).or_else(|| {
        wkt.as_ref().map(|wkt| {
            let mut data = wkt.clone().into_bytes();
            data.push(0);
            data
        })
    });
    let (number_of_vlrs, vlr_bytes) = match &vlr_payload {
        Some(data) => (1_u32, 54 + data.len() as u32),
        None => (0, 0),
    };

    write.write_all(b"LASF")?;
    write.write_u16::<LittleEndian>(0)?; // file source id
    let mut global_encoding = 0_u16;
    if header.adjusted_standard_gps_time {
        global_encoding |= 1;
    }
    if extended {
        global_encoding |= 1 << 4; // CRS is WKT
    }
    write.write_u16::<LittleEndian>(global_encoding)?;
    write.write_all(&header.guid.to_bytes_le())?;
    write.write_u8(version.0)?;
    write.write_u8(version.1)?;
    let mut system_identifier = [0_u8; 32];
    system_identifier[..7].copy_from_slice(b"laspipe");
    write.write_all(&system_identifier)?;
    let mut generating_software = [0_u8; 32];
    let software = format!("laspipe {}", env!("CARGO_PKG_VERSION"));
    generating_software[..software.len()].copy_from_slice(software.as_bytes());
    write.write_all(&generating_software)?;
    let (year, day) = header
        .creation_day()
        .map(|(year, day)| (year as u16, day as u16))
        .unwrap_or((0, 0));
    write.write_u16::<LittleEndian>(day)?;
    write.write_u16::<LittleEndian>(year)?;
    write.write_u16::<LittleEndian>(header_size)?;
    write.write_u32::<LittleEndian>(u32::from(header_size) + vlr_bytes)?;
    write.write_u32::<LittleEndian>(number_of_vlrs)?;
    write.write_u8(layout.format)?;
    write.write_u16::<LittleEndian>(layout.record_length)?;
    let legacy_count = if extended || count > u64::from(u32::MAX) {
        0
    } else {
        count as u32
    };
    write.write_u32::<LittleEndian>(legacy_count)?;
    for _ in 0..5 {
        write.write_u32::<LittleEndian>(0)?;
    }
    let t = &header.transforms;
    write.write_f64::<LittleEndian>(t.x.scale)?;
    write.write_f64::<LittleEndian>(t.y.scale)?;
    write.write_f64::<LittleEndian>(t.z.scale)?;
    write.write_f64::<LittleEndian>(t.x.offset)?;
    write.write_f64::<LittleEndian>(t.y.offset)?;
    write.write_f64::<LittleEndian>(t.z.offset)?;
    write.write_f64::<LittleEndian>(bounds.max.x)?;
    write.write_f64::<LittleEndian>(bounds.min.x)?;
    write.write_f64::<LittleEndian>(bounds.max.y)?;
    write.write_f64::<LittleEndian>(bounds.min.y)?;
    write.write_f64::<LittleEndian>(bounds.max.z)?;
    write.write_f64::<LittleEndian>(bounds.min.z)?;

    if extended {
        write.write_u64::<LittleEndian>(0)?; // start of waveform data
        write.write_u64::<LittleEndian>(0)?; // start of first evlr
        write.write_u32::<LittleEndian>(0)?; // number of evlrs
        write.write_u64::<LittleEndian>(count)?;
        for _ in 0..15 {
            write.write_u64::<LittleEndian>(0)?;
        }
    }

    if let Some(data) = vlr_payload {
        let record_id: u16 = if header.crs.epsg().is_some() { 34735 } else { 2112 };
        write.write_u16::<LittleEndian>(0)?; // reserved
        let mut user_id = [0_u8; 16];
        user_id[..15].copy_from_slice(b"LASF_Projection");
        write.write_all(&user_id)?;
        write.write_u16::<LittleEndian>(record_id)?;
        write.write_u16::<LittleEndian>(data.len() as u16)?;
        write.write_all(&[0_u8; 32])?; // description
        write.write_all(&data)?;
    }

    Ok(())
}

// A two-entry GeoTIFF key directory carrying the projected EPSG code.
fn geokey_directory(epsg: u32) -> Vec<u8> {
    let keys: [u16; 12] = [
        1, 1, 0, 2, // directory version, revision, minor, number of keys
        1024, 0, 1, 1, // GTModelTypeGeoKey = projected
        3072, 0, 1, epsg as u16, // ProjectedCSTypeGeoKey
    ];
    let mut data = Vec::with_capacity(keys.len() * 2);
    for key in keys {
        data.extend_from_slice(&key.to_le_bytes());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> Header {
        let mut header = Header::default();
        header.signature = Signature::Lasf;
        header.crs = Crs::from_epsg(32633);
        header.date = NaiveDate::from_ymd_opt(2020, 6, 1);
        header.transforms = Vector::new(
            Transform { scale: 0.01, offset: 0.0 },
            Transform { scale: 0.01, offset: 0.0 },
            Transform { scale: 0.01, offset: 0.0 },
        );
        let layout = PointLayout { format: 1, record_length: 28 };
        header.schema = schema_from_layout(&header, &layout);
        header
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let mut writer = LasWriter::new(Cursor::new(Vec::new()), &header).unwrap();
        let mut point = Point::new(&header.schema);
        point.set_x(10.0);
        point.set_y(20.0);
        point.set_z(5.0);
        point.set_value("Intensity", 300.0);
        point.set_value("gpstime", 123456.789);
        writer.write_point(&point.as_ref()).unwrap();
        let mut data = writer.close().unwrap();
        data.seek(SeekFrom::Start(0)).unwrap();

        let mut reader = LasReader::new(data, Path::new("memory.las")).unwrap();
        assert_eq!(1, reader.header().number_of_points);
        assert_eq!((1, 2), reader.header().version);
        assert_eq!(10.0, reader.header().bounds.min.x);

        let mut read_back = Point::new(&reader.header().schema.clone());
        assert!(reader.read_into(&mut read_back).unwrap());
        assert_eq!(10.0, read_back.x());
        assert_eq!(5.0, read_back.z());
        assert_eq!(Some(300.0), read_back.value("Intensity"));
        assert_eq!(Some(123456.789), read_back.value("gpstime"));
        assert!(!reader.read_into(&mut read_back).unwrap());
    }

    #[test]
    fn extended_format_round_trip() {
        let mut header = sample_header();
        let layout = PointLayout { format: 8, record_length: 38 };
        header.schema = schema_from_layout(&header, &layout);

        let mut writer = LasWriter::new(Cursor::new(Vec::new()), &header).unwrap();
        let mut point = Point::new(&header.schema);
        point.set_x(1.0);
        point.set_value("ReturnNumber", 11.0);
        point.set_value("NumberOfReturns", 13.0);
        point.set_value("NIR", 1024.0);
        point.set_value("Classification", 65.0);
        writer.write_point(&point.as_ref()).unwrap();
        let mut data = writer.close().unwrap();
        data.seek(SeekFrom::Start(0)).unwrap();

        let mut reader = LasReader::new(data, Path::new("memory.las")).unwrap();
        assert_eq!((1, 4), reader.header().version);
        let mut read_back = Point::new(&reader.header().schema.clone());
        assert!(reader.read_into(&mut read_back).unwrap());
        assert_eq!(Some(11.0), read_back.value("ReturnNumber"));
        assert_eq!(Some(13.0), read_back.value("NumberOfReturns"));
        assert_eq!(Some(1024.0), read_back.value("NIR"));
        assert_eq!(Some(65.0), read_back.value("Classification"));
    }

    #[test]
    fn bad_signature() {
        let data = Cursor::new(b"NOPE".repeat(100));
        assert!(matches!(
            LasReader::new(data, Path::new("bad.las")),
            Err(Error::InvalidLasFile(_))
        ));
    }
}
