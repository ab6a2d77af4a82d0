//! Points as raw records plus a schema to interpret them.
//!
//! A [Point] owns its bytes and is the unit pushed through streaming
//! pipelines. [PointRef] and [PointMut] borrow a record from a
//! [PointCloud](crate::PointCloud) buffer. All three expose the same typed
//! accessors; the coordinate getters go straight to the fixed X/Y/Z slots of
//! the mandatory schema prefix.

use crate::{Attribute, AttributeType, Schema};
use num_traits::{Bounded, NumCast};

const DELETED_BIT: u8 = 0;
const BUFFERED_BIT: u8 = 1;

// Index of the coordinate attributes in the mandatory prefix.
const X: usize = 1;
const Y: usize = 2;
const Z: usize = 3;

fn read_stored(data: &[u8], attribute: &Attribute) -> f64 {
    use AttributeType::*;
    let o = attribute.offset;
    match attribute.data_type {
        Bit => <f64 as From<u8>>::from((data[o] >> attribute.bit) & 1),
        Uint8 => <f64 as From<u8>>::from(data[o]),
        Int8 => <f64 as From<i8>>::from(data[o] as i8),
        Uint16 => <f64 as From<u16>>::from(u16::from_le_bytes([data[o], data[o + 1]])),
        Int16 => <f64 as From<i16>>::from(i16::from_le_bytes([data[o], data[o + 1]])),
        Uint32 => <f64 as From<u32>>::from(u32::from_le_bytes(data[o..o + 4].try_into().unwrap())),
        Int32 => <f64 as From<i32>>::from(i32::from_le_bytes(data[o..o + 4].try_into().unwrap())),
        Uint64 => u64::from_le_bytes(data[o..o + 8].try_into().unwrap()) as f64,
        Int64 => i64::from_le_bytes(data[o..o + 8].try_into().unwrap()) as f64,
        Float => <f64 as From<f32>>::from(f32::from_le_bytes(data[o..o + 4].try_into().unwrap())),
        Double => f64::from_le_bytes(data[o..o + 8].try_into().unwrap()),
    }
}

fn clamped<T: Bounded + NumCast>(value: f64) -> T {
    let min: f64 = NumCast::from(T::min_value()).unwrap_or(f64::MIN);
    let max: f64 = NumCast::from(T::max_value()).unwrap_or(f64::MAX);
    NumCast::from(value.clamp(min, max)).unwrap_or(T::min_value())
}

fn write_stored(data: &mut [u8], attribute: &Attribute, stored: f64) {
    use AttributeType::*;
    let o = attribute.offset;
    match attribute.data_type {
        Bit => {
            let bit = <u8 as From<bool>>::from(stored != 0.0);
            data[o] = (data[o] & !(1 << attribute.bit)) | (bit << attribute.bit);
        }
        Uint8 => data[o] = clamped::<u8>(stored.round()),
        Int8 => data[o] = clamped::<i8>(stored.round()) as u8,
        Uint16 => data[o..o + 2].copy_from_slice(&clamped::<u16>(stored.round()).to_le_bytes()),
        Int16 => data[o..o + 2].copy_from_slice(&clamped::<i16>(stored.round()).to_le_bytes()),
        Uint32 => data[o..o + 4].copy_from_slice(&clamped::<u32>(stored.round()).to_le_bytes()),
        Int32 => data[o..o + 4].copy_from_slice(&clamped::<i32>(stored.round()).to_le_bytes()),
        Uint64 => data[o..o + 8].copy_from_slice(&clamped::<u64>(stored.round()).to_le_bytes()),
        Int64 => data[o..o + 8].copy_from_slice(&clamped::<i64>(stored.round()).to_le_bytes()),
        Float => data[o..o + 4].copy_from_slice(&(stored as f32).to_le_bytes()),
        Double => data[o..o + 8].copy_from_slice(&stored.to_le_bytes()),
    }
}

fn read_value(data: &[u8], attribute: &Attribute) -> f64 {
    attribute.value_offset + attribute.scale_factor * read_stored(data, attribute)
}

fn write_value(data: &mut [u8], attribute: &Attribute, value: f64) {
    let stored = if attribute.data_type == AttributeType::Bit {
        value
    } else {
        (value - attribute.value_offset) / attribute.scale_factor
    };
    write_stored(data, attribute, stored);
}

macro_rules! read_accessors {
    () => {
        /// The x coordinate after scale and offset.
        pub fn x(&self) -> f64 {
            read_value(self.data(), &self.schema().attributes()[X])
        }

        /// The y coordinate after scale and offset.
        pub fn y(&self) -> f64 {
            read_value(self.data(), &self.schema().attributes()[Y])
        }

        /// The z coordinate after scale and offset.
        pub fn z(&self) -> f64 {
            read_value(self.data(), &self.schema().attributes()[Z])
        }

        /// The stored integer x.
        pub fn raw_x(&self) -> i32 {
            read_stored(self.data(), &self.schema().attributes()[X]) as i32
        }

        /// The stored integer y.
        pub fn raw_y(&self) -> i32 {
            read_stored(self.data(), &self.schema().attributes()[Y]) as i32
        }

        /// The stored integer z.
        pub fn raw_z(&self) -> i32 {
            read_stored(self.data(), &self.schema().attributes()[Z]) as i32
        }

        /// Is the soft-delete bit set?
        pub fn deleted(&self) -> bool {
            self.data()[0] & (1 << DELETED_BIT) != 0
        }

        /// Does this point come from a neighbouring tile's buffer region?
        pub fn buffered(&self) -> bool {
            self.data()[0] & (1 << BUFFERED_BIT) != 0
        }

        /// Reads an attribute by name as f64, or `None` when absent.
        pub fn value(&self, name: &str) -> Option<f64> {
            self.schema()
                .find(name)
                .map(|attribute| read_value(self.data(), attribute))
        }
    };
}

macro_rules! write_accessors {
    () => {
        /// Sets the x coordinate.
        pub fn set_x(&mut self, x: f64) {
            let attribute = self.schema().attributes()[X].clone();
            write_value(self.data_mut(), &attribute, x);
        }

        /// Sets the y coordinate.
        pub fn set_y(&mut self, y: f64) {
            let attribute = self.schema().attributes()[Y].clone();
            write_value(self.data_mut(), &attribute, y);
        }

        /// Sets the z coordinate.
        pub fn set_z(&mut self, z: f64) {
            let attribute = self.schema().attributes()[Z].clone();
            write_value(self.data_mut(), &attribute, z);
        }

        /// Sets or clears the soft-delete bit.
        pub fn set_deleted(&mut self, deleted: bool) {
            let data = self.data_mut();
            if deleted {
                data[0] |= 1 << DELETED_BIT;
            } else {
                data[0] &= !(1 << DELETED_BIT);
            }
        }

        /// Marks this point as coming from a buffer region.
        pub fn set_buffered(&mut self, buffered: bool) {
            let data = self.data_mut();
            if buffered {
                data[0] |= 1 << BUFFERED_BIT;
            } else {
                data[0] &= !(1 << BUFFERED_BIT);
            }
        }

        /// Writes an attribute by name; silently ignored when absent.
        pub fn set_value(&mut self, name: &str, value: f64) {
            if let Some(attribute) = self.schema().find(name).cloned() {
                write_value(self.data_mut(), &attribute, value);
            }
        }
    };
}

/// A point that owns its record buffer.
///
/// # Examples
///
/// ```
/// use laspipe::{Point, Schema};
///
/// let schema = Schema::core();
/// let mut point = Point::new(&schema);
/// point.set_x(12.5);
/// assert_eq!(12.5, point.x());
/// assert!(!point.deleted());
/// ```
#[derive(Clone, Debug)]
pub struct Point {
    data: Vec<u8>,
    schema: Schema,
}

impl Point {
    /// Creates a zeroed point laid out by the given schema.
    pub fn new(schema: &Schema) -> Point {
        Point {
            data: vec![0; schema.total_point_size()],
            schema: schema.clone(),
        }
    }

    /// The raw record bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The schema interpreting the bytes.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Zeroes the record.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Replaces the record bytes; lengths must match.
    pub fn copy_from(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
    }

    /// A borrowed view of this point.
    pub fn as_ref(&self) -> PointRef<'_> {
        PointRef {
            data: &self.data,
            schema: &self.schema,
        }
    }

    read_accessors!();
    write_accessors!();
}

/// A read-only view of one record inside a point-cloud buffer.
#[derive(Clone, Copy, Debug)]
pub struct PointRef<'a> {
    data: &'a [u8],
    schema: &'a Schema,
}

impl<'a> PointRef<'a> {
    /// Creates a view over a record slice.
    pub fn new(data: &'a [u8], schema: &'a Schema) -> PointRef<'a> {
        PointRef { data, schema }
    }

    /// The raw record bytes.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// The schema interpreting the bytes.
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    read_accessors!();
}

/// A mutable view of one record inside a point-cloud buffer.
#[derive(Debug)]
pub struct PointMut<'a> {
    data: &'a mut [u8],
    schema: &'a Schema,
}

impl<'a> PointMut<'a> {
    /// Creates a mutable view over a record slice.
    pub fn new(data: &'a mut [u8], schema: &'a Schema) -> PointMut<'a> {
        PointMut { data, schema }
    }

    fn data(&self) -> &[u8] {
        self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }

    /// The schema interpreting the bytes.
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    read_accessors!();
    write_accessors!();
}

/// Reads and writes one attribute across many points, resolving the
/// attribute lazily against the first schema it sees.
///
/// Reading an attribute the schema does not have yields the accessor's
/// default; writing is a no-op. This mirrors how reader stages populate
/// whatever subset of fields the output schema declares.
///
/// # Examples
///
/// ```
/// use laspipe::{Accessor, Attribute, AttributeType, Point, Schema};
///
/// let mut schema = Schema::core();
/// schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
/// let mut point = Point::new(&schema);
///
/// let mut intensity = Accessor::new("Intensity");
/// intensity.set(&mut point, 117.0);
/// assert_eq!(117.0, intensity.get(&point.as_ref()));
///
/// let mut missing = Accessor::with_default("NIR", -1.0);
/// assert_eq!(-1.0, missing.get(&point.as_ref()));
/// ```
#[derive(Clone, Debug)]
pub struct Accessor {
    name: String,
    cached: Option<Option<Attribute>>,
    default: f64,
}

impl Accessor {
    /// Creates an accessor returning 0.0 for missing attributes.
    pub fn new(name: impl Into<String>) -> Accessor {
        Accessor::with_default(name, 0.0)
    }

    /// Creates an accessor with an explicit default.
    pub fn with_default(name: impl Into<String>, default: f64) -> Accessor {
        Accessor {
            name: name.into(),
            cached: None,
            default,
        }
    }

    /// The attribute name this accessor resolves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Does the resolved schema carry this attribute?
    pub fn exists(&mut self, schema: &Schema) -> bool {
        self.resolve(schema).is_some()
    }

    /// Drops the cached resolution, e.g. after a schema change.
    pub fn reset(&mut self) {
        self.cached = None;
    }

    fn resolve(&mut self, schema: &Schema) -> Option<&Attribute> {
        if self.cached.is_none() {
            self.cached = Some(schema.find(&self.name).cloned());
        }
        self.cached.as_ref().unwrap().as_ref()
    }

    /// Reads the attribute from a borrowed point.
    pub fn get(&mut self, point: &PointRef) -> f64 {
        let default = self.default;
        match self.resolve(point.schema()) {
            Some(attribute) => read_value(point.data(), attribute),
            None => default,
        }
    }

    /// Writes the attribute on an owned point.
    pub fn set(&mut self, point: &mut Point, value: f64) {
        if let Some(attribute) = self.resolve(&point.schema).cloned() {
            write_value(&mut point.data, &attribute, value);
        }
    }

    /// Writes the attribute through a mutable view.
    pub fn set_mut(&mut self, point: &mut PointMut, value: f64) {
        if let Some(attribute) = self.resolve(point.schema).cloned() {
            write_value(point.data, &attribute, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        schema.add_attribute(Attribute::new("keep", AttributeType::Bit));
        schema
    }

    #[test]
    fn coordinates_round_trip() {
        let schema = Schema::core_scaled(0.01, 0.01, 0.01, 1000.0, 2000.0, 0.0);
        let mut point = Point::new(&schema);
        point.set_x(1012.34);
        point.set_y(2045.67);
        point.set_z(-3.21);
        assert_eq!(1012.34, point.x());
        assert_eq!(2045.67, point.y());
        assert_eq!(-3.21, point.z());
    }

    #[test]
    fn flags() {
        let mut point = Point::new(&schema());
        assert!(!point.deleted());
        point.set_deleted(true);
        point.set_buffered(true);
        assert!(point.deleted() && point.buffered());
        point.set_deleted(false);
        assert!(!point.deleted() && point.buffered());
    }

    #[test]
    fn clamped_writes() {
        let mut point = Point::new(&schema());
        point.set_value("Intensity", 1e9);
        assert_eq!(Some(<f64 as From<u16>>::from(u16::MAX)), point.value("Intensity"));
        point.set_value("Intensity", -5.0);
        assert_eq!(Some(0.0), point.value("Intensity"));
    }

    #[test]
    fn bit_attribute() {
        let mut point = Point::new(&schema());
        point.set_value("keep", 1.0);
        assert_eq!(Some(1.0), point.value("keep"));
        point.set_value("keep", 0.0);
        assert_eq!(Some(0.0), point.value("keep"));
        // toggling a packed bit leaves the coordinates alone
        point.set_x(4.0);
        point.set_value("keep", 1.0);
        assert_eq!(4.0, point.x());
    }

    #[test]
    fn accessor_misses_are_safe() {
        let mut point = Point::new(&schema());
        let mut nir = Accessor::new("NIR");
        nir.set(&mut point, 3.0);
        assert_eq!(0.0, nir.get(&point.as_ref()));
    }
}
