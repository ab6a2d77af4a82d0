//! Per-point byte layout.
//!
//! A [Schema] is an ordered collection of [Attribute]s describing how one
//! point record maps onto bytes. Every schema starts with the mandatory
//! prefix `{flags, X, Y, Z}`: the flags byte comes first so its low bit can
//! carry the soft-delete marker, and the coordinates sit at fixed positions
//! 1–3 for fast access.
//!
//! ```
//! use laspipe::{Attribute, AttributeType, Schema};
//!
//! let mut schema = Schema::core();
//! schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
//! assert_eq!(15, schema.total_point_size());
//! assert_eq!(13, schema.find("Intensity").unwrap().offset);
//! ```

/// The storage type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    /// A single bit packed into a shared flag byte.
    Bit,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
}

impl AttributeType {
    /// The storage size in bytes; a [Bit](AttributeType::Bit) reports the
    /// byte it shares.
    pub fn size(&self) -> usize {
        use AttributeType::*;
        match self {
            Bit | Uint8 | Int8 => 1,
            Uint16 | Int16 => 2,
            Uint32 | Int32 | Float => 4,
            Uint64 | Int64 | Double => 8,
        }
    }

    /// The canonical spelling used in stage parameters.
    pub fn name(&self) -> &'static str {
        use AttributeType::*;
        match self {
            Bit => "BIT",
            Uint8 => "UINT8",
            Int8 => "INT8",
            Uint16 => "UINT16",
            Int16 => "INT16",
            Uint32 => "UINT32",
            Int32 => "INT32",
            Uint64 => "UINT64",
            Int64 => "INT64",
            Float => "FLOAT",
            Double => "DOUBLE",
        }
    }

    /// Parses a stage-parameter spelling, case-insensitively.
    pub fn from_name(name: &str) -> Option<AttributeType> {
        use AttributeType::*;
        match name.to_ascii_uppercase().as_str() {
            "BIT" => Some(Bit),
            "UINT8" | "UCHAR" => Some(Uint8),
            "INT8" | "CHAR" => Some(Int8),
            "UINT16" | "USHORT" => Some(Uint16),
            "INT16" | "SHORT" => Some(Int16),
            "UINT32" | "UINT" => Some(Uint32),
            "INT32" | "INT" => Some(Int32),
            "UINT64" => Some(Uint64),
            "INT64" => Some(Int64),
            "FLOAT" => Some(Float),
            "DOUBLE" => Some(Double),
            _ => None,
        }
    }
}

/// A named, typed field within a point record.
///
/// Numeric attributes carry a scale and an offset so that a stored integer
/// `q` represents the logical value `value_offset + scale_factor * q`.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    /// The attribute name, unique within a schema.
    pub name: String,
    /// The storage type.
    pub data_type: AttributeType,
    /// Byte offset within the point record, maintained by the schema.
    pub offset: usize,
    /// Storage size in bytes.
    pub size: usize,
    /// Bit position within the flag byte, for [AttributeType::Bit] only.
    pub bit: u8,
    /// Multiplier applied to the stored value.
    pub scale_factor: f64,
    /// Offset added to the scaled value.
    pub value_offset: f64,
    /// Free-form description.
    pub description: String,
}

impl Attribute {
    /// Creates an unscaled attribute.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::{Attribute, AttributeType};
    /// let attribute = Attribute::new("Intensity", AttributeType::Uint16);
    /// assert_eq!(2, attribute.size);
    /// ```
    pub fn new(name: impl Into<String>, data_type: AttributeType) -> Attribute {
        Attribute::scaled(name, data_type, 1.0, 0.0)
    }

    /// Creates an attribute with a scale and an offset.
    pub fn scaled(
        name: impl Into<String>,
        data_type: AttributeType,
        scale_factor: f64,
        value_offset: f64,
    ) -> Attribute {
        Attribute {
            name: name.into(),
            data_type,
            offset: 0,
            size: data_type.size(),
            bit: 0,
            scale_factor,
            value_offset,
            description: String::new(),
        }
    }

    /// Sets the description, builder style.
    pub fn describe(mut self, description: impl Into<String>) -> Attribute {
        self.description = description.into();
        self
    }

    /// Do two attributes describe the same field?
    ///
    /// Placement (offset, bit) is ignored: it belongs to the schema, not to
    /// the definition.
    pub fn same_definition(&self, other: &Attribute) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.scale_factor == other.scale_factor
            && self.value_offset == other.value_offset
    }
}

/// Maps user-facing attribute spellings onto their canonical names.
///
/// # Examples
///
/// ```
/// # use laspipe::Schema;
/// assert_eq!("Z", Schema::normalize_name("z"));
/// assert_eq!("Intensity", Schema::normalize_name("i"));
/// assert_eq!("Amplitude", Schema::normalize_name("Amplitude"));
/// ```
const ALIASES: &[(&str, &[&str])] = &[
    ("X", &["X", "x"]),
    ("Y", &["Y", "y"]),
    ("Z", &["Z", "z"]),
    ("Intensity", &["Intensity", "intensity", "i"]),
    (
        "ReturnNumber",
        &["return", "Return", "ReturnNumber", "return_number", "r"],
    ),
    (
        "NumberOfReturns",
        &["NumberOfReturns", "NumberReturns", "numberofreturns", "n"],
    ),
    (
        "Classification",
        &["Classification", "classification", "class", "c"],
    ),
    ("gpstime", &["gpstime", "gps_time", "GPStime", "t", "time", "gps"]),
    ("UserData", &["UserData", "userdata", "user_data", "ud", "u"]),
    (
        "PointSourceID",
        &[
            "PointSourceID",
            "point_source",
            "point_source_id",
            "pointsourceid",
            "psid",
            "p",
        ],
    ),
    (
        "ScanAngle",
        &["angle", "Angle", "ScanAngle", "ScanAngleRank", "scan_angle", "a"],
    ),
    ("R", &["R", "Red", "red"]),
    ("G", &["G", "Green", "green"]),
    ("B", &["B", "Blue", "blue"]),
    ("NIR", &["N", "NIR", "nir"]),
];

/// An ordered collection of attributes plus the cached record size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    attributes: Vec<Attribute>,
    total_point_size: usize,
    consecutive_bits: u8,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Schema {
        Schema::default()
    }

    /// Creates a schema holding the mandatory prefix `{flags, X, Y, Z}` with
    /// millimetric coordinate scaling.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::Schema;
    /// let schema = Schema::core();
    /// assert_eq!(13, schema.total_point_size());
    /// assert_eq!(1, schema.find("X").unwrap().offset);
    /// ```
    pub fn core() -> Schema {
        Schema::core_scaled(0.001, 0.001, 0.001, 0.0, 0.0, 0.0)
    }

    /// Creates the mandatory prefix with explicit coordinate scales and
    /// offsets.
    pub fn core_scaled(
        x_scale: f64,
        y_scale: f64,
        z_scale: f64,
        x_offset: f64,
        y_offset: f64,
        z_offset: f64,
    ) -> Schema {
        let mut schema = Schema::new();
        schema.add_attribute(
            Attribute::new("flags", AttributeType::Uint8).describe("Engine point state mask"),
        );
        schema.add_attribute(
            Attribute::scaled("X", AttributeType::Int32, x_scale, x_offset)
                .describe("X coordinate"),
        );
        schema.add_attribute(
            Attribute::scaled("Y", AttributeType::Int32, y_scale, y_offset)
                .describe("Y coordinate"),
        );
        schema.add_attribute(
            Attribute::scaled("Z", AttributeType::Int32, z_scale, z_offset)
                .describe("Z coordinate"),
        );
        schema
    }

    /// Resolves a user-facing attribute spelling to its canonical name.
    pub fn normalize_name(name: &str) -> &str {
        for (canonical, aliases) in ALIASES {
            if aliases.contains(&name) {
                return canonical;
            }
        }
        name
    }

    /// Appends an attribute, computing its placement.
    ///
    /// A non-bit attribute lands at the end of the record and advances the
    /// total size by its byte size. A [Bit](AttributeType::Bit) attribute
    /// reuses the current flag byte when one is open, or allocates a new one
    /// when the previous byte is full or the last attribute was not a bit.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::{Attribute, AttributeType, Schema};
    /// let mut schema = Schema::core();
    /// schema.add_attribute(Attribute::new("keep", AttributeType::Bit));
    /// schema.add_attribute(Attribute::new("seen", AttributeType::Bit));
    /// let keep = schema.find("keep").unwrap();
    /// let seen = schema.find("seen").unwrap();
    /// assert_eq!(keep.offset, seen.offset);
    /// assert_eq!((0, 1), (keep.bit, seen.bit));
    /// assert_eq!(14, schema.total_point_size());
    /// ```
    pub fn add_attribute(&mut self, mut attribute: Attribute) {
        if attribute.data_type != AttributeType::Bit {
            self.consecutive_bits = 0;
            attribute.offset = self.total_point_size;
            self.total_point_size += attribute.size;
            self.attributes.push(attribute);
            return;
        }

        if self.consecutive_bits == 0 || self.consecutive_bits == 8 {
            self.total_point_size += 1;
            self.consecutive_bits = 0;
        }
        attribute.offset = self.total_point_size - 1;
        attribute.bit = self.consecutive_bits;
        self.consecutive_bits += 1;
        self.attributes.push(attribute);
    }

    /// Removes an attribute by name, shifting subsequent offsets down.
    ///
    /// Removing a bit attribute whose flag byte is shared with another bit
    /// only drops the entry; the byte stays as long as a sibling uses it.
    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        let index = self.index_of(name)?;
        let removed = self.attributes.remove(index);

        let shares_byte = removed.data_type == AttributeType::Bit
            && self
                .attributes
                .iter()
                .any(|a| a.data_type == AttributeType::Bit && a.offset == removed.offset);
        if shares_byte {
            return Some(removed);
        }

        for attribute in &mut self.attributes[index..] {
            attribute.offset -= removed.size;
        }
        self.total_point_size -= removed.size;
        if removed.data_type == AttributeType::Bit {
            self.consecutive_bits = 0;
        }
        Some(removed)
    }

    /// Finds an attribute by exact name.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Is an attribute with this name present?
    pub fn has_attribute(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// The position of an attribute in declaration order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// The attributes in declaration order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The size of one point record in bytes.
    pub fn total_point_size(&self) -> usize {
        self.total_point_size
    }

    /// The number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Is this schema empty?
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(schema: &Schema, name: &str) -> Attribute {
        schema.find(name).unwrap().clone()
    }

    #[test]
    fn core_prefix_layout() {
        let schema = Schema::core();
        assert_eq!(0, named(&schema, "flags").offset);
        assert_eq!(1, named(&schema, "X").offset);
        assert_eq!(5, named(&schema, "Y").offset);
        assert_eq!(9, named(&schema, "Z").offset);
        assert_eq!(13, schema.total_point_size());
    }

    #[test]
    fn add_advances_offsets() {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        schema.add_attribute(Attribute::new("gpstime", AttributeType::Double));
        assert_eq!(13, named(&schema, "Intensity").offset);
        assert_eq!(15, named(&schema, "gpstime").offset);
        assert_eq!(23, schema.total_point_size());
    }

    #[test]
    fn bit_packing_shares_a_byte() {
        let mut schema = Schema::core();
        for i in 0..9 {
            schema.add_attribute(Attribute::new(format!("b{i}"), AttributeType::Bit));
        }
        // eight bits in the first flag byte, the ninth in a fresh one
        assert_eq!(named(&schema, "b0").offset, named(&schema, "b7").offset);
        assert_eq!(7, named(&schema, "b7").bit);
        assert_eq!(named(&schema, "b0").offset + 1, named(&schema, "b8").offset);
        assert_eq!(0, named(&schema, "b8").bit);
        assert_eq!(15, schema.total_point_size());
    }

    #[test]
    fn non_bit_closes_the_flag_byte() {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("b0", AttributeType::Bit));
        schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        schema.add_attribute(Attribute::new("b1", AttributeType::Bit));
        assert_ne!(named(&schema, "b0").offset, named(&schema, "b1").offset);
        assert_eq!(0, named(&schema, "b1").bit);
    }

    #[test]
    fn remove_shifts_offsets() {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("Intensity", AttributeType::Uint16));
        schema.add_attribute(Attribute::new("Classification", AttributeType::Uint8));
        let before = schema.total_point_size();
        schema.remove_attribute("Intensity").unwrap();
        assert_eq!(before - 2, schema.total_point_size());
        assert_eq!(13, named(&schema, "Classification").offset);
        assert!(schema.remove_attribute("Intensity").is_none());
    }

    #[test]
    fn remove_shared_bit_keeps_the_byte() {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("b0", AttributeType::Bit));
        schema.add_attribute(Attribute::new("b1", AttributeType::Bit));
        let size = schema.total_point_size();
        schema.remove_attribute("b0").unwrap();
        assert_eq!(size, schema.total_point_size());
        schema.remove_attribute("b1").unwrap();
        assert_eq!(size - 1, schema.total_point_size());
    }

    #[test]
    fn offsets_stay_inside_record() {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("b", AttributeType::Bit));
        schema.add_attribute(Attribute::new("v", AttributeType::Double));
        schema.remove_attribute("b");
        for attribute in schema.attributes() {
            assert!(attribute.offset < schema.total_point_size());
        }
    }

    #[test]
    fn aliases() {
        assert_eq!("gpstime", Schema::normalize_name("t"));
        assert_eq!("ScanAngle", Schema::normalize_name("ScanAngleRank"));
        assert_eq!("NIR", Schema::normalize_name("N"));
        assert_eq!("Wobble", Schema::normalize_name("Wobble"));
    }
}
