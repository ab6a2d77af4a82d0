//! Point filter expressions.
//!
//! A stage filter is a list of strings. Each string is either a native flag
//! passed verbatim to the codec (it starts with `-`), or a high-level
//! predicate of the form `<attribute> <op> <rhs>` with
//! `op ∈ {==, !=, >, <, >=, <=, %in%, %out%, %between%}`. Attribute
//! spellings are normalized through the standard alias table, so
//! `"z < 2"` and `"Z < 2"` mean the same thing.
//!
//! A condition evaluates to *reject*: true means the point is skipped by the
//! stage, false means it survives.

use crate::{Error, PointRef, Result, Schema};

/// One parsed predicate.
///
/// Every variant stores the *keep* condition the user wrote; [reject](Condition::reject)
/// answers the inverse question, which is what the hot loops ask.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Keep values strictly below the threshold.
    Below(String, f64),
    /// Keep values below or equal to the threshold.
    BelowEqual(String, f64),
    /// Keep values strictly above the threshold.
    Above(String, f64),
    /// Keep values above or equal to the threshold.
    AboveEqual(String, f64),
    /// Keep values in `[low, high)`.
    Between(String, f64, f64),
    /// Keep values equal to the value.
    Equal(String, f64),
    /// Keep values different from the value.
    Different(String, f64),
    /// Keep values present in the list.
    In(String, Vec<f64>),
    /// Keep values absent from the list.
    Out(String, Vec<f64>),
}

impl Condition {
    /// Parses one predicate; returns `None` for empty strings and native
    /// `-flag` expressions, which are forwarded to codecs untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::Condition;
    /// let condition = Condition::parse("c %in% 2 9").unwrap().unwrap();
    /// assert_eq!(
    ///     Condition::In("Classification".to_string(), vec![2.0, 9.0]),
    ///     condition
    /// );
    /// assert!(Condition::parse("-drop_z_above 30").unwrap().is_none());
    /// ```
    pub fn parse(expression: &str) -> Result<Option<Condition>> {
        let expression = expression.trim();
        if expression.is_empty() || expression.starts_with('-') {
            return Ok(None);
        }

        // longest operators first so ">=" is not found as ">"
        const OPERATORS: [&str; 9] = [
            "%between%", "%in%", "%out%", "==", "!=", ">=", "<=", ">", "<",
        ];

        let (op, position) = OPERATORS
            .iter()
            .find_map(|op| expression.find(op).map(|position| (*op, position)))
            .ok_or_else(|| Error::InvalidFilter(format!("no operator found in '{expression}'")))?;

        let attribute = Schema::normalize_name(expression[..position].trim()).to_string();
        let rhs = expression[position + op.len()..].trim();
        let values = parse_numbers(rhs)?;
        let single = || -> Result<f64> {
            values.first().copied().ok_or_else(|| {
                Error::InvalidFilter(format!("missing value in '{expression}'"))
            })
        };

        let condition = match op {
            "==" => Condition::Equal(attribute, single()?),
            "!=" => Condition::Different(attribute, single()?),
            ">" => Condition::Above(attribute, single()?),
            "<" => Condition::Below(attribute, single()?),
            ">=" => Condition::AboveEqual(attribute, single()?),
            "<=" => Condition::BelowEqual(attribute, single()?),
            "%in%" => Condition::In(attribute, values),
            "%out%" => Condition::Out(attribute, values),
            "%between%" => {
                if values.len() != 2 {
                    return Err(Error::InvalidFilter(
                        "%between% must have two values".to_string(),
                    ));
                }
                let (low, high) = if values[0] <= values[1] {
                    (values[0], values[1])
                } else {
                    (values[1], values[0])
                };
                Condition::Between(attribute, low, high)
            }
            _ => unreachable!(),
        };

        Ok(Some(condition))
    }

    /// The attribute this condition reads.
    pub fn attribute(&self) -> &str {
        match self {
            Condition::Below(a, _)
            | Condition::BelowEqual(a, _)
            | Condition::Above(a, _)
            | Condition::AboveEqual(a, _)
            | Condition::Between(a, _, _)
            | Condition::Equal(a, _)
            | Condition::Different(a, _)
            | Condition::In(a, _)
            | Condition::Out(a, _) => a,
        }
    }

    /// Should this point be rejected?
    ///
    /// A point without the attribute reads as 0.0, matching the accessor
    /// default.
    pub fn reject(&self, point: &PointRef) -> bool {
        let value = |name: &str| point.value(name).unwrap_or(0.0);
        match self {
            Condition::Below(a, threshold) => value(a) >= *threshold,
            Condition::BelowEqual(a, threshold) => value(a) > *threshold,
            Condition::Above(a, threshold) => value(a) <= *threshold,
            Condition::AboveEqual(a, threshold) => value(a) < *threshold,
            Condition::Between(a, low, high) => {
                let v = value(a);
                v < *low || v >= *high
            }
            Condition::Equal(a, expected) => value(a) != *expected,
            Condition::Different(a, expected) => value(a) == *expected,
            Condition::In(a, list) => !list.contains(&value(a)),
            Condition::Out(a, list) => list.contains(&value(a)),
        }
    }
}

fn parse_numbers(rhs: &str) -> Result<Vec<f64>> {
    rhs.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| Error::InvalidFilter(format!("'{token}' is not a number")))
        })
        .collect()
}

/// An evaluated list of filter conditions plus the native flags passed
/// through to codecs.
#[derive(Clone, Debug, Default)]
pub struct PointFilter {
    conditions: Vec<Condition>,
    native: Vec<String>,
}

impl PointFilter {
    /// Creates an empty filter that rejects nothing.
    pub fn new() -> PointFilter {
        PointFilter::default()
    }

    /// Parses a list of expressions into a filter.
    ///
    /// # Examples
    ///
    /// ```
    /// # use laspipe::PointFilter;
    /// let filter = PointFilter::from_expressions(&[
    ///     "Classification == 2".to_string(),
    ///     "-keep_first".to_string(),
    /// ]).unwrap();
    /// assert_eq!(1, filter.len());
    /// assert_eq!(&["-keep_first"], filter.native_flags());
    /// ```
    pub fn from_expressions(expressions: &[String]) -> Result<PointFilter> {
        let mut filter = PointFilter::new();
        for expression in expressions {
            filter.add_condition(expression)?;
        }
        Ok(filter)
    }

    /// Parses one expression and appends it.
    pub fn add_condition(&mut self, expression: &str) -> Result<()> {
        let trimmed = expression.trim();
        if trimmed.starts_with('-') {
            self.native.push(trimmed.to_string());
            return Ok(());
        }
        if let Some(condition) = Condition::parse(trimmed)? {
            self.conditions.push(condition);
        }
        Ok(())
    }

    /// Should this point be rejected by any condition?
    pub fn reject(&self, point: &PointRef) -> bool {
        self.conditions.iter().any(|condition| condition.reject(point))
    }

    /// The number of parsed conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// True when no condition was registered.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// The native flags to forward verbatim to a codec.
    pub fn native_flags(&self) -> &[String] {
        &self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attribute, AttributeType, Point, Schema};

    fn point_with(classification: f64, z: f64) -> Point {
        let mut schema = Schema::core();
        schema.add_attribute(Attribute::new("Classification", AttributeType::Uint8));
        let mut point = Point::new(&schema);
        point.set_value("Classification", classification);
        point.set_z(z);
        point
    }

    #[test]
    fn operators() {
        let point = point_with(2.0, 1.5);
        let keep = |expression: &str| {
            !Condition::parse(expression)
                .unwrap()
                .unwrap()
                .reject(&point.as_ref())
        };
        assert!(keep("Classification == 2"));
        assert!(!keep("Classification != 2"));
        assert!(keep("z < 2"));
        assert!(!keep("z > 2"));
        assert!(keep("z >= 1.5"));
        assert!(keep("z <= 1.5"));
        assert!(keep("c %in% 1 2 3"));
        assert!(!keep("c %out% 1 2 3"));
        assert!(keep("z %between% 1 2"));
        assert!(!keep("z %between% 2 3"));
    }

    #[test]
    fn between_is_half_open() {
        let condition = Condition::parse("z %between% 0 1.5").unwrap().unwrap();
        assert!(condition.reject(&point_with(0.0, 1.5).as_ref()));
        assert!(!condition.reject(&point_with(0.0, 0.0).as_ref()));
    }

    #[test]
    fn between_swaps_reversed_bounds() {
        assert_eq!(
            Condition::parse("z %between% 2 1").unwrap(),
            Condition::parse("z %between% 1 2").unwrap()
        );
    }

    #[test]
    fn aliases_are_normalized() {
        let condition = Condition::parse("t > 0").unwrap().unwrap();
        assert_eq!("gpstime", condition.attribute());
    }

    #[test]
    fn invalid_expressions() {
        assert!(Condition::parse("z ~ 3").is_err());
        assert!(Condition::parse("z < banana").is_err());
        assert!(Condition::parse("z %between% 1").is_err());
    }

    #[test]
    fn filter_combines_conditions() {
        let filter = PointFilter::from_expressions(&[
            "Classification == 2".to_string(),
            "z %between% 0 10".to_string(),
        ])
        .unwrap();
        assert!(!filter.reject(&point_with(2.0, 5.0).as_ref()));
        assert!(filter.reject(&point_with(1.0, 5.0).as_ref()));
        assert!(filter.reject(&point_with(2.0, 50.0).as_ref()));
    }
}
