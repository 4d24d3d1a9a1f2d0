// Dimensional bookkeeping is an advisory overlay: arithmetic always produces
// a numeric result, and incompatibilities travel alongside it as an error
// tag instead of aborting evaluation.
use std::fmt;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::number::{self, Number};

/// A mapping from dimension symbol to non-zero integer exponent.
///
/// The empty mapping is the "normal form" (dimensionless). The map is
/// cleaned after every mutation, so zero exponents never survive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Units(FxHashMap<SmolStr, i32>);

impl Units {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(entries: &[(&str, i32)]) -> Self {
        let mut units = Units(
            entries
                .iter()
                .map(|(symbol, exponent)| (SmolStr::new(symbol), *exponent))
                .collect(),
        );
        units.clean();
        units
    }

    /// Parses a unit suffix such as `kg`, `m/s2` or `kg.m/s2`.
    ///
    /// `.` joins factors, `/` starts the denominator and a trailing integer
    /// is the exponent magnitude. Unparseable fragments are ignored.
    pub fn parse(text: &str) -> Self {
        let mut units = Units::new();
        let mut sign = 1;
        for part in text.split('/') {
            for factor in part.split('.') {
                let factor = factor.trim();
                if factor.is_empty() {
                    continue;
                }
                let symbol: String = factor
                    .chars()
                    .take_while(|c| c.is_alphabetic() || *c == '_')
                    .collect();
                if symbol.is_empty() {
                    continue;
                }
                let exponent = factor[symbol.len()..].trim().parse::<i32>().unwrap_or(1);
                *units.0.entry(SmolStr::new(&symbol)).or_insert(0) += sign * exponent;
            }
            sign = -1;
        }
        units.clean();
        units
    }

    /// Removes all zero-exponent entries.
    pub fn clean(&mut self) {
        self.0.retain(|_, exponent| *exponent != 0);
    }

    /// `true` iff the mapping is empty (dimensionless).
    pub fn is_normal(&self) -> bool {
        self.0.is_empty()
    }

    /// The positive-exponent sub-mapping, used for textual rendering.
    pub fn nominator(&self) -> Units {
        Units(
            self.0
                .iter()
                .filter(|(_, exponent)| **exponent > 0)
                .map(|(symbol, exponent)| (symbol.clone(), *exponent))
                .collect(),
        )
    }

    /// The negative-exponent sub-mapping.
    pub fn denominator(&self) -> Units {
        Units(
            self.0
                .iter()
                .filter(|(_, exponent)| **exponent < 0)
                .map(|(symbol, exponent)| (symbol.clone(), *exponent))
                .collect(),
        )
    }

    pub fn get(&self, symbol: &str) -> i32 {
        self.0.get(symbol).copied().unwrap_or(0)
    }

    fn merge(&self, other: &Units, sign: i32) -> Units {
        let mut merged = self.clone();
        for (symbol, exponent) in &other.0 {
            *merged.0.entry(symbol.clone()).or_insert(0) += sign * exponent;
        }
        merged.clean();
        merged
    }

    fn scale(&self, factor: i32) -> Units {
        let mut scaled = Units(
            self.0
                .iter()
                .map(|(symbol, exponent)| (symbol.clone(), exponent * factor))
                .collect(),
        );
        scaled.clean();
        scaled
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_normal() {
            return Ok(());
        }
        let render = |units: &Units, negate: bool| {
            units
                .0
                .iter()
                .sorted_by(|a, b| a.0.cmp(b.0))
                .map(|(symbol, exponent)| {
                    let exponent = if negate { -exponent } else { *exponent };
                    if exponent == 1 {
                        symbol.to_string()
                    } else {
                        format!("{symbol}{exponent}")
                    }
                })
                .join(".")
        };
        let nominator = self.nominator();
        let denominator = self.denominator();
        if nominator.is_normal() {
            write!(f, "1/{}", render(&denominator, true))
        } else if denominator.is_normal() {
            write!(f, "{}", render(&nominator, false))
        } else {
            write!(f, "{}/{}", render(&nominator, false), render(&denominator, true))
        }
    }
}

/// The advisory error tag carried by a [`UnitValue`].
///
/// `Mismatch` marks the first detected incompatibility in a lineage; every
/// operation consuming an already-tagged operand produces `Unchecked`
/// instead, so `Mismatch` appears at most once per tainted lineage.
/// `BadExponent` is structural misuse of `power`, not a dimensional
/// mismatch, and deliberately uses its own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("Addition unit mismatch.")]
    Mismatch,
    #[error("Operand carried a unit error; result units were not checked.")]
    Unchecked,
    #[error("Exponent must be a dimensionless integer.")]
    BadExponent,
}

impl UnitError {
    pub fn tag(&self) -> &'static str {
        match self {
            UnitError::Mismatch => "unitError",
            UnitError::Unchecked => "uncheckedUnit",
            UnitError::BadExponent => "exponentError",
        }
    }
}

/// The shape of a computed value: a scalar, a vector, or a labeled entry
/// inside a vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(Number),
    Bool(bool),
    String(String),
    Array(Vec<UnitValue>),
    Labeled(SmolStr, Box<UnitValue>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(Number::default())
    }
}

/// A value paired with its dimensional exponents and optional error tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitValue {
    pub value: Value,
    units: Units,
    pub error: Option<UnitError>,
}

impl UnitValue {
    pub fn number(value: impl Into<Number>) -> Self {
        UnitValue {
            value: Value::Number(value.into()),
            units: Units::new(),
            error: None,
        }
    }

    pub fn bool(value: bool) -> Self {
        UnitValue {
            value: Value::Bool(value),
            units: Units::new(),
            error: None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        UnitValue {
            value: Value::String(value.into()),
            units: Units::new(),
            error: None,
        }
    }

    pub fn array(values: Vec<UnitValue>) -> Self {
        UnitValue {
            value: Value::Array(values),
            units: Units::new(),
            error: None,
        }
    }

    pub fn labeled(label: impl Into<SmolStr>, inner: UnitValue) -> Self {
        UnitValue {
            value: Value::Labeled(label.into(), Box::new(inner)),
            units: Units::new(),
            error: None,
        }
    }

    pub fn nan() -> Self {
        UnitValue::number(number::NAN)
    }

    /// A value-preserving copy carrying a defensive copy of `units`,
    /// never an alias of the caller's mapping.
    pub fn with_unit(&self, units: &Units) -> Self {
        let mut copied = units.clone();
        copied.clean();
        UnitValue {
            value: self.value.clone(),
            units: copied,
            error: self.error,
        }
    }

    pub fn units(&self) -> &Units {
        &self.units
    }

    pub fn is_normal(&self) -> bool {
        self.units.is_normal()
    }

    pub fn has_unit(&self) -> bool {
        !self.is_normal()
    }

    /// Unit equality only: same non-zero symbols with the same exponents,
    /// in any order. Values are never compared.
    pub fn equals(&self, other: &UnitValue) -> bool {
        self.units == other.units
    }

    /// The numeric view of this value; non-numbers read as NaN so that
    /// arithmetic stays total.
    pub fn numeric(&self) -> Number {
        match &self.value {
            Value::Number(n) => *n,
            Value::Bool(b) => {
                if *b {
                    Number::from(1)
                } else {
                    Number::from(0)
                }
            }
            Value::Labeled(_, inner) => inner.numeric(),
            _ => number::NAN,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Number(n) => !n.is_zero() && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Labeled(_, inner) => inner.is_truthy(),
        }
    }

    fn tainted(&self, other: &UnitValue) -> bool {
        self.error.is_some() || other.error.is_some()
    }

    fn unchecked(value: Number) -> Self {
        UnitValue {
            value: Value::Number(value),
            units: Units::new(),
            error: Some(UnitError::Unchecked),
        }
    }

    pub fn add(&self, other: &UnitValue) -> UnitValue {
        let sum = self.numeric() + other.numeric();
        if self.tainted(other) {
            return UnitValue::unchecked(sum);
        }
        if !self.equals(other) {
            return UnitValue {
                value: Value::Number(sum),
                units: Units::new(),
                error: Some(UnitError::Mismatch),
            };
        }
        UnitValue {
            value: Value::Number(sum),
            units: self.units.clone(),
            error: None,
        }
    }

    pub fn subtract(&self, other: &UnitValue) -> UnitValue {
        let negated = UnitValue {
            value: Value::Number(-other.numeric()),
            units: other.units.clone(),
            error: other.error,
        };
        self.add(&negated)
    }

    pub fn multiply(&self, other: &UnitValue) -> UnitValue {
        let product = self.numeric() * other.numeric();
        if self.tainted(other) {
            return UnitValue::unchecked(product);
        }
        let units = if self.is_normal() {
            other.units.clone()
        } else if other.is_normal() {
            self.units.clone()
        } else {
            self.units.merge(&other.units, 1)
        };
        UnitValue {
            value: Value::Number(product),
            units,
            error: None,
        }
    }

    pub fn divide(&self, other: &UnitValue) -> UnitValue {
        let quotient = self.numeric() / other.numeric();
        if self.tainted(other) {
            return UnitValue::unchecked(quotient);
        }
        // Identity short-circuit on either side, as in `multiply`: a
        // dimensionless operand hands the other operand's unit through
        // unchanged, even when that operand is the denominator.
        let units = if self.is_normal() {
            other.units.clone()
        } else if other.is_normal() {
            self.units.clone()
        } else {
            self.units.merge(&other.units, -1)
        };
        UnitValue {
            value: Value::Number(quotient),
            units,
            error: None,
        }
    }

    pub fn power(&self, exponent: &UnitValue) -> UnitValue {
        let raised = self.numeric().powf(exponent.numeric());
        if self.tainted(exponent) {
            return UnitValue::unchecked(raised);
        }
        if exponent.has_unit() || !exponent.numeric().is_int() {
            return UnitValue {
                value: Value::Number(raised),
                units: Units::new(),
                error: Some(UnitError::BadExponent),
            };
        }
        UnitValue {
            value: Value::Number(raised),
            units: self.units.scale(exponent.numeric().to_int() as i32),
            error: None,
        }
    }
}

/// A tree of units structurally parallel to a value tree, consumed by
/// [`create`].
#[derive(Debug, Clone, PartialEq)]
pub enum UnitSpec {
    Leaf(Units),
    Array(Vec<UnitSpec>),
    Labeled(SmolStr, Box<UnitSpec>),
}

/// Elementwise zip of a value tree and a parallel unit tree.
///
/// Nesting and labels are preserved; a leaf that is already a [`UnitValue`]
/// has its units overwritten rather than being wrapped a second time.
pub fn create(value: &UnitValue, spec: &UnitSpec) -> UnitValue {
    match (&value.value, spec) {
        (Value::Array(items), UnitSpec::Array(specs)) => UnitValue::array(
            items
                .iter()
                .zip(specs)
                .map(|(item, item_spec)| create(item, item_spec))
                .collect(),
        ),
        (Value::Labeled(label, inner), UnitSpec::Labeled(_, inner_spec)) => UnitValue {
            value: Value::Labeled(label.clone(), Box::new(create(inner, inner_spec))),
            units: Units::new(),
            error: value.error,
        },
        (_, UnitSpec::Leaf(units)) => value.with_unit(units),
        // Shape mismatch: keep the value untouched rather than guessing.
        _ => value.clone(),
    }
}

impl fmt::Display for UnitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Number(n) => write!(f, "{}", n)?,
            Value::Bool(b) => write!(f, "{}", b)?,
            Value::String(s) => write!(f, "{}", s)?,
            Value::Array(items) => {
                write!(f, "[{}]", items.iter().map(|v| v.to_string()).join(", "))?
            }
            Value::Labeled(label, inner) => write!(f, "{}: {}", label, inner)?,
        }
        if self.has_unit() {
            write!(f, " {}", self.units)?;
        }
        if let Some(error) = &self.error {
            write!(f, " ({})", error.tag())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("kg", &[("kg", 1)])]
    #[case("m/s2", &[("m", 1), ("s", -2)])]
    #[case("kg.m/s2", &[("kg", 1), ("m", 1), ("s", -2)])]
    #[case("m2", &[("m", 2)])]
    #[case("", &[])]
    fn test_parse_suffix(#[case] text: &str, #[case] expected: &[(&str, i32)]) {
        assert_eq!(Units::parse(text), Units::of(expected));
    }

    #[rstest]
    #[case(&[("kg", 1)], "kg")]
    #[case(&[("m", 1), ("s", -2)], "m/s2")]
    #[case(&[("s", -1)], "1/s")]
    #[case(&[("kg", 1), ("m", 2)], "kg.m2")]
    fn test_display(#[case] units: &[(&str, i32)], #[case] expected: &str) {
        assert_eq!(Units::of(units).to_string(), expected);
    }

    #[test]
    fn test_clean_drops_zero_exponents() {
        let units = Units::of(&[("kg", 0), ("m", 1)]);
        assert_eq!(units.get("kg"), 0);
        assert_eq!(units.get("m"), 1);
        assert!(!units.is_normal());
    }

    #[test]
    fn test_nominator_denominator_partition() {
        let units = Units::of(&[("kg", 1), ("m", 1), ("s", -2)]);
        assert_eq!(units.nominator(), Units::of(&[("kg", 1), ("m", 1)]));
        assert_eq!(units.denominator(), Units::of(&[("s", -2)]));
    }

    #[test]
    fn test_with_unit_is_a_defensive_copy() {
        let mut units = Units::of(&[("kg", 1)]);
        let value = UnitValue::number(5).with_unit(&units);
        units.0.insert(SmolStr::new("m"), 3);
        assert_eq!(value.units(), &Units::of(&[("kg", 1)]));
    }

    #[test]
    fn test_equals_ignores_value() {
        let a = UnitValue::number(5).with_unit(&Units::of(&[("kg", 1)]));
        let b = UnitValue::number(99).with_unit(&Units::of(&[("kg", 1)]));
        assert!(a.equals(&b));
        assert!(!a.equals(&UnitValue::number(5)));
    }

    #[test]
    fn test_add_same_units() {
        let a = UnitValue::number(2).with_unit(&Units::of(&[("m", 1)]));
        let b = UnitValue::number(3).with_unit(&Units::of(&[("m", 1)]));
        let sum = a.add(&b);
        assert_eq!(sum.numeric(), Number::from(5));
        assert_eq!(sum.units(), &Units::of(&[("m", 1)]));
        assert_eq!(sum.error, None);
    }

    #[test]
    fn test_add_mismatch_detected_once() {
        let a = UnitValue::number(25).with_unit(&Units::of(&[("kg", 1)]));
        let b = UnitValue::number(24);
        let c = a.add(&b);
        assert_eq!(c.error, Some(UnitError::Mismatch));
        assert_eq!(c.error.unwrap().tag(), "unitError");
        assert!(c.is_normal());
        assert_eq!(c.numeric(), Number::from(49));

        // Downstream consumers are unchecked, never a second mismatch.
        let y = c.add(&b);
        assert_eq!(y.error, Some(UnitError::Unchecked));
        assert_eq!(y.error.unwrap().tag(), "uncheckedUnit");
        assert!(y.is_normal());
        assert_eq!(y.numeric(), Number::from(73));
    }

    #[test]
    fn test_multiply_commutes() {
        let a = UnitValue::number(5).with_unit(&Units::of(&[("kg", 1)]));
        let b = UnitValue::number(6).with_unit(&Units::of(&[("m", 1), ("s", -2)]));
        let ab = a.multiply(&b);
        let ba = b.multiply(&a);
        assert_eq!(ab.numeric(), Number::from(30));
        assert_eq!(ab.units(), &Units::of(&[("kg", 1), ("m", 1), ("s", -2)]));
        assert!(ab.equals(&ba));
        assert_eq!(ba.numeric(), Number::from(30));
    }

    #[test]
    fn test_multiply_identity_short_circuit() {
        let scalar = UnitValue::number(2);
        let speed = UnitValue::number(3).with_unit(&Units::of(&[("m", 1), ("s", -1)]));
        assert_eq!(scalar.multiply(&speed).units(), speed.units());
        assert_eq!(speed.multiply(&scalar).units(), speed.units());
    }

    #[test]
    fn test_divide_identity_short_circuit() {
        let scalar = UnitValue::number(10);
        let time = UnitValue::number(2).with_unit(&Units::of(&[("s", 1)]));
        assert_eq!(time.divide(&scalar).units(), time.units());
        // The short-circuit applies to the numerator too: the unit passes
        // through without inversion.
        let rate = scalar.divide(&time);
        assert_eq!(rate.numeric(), Number::from(5));
        assert_eq!(rate.units(), time.units());
    }

    #[test]
    fn test_divide_cancels_exponents() {
        let distance = UnitValue::number(10).with_unit(&Units::of(&[("m", 1)]));
        let time = UnitValue::number(2).with_unit(&Units::of(&[("s", 1)]));
        let speed = distance.divide(&time);
        assert_eq!(speed.numeric(), Number::from(5));
        assert_eq!(speed.units(), &Units::of(&[("m", 1), ("s", -1)]));

        let ratio = distance.divide(&distance);
        assert!(ratio.is_normal());
    }

    #[rstest]
    #[case(UnitValue::number(2.5), Some(UnitError::BadExponent))]
    #[case(
        UnitValue::number(2).with_unit(&Units::of(&[("s", 1)])),
        Some(UnitError::BadExponent)
    )]
    #[case(UnitValue::number(2), None)]
    fn test_power_exponent_rules(
        #[case] exponent: UnitValue,
        #[case] expected_error: Option<UnitError>,
    ) {
        let base = UnitValue::number(3).with_unit(&Units::of(&[("m", 1)]));
        let raised = base.power(&exponent);
        assert_eq!(raised.error, expected_error);
        // The numeric power is computed regardless.
        assert_eq!(raised.numeric(), Number::new(3f64.powf(exponent.numeric().value())));
        match expected_error {
            Some(_) => assert!(raised.is_normal()),
            None => assert_eq!(raised.units(), &Units::of(&[("m", 2)])),
        }
    }

    #[test]
    fn test_power_of_tainted_operand_is_unchecked() {
        let tainted = UnitValue::number(25)
            .with_unit(&Units::of(&[("kg", 1)]))
            .add(&UnitValue::number(1));
        let raised = tainted.power(&UnitValue::number(2));
        assert_eq!(raised.error, Some(UnitError::Unchecked));
    }

    #[test]
    fn test_create_zips_parallel_trees() {
        let value = UnitValue::array(vec![
            UnitValue::number(1),
            UnitValue {
                value: Value::Labeled(SmolStr::new("x"), Box::new(UnitValue::number(2))),
                units: Units::new(),
                error: None,
            },
        ]);
        let spec = UnitSpec::Array(vec![
            UnitSpec::Leaf(Units::of(&[("m", 1)])),
            UnitSpec::Labeled(SmolStr::new("x"), Box::new(UnitSpec::Leaf(Units::of(&[("s", 1)])))),
        ]);
        let created = create(&value, &spec);
        match &created.value {
            Value::Array(items) => {
                assert_eq!(items[0].units(), &Units::of(&[("m", 1)]));
                match &items[1].value {
                    Value::Labeled(label, inner) => {
                        assert_eq!(label.as_str(), "x");
                        assert_eq!(inner.units(), &Units::of(&[("s", 1)]));
                    }
                    other => panic!("expected labeled entry, got {:?}", other),
                }
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_create_overwrites_existing_units() {
        let value = UnitValue::number(7).with_unit(&Units::of(&[("kg", 1)]));
        let created = create(&value, &UnitSpec::Leaf(Units::of(&[("m", 1)])));
        assert_eq!(created.units(), &Units::of(&[("m", 1)]));
        assert_eq!(created.numeric(), Number::from(7));
    }
}
