// The fixed primitive vocabulary. Dispatch is by interned name at call
// sites; `is_builtin` doubles as the analyser's exclusion rule so builtin
// names never become todo placeholders.
use crate::number::Number;
use crate::unit::{UnitError, UnitValue, Value};
use crate::Ident;

use super::error::RuntimeError;
use super::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Exp,
    Ln,
    Round,
    Floor,
    If,
    Sum,
    Mean,
    Count,
    Random,
    Time,
    PointerX,
    PointerY,
    PointerDown,
    Slider,
    Button,
    Checkbox,
    Plot,
}

pub fn lookup(name: &str) -> Option<Builtin> {
    let builtin = match name {
        "add" => Builtin::Add,
        "sub" => Builtin::Sub,
        "mul" => Builtin::Mul,
        "div" => Builtin::Div,
        "pow" => Builtin::Pow,
        "min" => Builtin::Min,
        "max" => Builtin::Max,
        "abs" => Builtin::Abs,
        "sqrt" => Builtin::Sqrt,
        "sin" => Builtin::Sin,
        "cos" => Builtin::Cos,
        "exp" => Builtin::Exp,
        "ln" => Builtin::Ln,
        "round" => Builtin::Round,
        "floor" => Builtin::Floor,
        "if" => Builtin::If,
        "sum" => Builtin::Sum,
        "mean" => Builtin::Mean,
        "count" => Builtin::Count,
        "random" => Builtin::Random,
        "time" => Builtin::Time,
        "pointer_x" => Builtin::PointerX,
        "pointer_y" => Builtin::PointerY,
        "pointer_down" => Builtin::PointerDown,
        "slider" => Builtin::Slider,
        "button" => Builtin::Button,
        "checkbox" => Builtin::Checkbox,
        "plot" => Builtin::Plot,
        _ => return None,
    };
    Some(builtin)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

// (min, max) accepted argument counts.
fn arity(builtin: Builtin) -> (u8, u8) {
    match builtin {
        Builtin::Add
        | Builtin::Sub
        | Builtin::Mul
        | Builtin::Div
        | Builtin::Pow
        | Builtin::Min
        | Builtin::Max => (2, 2),
        Builtin::Abs
        | Builtin::Sqrt
        | Builtin::Sin
        | Builtin::Cos
        | Builtin::Exp
        | Builtin::Ln
        | Builtin::Round
        | Builtin::Floor
        | Builtin::Sum
        | Builtin::Mean
        | Builtin::Count => (1, 1),
        Builtin::If => (3, 3),
        Builtin::Random
        | Builtin::Time
        | Builtin::PointerX
        | Builtin::PointerY
        | Builtin::PointerDown
        | Builtin::Button => (0, 0),
        Builtin::Checkbox => (0, 1),
        Builtin::Slider => (3, 3),
        Builtin::Plot => (1, u8::MAX),
    }
}

pub fn apply(
    runtime: &mut Runtime,
    builtin: Builtin,
    name: Ident,
    args: Vec<UnitValue>,
    time: u64,
) -> Result<UnitValue, RuntimeError> {
    let (min, max) = arity(builtin);
    let got = args.len().min(u8::MAX as usize) as u8;
    if got < min || got > max {
        return Err(RuntimeError::InvalidNumberOfArguments(
            name.as_str(),
            min,
            got,
        ));
    }

    let result = match builtin {
        Builtin::Add => args[0].add(&args[1]),
        Builtin::Sub => args[0].subtract(&args[1]),
        Builtin::Mul => args[0].multiply(&args[1]),
        Builtin::Div => args[0].divide(&args[1]),
        Builtin::Pow => args[0].power(&args[1]),
        Builtin::Min => pick(&args[0], &args[1], true),
        Builtin::Max => pick(&args[0], &args[1], false),
        Builtin::Abs => unit_preserving(&args[0], f64::abs),
        Builtin::Round => unit_preserving(&args[0], f64::round),
        Builtin::Floor => unit_preserving(&args[0], f64::floor),
        Builtin::Sqrt => dimensionless(&args[0], f64::sqrt),
        Builtin::Sin => dimensionless(&args[0], f64::sin),
        Builtin::Cos => dimensionless(&args[0], f64::cos),
        Builtin::Exp => dimensionless(&args[0], f64::exp),
        Builtin::Ln => dimensionless(&args[0], f64::ln),
        Builtin::If => {
            if args[0].is_truthy() {
                args[1].clone()
            } else {
                args[2].clone()
            }
        }
        Builtin::Sum => aggregate(&args[0]).0,
        Builtin::Mean => {
            let (sum, count) = aggregate(&args[0]);
            sum.divide(&UnitValue::number(count.max(1)))
        }
        Builtin::Count => match &args[0].value {
            Value::Array(items) => UnitValue::number(items.len()),
            _ => UnitValue::number(1),
        },
        Builtin::Random => UnitValue::number(fastrand::f64()),
        Builtin::Time => {
            UnitValue::number(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
        }
        Builtin::PointerX => UnitValue::number(runtime.pointer().x),
        Builtin::PointerY => UnitValue::number(runtime.pointer().y),
        Builtin::PointerDown => UnitValue::bool(runtime.pointer().down),
        Builtin::Slider => {
            let lo = args[0].numeric().value();
            let hi = args[1].numeric().value();
            UnitValue::number(args[2].numeric().value().clamp(lo.min(hi), lo.max(hi)))
        }
        Builtin::Button => UnitValue::bool(false),
        Builtin::Checkbox => {
            UnitValue::bool(args.first().map(UnitValue::is_truthy).unwrap_or(false))
        }
        Builtin::Plot => {
            runtime.record_plot(time, args.iter().map(UnitValue::numeric).collect());
            args[0].clone()
        }
    };
    Ok(result)
}

fn pick(a: &UnitValue, b: &UnitValue, smaller: bool) -> UnitValue {
    // Same comparison discipline as addition: the operands must agree
    // dimensionally, and taint wins over everything.
    let chosen = if (a.numeric() <= b.numeric()) == smaller { a } else { b };
    if a.error.is_some() || b.error.is_some() {
        let mut result = UnitValue::number(chosen.numeric());
        result.error = Some(UnitError::Unchecked);
        return result;
    }
    if !a.equals(b) {
        let mut result = UnitValue::number(chosen.numeric());
        result.error = Some(UnitError::Mismatch);
        return result;
    }
    chosen.clone()
}

fn unit_preserving(arg: &UnitValue, f: fn(f64) -> f64) -> UnitValue {
    let value = Number::new(f(arg.numeric().value()));
    if arg.error.is_some() {
        let mut result = UnitValue::number(value);
        result.error = Some(UnitError::Unchecked);
        return result;
    }
    UnitValue::number(value).with_unit(arg.units())
}

// Transcendentals only make sense on dimensionless magnitudes; the unit is
// dropped rather than flagged, keeping the overlay advisory.
fn dimensionless(arg: &UnitValue, f: fn(f64) -> f64) -> UnitValue {
    let value = Number::new(f(arg.numeric().value()));
    if arg.error.is_some() {
        let mut result = UnitValue::number(value);
        result.error = Some(UnitError::Unchecked);
        return result;
    }
    UnitValue::number(value)
}

fn aggregate(arg: &UnitValue) -> (UnitValue, usize) {
    match &arg.value {
        Value::Array(items) => {
            let mut iter = items.iter();
            match iter.next() {
                Some(first) => {
                    let sum = iter.fold(first.clone(), |acc, item| acc.add(item));
                    (sum, items.len())
                }
                None => (UnitValue::number(0), 0),
            }
        }
        _ => (arg.clone(), 1),
    }
}
