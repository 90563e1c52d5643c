use std::fmt::Write as _;

/// A value as it is stored in, and exchanged with, the remote store.
pub type RawValue = serde_json::Value;

/// A decoded, display-ready value.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// A number, already scaled and rounded. `precision` is the number of decimals to display.
    Number { value: f64, precision: u8 },
    /// A boolean-like value together with the label it is shown as.
    Flag { value: bool, label: &'static str },
    Text(String),
    List(Vec<Decoded>),
}

impl Decoded {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Decoded::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Decoded::Flag { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decoded::Number { value, precision } => {
                write!(f, "{value:.prec$}", prec = usize::from(*precision))
            }
            Decoded::Flag { label, .. } => f.write_str(label),
            Decoded::Text(text) => f.write_str(text),
            Decoded::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl serde::Serialize for Decoded {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Decoded::Number { value, .. } => serializer.serialize_f64(*value),
            Decoded::Flag { label, .. } => serializer.serialize_str(label),
            Decoded::Text(text) => serializer.serialize_str(text),
            Decoded::List(items) => serializer.collect_seq(items),
        }
    }
}

/// Interpret a raw value as a number. Numeric strings are accepted, as the store hands some
/// numeric types back in their textual form.
pub(crate) fn as_number(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Number(n) => n.as_f64(),
        RawValue::String(s) => s.trim().parse().ok().filter(|v: &f64| v.is_finite()),
        _ => None,
    }
}

/// The raw form of a number. Whole numbers are stored as integers.
pub(crate) fn number(value: f64) -> RawValue {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < EXACT {
        RawValue::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(RawValue::Null, RawValue::Number)
    }
}

/// Multiply a numeric raw value by `factor`. Anything else is returned unchanged.
pub(crate) fn scaled(raw: &RawValue, factor: f64) -> RawValue {
    match as_number(raw) {
        Some(value) => number(value * factor),
        None => raw.clone(),
    }
}

/// Interpret a raw value as `true`/`false`.
///
/// Accepts JSON booleans, the exact strings `"true"` and `"false"`, and the numbers 0 and 1.
pub(crate) fn as_boolean(raw: &RawValue) -> Option<bool> {
    match raw {
        RawValue::Bool(b) => Some(*b),
        RawValue::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        RawValue::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Split a raw list into its components.
///
/// Lists arrive either as JSON arrays or joined by commas into a single string. Joined
/// components that spell a number or a boolean are typed accordingly.
pub(crate) fn components(raw: &RawValue) -> Option<Vec<RawValue>> {
    match raw {
        RawValue::Array(items) => Some(items.clone()),
        RawValue::String(s) if s.trim().is_empty() => Some(Vec::new()),
        RawValue::String(s) => Some(s.split(',').map(joined_component).collect()),
        _ => None,
    }
}

fn joined_component(part: &str) -> RawValue {
    let part = part.trim();
    serde_json::from_str::<RawValue>(part)
        .ok()
        .filter(|v| v.is_number() || v.is_boolean())
        .unwrap_or_else(|| RawValue::String(part.to_string()))
}

/// Render a raw value for display without any interpretation.
pub(crate) fn as_text(raw: &RawValue) -> String {
    match raw {
        RawValue::String(s) => s.clone(),
        RawValue::Array(items) => {
            let mut out = String::new();
            for (idx, item) in items.iter().enumerate() {
                if idx != 0 {
                    out.push(',');
                }
                let _infallible = write!(out, "{}", as_text(item));
            }
            out
        }
        other => other.to_string(),
    }
}

/// Compare two raw values the way the store's own clients do: numbers by value regardless of
/// representation, booleans against 0/1, numeric strings against numbers.
pub fn loosely_equal(a: &RawValue, b: &RawValue) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (RawValue::Bool(_), _) | (_, RawValue::Bool(_)) => {
            matches!((as_boolean(a), as_boolean(b)), (Some(x), Some(y)) if x == y)
        }
        (RawValue::Number(_) | RawValue::String(_), RawValue::Number(_) | RawValue::String(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_display_with_their_precision() {
        assert_eq!(Decoded::Number { value: 2.0, precision: 1 }.to_string(), "2.0");
        assert_eq!(Decoded::Number { value: -0.125, precision: 3 }.to_string(), "-0.125");
        assert_eq!(Decoded::Number { value: 7.0, precision: 0 }.to_string(), "7");
        let list = Decoded::List(vec![
            Decoded::Flag { value: true, label: "ON" },
            Decoded::Flag { value: false, label: "OFF" },
        ]);
        assert_eq!(list.to_string(), "ON, OFF");
        assert_eq!(serde_json::to_value(&list).unwrap(), json!(["ON", "OFF"]));
    }

    #[test]
    fn lenient_number_parsing() {
        assert_eq!(as_number(&json!(3)), Some(3.0));
        assert_eq!(as_number(&json!(" -1.5 ")), Some(-1.5));
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_number(&json!(true)), None);
    }

    #[test]
    fn scaling_keeps_whole_numbers_integral() {
        assert_eq!(scaled(&json!(1.5), 1000.0), json!(1500));
        assert_eq!(scaled(&json!("-2"), -1.0), json!(2));
        assert_eq!(scaled(&json!(0), -1.0), json!(0));
        assert_eq!(scaled(&json!(0.25), 3.0), json!(0.75));
        assert_eq!(scaled(&json!("fast"), -1.0), json!("fast"));
    }

    #[test]
    fn strict_boolean_parsing() {
        assert_eq!(as_boolean(&json!("true")), Some(true));
        assert_eq!(as_boolean(&json!(0)), Some(false));
        assert_eq!(as_boolean(&json!(1.0)), Some(true));
        assert_eq!(as_boolean(&json!(2)), None);
        assert_eq!(as_boolean(&json!("TRUE")), None);
        assert_eq!(as_boolean(&json!("1")), None);
    }

    #[test]
    fn list_components() {
        assert_eq!(components(&json!("1, 2.5,-3")).unwrap(), [json!(1), json!(2.5), json!(-3)]);
        assert_eq!(components(&json!("false,on")).unwrap(), [json!(false), json!("on")]);
        assert_eq!(components(&json!([true, false])).unwrap(), [json!(true), json!(false)]);
        assert!(components(&json!("")).unwrap().is_empty());
        assert!(components(&json!(5)).is_none());
        assert_eq!(as_text(&json!([1, "a", true])), "1,a,true");
    }

    #[test]
    fn loose_equality() {
        assert!(loosely_equal(&json!(2), &json!(2.0)));
        assert!(loosely_equal(&json!("1"), &json!(1)));
        assert!(loosely_equal(&json!(true), &json!(1)));
        assert!(!loosely_equal(&json!(false), &json!(2)));
        assert!(!loosely_equal(&json!("on"), &json!(1)));
        assert!(!loosely_equal(&json!(null), &json!(0)));
    }
}
