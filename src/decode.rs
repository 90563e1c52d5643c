//! Turns the raw values of one poll cycle into a [`DecodedRecord`].
//!
//! Every field is decoded on its own. A malformed value produces a [`DecodeError`] for that field
//! only; its siblings in the same record are unaffected.

use crate::schema::{Element, PageSchema, Scale, VariableKey, VariableKind, VariableSpec};
use crate::value::{self, Decoded, RawValue};
use serde::Serialize as _;
use serde::ser::SerializeMap as _;

/// The label shown for a bitfield with no bit set.
pub const NO_BITS_SET: &str = "None";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("expected a number, found `{0}`")]
    NotANumber(RawValue),
    #[error("expected a boolean, found `{0}`")]
    NotABoolean(RawValue),
    #[error("expected a list, found `{0}`")]
    NotAList(RawValue),
    #[error("expected {expected} components, found {found}")]
    TooFewComponents { expected: usize, found: usize },
    #[error("bit {index} is neither set nor clear (`{value}`)")]
    NotABit { index: usize, value: RawValue },
    #[error("bit {index} is set but has no label")]
    UnlabeledBit { index: usize },
    #[error("could not decode component {index}")]
    Component {
        index: usize,
        #[source]
        source: Box<DecodeError>,
    },
    #[error("the store returned no value for this field")]
    Missing,
}

pub fn decode(spec: &VariableSpec, raw: &RawValue) -> Result<Decoded, DecodeError> {
    decode_kind(&spec.kind, raw)
}

pub fn decode_kind(kind: &VariableKind, raw: &RawValue) -> Result<Decoded, DecodeError> {
    match kind {
        VariableKind::Scalar(scale) => decode_scalar(scale, raw),
        VariableKind::Boolean(labels) => {
            let value =
                value::as_boolean(raw).ok_or_else(|| DecodeError::NotABoolean(raw.clone()))?;
            Ok(Decoded::Flag { value, label: labels.label(value) })
        }
        VariableKind::Vector(elements) => {
            let components = leading_components(raw, elements.len())?;
            let decoded = elements
                .iter()
                .zip(&components)
                .enumerate()
                .map(|(index, (element, component))| {
                    decode_element(element, component)
                        .map_err(|e| DecodeError::Component { index, source: Box::new(e) })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Decoded::List(decoded))
        }
        VariableKind::Bitfield(labels) => {
            let bits = value::components(raw).ok_or_else(|| DecodeError::NotAList(raw.clone()))?;
            if bits.len() < labels.len() {
                return Err(DecodeError::TooFewComponents {
                    expected: labels.len(),
                    found: bits.len(),
                });
            }
            let mut set = Vec::new();
            for (index, bit) in bits.iter().enumerate() {
                match (value::as_boolean(bit), labels.get(index)) {
                    (Some(true), Some(label)) => set.push(*label),
                    (Some(true), None) => return Err(DecodeError::UnlabeledBit { index }),
                    (Some(false), _) => {}
                    (None, _) => return Err(DecodeError::NotABit { index, value: bit.clone() }),
                }
            }
            if set.is_empty() {
                Ok(Decoded::Text(NO_BITS_SET.to_string()))
            } else {
                Ok(Decoded::Text(set.join(", ")))
            }
        }
        VariableKind::MinMaxPair(scale) => {
            let pair = leading_components(raw, 2)?;
            let [min, max] = [&pair[0], &pair[1]].map(|v| {
                value::as_number(v).ok_or_else(|| DecodeError::NotANumber(v.clone()))
            });
            let mean = (min? + max?) / 2.0;
            Ok(Decoded::Number { value: scale.apply(mean), precision: scale.precision })
        }
        VariableKind::Text => Ok(Decoded::Text(value::as_text(raw))),
    }
}

fn decode_scalar(scale: &Scale, raw: &RawValue) -> Result<Decoded, DecodeError> {
    let value = value::as_number(raw).ok_or_else(|| DecodeError::NotANumber(raw.clone()))?;
    Ok(Decoded::Number { value: scale.apply(value), precision: scale.precision })
}

fn decode_element(element: &Element, raw: &RawValue) -> Result<Decoded, DecodeError> {
    match element {
        Element::Scalar(scale) => decode_scalar(scale, raw),
        Element::Boolean(labels) => decode_kind(&VariableKind::Boolean(*labels), raw),
    }
}

/// The first `n` components of a list. Fewer than `n` is an error, extras are dropped.
fn leading_components(raw: &RawValue, n: usize) -> Result<Vec<RawValue>, DecodeError> {
    let mut components =
        value::components(raw).ok_or_else(|| DecodeError::NotAList(raw.clone()))?;
    if components.len() < n {
        return Err(DecodeError::TooFewComponents { expected: n, found: components.len() });
    }
    components.truncate(n);
    Ok(components)
}

/// One decoded field of a [`DecodedRecord`].
#[derive(Clone, Debug)]
pub struct Field {
    pub name: &'static str,
    pub key: VariableKey,
    pub value: Result<Decoded, DecodeError>,
}

/// The fully decoded snapshot of a page produced by one poll cycle.
///
/// Fields are kept in the page's variable order. A record is never modified after it is
/// published; the next cycle publishes a new one.
#[derive(Clone, Debug)]
pub struct DecodedRecord {
    pub page: &'static str,
    pub polled_at: jiff::Timestamp,
    pub fields: Vec<Field>,
}

impl DecodedRecord {
    pub fn get(&self, name: &str) -> Option<&Result<Decoded, DecodeError>> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&'static str, &DecodeError)> {
        self.fields.iter().filter_map(|f| f.value.as_ref().err().map(|e| (f.name, e)))
    }
}

/// Decode all values read for `page`. `values` is aligned with [`PageSchema::read_batch`].
pub fn decode_record(
    page: &'static PageSchema,
    polled_at: jiff::Timestamp,
    values: &[RawValue],
) -> DecodedRecord {
    let fields = page
        .variables
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let value = match values.get(idx) {
                Some(raw) => decode(spec, raw),
                None => Err(DecodeError::Missing),
            };
            if let Err(e) = &value {
                tracing::debug!(
                    page = page.name,
                    field = spec.name,
                    key = %spec.key,
                    error = (e as &dyn std::error::Error),
                    "could not decode field"
                );
            }
            Field { name: spec.name, key: spec.key.clone(), value }
        })
        .collect();
    DecodedRecord { page: page.name, polled_at, fields }
}

struct FieldValue<'a>(&'a Result<Decoded, DecodeError>);

impl serde::Serialize for FieldValue<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Ok(decoded) => decoded.serialize(serializer),
            Err(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", &e.to_string())?;
                map.end()
            }
        }
    }
}

struct Fields<'a>(&'a [Field]);

impl serde::Serialize for Fields<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|f| (f.name, FieldValue(&f.value))))
    }
}

impl serde::Serialize for DecodedRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("page", self.page)?;
        map.serialize_entry("polled_at", &self.polled_at)?;
        map.serialize_entry("fields", &Fields(&self.fields))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BoolLabels, variables};
    use serde_json::json;

    const LABELS: &[&str] = &["SYSTEM ERROR", "Compressor fail", "Locked rotor", "OVERLOAD"];
    const AXES: &[Element] = &[
        Element::Scalar(Scale::milli(3).inverted()),
        Element::Scalar(Scale::milli(3)),
        Element::Scalar(Scale::INTEGER),
        Element::Scalar(Scale::INTEGER),
    ];
    const STATUS: &[Element] = &[Element::Boolean(BoolLabels::ON_OFF); 3];

    fn number(value: f64, precision: u8) -> Decoded {
        Decoded::Number { value, precision }
    }

    #[test]
    fn scalar_scales_before_rounding() {
        let kind = VariableKind::Scalar(Scale::milli(2));
        assert_eq!(decode_kind(&kind, &json!(12346)), Ok(number(12.35, 2)));
        assert_eq!(decode_kind(&kind, &json!("-500")), Ok(number(-0.5, 2)));
        assert_eq!(
            decode_kind(&kind, &json!("fast")),
            Err(DecodeError::NotANumber(json!("fast")))
        );
    }

    #[test]
    fn booleans_map_to_labels() {
        let kind = VariableKind::Boolean(BoolLabels::YES_NO);
        let label = |raw| decode_kind(&kind, &raw).map(|d| d.to_string());
        assert_eq!(label(json!(true)).as_deref(), Ok("Y"));
        assert_eq!(label(json!("false")).as_deref(), Ok("N"));
        assert_eq!(label(json!(1)).as_deref(), Ok("Y"));
        assert_eq!(label(json!(0)).as_deref(), Ok("N"));
        assert_eq!(label(json!("yes")), Err(DecodeError::NotABoolean(json!("yes"))));
        assert_eq!(label(json!(2)), Err(DecodeError::NotABoolean(json!(2))));
    }

    #[test]
    fn bitfield_lists_set_bits_in_order() {
        let kind = VariableKind::Bitfield(LABELS);
        let none = decode_kind(&kind, &json!([0, 0, 0, 0])).unwrap();
        assert_eq!(none.to_string(), "None");
        let some = decode_kind(&kind, &json!([0, 1, 0, 1])).unwrap();
        assert_eq!(some.to_string(), "Compressor fail, OVERLOAD");
        let joined = decode_kind(&kind, &json!("1,0,0,0,0")).unwrap();
        assert_eq!(joined.to_string(), "SYSTEM ERROR");
        let bools = decode_kind(&kind, &json!([false, false, true, false])).unwrap();
        assert_eq!(bools.to_string(), "Locked rotor");
    }

    #[test]
    fn bitfield_rejects_short_or_garbled_lists() {
        let kind = VariableKind::Bitfield(LABELS);
        assert_eq!(
            decode_kind(&kind, &json!([1, 0])),
            Err(DecodeError::TooFewComponents { expected: 4, found: 2 })
        );
        assert_eq!(
            decode_kind(&kind, &json!([0, 0, 7, 0])),
            Err(DecodeError::NotABit { index: 2, value: json!(7) })
        );
    }

    #[test]
    fn bitfield_never_hides_a_set_bit() {
        let kind = VariableKind::Bitfield(&["a", "b"]);
        assert_eq!(decode_kind(&kind, &json!([0, 0, 0])), Ok(Decoded::Text("None".into())));
        assert_eq!(
            decode_kind(&kind, &json!([0, 0, 1])),
            Err(DecodeError::UnlabeledBit { index: 2 })
        );
        assert_eq!(
            decode_kind(&kind, &json!("1,0,0,1")).map_err(|e| e.to_string()),
            Err("bit 3 is set but has no label".to_string())
        );
    }

    #[test]
    fn min_max_pair_is_the_mean() {
        let kind = VariableKind::MinMaxPair(Scale::new(1.0, 1));
        let decoded = decode_kind(&kind, &json!([1.0, 3.0])).unwrap();
        assert_eq!(decoded, number(2.0, 1));
        assert_eq!(decoded.to_string(), "2.0");
        let kind = VariableKind::MinMaxPair(Scale::milli(2));
        assert_eq!(decode_kind(&kind, &json!("1000,2000")), Ok(number(1.5, 2)));
        assert_eq!(
            decode_kind(&kind, &json!([1.0])),
            Err(DecodeError::TooFewComponents { expected: 2, found: 1 })
        );
    }

    #[test]
    fn vector_is_never_padded() {
        let kind = VariableKind::Vector(AXES);
        assert_eq!(
            decode_kind(&kind, &json!("1,2,3")),
            Err(DecodeError::TooFewComponents { expected: 4, found: 3 })
        );
        let decoded = decode_kind(&kind, &json!("1500,2500,3,4,5")).unwrap();
        assert_eq!(decoded.to_string(), "-1.500, 2.500, 3, 4");
    }

    #[test]
    fn vector_component_errors_name_the_component() {
        let kind = VariableKind::Vector(STATUS);
        let decoded = decode_kind(&kind, &json!([true, "false", 0])).unwrap();
        assert_eq!(decoded.to_string(), "ON, OFF, OFF");
        let err = decode_kind(&kind, &json!([true, "maybe", 0])).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Component {
                index: 1,
                source: Box::new(DecodeError::NotABoolean(json!("maybe")))
            }
        );
    }

    #[test]
    fn text_is_shown_verbatim() {
        assert_eq!(decode_kind(&VariableKind::Text, &json!("idle")), Ok(Decoded::Text("idle".into())));
        assert_eq!(decode_kind(&VariableKind::Text, &json!(4)), Ok(Decoded::Text("4".into())));
    }

    static VARIABLES: [VariableSpec; 4] = variables![
        "status" at "/Equipment/C/Variables/sta1": VariableKind::Boolean(BoolLabels::ON_OFF),
        "errors" at "/Equipment/C/Variables/Errs": VariableKind::Bitfield(LABELS),
        "temperature" at "/Equipment/C/Variables/Temp": VariableKind::Scalar(Scale::new(1.0, 2)),
        "level" at "/Equipment/H/Variables/HeLe": VariableKind::Scalar(Scale::new(1.0, 1)),
    ];
    static PAGE: PageSchema = PageSchema {
        name: "decode-test",
        title: "Decode test",
        variables: &VARIABLES,
        commands: &[],
    };

    #[test]
    fn malformed_fields_do_not_spoil_the_record() {
        let values = [json!(1), json!(null), json!(21.456)];
        let record = decode_record(&PAGE, jiff::Timestamp::UNIX_EPOCH, &values);
        assert_eq!(record.page, "decode-test");
        assert_eq!(record.fields.len(), 4);
        assert_eq!(record.get("status").unwrap().as_ref().unwrap().to_string(), "ON");
        assert_eq!(record.get("errors"), Some(&Err(DecodeError::NotAList(json!(null)))));
        assert_eq!(record.get("temperature"), Some(&Ok(number(21.46, 2))));
        assert_eq!(record.get("level"), Some(&Err(DecodeError::Missing)));
        let names: Vec<_> = record.errors().map(|(name, _)| name).collect();
        assert_eq!(names, ["errors", "level"]);
    }

    #[test]
    fn records_serialize_errors_in_place() {
        let values = [json!(false), json!([0, 0, 0, 0]), json!("n/a"), json!(75.0)];
        let record = decode_record(&PAGE, jiff::Timestamp::UNIX_EPOCH, &values);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["page"], "decode-test");
        assert_eq!(json["polled_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["fields"]["status"], "OFF");
        assert_eq!(json["fields"]["errors"], "None");
        assert_eq!(json["fields"]["temperature"]["error"], "expected a number, found `\"n/a\"`");
        assert_eq!(json["fields"]["level"], 75.0);
    }
}
