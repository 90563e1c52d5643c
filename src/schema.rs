//! Static descriptions of the variables a console page reads and of how each one is decoded.
//!
//! A page is nothing more than a [`PageSchema`]: an ordered table of [`VariableSpec`]s and a
//! catalog of the commands an operator may issue. The order of the table is the order of the
//! [`ReadBatch`] sent to the store, and the order in which fields appear in a decoded record.

use crate::dispatch::CommandSpec;
use crate::value::{self, RawValue};
use std::borrow::Cow;
use std::ops::RangeInclusive;

/// A hierarchical path naming one value in the remote store, e.g.
/// `/Equipment/CompressorChiller/Settings/comp_ctrl`.
///
/// The last segment may carry an array suffix: `Analogs[2]` names a single element and
/// `Analogs[0-1]` an inclusive range of elements.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct VariableKey(Cow<'static, str>);

impl VariableKey {
    pub const fn new_const(path: &'static str) -> Self {
        Self(Cow::Borrowed(path))
    }

    pub fn new(path: impl Into<String>) -> Self {
        Self(Cow::Owned(path.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the array suffix off the key, if any.
    ///
    /// Returns the base path and the inclusive range of addressed elements. A suffix that does
    /// not parse as an index or an `a-b` range is considered part of the path.
    pub fn split_index(&self) -> (&str, Option<RangeInclusive<usize>>) {
        let path = self.as_str();
        let Some(body) = path.strip_suffix(']') else {
            return (path, None);
        };
        let Some((base, index)) = body.rsplit_once('[') else {
            return (path, None);
        };
        let range = match index.split_once('-') {
            None => index.trim().parse().ok().map(|i| i..=i),
            Some((from, to)) => match (from.trim().parse(), to.trim().parse()) {
                (Ok(from), Ok(to)) if from <= to => Some(from..=to),
                _ => None,
            },
        };
        match range {
            Some(range) => (base, Some(range)),
            None => (path, None),
        }
    }
}

impl std::fmt::Display for VariableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for VariableKey {
    fn from(path: &'static str) -> Self {
        Self::new_const(path)
    }
}

/// Unit conversion and rounding applied to a numeric value before display.
///
/// The raw value is divided by `divisor` and then rounded to `precision` decimal places. A
/// negative divisor flips the sign, which is how inverted stage axes are displayed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale {
    pub divisor: f64,
    pub precision: u8,
}

impl Scale {
    pub const INTEGER: Scale = Scale { divisor: 1.0, precision: 0 };

    pub const fn new(divisor: f64, precision: u8) -> Self {
        Self { divisor, precision }
    }

    /// Raw milli-units shown as units.
    pub const fn milli(precision: u8) -> Self {
        Self::new(1000.0, precision)
    }

    pub const fn inverted(self) -> Self {
        Self { divisor: -self.divisor, precision: self.precision }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        let factor = 10f64.powi(i32::from(self.precision));
        let rounded = (raw / self.divisor * factor).round() / factor;
        // Keep `-0` out of the display.
        if rounded == 0.0 { 0.0 } else { rounded }
    }
}

/// The labels shown for the two states of a boolean variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoolLabels {
    pub on: &'static str,
    pub off: &'static str,
}

impl BoolLabels {
    pub const ON_OFF: BoolLabels = BoolLabels { on: "ON", off: "OFF" };
    pub const YES_NO: BoolLabels = BoolLabels { on: "Y", off: "N" };

    pub fn label(&self, value: bool) -> &'static str {
        if value { self.on } else { self.off }
    }
}

/// How a single component of a [`VariableKind::Vector`] is decoded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Element {
    Scalar(Scale),
    Boolean(BoolLabels),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VariableKind {
    /// A single number.
    Scalar(Scale),
    /// A boolean-like value shown as one of two labels.
    Boolean(BoolLabels),
    /// A fixed number of components, each with its own element transform. The vector width is
    /// the number of elements.
    Vector(&'static [Element]),
    /// A list of 0/1 flags, one per label, shown as the labels of the set bits.
    Bitfield(&'static [&'static str]),
    /// Two numbers `(min, max)` shown as their mean.
    MinMaxPair(Scale),
    /// Any value shown verbatim.
    Text,
}

impl VariableKind {
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            VariableKind::Scalar(_) => "scalar".into(),
            VariableKind::Boolean(_) => "boolean".into(),
            VariableKind::Vector(elements) => format!("vector({})", elements.len()).into(),
            VariableKind::Bitfield(labels) => format!("bitfield({})", labels.len()).into(),
            VariableKind::MinMaxPair(_) => "min-max".into(),
            VariableKind::Text => "text".into(),
        }
    }
}

/// One variable of a page: where it lives and how to decode it.
#[derive(Clone, Debug)]
pub struct VariableSpec {
    /// The field name in the decoded record.
    pub name: &'static str,
    pub key: VariableKey,
    pub kind: VariableKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    Text,
}

/// A value the operator supplies when issuing a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl Param {
    pub const fn number(name: &'static str) -> Self {
        Self { name, kind: ParamKind::Number }
    }

    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: ParamKind::Text }
    }

    fn parse(&self, arg: &str) -> Result<RawValue, ArgumentError> {
        match self.kind {
            ParamKind::Text => Ok(RawValue::String(arg.to_string())),
            ParamKind::Number => {
                let trimmed = arg.trim();
                if let Ok(int) = trimmed.parse::<i64>() {
                    return Ok(RawValue::from(int));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(value::number)
                    .ok_or_else(|| ArgumentError::NotANumber { param: self.name, arg: arg.into() })
            }
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("`{usage}` takes {expected} arguments, {found} given")]
    Count { usage: String, expected: usize, found: usize },
    #[error("`{param}` must be a number, not `{arg}`")]
    NotANumber { param: &'static str, arg: String },
}

/// An operator command offered by a page.
pub struct CommandEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
    /// Builds the command anew for every operator action, given one parsed value per parameter.
    pub(crate) build: fn(&[RawValue]) -> CommandSpec,
}

impl CommandEntry {
    /// Parse the operator's arguments and build the command from them.
    pub fn with_args<A: AsRef<str>>(&self, args: &[A]) -> Result<CommandSpec, ArgumentError> {
        if args.len() != self.params.len() {
            return Err(ArgumentError::Count {
                usage: self.usage(),
                expected: self.params.len(),
                found: args.len(),
            });
        }
        let values = self
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| param.parse(arg.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((self.build)(&values))
    }

    /// The command name followed by its parameters, e.g. `garage-move <distance>`.
    pub fn usage(&self) -> String {
        let mut usage = self.name.to_string();
        for param in self.params {
            usage.push_str(" <");
            usage.push_str(param.name);
            usage.push('>');
        }
        usage
    }
}

pub struct PageSchema {
    pub name: &'static str,
    pub title: &'static str,
    pub variables: &'static [VariableSpec],
    pub commands: &'static [CommandEntry],
}

impl PageSchema {
    pub fn read_batch(&self) -> ReadBatch {
        ReadBatch(self.variables.iter().map(|v| v.key.clone()).collect())
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// The ordered list of keys read in one poll cycle.
///
/// Values returned by the store are aligned with this list by position. Keys are neither
/// reordered nor deduplicated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadBatch(Vec<VariableKey>);

impl ReadBatch {
    pub fn new(keys: Vec<VariableKey>) -> Self {
        Self(keys)
    }

    pub fn keys(&self) -> &[VariableKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Declares a static table of [`VariableSpec`]s.
macro_rules! variables {
    ($($name: literal at $key: literal: $kind: expr,)*) => {
        [$($crate::schema::VariableSpec {
            name: $name,
            key: $crate::schema::VariableKey::new_const($key),
            kind: $kind,
        },)*]
    }
}

pub(crate) use variables;
