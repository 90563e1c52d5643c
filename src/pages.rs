//! The built-in console pages.

mod compressor;
mod fixed_probes;
mod platform;
mod trolley;

use crate::schema::PageSchema;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    clap::ValueEnum,
    strum::VariantArray,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Page {
    /// Magnet compressor, chiller and helium level.
    Compressor,
    /// The four axis probe platform.
    Platform,
    /// Trolley and garage motion.
    Trolley,
    /// Fixed probe sequencer settings.
    FixedProbes,
}

impl Page {
    pub fn schema(self) -> &'static PageSchema {
        match self {
            Page::Compressor => &compressor::PAGE,
            Page::Platform => &platform::PAGE,
            Page::Trolley => &trolley::PAGE,
            Page::FixedProbes => &fixed_probes::PAGE,
        }
    }

    pub fn all() -> impl Iterator<Item = &'static PageSchema> {
        <Page as strum::VariantArray>::VARIANTS.iter().map(|p| p.schema())
    }
}

/// Conventions shared by the Galil motion controller frontends.
///
/// The frontend polls its `Cmd` setting, executes the command code it finds there and resets it
/// to [`IDLE`](galil::IDLE) once done. Parameters of a command are written before its code.
mod galil {
    use crate::dispatch::{CommandSpec, Guard};
    use crate::schema::VariableKey;
    use crate::value::{self, RawValue};
    use serde_json::json;

    pub const IDLE: i64 = 0;
    pub const SWITCH: i64 = 4;
    pub const GARAGE_IN: i64 = 6;
    pub const GARAGE_OUT: i64 = 7;

    pub fn guard(cmd: &'static str) -> Guard {
        Guard {
            key: VariableKey::new_const(cmd),
            idle: json!(IDLE),
            busy_label: "Please wait on last command".into(),
            state: None,
        }
    }

    /// Write `params`, then the command code that makes the frontend act on them.
    pub fn command(
        cmd: &'static str,
        code: i64,
        params: Vec<(VariableKey, RawValue)>,
    ) -> CommandSpec {
        let mut writes = params;
        writes.push((VariableKey::new_const(cmd), json!(code)));
        CommandSpec::guarded(guard(cmd), writes)
    }

    /// Flip a switch, then ask the frontend to apply it.
    pub fn switch(cmd: &'static str, switch: &'static str, on: bool) -> CommandSpec {
        command(cmd, SWITCH, vec![(VariableKey::new_const(switch), json!(on))])
    }

    pub fn code(cmd: &'static str, code: i64) -> CommandSpec {
        command(cmd, code, Vec::new())
    }

    /// Pair each setting with the argument at the same position.
    pub fn settings(keys: &[&'static str], args: &[RawValue]) -> Vec<(VariableKey, RawValue)> {
        keys.iter().copied().map(VariableKey::new_const).zip(args.iter().cloned()).collect()
    }

    /// Flip the sign of the first `count` arguments.
    pub fn inverted(args: &[RawValue], count: usize) -> Vec<RawValue> {
        args.iter()
            .enumerate()
            .map(|(idx, arg)| if idx < count { value::scaled(arg, -1.0) } else { arg.clone() })
            .collect()
    }

    /// Emergency stop. Never guarded: it must get through while a command is executing.
    pub fn abort(key: &'static str) -> CommandSpec {
        CommandSpec::unguarded(vec![(VariableKey::new_const(key), json!(1))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::str::FromStr as _;

    #[test]
    fn pages_are_found_by_name() {
        assert_eq!(Page::from_str("fixed-probes"), Ok(Page::FixedProbes));
        assert_eq!(Page::from_str("compressor").map(|p| p.schema().name), Ok("compressor"));
        assert!(Page::from_str("Platform ").is_err());
        for page in <Page as strum::VariantArray>::VARIANTS {
            assert_eq!(page.schema().name, <&'static str>::from(*page));
        }
    }

    #[test]
    fn names_are_unique_within_a_page() {
        for page in Page::all() {
            let fields = page.variables.iter().map(|v| v.name).collect::<BTreeSet<_>>();
            assert_eq!(fields.len(), page.variables.len(), "{}", page.name);
            let commands = page.commands.iter().map(|c| c.name).collect::<BTreeSet<_>>();
            assert_eq!(commands.len(), page.commands.len(), "{}", page.name);
        }
    }

    #[test]
    fn every_command_writes_something() {
        for page in Page::all() {
            for entry in page.commands {
                let args = vec!["1"; entry.params.len()];
                let cmd = entry.with_args(&args).unwrap();
                assert!(!cmd.writes.is_empty(), "{}/{}", page.name, entry.name);
                if let Some(guard) = &cmd.guard {
                    let last = &cmd.writes.last().unwrap().0;
                    assert!(
                        guard.state.is_some() || last == &guard.key,
                        "{}/{} must end with its command code",
                        page.name,
                        entry.name
                    );
                }
            }
        }
    }
}
