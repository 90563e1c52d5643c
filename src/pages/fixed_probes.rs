use crate::schema::{PageSchema, VariableKind, VariableSpec, variables};

static VARIABLES: [VariableSpec; 3] = variables! {
    "output" at "/Equipment/Fixed Probes/Settings/output": VariableKind::Text,
    "config" at "/Equipment/Fixed Probes/Settings/config": VariableKind::Text,
    "devices" at "/Equipment/Fixed Probes/Settings/devices": VariableKind::Text,
};

/// Read-only view of the fixed probe sequencer configuration.
pub static PAGE: PageSchema = PageSchema {
    name: "fixed-probes",
    title: "Fixed probe settings",
    variables: &VARIABLES,
    commands: &[],
};
