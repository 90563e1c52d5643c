use crate::dispatch::{CommandSpec, Guard, StateCheck};
use crate::schema::{
    BoolLabels, CommandEntry, PageSchema, Scale, VariableKey, VariableKind, VariableSpec, variables,
};
use crate::value::RawValue;
use serde_json::json;

const COMPRESSOR_CONTROL: &str = "/Equipment/CompressorChiller/Settings/comp_ctrl";
const CHILLER_CONTROL: &str = "/Equipment/CompressorChiller/Settings/chil_ctrl";
const COMPRESSOR_STATUS: &str = "/Equipment/CompressorChiller/Variables/sta1";
const CHILLER_STATUS: &str = "/Equipment/CompressorChiller/Variables/sta3";

/// The control settings hold this while the frontend is waiting for a command.
const CONTROL_IDLE: i64 = 2;

/// Bit labels of the compressor's error word, least significant bit first.
const COMPRESSOR_ERRORS: &[&str] = &[
    "SYSTEM ERROR",
    "Compressor fail",
    "Locked rotor",
    "OVERLOAD",
    "Phase/fuse ERROR",
    "Pressure alarm",
    "Helium temp. fail",
    "Oil circuit fail",
    "RAM ERROR",
    "ROM ERROR",
    "EEPROM ERROR",
    "DC Voltage error",
    "MAINS LEVEL",
    "reserved (13)",
    "reserved (14)",
    "reserved (15)",
];

static VARIABLES: [VariableSpec; 7] = variables! {
    "compressor" at "/Equipment/CompressorChiller/Variables/sta1":
        VariableKind::Boolean(BoolLabels::ON_OFF),
    "compressor-errors" at "/Equipment/CompressorChiller/Variables/CompressorErrors":
        VariableKind::Bitfield(COMPRESSOR_ERRORS),
    "chiller" at "/Equipment/CompressorChiller/Variables/sta3":
        VariableKind::Boolean(BoolLabels::ON_OFF),
    "chiller-temperature" at "/Equipment/CompressorChiller/Variables/Temp":
        VariableKind::Scalar(Scale::new(1.0, 1)),
    "chiller-pressure" at "/Equipment/CompressorChiller/Variables/Pres":
        VariableKind::Scalar(Scale::new(1.0, 2)),
    "chiller-flow" at "/Equipment/CompressorChiller/Variables/Flow":
        VariableKind::Scalar(Scale::new(1.0, 2)),
    "helium-level" at "/Equipment/HeLevel/Variables/HeLe":
        VariableKind::Scalar(Scale::new(1.0, 1)),
};

pub static PAGE: PageSchema = PageSchema {
    name: "compressor",
    title: "Compressor and chiller",
    variables: &VARIABLES,
    commands: &[
        CommandEntry {
            name: "compressor-on",
            description: "Switch the helium compressor on",
            params: &[],
            build: compressor_on,
        },
        CommandEntry {
            name: "compressor-off",
            description: "Switch the helium compressor off",
            params: &[],
            build: compressor_off,
        },
        CommandEntry {
            name: "chiller-on",
            description: "Switch the chiller on",
            params: &[],
            build: chiller_on,
        },
        CommandEntry {
            name: "chiller-off",
            description: "Switch the chiller off",
            params: &[],
            build: chiller_off,
        },
    ],
};

/// Ask the frontend to switch a machine. The control setting doubles as the guard: the frontend
/// puts it back to [`CONTROL_IDLE`] once the request has been carried out.
fn switch(control: &'static str, status: &'static str, on: bool) -> CommandSpec {
    let requested = json!(i64::from(on));
    CommandSpec::guarded(
        Guard {
            key: VariableKey::new_const(control),
            idle: json!(CONTROL_IDLE),
            busy_label: "Please wait on last command".into(),
            state: Some(StateCheck {
                key: VariableKey::new_const(status),
                requested: requested.clone(),
            }),
        },
        vec![(VariableKey::new_const(control), requested)],
    )
}

fn compressor_on(_: &[RawValue]) -> CommandSpec {
    switch(COMPRESSOR_CONTROL, COMPRESSOR_STATUS, true)
}

fn compressor_off(_: &[RawValue]) -> CommandSpec {
    switch(COMPRESSOR_CONTROL, COMPRESSOR_STATUS, false)
}

fn chiller_on(_: &[RawValue]) -> CommandSpec {
    switch(CHILLER_CONTROL, CHILLER_STATUS, true)
}

fn chiller_off(_: &[RawValue]) -> CommandSpec {
    switch(CHILLER_CONTROL, CHILLER_STATUS, false)
}
