use super::galil;
use crate::dispatch::CommandSpec;
use crate::schema::{
    BoolLabels, CommandEntry, Element, PageSchema, Param, Scale, VariableKey, VariableKind,
    VariableSpec, variables,
};
use crate::value::RawValue;

const CMD: &str = "/Equipment/Galil-Argonne/Settings/Manual Control/Cmd";
const ABORT: &str = "/Equipment/Galil-Argonne/Settings/Emergency/Abort";
const MOTOR_SWITCH: &str =
    "/Equipment/Galil-Argonne/Settings/Manual Control/Platform1/Platform1 Switch";
const ABSOLUTE: &str =
    "/Equipment/Galil-Argonne/Settings/Manual Control/Platform1/Platform1 Abs Pos[0-3]";
const RELATIVE: &str =
    "/Equipment/Galil-Argonne/Settings/Manual Control/Platform1/Platform1 Rel Pos[0-3]";
const DEFINE: &str =
    "/Equipment/Galil-Argonne/Settings/Manual Control/Platform1/Platform1 Def Pos[0-3]";
const AUTO_STEP: &str =
    "/Equipment/Galil-Argonne/Settings/Auto Control/Platform1/Platform1 Rel Pos[0-3]";
const AUTO_STEPS: &str =
    "/Equipment/Galil-Argonne/Settings/Auto Control/Platform1/Platform1 Step Number[0-3]";

const MOVE_ABSOLUTE: i64 = 1;
const MOVE_RELATIVE: i64 = 2;
const DEFINE_POSITION: i64 = 3;

// Axes are X, Y, Z and S. The controller counts X and Y in the opposite direction of the
// platform's coordinate system.
const COUNTS: &[Element] = &[
    Element::Scalar(Scale::INTEGER.inverted()),
    Element::Scalar(Scale::INTEGER.inverted()),
    Element::Scalar(Scale::INTEGER),
    Element::Scalar(Scale::INTEGER),
];
const VOLTAGES: &[Element] = &[
    Element::Scalar(Scale::milli(3).inverted()),
    Element::Scalar(Scale::milli(3).inverted()),
    Element::Scalar(Scale::milli(3)),
    Element::Scalar(Scale::milli(3)),
];
const SWITCHES: &[Element] = &[Element::Boolean(BoolLabels::YES_NO); 4];
const MOTORS: &[Element] = &[Element::Boolean(BoolLabels::ON_OFF); 4];

static VARIABLES: [VariableSpec; 6] = variables! {
    "positions" at "/Equipment/Galil-Argonne/Monitors/Positions": VariableKind::Vector(COUNTS),
    "velocities" at "/Equipment/Galil-Argonne/Monitors/Velocities": VariableKind::Vector(COUNTS),
    "control-voltages" at "/Equipment/Galil-Argonne/Monitors/Control Voltages":
        VariableKind::Vector(VOLTAGES),
    "limits-forward" at "/Equipment/Galil-Argonne/Monitors/Limit Switches Forward":
        VariableKind::Vector(SWITCHES),
    "limits-reverse" at "/Equipment/Galil-Argonne/Monitors/Limit Switches Reverse":
        VariableKind::Vector(SWITCHES),
    "motors" at "/Equipment/Galil-Argonne/Monitors/Motor Status": VariableKind::Vector(MOTORS),
};

const AXES: &[Param] =
    &[Param::number("x"), Param::number("y"), Param::number("z"), Param::number("s")];

pub static PAGE: PageSchema = PageSchema {
    name: "platform",
    title: "Probe platform",
    variables: &VARIABLES,
    commands: &[
        CommandEntry { name: "abort", description: "Abort all motion", params: &[], build: abort },
        CommandEntry {
            name: "motors-on",
            description: "Power the platform motors",
            params: &[],
            build: motors_on,
        },
        CommandEntry {
            name: "motors-off",
            description: "Cut power to the platform motors",
            params: &[],
            build: motors_off,
        },
        CommandEntry {
            name: "move-absolute",
            description: "Move every axis to a position, in counts",
            params: AXES,
            build: move_absolute,
        },
        CommandEntry {
            name: "move-relative",
            description: "Move every axis by a distance, in counts",
            params: AXES,
            build: move_relative,
        },
        CommandEntry {
            name: "define-position",
            description: "Declare the current position of every axis, in counts",
            params: AXES,
            build: define_position,
        },
        CommandEntry {
            name: "auto-control",
            description: "Set the per-axis step size and step count of automatic scans",
            params: &[
                Param::number("x-step"),
                Param::number("y-step"),
                Param::number("z-step"),
                Param::number("s-step"),
                Param::number("x-steps"),
                Param::number("y-steps"),
                Param::number("z-steps"),
                Param::number("s-steps"),
            ],
            build: auto_control,
        },
    ],
};

fn abort(_: &[RawValue]) -> CommandSpec {
    galil::abort(ABORT)
}

fn motors_on(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, MOTOR_SWITCH, true)
}

fn motors_off(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, MOTOR_SWITCH, false)
}

/// Positions in the platform's coordinate system, converted to controller counts.
fn axes(args: &[RawValue]) -> RawValue {
    RawValue::Array(galil::inverted(args, 2))
}

fn move_axes(setting: &'static str, code: i64, args: &[RawValue]) -> CommandSpec {
    galil::command(CMD, code, vec![(VariableKey::new_const(setting), axes(args))])
}

fn move_absolute(args: &[RawValue]) -> CommandSpec {
    move_axes(ABSOLUTE, MOVE_ABSOLUTE, args)
}

fn move_relative(args: &[RawValue]) -> CommandSpec {
    move_axes(RELATIVE, MOVE_RELATIVE, args)
}

fn define_position(args: &[RawValue]) -> CommandSpec {
    move_axes(DEFINE, DEFINE_POSITION, args)
}

/// Only stores the scan settings. Scans are started by the frontend.
fn auto_control(args: &[RawValue]) -> CommandSpec {
    let (steps, counts) = args.split_at(args.len().min(4));
    CommandSpec::unguarded(vec![
        (VariableKey::new_const(AUTO_STEP), axes(steps)),
        (VariableKey::new_const(AUTO_STEPS), RawValue::Array(counts.to_vec())),
    ])
}
