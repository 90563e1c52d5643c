use super::galil;
use crate::dispatch::CommandSpec;
use crate::schema::{
    BoolLabels, CommandEntry, Element, PageSchema, Param, Scale, VariableKind, VariableSpec,
    variables,
};
use crate::value::{self, RawValue};

const CMD: &str = "/Equipment/GalilFermi/Settings/Manual Control/Cmd";
const ABORT: &str = "/Equipment/GalilFermi/Settings/Emergency/Abort";
const TROLLEY_SWITCH: &str = "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley Switch";
const GARAGE_SWITCH: &str = "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Garage Switch";
const TROLLEY_DISTANCE: &str =
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley Rel Pos";
const DRUM_DISTANCES: &[&str] = &[
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley1 Rel Pos",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley2 Rel Pos",
];
const GARAGE_DISTANCE: &str =
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Garage Rel Pos";
const ORIGIN: &[&str] = &[
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley Def Pos1",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley Def Pos2",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Garage Def Pos",
];
const AUTO_MOTION: &[&str] = &[
    "/Equipment/GalilFermi/Settings/Auto Control/Trolley/Trolley Rel Pos",
    "/Equipment/GalilFermi/Settings/Auto Control/Trolley/Trolley Step Number",
    "/Equipment/GalilFermi/Settings/Auto Control/Mode",
    "/Equipment/GalilFermi/Settings/Auto Control/Continuous Motion",
];
/// Tension limits are stored in milli-units, velocities as given.
const REGULATION: &[&str] = &[
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Tension Range Low",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Tension Range High",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Trolley Velocity",
    "/Equipment/GalilFermi/Settings/Manual Control/Trolley/Garage Velocity",
];

const MOVE_DRUMS: i64 = 1;
const MOVE_TROLLEY: i64 = 2;
const DEFINE_ORIGIN: i64 = 3;
const MOVE_GARAGE: i64 = 5;

// Axes A and B drive the two trolley cable drums, C the garage.
const COUNTS: &[Element] = &[Element::Scalar(Scale::INTEGER); 3];
const VOLTAGES: &[Element] = &[Element::Scalar(Scale::milli(3)); 3];
/// Cable tensions of drums A and B followed by two temperatures.
const ANALOGS: &[Element] = &[
    Element::Scalar(Scale::milli(3)),
    Element::Scalar(Scale::milli(3)),
    Element::Scalar(Scale::milli(2)),
    Element::Scalar(Scale::milli(2)),
];
const SWITCHES: &[Element] = &[Element::Boolean(BoolLabels::YES_NO); 3];
const MOTORS: &[Element] = &[Element::Boolean(BoolLabels::ON_OFF); 3];

static VARIABLES: [VariableSpec; 8] = variables! {
    "positions" at "/Equipment/GalilFermi/Monitors/Positions": VariableKind::Vector(COUNTS),
    "velocities" at "/Equipment/GalilFermi/Monitors/Velocities": VariableKind::Vector(COUNTS),
    "control-voltages" at "/Equipment/GalilFermi/Monitors/Control Voltages":
        VariableKind::Vector(VOLTAGES),
    "analogs" at "/Equipment/GalilFermi/Monitors/Analogs": VariableKind::Vector(ANALOGS),
    "mean-tension" at "/Equipment/GalilFermi/Monitors/Analogs[0-1]":
        VariableKind::MinMaxPair(Scale::milli(3)),
    "limits-forward" at "/Equipment/GalilFermi/Monitors/Limit Switches Forward":
        VariableKind::Vector(SWITCHES),
    "limits-reverse" at "/Equipment/GalilFermi/Monitors/Limit Switches Reverse":
        VariableKind::Vector(SWITCHES),
    "motors" at "/Equipment/GalilFermi/Monitors/Motor Status": VariableKind::Vector(MOTORS),
};

pub static PAGE: PageSchema = PageSchema {
    name: "trolley",
    title: "Trolley and garage",
    variables: &VARIABLES,
    commands: &[
        CommandEntry { name: "abort", description: "Abort all motion", params: &[], build: abort },
        CommandEntry {
            name: "trolley-on",
            description: "Power the trolley drum motors",
            params: &[],
            build: trolley_on,
        },
        CommandEntry {
            name: "trolley-off",
            description: "Cut power to the trolley drum motors",
            params: &[],
            build: trolley_off,
        },
        CommandEntry {
            name: "garage-on",
            description: "Power the garage motor",
            params: &[],
            build: garage_on,
        },
        CommandEntry {
            name: "garage-off",
            description: "Cut power to the garage motor",
            params: &[],
            build: garage_off,
        },
        CommandEntry {
            name: "garage-in",
            description: "Retract the garage",
            params: &[],
            build: garage_in,
        },
        CommandEntry {
            name: "garage-out",
            description: "Extend the garage",
            params: &[],
            build: garage_out,
        },
        CommandEntry {
            name: "trolley-move",
            description: "Move the trolley by a distance, both drums together",
            params: &[Param::number("distance")],
            build: trolley_move,
        },
        CommandEntry {
            name: "drums-move",
            description: "Move each trolley drum by its own distance",
            params: &[Param::number("drum1"), Param::number("drum2")],
            build: drums_move,
        },
        CommandEntry {
            name: "garage-move",
            description: "Move the garage by a distance",
            params: &[Param::number("distance")],
            build: garage_move,
        },
        CommandEntry {
            name: "define-origin",
            description: "Declare the current drum and garage positions",
            params: &[Param::number("drum1"), Param::number("drum2"), Param::number("garage")],
            build: define_origin,
        },
        CommandEntry {
            name: "auto-motion",
            description: "Set up automatic trolley motion",
            params: &[
                Param::number("step-size"),
                Param::number("steps"),
                Param::text("mode"),
                Param::text("continuous"),
            ],
            build: auto_motion,
        },
        CommandEntry {
            name: "regulation",
            description: "Set the cable tension range and the motion velocities",
            params: &[
                Param::number("tension-low"),
                Param::number("tension-high"),
                Param::number("trolley-velocity"),
                Param::number("garage-velocity"),
            ],
            build: regulation,
        },
    ],
};

fn abort(_: &[RawValue]) -> CommandSpec {
    galil::abort(ABORT)
}

fn trolley_on(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, TROLLEY_SWITCH, true)
}

fn trolley_off(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, TROLLEY_SWITCH, false)
}

fn garage_on(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, GARAGE_SWITCH, true)
}

fn garage_off(_: &[RawValue]) -> CommandSpec {
    galil::switch(CMD, GARAGE_SWITCH, false)
}

fn garage_in(_: &[RawValue]) -> CommandSpec {
    galil::code(CMD, galil::GARAGE_IN)
}

fn garage_out(_: &[RawValue]) -> CommandSpec {
    galil::code(CMD, galil::GARAGE_OUT)
}

fn trolley_move(args: &[RawValue]) -> CommandSpec {
    galil::command(CMD, MOVE_TROLLEY, galil::settings(&[TROLLEY_DISTANCE], args))
}

fn drums_move(args: &[RawValue]) -> CommandSpec {
    galil::command(CMD, MOVE_DRUMS, galil::settings(DRUM_DISTANCES, args))
}

fn garage_move(args: &[RawValue]) -> CommandSpec {
    galil::command(CMD, MOVE_GARAGE, galil::settings(&[GARAGE_DISTANCE], args))
}

fn define_origin(args: &[RawValue]) -> CommandSpec {
    galil::command(CMD, DEFINE_ORIGIN, galil::settings(ORIGIN, args))
}

fn auto_motion(args: &[RawValue]) -> CommandSpec {
    CommandSpec::unguarded(galil::settings(AUTO_MOTION, args))
}

fn regulation(args: &[RawValue]) -> CommandSpec {
    let args = args
        .iter()
        .enumerate()
        .map(|(idx, arg)| if idx < 2 { value::scaled(arg, 1000.0) } else { arg.clone() })
        .collect::<Vec<_>>();
    CommandSpec::unguarded(galil::settings(REGULATION, &args))
}
