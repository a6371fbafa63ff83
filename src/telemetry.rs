//! Inbound half of the wire protocol: `key=value[,value...]` sentences.

use crate::error::DecodeError;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// Widest payload any known key carries (`bme`).
pub const MAX_FIELDS: usize = 4;

/// The closed set of telemetry keys the robot sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKey {
    BattVolt1,       // tenths of a volt
    BattVolt2,
    BattVolts,       // both packs, tenths
    Bme,             // temp C, temp F, humidity, pressure
    Temps,           // left motor, right motor, inside
    Angle,           // degrees from level
    RemoteDisableUi, // true/false
    Unrecognized,
}

impl TelemetryKey {
    pub const KNOWN: [TelemetryKey; 7] = [
        TelemetryKey::BattVolt1,
        TelemetryKey::BattVolt2,
        TelemetryKey::BattVolts,
        TelemetryKey::Bme,
        TelemetryKey::Temps,
        TelemetryKey::Angle,
        TelemetryKey::RemoteDisableUi,
    ];

    /// Exact, case-sensitive lookup.
    pub fn from_key(key: &str) -> Self {
        match key {
            "batt_volt1" => TelemetryKey::BattVolt1,
            "batt_volt2" => TelemetryKey::BattVolt2,
            "batt_volts" => TelemetryKey::BattVolts,
            "bme" => TelemetryKey::Bme,
            "temps" => TelemetryKey::Temps,
            "angle" => TelemetryKey::Angle,
            "remote.disableui" => TelemetryKey::RemoteDisableUi,
            _ => TelemetryKey::Unrecognized,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryKey::BattVolt1 => "batt_volt1",
            TelemetryKey::BattVolt2 => "batt_volt2",
            TelemetryKey::BattVolts => "batt_volts",
            TelemetryKey::Bme => "bme",
            TelemetryKey::Temps => "temps",
            TelemetryKey::Angle => "angle",
            TelemetryKey::RemoteDisableUi => "remote.disableui",
            TelemetryKey::Unrecognized => "unrecognized",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            TelemetryKey::BattVolts => 2,
            TelemetryKey::Temps => 3,
            TelemetryKey::Bme => 4,
            TelemetryKey::BattVolt1
            | TelemetryKey::BattVolt2
            | TelemetryKey::Angle
            | TelemetryKey::RemoteDisableUi => 1,
            TelemetryKey::Unrecognized => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Battery {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    pub temp_c: f32,
    pub temp_f: f32,
    pub humidity_pct: f32, // relative
    pub pressure_hpa: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub left_motor_c: f32,
    pub right_motor_c: f32,
    pub inside_c: f32, // chassis interior, never stops motors
}

/// A decoded telemetry sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Telemetry {
    /// Legacy single-battery sentence (`batt_volt1`, `batt_volt2`).
    BatteryVoltage { battery: Battery, volts: f32 },
    BatteryVoltages { battery1: f32, battery2: f32 },
    Environment(EnvironmentReading),
    Temperatures(Temperatures),
    Angle(i32),
    /// `true` means the robot wants the control surface disabled.
    RemoteDisable(bool),
}

impl Telemetry {
    pub fn key(&self) -> TelemetryKey {
        match self {
            Telemetry::BatteryVoltage { battery: Battery::One, .. } => TelemetryKey::BattVolt1,
            Telemetry::BatteryVoltage { battery: Battery::Two, .. } => TelemetryKey::BattVolt2,
            Telemetry::BatteryVoltages { .. } => TelemetryKey::BattVolts,
            Telemetry::Environment(_) => TelemetryKey::Bme,
            Telemetry::Temperatures(_) => TelemetryKey::Temps,
            Telemetry::Angle(_) => TelemetryKey::Angle,
            Telemetry::RemoteDisable(_) => TelemetryKey::RemoteDisableUi,
        }
    }

    /// Battery readings carried by this sentence, in volts.
    pub fn battery_volts(&self) -> ArrayVec<(Battery, f32), 2> {
        let mut out = ArrayVec::new();
        match *self {
            Telemetry::BatteryVoltage { battery, volts } => out.push((battery, volts)),
            Telemetry::BatteryVoltages { battery1, battery2 } => {
                out.push((Battery::One, battery1));
                out.push((Battery::Two, battery2));
            }
            _ => {}
        }
        out
    }
}

/// Strip the line terminator and split on the first `=`.
pub fn split_sentence(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(|c: char| c.is_whitespace() || c.is_control());
    line.split_once('=')
}

pub fn decode(line: &str) -> Result<Telemetry, DecodeError> {
    let (raw_key, payload) = split_sentence(line).ok_or(DecodeError::NoPayload)?;
    let key = TelemetryKey::from_key(raw_key);
    if key == TelemetryKey::Unrecognized {
        return Err(DecodeError::UnknownKey(raw_key.to_string()));
    }

    let fields = split_fields(key, payload)?;

    let telemetry = match key {
        TelemetryKey::BattVolt1 => Telemetry::BatteryVoltage {
            battery: Battery::One,
            volts: tenths_to_volts(key, fields[0])?,
        },
        TelemetryKey::BattVolt2 => Telemetry::BatteryVoltage {
            battery: Battery::Two,
            volts: tenths_to_volts(key, fields[0])?,
        },
        TelemetryKey::BattVolts => Telemetry::BatteryVoltages {
            battery1: tenths_to_volts(key, fields[0])?,
            battery2: tenths_to_volts(key, fields[1])?,
        },
        TelemetryKey::Bme => Telemetry::Environment(EnvironmentReading {
            temp_c: parse_float(key, fields[0])?,
            temp_f: parse_float(key, fields[1])?,
            humidity_pct: parse_float(key, fields[2])?,
            pressure_hpa: parse_float(key, fields[3])?,
        }),
        TelemetryKey::Temps => Telemetry::Temperatures(Temperatures {
            left_motor_c: parse_float(key, fields[0])?,
            right_motor_c: parse_float(key, fields[1])?,
            inside_c: parse_float(key, fields[2])?,
        }),
        TelemetryKey::Angle => Telemetry::Angle(
            fields[0]
                .parse::<i32>()
                .map_err(|_| invalid(key, fields[0]))?,
        ),
        TelemetryKey::RemoteDisableUi => Telemetry::RemoteDisable(parse_bool(key, fields[0])?),
        TelemetryKey::Unrecognized => unreachable!("rejected above"),
    };

    Ok(telemetry)
}

fn split_fields(key: TelemetryKey, payload: &str) -> Result<ArrayVec<&str, MAX_FIELDS>, DecodeError> {
    let expected = key.arity();
    let mut fields = ArrayVec::new();
    let mut found = 0;

    for field in payload.split(',') {
        found += 1;
        if found <= expected {
            fields.push(field.trim());
        }
    }

    if found != expected {
        return Err(DecodeError::Arity {
            key: key.as_str(),
            expected,
            found,
        });
    }
    Ok(fields)
}

fn invalid(key: TelemetryKey, field: &str) -> DecodeError {
    DecodeError::InvalidValue {
        key: key.as_str(),
        field: field.to_string(),
    }
}

fn tenths_to_volts(key: TelemetryKey, field: &str) -> Result<f32, DecodeError> {
    let tenths = field.parse::<i32>().map_err(|_| invalid(key, field))?;
    Ok(tenths as f32 / 10.0)
}

fn parse_float(key: TelemetryKey, field: &str) -> Result<f32, DecodeError> {
    match field.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(invalid(key, field)),
    }
}

fn parse_bool(key: TelemetryKey, field: &str) -> Result<bool, DecodeError> {
    if field.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if field.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(invalid(key, field))
    }
}

/// Readouts that are drawn highlighted on the operator's screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutFlags {
    pub battery1_low: bool,
    pub battery2_low: bool,
    pub left_motor_hot: bool,
    pub right_motor_hot: bool,
    pub inside_hot: bool,
    pub tilted: bool, // outside the tilt band either way
}

/// Last-known readouts, as the operator sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryState {
    pub battery1_volts: Option<f32>,
    pub battery2_volts: Option<f32>,
    pub environment: Option<EnvironmentReading>,
    pub temperatures: Option<Temperatures>,
    pub angle_deg: Option<i32>,
    pub remote_disabled: bool,
    pub flags: ReadoutFlags,
    pub sentences_applied: u64,
    pub sentences_dropped: u64, // malformed only; unknown keys are not counted
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, telemetry: &Telemetry) {
        for (battery, volts) in telemetry.battery_volts() {
            match battery {
                Battery::One => self.battery1_volts = Some(volts),
                Battery::Two => self.battery2_volts = Some(volts),
            }
        }

        match *telemetry {
            Telemetry::Environment(reading) => self.environment = Some(reading),
            Telemetry::Temperatures(temps) => self.temperatures = Some(temps),
            Telemetry::Angle(deg) => self.angle_deg = Some(deg),
            Telemetry::RemoteDisable(disabled) => self.remote_disabled = disabled,
            Telemetry::BatteryVoltage { .. } | Telemetry::BatteryVoltages { .. } => {}
        }

        self.sentences_applied = self.sentences_applied.saturating_add(1);
    }

    pub fn record_dropped(&mut self) {
        self.sentences_dropped = self.sentences_dropped.saturating_add(1);
    }
}
