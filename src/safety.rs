use crate::config::LinkConfig;
use crate::telemetry::{Battery, ReadoutFlags, Telemetry};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub warning_voltage: f32,  // volts, low is strictly below
    pub motor_high_temp: f32,  // C, hot is strictly above
    pub inside_high_temp: f32, // C
    pub tilt_warning_deg: i32, // symmetric band around level
}

impl From<&LinkConfig> for SafetyThresholds {
    fn from(config: &LinkConfig) -> Self {
        Self {
            warning_voltage: config.warning_voltage,
            motor_high_temp: config.motor_high_temp,
            inside_high_temp: config.inside_high_temp,
            tilt_warning_deg: config.tilt_warning_deg,
        }
    }
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

/// Operator "ignore for this session" choices for the two safety modals.
///
/// Both flags start cleared, can only be set, and are never re-armed for the
/// life of the process.
#[derive(Debug, Default)]
pub struct SuppressionFlags {
    battery: AtomicBool,
    temperature: AtomicBool, // motor temperature only
}

impl SuppressionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress_battery(&self) {
        self.battery.store(true, Ordering::Release);
    }

    pub fn suppress_temperature(&self) {
        self.temperature.store(true, Ordering::Release);
    }

    pub fn battery_suppressed(&self) -> bool {
        self.battery.load(Ordering::Acquire)
    }

    pub fn temperature_suppressed(&self) -> bool {
        self.temperature.load(Ordering::Acquire)
    }
}

/// Why the link stopped the motors on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    BatteryLow { battery: Battery, volts: f32 },
    MotorOverheat { left_c: f32, right_c: f32 }, // both reported, either may be hot
}

/// Outcome of checking one sentence against the thresholds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyActions {
    /// Set when the motors must be stopped and the operator warned.
    pub motor_stop: Option<StopReason>,
    pub flags: FlagUpdate,
}

impl SafetyActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_actions(&self) -> bool {
        self.motor_stop.is_some()
    }
}

/// Readout flags touched by one sentence; untouched readouts stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub battery1_low: Option<bool>,
    pub battery2_low: Option<bool>,
    pub left_motor_hot: Option<bool>,
    pub right_motor_hot: Option<bool>,
    pub inside_hot: Option<bool>, // flag only, no stop
    pub tilted: Option<bool>,
}

impl FlagUpdate {
    pub fn apply_to(self, flags: &mut ReadoutFlags) {
        let pairs = [
            (self.battery1_low, &mut flags.battery1_low),
            (self.battery2_low, &mut flags.battery2_low),
            (self.left_motor_hot, &mut flags.left_motor_hot),
            (self.right_motor_hot, &mut flags.right_motor_hot),
            (self.inside_hot, &mut flags.inside_hot),
            (self.tilted, &mut flags.tilted),
        ];
        for (update, flag) in pairs {
            if let Some(value) = update {
                *flag = value;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetyMonitor {
    thresholds: SafetyThresholds,
}

impl SafetyMonitor {
    pub fn new(thresholds: SafetyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    /// Check one decoded sentence.
    ///
    /// Readout flags are always updated. A motor stop is only requested when
    /// the matching suppression flag is clear; the inside temperature and the
    /// tilt angle never stop the motors.
    pub fn evaluate(&self, telemetry: &Telemetry, suppression: &SuppressionFlags) -> SafetyActions {
        let mut actions = SafetyActions::new();

        match *telemetry {
            Telemetry::BatteryVoltage { .. } | Telemetry::BatteryVoltages { .. } => {
                self.check_batteries(telemetry, suppression, &mut actions);
            }
            Telemetry::Temperatures(temps) => {
                let left_hot = temps.left_motor_c > self.thresholds.motor_high_temp;
                let right_hot = temps.right_motor_c > self.thresholds.motor_high_temp;

                actions.flags.left_motor_hot = Some(left_hot);
                actions.flags.right_motor_hot = Some(right_hot);
                actions.flags.inside_hot = Some(temps.inside_c > self.thresholds.inside_high_temp);

                if (left_hot || right_hot) && !suppression.temperature_suppressed() {
                    actions.motor_stop = Some(StopReason::MotorOverheat {
                        left_c: temps.left_motor_c,
                        right_c: temps.right_motor_c,
                    });
                }
            }
            Telemetry::Angle(deg) => {
                actions.flags.tilted = Some(deg.unsigned_abs() > self.thresholds.tilt_warning_deg.unsigned_abs());
            }
            Telemetry::Environment(_) | Telemetry::RemoteDisable(_) => {}
        }

        actions
    }

    fn check_batteries(&self, telemetry: &Telemetry, suppression: &SuppressionFlags, actions: &mut SafetyActions) {
        for (battery, volts) in telemetry.battery_volts() {
            let low = volts < self.thresholds.warning_voltage;
            match battery {
                Battery::One => actions.flags.battery1_low = Some(low),
                Battery::Two => actions.flags.battery2_low = Some(low),
            }

            // One stop per sentence, reported against the first low battery.
            if low && actions.motor_stop.is_none() && !suppression.battery_suppressed() {
                actions.motor_stop = Some(StopReason::BatteryLow { battery, volts });
            }
        }
    }
}
