use kevinbot_link::safety::*;
use kevinbot_link::telemetry::{decode, Battery, ReadoutFlags, Telemetry, Temperatures};

fn monitor() -> SafetyMonitor {
    SafetyMonitor::new(SafetyThresholds {
        warning_voltage: 11.0,
        motor_high_temp: 50.0,
        inside_high_temp: 45.0,
        tilt_warning_deg: 25,
    })
}

fn temps(left: f32, right: f32, inside: f32) -> Telemetry {
    Telemetry::Temperatures(Temperatures {
        left_motor_c: left,
        right_motor_c: right,
        inside_c: inside,
    })
}

#[test]
fn test_suppression_flags_start_clear_and_stick() {
    let flags = SuppressionFlags::new();
    assert!(!flags.battery_suppressed());
    assert!(!flags.temperature_suppressed());

    flags.suppress_battery();
    assert!(flags.battery_suppressed());
    assert!(!flags.temperature_suppressed());

    flags.suppress_battery();
    flags.suppress_temperature();
    assert!(flags.battery_suppressed());
    assert!(flags.temperature_suppressed());
}

#[test]
fn test_low_battery_requests_one_stop() {
    let flags = SuppressionFlags::new();
    let actions = monitor().evaluate(&decode("batt_volts=105,120").unwrap(), &flags);

    assert_eq!(
        actions.motor_stop,
        Some(StopReason::BatteryLow { battery: Battery::One, volts: 10.5 })
    );
    assert_eq!(actions.flags.battery1_low, Some(true));
    assert_eq!(actions.flags.battery2_low, Some(false));
}

#[test]
fn test_both_batteries_low_still_one_stop() {
    let flags = SuppressionFlags::new();
    let actions = monitor().evaluate(&decode("batt_volts=100,101").unwrap(), &flags);

    assert_eq!(
        actions.motor_stop,
        Some(StopReason::BatteryLow { battery: Battery::One, volts: 10.0 })
    );
    assert_eq!(actions.flags.battery2_low, Some(true));
}

#[test]
fn test_legacy_battery_sentence_uses_same_threshold() {
    let flags = SuppressionFlags::new();
    let actions = monitor().evaluate(&decode("batt_volt2=109").unwrap(), &flags);
    assert!(matches!(actions.motor_stop, Some(StopReason::BatteryLow { battery: Battery::Two, .. })));
    assert_eq!(actions.flags.battery1_low, None);

    let healthy = monitor().evaluate(&decode("batt_volt1=110").unwrap(), &flags);
    assert!(!healthy.has_actions());
    assert_eq!(healthy.flags.battery1_low, Some(false));
}

#[test]
fn test_suppressed_battery_still_flags_readout() {
    let flags = SuppressionFlags::new();
    flags.suppress_battery();

    for _ in 0..5 {
        let actions = monitor().evaluate(&decode("batt_volts=90,90").unwrap(), &flags);
        assert!(actions.motor_stop.is_none());
        assert_eq!(actions.flags.battery1_low, Some(true));
    }
}

#[test]
fn test_hot_motor_requests_stop() {
    let flags = SuppressionFlags::new();
    let actions = monitor().evaluate(&temps(30.0, 55.0, 20.0), &flags);

    assert_eq!(actions.motor_stop, Some(StopReason::MotorOverheat { left_c: 30.0, right_c: 55.0 }));
    assert_eq!(actions.flags.left_motor_hot, Some(false));
    assert_eq!(actions.flags.right_motor_hot, Some(true));
    assert_eq!(actions.flags.inside_hot, Some(false));
}

#[test]
fn test_hot_inside_never_stops_motors() {
    let flags = SuppressionFlags::new();
    let actions = monitor().evaluate(&temps(30.0, 30.0, 60.0), &flags);

    assert!(actions.motor_stop.is_none());
    assert_eq!(actions.flags.inside_hot, Some(true));
}

#[test]
fn test_temperature_suppression_skips_stop_only() {
    let flags = SuppressionFlags::new();
    flags.suppress_temperature();
    let actions = monitor().evaluate(&temps(70.0, 70.0, 20.0), &flags);

    assert!(actions.motor_stop.is_none());
    assert_eq!(actions.flags.left_motor_hot, Some(true));
    assert_eq!(actions.flags.right_motor_hot, Some(true));

    // Battery warnings are independent.
    let battery = monitor().evaluate(&decode("batt_volt1=100").unwrap(), &flags);
    assert!(battery.motor_stop.is_some());
}

#[test]
fn test_angle_only_flags_tilt() {
    let flags = SuppressionFlags::new();
    let tilted = monitor().evaluate(&Telemetry::Angle(-40), &flags);
    assert!(tilted.motor_stop.is_none());
    assert_eq!(tilted.flags.tilted, Some(true));

    let level = monitor().evaluate(&Telemetry::Angle(25), &flags);
    assert_eq!(level.flags.tilted, Some(false));
}

#[test]
fn test_flag_update_leaves_untouched_readouts() {
    let mut flags = ReadoutFlags {
        battery2_low: true,
        ..ReadoutFlags::default()
    };
    let update = FlagUpdate {
        battery1_low: Some(true),
        ..FlagUpdate::default()
    };
    update.apply_to(&mut flags);

    assert!(flags.battery1_low);
    assert!(flags.battery2_low);
    assert!(!flags.tilted);
}
