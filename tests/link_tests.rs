use kevinbot_link::link::*;
use kevinbot_link::protocol::Command;
use kevinbot_link::safety::StopReason;
use kevinbot_link::telemetry::{Battery, Telemetry};
use kevinbot_link::transport::{memory_pair, MemoryRobot};
use kevinbot_link::{LinkConfig, LinkError, TransportError};
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

const POLL: Duration = Duration::from_millis(5);

fn test_config() -> LinkConfig {
    LinkConfig {
        command_delay_ms: 0,
        warning_voltage: 11.0,
        ..LinkConfig::default()
    }
}

fn started_link() -> (CommandLink, MemoryRobot, broadcast::Receiver<LinkEvent>) {
    let (writer, reader, robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);
    let events = link.subscribe();
    link.start_receiver(reader).unwrap();
    (link, robot, events)
}

fn wait_for(events: &mut broadcast::Receiver<LinkEvent>, pred: impl Fn(&LinkEvent) -> bool) -> LinkEvent {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match events.try_recv() {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "timed out waiting for link event");
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("event channel error: {e}"),
        }
    }
}

#[test]
fn test_send_appends_single_carriage_return() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);

    link.send(&Command::new("left_us", 1600u16)).unwrap();
    link.send(&Command::action("reboot")).unwrap();

    assert_eq!(robot.wire(), "left_us=1600\rreboot\r");
    assert_eq!(robot.sent_lines(), ["left_us=1600", "reboot"]);
}

#[test]
fn test_send_paced_waits_after_writing() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);

    let start = Instant::now();
    link.send_paced(&Command::new("head_color1", "ff0000"), Duration::from_millis(30)).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(robot.sent_lines(), ["head_color1=ff0000"]);
}

#[test]
fn test_low_battery_sentence_stops_motors_once() {
    let (link, robot, mut events) = started_link();

    robot.send("batt_volts=105,120");
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::SafetyStop(_)));

    assert_eq!(
        event,
        LinkEvent::SafetyStop(StopReason::BatteryLow { battery: Battery::One, volts: 10.5 })
    );
    wait_for(&mut events, |e| matches!(e, LinkEvent::BatteryWarning { .. }));
    assert_eq!(robot.sent_lines(), ["left_us=1500", "right_us=1500"]);

    let state = link.telemetry();
    assert_eq!(state.battery1_volts, Some(10.5));
    assert!(state.flags.battery1_low);
    assert!(!state.flags.battery2_low);
}

#[test]
fn test_suppressed_battery_warnings_send_nothing() {
    let (link, robot, mut events) = started_link();
    link.suppress_battery_warnings();

    for _ in 0..5 {
        robot.send("batt_volts=90,95");
    }
    robot.send("angle=1");
    wait_for(&mut events, |e| *e == LinkEvent::Telemetry(Telemetry::Angle(1)));

    assert!(robot.sent_lines().is_empty());
    assert_eq!(link.telemetry().battery1_volts, Some(9.0));
}

#[test]
fn test_hot_motor_stops_and_reports() {
    let (link, robot, mut events) = started_link();

    robot.send("temps=65,40,30");
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::MotorOverheat { .. }));

    assert_eq!(event, LinkEvent::MotorOverheat { left_c: 65.0, right_c: 40.0 });
    assert_eq!(robot.sent_lines(), ["left_us=1500", "right_us=1500"]);
    assert!(link.telemetry().flags.left_motor_hot);
}

#[test]
fn test_malformed_sentence_leaves_state_untouched() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);
    let mut events = link.subscribe();

    assert_eq!(link.handle_line("temps=10.5,11.0"), None);

    let state = link.telemetry();
    assert_eq!(state.temperatures, None);
    assert_eq!(state.sentences_dropped, 1);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(robot.sent_lines().is_empty());
}

#[test]
fn test_unknown_key_is_silent() {
    let (writer, _reader, _robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);
    let mut events = link.subscribe();

    assert_eq!(link.handle_line("foobar=1,2,3"), None);
    assert_eq!(link.handle_line("no equals sign"), None);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(link.telemetry().sentences_dropped, 0);
}

#[test]
fn test_legacy_and_modern_battery_converge() {
    let (writer, _reader, _robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);
    link.suppress_battery_warnings();

    link.handle_line("batt_volt1=105");
    assert_eq!(link.telemetry().battery1_volts, Some(10.5));

    link.handle_line("batt_volt1=126");
    link.handle_line("batt_volts=105,120");
    assert_eq!(link.telemetry().battery1_volts, Some(10.5));
    assert_eq!(link.telemetry().battery2_volts, Some(12.0));
}

#[test]
fn test_remote_disable_gates_controls() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let link = CommandLink::new(test_config(), writer);
    let mut events = link.subscribe();

    link.handle_line("remote.disableui=true");
    assert!(!link.state().controls_enabled());
    assert_eq!(events.try_recv().unwrap(), LinkEvent::ControlsEnabled(false));

    let drive = Command::new("left_us", 1700u16);
    assert!(matches!(link.send_control(&drive), Err(LinkError::ControlsDisabled(_))));
    link.send_control(&Command::connection_status(true)).unwrap();
    link.motor_stop().unwrap();

    link.handle_line("remote.disableui=false");
    assert!(link.state().controls_enabled());
    link.send_control(&drive).unwrap();

    assert_eq!(
        robot.sent_lines(),
        [
            "no-pass.remote.status=connected",
            "left_us=1500",
            "right_us=1500",
            "left_us=1700",
        ]
    );
}

#[test]
fn test_shutdown_stops_receiver_and_closes_link() {
    let (link, robot, _events) = started_link();
    assert!(link.receiver_running());

    assert!(matches!(link.shutdown(), Some(ReceiverExit::Disabled)));
    assert!(!link.receiver_running());
    assert!(!link.state().is_enabled());
    assert!(robot.is_closed());
    assert!(link.shutdown().is_none());

    assert!(matches!(
        link.send(&Command::action("ping")),
        Err(LinkError::Transport(TransportError::Closed))
    ));
}

#[test]
fn test_final_sentence_runs_after_disable() {
    let (link, robot, mut events) = started_link();

    robot.send("angle=3");
    wait_for(&mut events, |e| matches!(e, LinkEvent::Telemetry(_)));
    // Let the loop get back into its blocking read.
    thread::sleep(Duration::from_millis(50));

    link.state().disable();
    robot.send("angle=7");
    wait_for(&mut events, |e| matches!(e, LinkEvent::ReceiverStopped { .. }));

    assert_eq!(link.telemetry().angle_deg, Some(7));
    assert!(matches!(link.shutdown(), Some(ReceiverExit::Disabled)));
}

#[test]
fn test_read_failure_ends_receiver_only() {
    let (link, robot, mut events) = started_link();

    robot.fail_read(ErrorKind::BrokenPipe);
    wait_for(&mut events, |e| matches!(e, LinkEvent::ReceiverStopped { .. }));
    let deadline = Instant::now() + Duration::from_secs(2);
    while link.receiver_running() {
        assert!(Instant::now() < deadline, "receiver thread did not exit");
        thread::sleep(Duration::from_millis(1));
    }

    // Sentences after the failure are never read.
    robot.send("angle=12");
    thread::sleep(Duration::from_millis(20));
    assert_eq!(link.telemetry().angle_deg, None);

    // Sending still works; nothing reconnects the reader.
    link.send(&Command::new("left_us", 1500u16)).unwrap();
    assert_eq!(robot.sent_lines(), ["left_us=1500"]);

    assert!(matches!(
        link.shutdown(),
        Some(ReceiverExit::TransportFailed(TransportError::Io(_)))
    ));
}

#[test]
fn test_second_receiver_is_rejected() {
    let (link, _robot, _events) = started_link();
    let (_writer, reader, _other) = memory_pair(POLL);

    assert!(matches!(link.start_receiver(reader), Err(LinkError::ReceiverRunning)));
}

#[test]
fn test_degraded_mode_when_port_cannot_open() {
    let config = LinkConfig {
        port: "/dev/kevinbot-link-missing-port".into(),
        ..test_config()
    };
    let (link, open_error) = CommandLink::connect_or_degraded(config);

    assert!(matches!(
        open_error,
        Some(LinkError::Transport(TransportError::Open { .. }))
    ));
    assert!(!link.is_connected());
    assert!(!link.receiver_running());
    link.send(&Command::new("left_us", 1500u16)).unwrap();
}

#[test]
fn test_firmware_version_is_recorded() {
    let state = LinkState::new();
    assert_eq!(state.firmware_version(), None);
    state.set_firmware_version("v3.1.0");
    assert_eq!(state.firmware_version().as_deref(), Some("v3.1.0"));
}

#[test]
fn test_send_all_spaces_commands_in_order() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let config = LinkConfig {
        command_delay_ms: 15,
        ..test_config()
    };
    let link = CommandLink::new(config, writer);
    let commands = [
        Command::new("head_color1", "00ff00"),
        Command::new("arm_prs", vec![10, 20, 30]),
        Command::action("reboot"),
    ];

    let start = Instant::now();
    link.send_all(&commands).unwrap();

    assert!(start.elapsed() >= Duration::from_millis(45));
    assert_eq!(robot.sent_lines(), ["head_color1=00ff00", "arm_prs=10,20,30", "reboot"]);
}

#[test]
fn test_motor_stop_pair_is_paced() {
    let (writer, _reader, robot) = memory_pair(POLL);
    let config = LinkConfig {
        command_delay_ms: 25,
        ..test_config()
    };
    let link = CommandLink::new(config, writer);

    let start = Instant::now();
    link.motor_stop().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(robot.sent_lines(), ["left_us=1500", "right_us=1500"]);
}
