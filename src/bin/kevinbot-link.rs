use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use kevinbot_link::link::{CommandLink, LinkEvent};
use kevinbot_link::protocol::{parse_value, Command};
use kevinbot_link::safety::StopReason;
use kevinbot_link::telemetry::{Battery, Telemetry};
use kevinbot_link::{transport, LinkConfig};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("kevinbot-link")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Kevinbot command link - talk to the robot over the XBee radio")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON settings file")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Serial port of the radio modem")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("baud")
                .short("b")
                .long("baud")
                .value_name("BAUD")
                .help("Baud rate")
                .takes_value(true)
                .global(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(b) if b > 0 => Ok(()),
                    _ => Err("Baud rate must be a positive number".into()),
                }),
        )
        .subcommand(SubCommand::with_name("ports").about("List serial ports"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Print telemetry and safety events until Ctrl-C")
                .arg(
                    Arg::with_name("ignore-battery")
                        .long("ignore-battery")
                        .help("Suppress low-battery stops for this session"),
                )
                .arg(
                    Arg::with_name("ignore-temps")
                        .long("ignore-temps")
                        .help("Suppress motor temperature stops for this session"),
                ),
        )
        .subcommand(
            SubCommand::with_name("send")
                .about("Send one command line")
                .arg(Arg::with_name("key").help("Command key").required(true))
                .arg(
                    Arg::with_name("value")
                        .help("Value; comma-separated integers are sent as a sequence")
                        .required(false),
                )
                .arg(
                    Arg::with_name("delay")
                        .long("delay")
                        .value_name("MS")
                        .help("Pause after sending")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Delay must be a number of milliseconds".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("stop").about("Send the motor stop pair"))
        .get_matches();

    let config = load_config(&matches)?;

    match matches.subcommand() {
        ("ports", _) => list_ports()?,
        ("monitor", Some(sub)) => monitor(config, sub).await?,
        ("send", Some(sub)) => send(config, sub)?,
        ("stop", _) => {
            let link = CommandLink::connect(config)?;
            link.motor_stop()?;
            println!("{} motors stopped", "✓".green());
            link.shutdown();
        }
        _ => {
            println!("{}", matches.usage());
        }
    }

    Ok(())
}

fn load_config(matches: &ArgMatches) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(port) = matches.value_of("port") {
        config.port = port.to_string();
    }
    if let Some(baud) = matches.value_of("baud") {
        config.baud = baud.parse()?;
    }
    config.validate()?;
    Ok(config)
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = transport::available_ports()?;
    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
    }
    for port in ports {
        println!("  {}", port);
    }
    Ok(())
}

fn send(config: LinkConfig, sub: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let key = sub.value_of("key").unwrap_or_default();
    let value = parse_value(sub.value_of("value").unwrap_or_default());
    let command = Command::new(key, value);
    let delay = sub
        .value_of("delay")
        .map(str::parse::<u64>)
        .transpose()?
        .map_or(config.command_delay(), Duration::from_millis);

    let link = CommandLink::connect(config)?;
    link.send_paced(&command, delay)?;
    println!("{} {}", "→".cyan(), command);
    link.shutdown();
    Ok(())
}

async fn monitor(config: LinkConfig, sub: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port.clone();
    let (link, open_error) = CommandLink::connect_or_degraded(config);

    if let Some(e) = open_error {
        println!("{} {}", "⚠ Could not open the radio:".yellow().bold(), e);
        println!("  {}", "Continuing without a connection.".yellow());
    } else {
        println!("{} {}", "📡 Listening on".green().bold(), port);
        link.send(&Command::connection_status(true))?;
    }

    if sub.is_present("ignore-battery") {
        link.suppress_battery_warnings();
    }
    if sub.is_present("ignore-temps") {
        link.suppress_temperature_warnings();
    }

    let mut events = link.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(LinkEvent::ReceiverStopped { reason }) => {
                    println!("{} {}", "Receiver stopped:".red().bold(), reason);
                    break;
                }
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => println!("{}", format!("(skipped {n} events)").as_str().dimmed()),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if link.is_connected() {
        let _ = link.send(&Command::connection_status(false));
    }
    link.shutdown();
    println!("{}", "Link closed".cyan());
    Ok(())
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::Telemetry(t) => print_telemetry(t),
        LinkEvent::SafetyStop(reason) => {
            let why = match reason {
                StopReason::BatteryLow { .. } => "battery low",
                StopReason::MotorOverheat { .. } => "motor overheat",
            };
            println!("{} {}", "⛔ SAFETY STOP:".red().bold(), why);
        }
        LinkEvent::BatteryWarning { battery, volts } => {
            println!("{} battery {} at {:.1} V", "🔋 WARNING".red(), battery_label(*battery), volts);
        }
        LinkEvent::MotorOverheat { left_c, right_c } => {
            println!("{} left {:.1} °C, right {:.1} °C", "🌡️  WARNING".red(), left_c, right_c);
        }
        LinkEvent::ControlsEnabled(enabled) => {
            if *enabled {
                println!("{}", "Controls enabled by robot".green());
            } else {
                println!("{}", "Controls disabled by robot".yellow());
            }
        }
        LinkEvent::ReceiverStopped { reason } => println!("receiver stopped: {}", reason),
    }
}

fn print_telemetry(telemetry: &Telemetry) {
    match telemetry {
        Telemetry::BatteryVoltage { battery, volts } => {
            println!("{:>8} {} {:.1} V", "battery".bold(), battery_label(*battery), volts);
        }
        Telemetry::BatteryVoltages { battery1, battery2 } => {
            println!("{:>8} 1 {:.1} V  2 {:.1} V", "battery".bold(), battery1, battery2);
        }
        Telemetry::Environment(env) => {
            println!(
                "{:>8} {:.1} °C / {:.1} °F  {:.0} %RH  {:.1} hPa",
                "env".bold(),
                env.temp_c,
                env.temp_f,
                env.humidity_pct,
                env.pressure_hpa
            );
        }
        Telemetry::Temperatures(t) => {
            println!(
                "{:>8} left {:.1} °C  right {:.1} °C  inside {:.1} °C",
                "temps".bold(),
                t.left_motor_c,
                t.right_motor_c,
                t.inside_c
            );
        }
        Telemetry::Angle(deg) => println!("{:>8} {}°", "tilt".bold(), deg),
        Telemetry::RemoteDisable(_) => {}
    }
}

fn battery_label(battery: Battery) -> &'static str {
    match battery {
        Battery::One => "1",
        Battery::Two => "2",
    }
}
