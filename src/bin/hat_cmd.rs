use dali::common::address::{Short, Target};
use dali::common::status::GearStatus;
use dali::error::OpenError;
use dali::gateway::frame::ResponseToken;
use dali::gateway::GatewayDriver;
use dali::telemetry::Bridge;
use dali_hat as dali;
use std::error::Error;
use std::str::FromStr;

extern crate clap;
use clap::{value_parser, Arg, ArgMatches, Command};

fn parse_target(s: &str) -> Result<Target, String> {
    if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("broadcast") {
        return Ok(Target::Broadcast);
    }
    parse_short(s).map(Target::from)
}

fn parse_short(s: &str) -> Result<Short, String> {
    Short::from_str(s).map_err(|e| e.to_string())
}

fn target_arg() -> Arg {
    Arg::new("TARGET")
        .required(true)
        .value_parser(parse_target)
        .help("Short address 0-63 or 'all'")
}

fn short_arg() -> Arg {
    Arg::new("ADDR")
        .required(true)
        .value_parser(parse_short)
        .help("Short address 0-63")
}

async fn run(
    driver: &mut GatewayDriver,
    matches: &ArgMatches,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    match matches.subcommand() {
        Some(("level", args)) => {
            let addr = *args.get_one::<Short>("ADDR").unwrap();
            println!("Level: {}", driver.query_level(addr).await?);
        }
        Some(("status", args)) => {
            let addr = *args.get_one::<Short>("ADDR").unwrap();
            match driver.query_status(addr).await? {
                ResponseToken::DeviceStatusReport(s) => {
                    println!("Status: [{}]", GearStatus::new(s))
                }
                token => println!("No valid status: {:?}", token),
            }
        }
        Some(("set", args)) => {
            let target = *args.get_one::<Target>("TARGET").unwrap();
            let level = *args.get_one::<u8>("LEVEL").unwrap();
            driver.set_level(target, level).await?;
        }
        Some(("on", args)) => {
            let target = *args.get_one::<Target>("TARGET").unwrap();
            driver.set_state(target, true).await?;
        }
        Some(("off", args)) => {
            let target = *args.get_one::<Target>("TARGET").unwrap();
            driver.set_state(target, false).await?;
        }
        Some(("reset", args)) => {
            let target = *args.get_one::<Target>("TARGET").unwrap();
            driver.reset(target).await?;
        }
        Some(("query-reset", args)) => {
            let target = *args.get_one::<Target>("TARGET").unwrap();
            let reset = driver.query_reset(target).await?;
            println!("Reset state: {}", if reset { "yes" } else { "no" });
        }
        Some(("assign-single", args)) => {
            let addr = *args.get_one::<Short>("ADDR").unwrap();
            driver.assign_single_address(addr).await?;
        }
        Some(("version", _)) => match driver.version().await? {
            Some(v) => println!("{}", v),
            None => println!("Invalid version reply"),
        },
        Some(("bus", _)) => println!("{}", driver.bus_status().await?),
        Some(("rpc", args)) => {
            let bridge = Bridge {
                dimmer: *args.get_one::<Short>("dimmer").unwrap(),
                relay: *args.get_one::<Short>("relay").unwrap(),
            };
            let request = args.get_one::<String>("REQUEST").unwrap();
            let outcome = bridge.handle_rpc(driver, request).await?;
            for doc in outcome.attributes {
                println!("Attributes: {}", doc);
            }
            if let Some(resp) = outcome.response {
                println!("Response: {}", resp);
            }
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = dali::gateway::init() {
        eprintln!("Failed to initialize gateway drivers: {}", e);
    }
    let matches = Command::new("hat_cmd")
        .about("Send a single command through a DALI HAT gateway")
        .subcommand_required(true)
        .arg(
            Arg::new("DEVICE")
                .short('d')
                .long("device")
                .default_value("default")
                .help("Select gateway, e.g. HAT:port=/dev/ttyS0"),
        )
        .subcommand(
            Command::new("level")
                .about("Query actual level")
                .arg(short_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Query device status")
                .arg(short_arg()),
        )
        .subcommand(
            Command::new("set")
                .about("Set arc power level")
                .arg(target_arg())
                .arg(
                    Arg::new("LEVEL")
                        .required(true)
                        .value_parser(value_parser!(u8).range(0..=254)),
                ),
        )
        .subcommand(Command::new("on").about("Full level").arg(target_arg()))
        .subcommand(Command::new("off").about("Level 0").arg(target_arg()))
        .subcommand(Command::new("reset").about("Reset devices").arg(target_arg()))
        .subcommand(
            Command::new("query-reset")
                .about("Check if devices are in reset state")
                .arg(target_arg()),
        )
        .subcommand(
            Command::new("assign-single")
                .about("Set the short address of the only device on the bus")
                .arg(short_arg()),
        )
        .subcommand(Command::new("version").about("Gateway version"))
        .subcommand(Command::new("bus").about("Bus power status"))
        .subcommand(
            Command::new("rpc")
                .about("Handle a dashboard RPC request")
                .arg(
                    Arg::new("REQUEST")
                        .required(true)
                        .help("JSON request, e.g. {\"method\":\"checkRelayStatus\"}"),
                )
                .arg(
                    Arg::new("dimmer")
                        .long("dimmer")
                        .value_parser(parse_short)
                        .default_value("0")
                        .help("Short address of dimmer"),
                )
                .arg(
                    Arg::new("relay")
                        .long("relay")
                        .value_parser(parse_short)
                        .default_value("1")
                        .help("Short address of relay"),
                ),
        )
        .get_matches();

    let device_name = matches.get_one::<String>("DEVICE").unwrap();
    let mut driver = match dali::gateway::open(device_name) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open gateway: {}", e);
            if let OpenError::NotFound = e {
                eprintln!("Available drivers:");
                for name in dali::gateway::driver_names() {
                    eprintln!("  {}", name);
                }
            }
            return;
        }
    };
    if let Err(e) = run(&mut driver, &matches).await {
        eprintln!("Command failed: {}", e);
    }
}
