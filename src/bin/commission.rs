use dali::commission::{self, CommissionOptions};
use dali::error::OpenError;
use dali::power::{self, SysfsInputs};
use dali_hat as dali;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

extern crate clap;
use clap::{value_parser, Arg, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = dali::gateway::init() {
        eprintln!("Failed to initialize gateway drivers: {}", e);
    }
    let matches = Command::new("commission")
        .about("Assign short addresses to all devices on the bus. Existing addresses are lost.")
        .arg(
            Arg::new("DEVICE")
                .short('d')
                .long("device")
                .default_value("default")
                .help("Select gateway, e.g. HAT:port=/dev/ttyS0"),
        )
        .arg(
            Arg::new("no_blink")
                .long("no-blink")
                .action(clap::ArgAction::SetTrue)
                .help("Don't flash devices as they are addressed"),
        )
        .arg(
            Arg::new("blink_hold")
                .long("blink-hold")
                .value_parser(value_parser!(u64))
                .default_value("1000")
                .help("Time in ms a device is kept off and on when flashing"),
        )
        .arg(
            Arg::new("gpio")
                .long("gpio")
                .default_value("/sys/class/gpio")
                .help("Sysfs GPIO directory with the power supply inputs"),
        )
        .arg(
            Arg::new("max")
                .short('m')
                .long("max-devices")
                .value_parser(value_parser!(u8).range(1..=64))
                .default_value("64")
                .help("Stop after this many devices"),
        )
        .get_matches();

    let device_name = matches.get_one::<String>("DEVICE").unwrap();
    let options = CommissionOptions {
        blink: !*matches.get_one::<bool>("no_blink").unwrap(),
        blink_hold: Duration::from_millis(*matches.get_one::<u64>("blink_hold").unwrap()),
        max_devices: *matches.get_one::<u8>("max").unwrap(),
    };
    let inputs_path = matches.get_one::<String>("gpio").unwrap();
    let mut inputs = SysfsInputs::new(inputs_path);
    inputs.setup();
    println!("Power: {}", power::check_power_status(&mut inputs));

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
    match driver.version().await {
        Ok(Some(v)) => println!(
            "Gateway hardware {}, firmware {}, type {}",
            v.hardware, v.firmware, v.hardware_type
        ),
        Ok(None) => println!("No version reply from gateway"),
        Err(e) => {
            eprintln!("Gateway not responding: {}", e);
            return;
        }
    }
    match driver.bus_status().await {
        Ok(status) => println!("Bus: {}", status),
        Err(e) => {
            eprintln!("Failed to read bus status: {}", e);
            return;
        }
    }

    let driver = Arc::new(Mutex::new(driver));
    let mut assigned = commission::commission_shared(driver, options);
    let mut count = 0;
    while let Some(res) = assigned.next().await {
        match res {
            Ok(a) => {
                println!("Short: {}, Long: {:06x}", a.short, a.long);
                count += 1;
            }
            Err(e) => {
                eprintln!("Commissioning failed: {}", e);
                return;
            }
        }
    }
    println!("{} devices addressed", count);
}
