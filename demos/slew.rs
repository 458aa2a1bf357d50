//! Point an Evolution mount and watch its status.
//!
//! Discovers the mount on the local network (or takes an explicit
//! address), optionally slews to a commanded alt/azm, then prints a
//! status line every second until the connection goes away.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use evoscope::{Axis, MountState, Scope, angle, discover};

#[derive(Debug, Parser)]
struct Args {
    /// mount address; discovered via the UDP beacon when omitted
    address: Option<SocketAddr>,

    /// target altitude in degrees
    #[clap(long)]
    alt: Option<f64>,

    /// target azimuth in degrees
    #[clap(long)]
    azm: Option<f64>,

    /// seconds to wait for the discovery beacon
    #[clap(long, default_value = "30")]
    discover_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let address = match args.address {
        Some(address) => address,
        None => {
            println!("looking for the mount ...");
            discover::discover(Duration::from_secs(args.discover_timeout)).await?
        }
    };

    println!("connecting to {address}");
    let scope = Scope::connect(address).await?;

    if let (Some(alt), Some(azm)) = (args.alt, args.azm) {
        println!("slewing to alt {alt}° azm {azm}°");
        scope.goto(alt / 360.0, azm / 360.0).await?;
        println!("on target");
    }

    while scope.is_connected() {
        print_status(&scope.state());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    scope.closed().await?;
    Ok(())
}

fn print_status(state: &MountState) {
    println!(
        "batt {:5.2} V  alt {} ({})  azm {} ({})",
        state.battery_voltage,
        angle::fraction_to_dms(state.alt),
        axis_flag(state, Axis::Alt),
        angle::fraction_to_dms(state.azm),
        axis_flag(state, Axis::Azm),
    );
}

fn axis_flag(state: &MountState, axis: Axis) -> char {
    if state.slew_pending(axis) {
        'S'
    } else if state.guiding {
        'G'
    } else {
        'I'
    }
}
