use std::time::Duration;

use quad_control::sim::{run_vehicle, SimVehicle};
use quad_control::transport::{latest_sample, ChannelSink};
use quad_control::{shutdown_channel, Config, ControlLoop};

// Flies the configured trajectory against the simulated vehicle.
//
// cargo run --example sitl -- [config.yaml] [seconds]
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => match Config::from_path(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(60);

    let mut control = match ControlLoop::from_config(&config) {
        Ok(control) => control,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let (publisher, mut source) = latest_sample();
    let (mut sink, commands) = ChannelSink::channel(8);
    let (vehicle_stop, vehicle_shutdown) = shutdown_channel();
    let (control_stop, control_shutdown) = shutdown_channel();

    let vehicle = SimVehicle::new(&config).with_ground_effect(true);
    let plant = tokio::spawn(run_vehicle(
        vehicle,
        publisher,
        commands,
        config.tick_period(),
        vehicle_shutdown,
    ));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        control_stop.trigger();
    });

    let summary = control.run(&mut source, &mut sink, control_shutdown).await;
    vehicle_stop.trigger();

    match plant.await {
        Ok(Ok(vehicle)) => {
            let state = vehicle.state();
            println!("Final state after {:.1} s:", vehicle.time());
            println!(
                "Position NED: ({:.3}, {:.3}, {:.3})",
                state.position.x, state.position.y, state.position.z
            );
            println!(
                "Velocity NED: ({:.3}, {:.3}, {:.3})",
                state.velocity.x, state.velocity.y, state.velocity.z
            );
        }
        Ok(Err(e)) => println!("Simulation failed: {}", e),
        Err(e) => println!("Simulation task failed: {}", e),
    }
    println!("{:#?}", summary);
}
