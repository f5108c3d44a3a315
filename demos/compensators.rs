use quad_control::compensator::{Compensator, FlightCondition, GroundEffectModel, ThrustCompensator};
use quad_control::Config;

// Prints the compensated hover thrust of every model over height, at rest
// and at 2 m/s forward speed.
fn main() {
    let config = Config::default();
    let hover = config.vehicle.mass * config.vehicle.gravity;

    for speed in [0.0, 2.0] {
        println!("forward speed {:.1} m/s, hover thrust {:.3} N", speed, hover);
        print!("{:>8}", "z [m]");
        for model in GroundEffectModel::ALL {
            print!("{:>18}", format!("{:?}", model));
        }
        println!();

        for height in [0.05, 0.1, 0.2, 0.3, 0.5, 1.0, 2.0] {
            print!("{:>8.2}", height);
            let condition = FlightCondition {
                height,
                forward_speed: speed,
            };
            for model in GroundEffectModel::ALL {
                let compensator =
                    Compensator::new(model, &config.vehicle, config.compensation.sanchez_constant);
                match compensator.compensate(hover, &condition) {
                    Ok(thrust) => print!("{:>18.4}", thrust),
                    Err(_) => print!("{:>18}", "-"),
                }
            }
            println!();
        }
        println!();
    }
}
