use std::time::Duration;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use quad_control::command::Command;
use quad_control::reference::{Phase, StepResponse};
use quad_control::sim::{run_vehicle, SimVehicle};
use quad_control::throttle::ThrottleModel;
use quad_control::transport::{latest_sample, ChannelSink};
use quad_control::{shutdown_channel, CommandMode, Config, ControlLoop, ReferenceGenerator, StateSample};

fn unit_gain_config() -> Config {
    let mut config = Config::default();
    config.gains.position.xy = 1.0;
    config.gains.position.z = 1.0;
    for pid in [&mut config.gains.velocity.xy, &mut config.gains.velocity.z] {
        pid.p = 1.0;
        pid.i = 0.0;
        pid.d = 0.0;
    }
    config
}

#[test]
fn test_takeoff_tick_at_five_seconds() {
    let config = unit_gain_config();
    let mut control = ControlLoop::new(&config, StepResponse::default()).unwrap();
    let sample = StateSample::default();

    while control.elapsed() < 5.0 {
        control.step(&sample).unwrap();
    }
    assert_eq!(control.tick(), 250);

    let output = control.step(&sample).unwrap();
    assert_eq!(output.t, 5.0);
    assert_eq!(StepResponse::default().phase(output.t), Some(Phase::Takeoff));
    assert_eq!(output.reference.position, Vector3::new(0.0, 0.0, 2.1));

    let vel_z = (1.0_f64 * 2.1).min(config.limits.max_vel_z_up);
    assert_eq!(output.vel_ref, Vector3::new(0.0, 0.0, vel_z));
    assert_relative_eq!(output.acc_ref.z, vel_z - 9.81, epsilon = 1e-12);

    let thrust = output.acc_ref.dot(&Vector3::z()) * config.vehicle.mass;
    assert_relative_eq!(output.thrust, thrust, epsilon = 1e-12);

    let throttle = ThrottleModel::from_params(&config.throttle).thrust_to_throttle(thrust);
    assert_eq!(output.throttle, throttle);
    assert!((0.0..=1.0).contains(&output.throttle));
}

#[test]
fn test_raised_ascent_limit_passes_full_position_error() {
    let mut config = unit_gain_config();
    config.limits.max_vel_z_up = 5.0;
    let mut control = ControlLoop::new(&config, StepResponse::default()).unwrap();

    let output = control.step(&StateSample::default()).unwrap();
    assert_relative_eq!(output.vel_ref.z, 2.1);
    assert_relative_eq!(output.acc_ref.z, 2.1 - 9.81, epsilon = 1e-12);
}

#[test]
fn test_yaml_session_setup() {
    let yaml = r#"
tick_ms: 10
command_mode: velocity
trajectory:
  kind: circle
  radius: 0.5
limits:
  integral: { xy: 1.0, z: 2.0 }
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.command_mode, CommandMode::Velocity);

    let mut control = ControlLoop::from_config(&config).unwrap();
    let mut sample = StateSample::default();
    sample.position.z = 2.0;

    let mut last = None;
    for _ in 0..2000 {
        last = Some(control.step(&sample).unwrap());
    }
    let output = last.unwrap();
    // 1999 ticks of 10 ms: inside the circle segment
    assert_relative_eq!(output.t, 19.99, epsilon = 1e-9);
    assert!(matches!(output.command, Command::Velocity(_)));
    assert_relative_eq!(output.reference.position.xy().norm(), 0.5, epsilon = 1e-12);
    assert!(control.controller().integrated_error().x.abs() <= 1.0);
    assert!(control.controller().integrated_error().z.abs() <= 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_flight_session() {
    let mut config = Config::default();
    config.shutdown_hold_ticks = 25;

    let mut control = ControlLoop::from_config(&config)
        .unwrap()
        .with_recorder(Vec::new());
    let (publisher, mut source) = latest_sample();
    let (mut sink, commands) = ChannelSink::channel(8);
    let (vehicle_stop, vehicle_shutdown) = shutdown_channel();
    let (control_stop, control_shutdown) = shutdown_channel();

    let plant = tokio::spawn(run_vehicle(
        SimVehicle::new(&config).with_ground_effect(true),
        publisher,
        commands,
        config.tick_period(),
        vehicle_shutdown,
    ));
    // The vehicle publishes its first sample before the loop starts reading
    tokio::task::yield_now().await;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(50)).await;
        control_stop.trigger();
    });

    let summary = control.run(&mut source, &mut sink, control_shutdown).await;
    vehicle_stop.trigger();
    let vehicle = plant.await.unwrap().unwrap();

    assert_eq!(summary.hold_ticks, 25);
    assert!(summary.ticks >= 2500);
    assert!(summary.read_failures <= 1);
    assert_eq!(summary.send_failures, 0);
    assert!(summary.commands_sent > 0);

    let state = vehicle.state();
    assert!(state.position.iter().all(|v| v.is_finite()));
    assert!(state.velocity.iter().all(|v| v.is_finite()));
    assert!(state.height() >= 0.0);

    // Simulated telemetry always carries actuator outputs
    let records = control.recorder();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.t >= 15.0 && r.t < 45.0));
}
