use aocs_scoe::sim::math::Vec3;
use aocs_scoe::sim::{AocsSimulation, SimConfig, NUM_SUN_SENSORS, SIM_DT};

fn seeded_sim() -> AocsSimulation {
    AocsSimulation::new(SimConfig {
        seed: Some(1234),
        ..SimConfig::default()
    })
}

fn run_seconds(sim: &mut AocsSimulation, seconds: f64) {
    let ticks = (seconds / SIM_DT).round() as usize;
    for _ in 0..ticks {
        sim.tick();
    }
}

#[test]
fn test_quaternion_norm_invariant_under_command_load() {
    let mut sim = seeded_sim();
    sim.start();
    sim.reaction_wheels[0].commanded_torque_nm = 0.15;
    sim.thrusters[1].firing = true;
    sim.torque_rods[2].commanded_dipole_am2 = 20.0;

    run_seconds(&mut sim, 30.0);

    let norm = sim.state.quaternion.norm();
    assert!(
        (norm - 1.0).abs() < 1e-6,
        "quaternion norm drifted to {norm}"
    );
}

#[test]
fn test_wheel_spin_up_rate_matches_commanded_torque() {
    let mut sim = seeded_sim();
    sim.start();

    let torque = 0.05f32.to_be_bytes();
    sim.reaction_wheels[0]
        .process_command(0x04, &torque)
        .unwrap();

    run_seconds(&mut sim, 1.0);

    // 0.05 N·m over I = 0.01 kg·m² for one second: ~4775 RPM.
    let expected = 0.05 / 0.01 * 60.0 / (2.0 * std::f64::consts::PI);
    let speed = sim.reaction_wheels[0].speed_rpm;
    assert!(
        (speed - expected).abs() < 100.0,
        "expected ~{expected:.0} RPM, got {speed:.0}"
    );
}

#[test]
fn test_wheel_speed_clamps_at_max() {
    let mut sim = seeded_sim();
    sim.start();
    sim.reaction_wheels[0].commanded_torque_nm = 0.2;

    run_seconds(&mut sim, 40.0);

    let speed = sim.reaction_wheels[0].speed_rpm;
    assert!(speed <= 6000.0, "wheel exceeded max speed: {speed}");
    assert!(speed > 5999.0, "wheel should have saturated: {speed}");
}

#[test]
fn test_wheel_allocation_feeds_x_and_y_only() {
    let mut sim = seeded_sim();
    sim.start();
    // Quiet the other torque sources.
    for thruster in &mut sim.thrusters {
        thruster.powered = false;
    }
    for rod in &mut sim.torque_rods {
        rod.powered = false;
    }
    sim.reaction_wheels[0].commanded_torque_nm = 0.1;
    sim.reaction_wheels[2].commanded_torque_nm = 0.1;

    run_seconds(&mut sim, 2.0);

    let rate = sim.state.angular_rate;
    assert!(rate.x.abs() > 1e-5, "wheel 0 should torque about X");
    assert!(rate.y.abs() > 1e-5, "wheel 2 should torque about Y");
    assert!(rate.z.abs() < 1e-6, "no wheel feeds Z with the default split");
}

#[test]
fn test_torque_rod_dipole_saturates_in_frame() {
    let mut sim = seeded_sim();
    sim.start();
    sim.torque_rods[0].commanded_dipole_am2 = 1000.0;
    sim.tick();

    let registry = sim.registry();
    let dipole = registry.lookup("mtr0_dipole").unwrap();
    let commanded = registry.lookup("mtr0_commanded").unwrap();
    assert_eq!(sim.frame().get(dipole), 50.0);
    assert_eq!(sim.frame().get(commanded), 1000.0);
}

#[test]
fn test_thruster_heats_while_firing_and_cools_after() {
    let mut sim = seeded_sim();
    sim.start();
    sim.thrusters[0].firing = true;

    run_seconds(&mut sim, 5.0);
    let hot = sim.thrusters[0].temperature_c;
    assert!(hot > 26.0, "thruster should heat while firing: {hot}");
    assert!(sim.thrusters[0].propellant_flow_gps > 0.0);

    sim.thrusters[0].firing = false;
    run_seconds(&mut sim, 20.0);
    let cooled = sim.thrusters[0].temperature_c;
    assert!(cooled < hot, "thruster should cool after firing");
    assert_eq!(sim.thrusters[0].propellant_flow_gps, 0.0);
}

#[test]
fn test_sada_tracks_commanded_angle_at_slew_limit() {
    let mut sim = seeded_sim();
    sim.start();
    sim.sadas[0].commanded_angle_deg = 5.0;

    run_seconds(&mut sim, 2.0);
    let angle = sim.sadas[0].angle_deg;
    assert!(
        (angle - 2.0).abs() < 0.05,
        "expected ~2 degrees after 2 s at 1 deg/s, got {angle}"
    );

    run_seconds(&mut sim, 4.0);
    let settled = sim.sadas[0].angle_deg;
    assert!((settled - 5.0).abs() < 0.05, "should settle at command");
}

#[test]
fn test_eclipse_blinds_every_sun_sensor() {
    let mut sim = seeded_sim();
    sim.start();
    run_seconds(&mut sim, 0.5);

    // Sun on the +X boresight, so sensor 0 sees it before the eclipse.
    let detected0 = sim.registry().lookup("ss0_detected").unwrap();
    assert_eq!(sim.frame().get(detected0), 1.0);

    sim.commit_parameters(&[(110, 1.0)]);
    run_seconds(&mut sim, 0.5);

    for i in 0..NUM_SUN_SENSORS {
        let id = sim.registry().lookup(&format!("ss{i}_detected")).unwrap();
        assert_eq!(sim.frame().get(id), 0.0, "sensor {i} saw sun in eclipse");
    }
}

#[test]
fn test_sim_time_advances_only_while_running() {
    let mut sim = seeded_sim();
    run_seconds(&mut sim, 1.0);
    assert_eq!(sim.time(), 0.0);

    sim.start();
    run_seconds(&mut sim, 1.0);
    let running_time = sim.time();
    assert!((running_time - 1.0).abs() < 1e-9);

    sim.stop();
    run_seconds(&mut sim, 1.0);
    assert_eq!(sim.time(), running_time);
}

#[test]
fn test_magnetometer_tracks_committed_field() {
    let mut sim = seeded_sim();
    sim.start();
    sim.commit_parameters(&[(114, 10_000.0), (115, -5_000.0), (116, 0.0)]);
    run_seconds(&mut sim, 1.0);

    let mag = sim.magnetometer.measured_nt;
    assert!((mag.x - 10_000.0).abs() < 100.0);
    assert!((mag.y + 5_000.0).abs() < 100.0);
    assert!(mag.z.abs() < 100.0);
}

#[test]
fn test_sun_vector_follows_attitude() {
    let mut sim = seeded_sim();
    sim.start();
    // Yaw the spacecraft 180 degrees: the +X boresight now faces away from
    // the +X sun, and the -X sensor sees it instead.
    sim.commit_parameters(&[(100, 0.0), (101, 0.0), (102, 0.0), (103, 1.0)]);
    run_seconds(&mut sim, 0.5);

    let ss0 = sim.registry().lookup("ss0_detected").unwrap();
    let ss1 = sim.registry().lookup("ss1_detected").unwrap();
    assert_eq!(sim.frame().get(ss0), 0.0);
    assert_eq!(sim.frame().get(ss1), 1.0);
}

#[test]
fn test_custom_wheel_allocation_reaches_z() {
    let mut sim = AocsSimulation::new(SimConfig {
        seed: Some(5),
        wheel_allocation: [
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 0.0, 0.5),
            Vec3::new(0.0, 0.0, 0.5),
        ],
    });
    sim.start();
    for thruster in &mut sim.thrusters {
        thruster.powered = false;
    }
    for rod in &mut sim.torque_rods {
        rod.powered = false;
    }
    sim.reaction_wheels[2].commanded_torque_nm = 0.1;

    run_seconds(&mut sim, 1.0);
    assert!(sim.state.angular_rate.z.abs() > 1e-5);
}
