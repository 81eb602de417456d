//! Fixed-rate AOCS simulation.
//!
//! One `AocsSimulation` owns the rigid-body spacecraft state, all sensor and
//! actuator models and the RNG driving their noise. Each tick sums actuator
//! torques in the body frame, integrates the angular rate and attitude with a
//! single explicit Euler step, samples the sensors, steps the SADAs and
//! republishes the flat telemetry frame. Clamps are applied after
//! integration so one over-torque tick cannot drive state out of range.

pub mod actuators;
pub mod math;
pub mod sensors;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::params::{ParamId, ParamRegistry, TelemetryFrame};
use actuators::{ReactionWheel, RwMode, Sada, Thruster, TorqueRod};
use math::{Quat, Vec3};
use sensors::{MagMode, Magnetometer, RateSensor, SunSensor};

pub const SIM_TICK_HZ: f64 = 80.0;
pub const SIM_DT: f64 = 1.0 / SIM_TICK_HZ;

const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

pub const NUM_REACTION_WHEELS: usize = 4;
pub const NUM_THRUSTERS: usize = 4;
pub const NUM_TORQUE_RODS: usize = 3;
pub const NUM_SUN_SENSORS: usize = 6;
pub const NUM_SADAS: usize = 2;

/// Zero-mean Gaussian draw; degenerate sigmas read as no noise.
pub(crate) fn gauss(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, sigma) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.0,
    }
}

/// Rigid-body spacecraft state plus sampled environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacecraftState {
    pub quaternion: Quat,
    /// Body-frame angular rate, rad/s.
    pub angular_rate: Vec3,
    /// ECI position, m.
    pub position_m: Vec3,
    /// ECI velocity, m/s.
    pub velocity_m_s: Vec3,
    pub mass_kg: f64,
    /// Diagonal inertia tensor, kg*m^2.
    pub inertia: Vec3,
    /// Centre-of-mass offset, body frame, m.
    pub com: Vec3,
    pub sun_direction_eci: Vec3,
    /// Magnetic field in ECI, nT.
    pub magnetic_field_eci_nt: Vec3,
    pub in_eclipse: bool,
}

impl Default for SpacecraftState {
    fn default() -> Self {
        Self {
            quaternion: Quat::IDENTITY,
            angular_rate: Vec3::ZERO,
            position_m: Vec3::new(7_000_000.0, 0.0, 0.0),
            velocity_m_s: Vec3::new(0.0, 7500.0, 0.0),
            mass_kg: 500.0,
            inertia: Vec3::new(100.0, 100.0, 50.0),
            com: Vec3::ZERO,
            sun_direction_eci: Vec3::new(1.0, 0.0, 0.0),
            magnetic_field_eci_nt: Vec3::new(0.0, 0.0, 30_000.0),
            in_eclipse: false,
        }
    }
}

/// Simulation construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Per-wheel body-frame reaction-torque allocation vectors.
    pub wheel_allocation: [Vec3; NUM_REACTION_WHEELS],
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            // Wheels 0-1 each feed half their reaction torque to X, wheels
            // 2-3 half to Y; nothing reaches Z with this arrangement.
            wheel_allocation: [
                Vec3::new(0.5, 0.0, 0.0),
                Vec3::new(0.5, 0.0, 0.0),
                Vec3::new(0.0, 0.5, 0.0),
                Vec3::new(0.0, 0.5, 0.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CoreIds {
    sim_time: ParamId,
    sim_running: ParamId,
    att_q_w: ParamId,
    att_q_x: ParamId,
    att_q_y: ParamId,
    att_q_z: ParamId,
    rate_x: ParamId,
    rate_y: ParamId,
    rate_z: ParamId,
    pos_x: ParamId,
    pos_y: ParamId,
    pos_z: ParamId,
    in_eclipse: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct MagIds {
    x: ParamId,
    y: ParamId,
    z: ParamId,
    mode: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct GyroIds {
    x: ParamId,
    y: ParamId,
    z: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct SunIds {
    detected: ParamId,
    azimuth: ParamId,
    elevation: ParamId,
    intensity: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct RwIds {
    speed: ParamId,
    temperature: ParamId,
    current: ParamId,
    cmd_torque: ParamId,
    mode: ParamId,
    motor_enabled: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct ThrusterIds {
    firing: ParamId,
    temperature: ParamId,
    flow: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct RodIds {
    dipole: ParamId,
    commanded: ParamId,
}

#[derive(Debug, Clone, Copy)]
struct SadaIds {
    angle: ParamId,
    commanded: ParamId,
    deployed: ParamId,
    temperature: ParamId,
}

#[derive(Debug)]
struct ParamIds {
    core: CoreIds,
    mag: MagIds,
    gyro: GyroIds,
    sun: [SunIds; NUM_SUN_SENSORS],
    wheels: [RwIds; NUM_REACTION_WHEELS],
    thrusters: [ThrusterIds; NUM_THRUSTERS],
    rods: [RodIds; NUM_TORQUE_RODS],
    sadas: [SadaIds; NUM_SADAS],
}

impl ParamIds {
    fn intern(registry: &mut ParamRegistry) -> Self {
        Self {
            core: CoreIds {
                sim_time: registry.intern("sim_time"),
                sim_running: registry.intern("sim_running"),
                att_q_w: registry.intern("att_q_w"),
                att_q_x: registry.intern("att_q_x"),
                att_q_y: registry.intern("att_q_y"),
                att_q_z: registry.intern("att_q_z"),
                rate_x: registry.intern("rate_x"),
                rate_y: registry.intern("rate_y"),
                rate_z: registry.intern("rate_z"),
                pos_x: registry.intern("pos_x"),
                pos_y: registry.intern("pos_y"),
                pos_z: registry.intern("pos_z"),
                in_eclipse: registry.intern("in_eclipse"),
            },
            mag: MagIds {
                x: registry.intern("mag_x"),
                y: registry.intern("mag_y"),
                z: registry.intern("mag_z"),
                mode: registry.intern("mag_mode"),
            },
            gyro: GyroIds {
                x: registry.intern("gyro_x"),
                y: registry.intern("gyro_y"),
                z: registry.intern("gyro_z"),
            },
            sun: std::array::from_fn(|i| SunIds {
                detected: registry.intern(format!("ss{i}_detected")),
                azimuth: registry.intern(format!("ss{i}_azimuth")),
                elevation: registry.intern(format!("ss{i}_elevation")),
                intensity: registry.intern(format!("ss{i}_intensity")),
            }),
            wheels: std::array::from_fn(|i| RwIds {
                speed: registry.intern(format!("rw{i}_speed")),
                temperature: registry.intern(format!("rw{i}_temperature")),
                current: registry.intern(format!("rw{i}_current")),
                cmd_torque: registry.intern(format!("rw{i}_cmd_torque")),
                mode: registry.intern(format!("rw{i}_mode")),
                motor_enabled: registry.intern(format!("rw{i}_motor_enabled")),
            }),
            thrusters: std::array::from_fn(|i| ThrusterIds {
                firing: registry.intern(format!("thr{i}_firing")),
                temperature: registry.intern(format!("thr{i}_temperature")),
                flow: registry.intern(format!("thr{i}_flow")),
            }),
            rods: std::array::from_fn(|i| RodIds {
                dipole: registry.intern(format!("mtr{i}_dipole")),
                commanded: registry.intern(format!("mtr{i}_commanded")),
            }),
            sadas: std::array::from_fn(|i| SadaIds {
                angle: registry.intern(format!("sada{i}_angle")),
                commanded: registry.intern(format!("sada{i}_commanded")),
                deployed: registry.intern(format!("sada{i}_deployed")),
                temperature: registry.intern(format!("sada{i}_temperature")),
            }),
        }
    }
}

/// The complete AOCS simulation.
#[derive(Debug)]
pub struct AocsSimulation {
    dt: f64,
    time: f64,
    running: bool,

    pub state: SpacecraftState,

    pub magnetometer: Magnetometer,
    pub rate_sensor: RateSensor,
    pub sun_sensors: [SunSensor; NUM_SUN_SENSORS],

    pub reaction_wheels: [ReactionWheel; NUM_REACTION_WHEELS],
    pub thrusters: [Thruster; NUM_THRUSTERS],
    pub torque_rods: [TorqueRod; NUM_TORQUE_RODS],
    pub sadas: [Sada; NUM_SADAS],

    wheel_allocation: [Vec3; NUM_REACTION_WHEELS],

    rng: StdRng,
    registry: ParamRegistry,
    frame: TelemetryFrame,
    ids: ParamIds,
}

const SUN_BORESIGHTS: [Vec3; NUM_SUN_SENSORS] = [
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(-1.0, 0.0, 0.0),
    Vec3::new(0.0, 1.0, 0.0),
    Vec3::new(0.0, -1.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
    Vec3::new(0.0, 0.0, -1.0),
];

const THRUSTER_MOUNTS: [(Vec3, Vec3); NUM_THRUSTERS] = [
    (Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)),
    (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)),
    (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
    (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
];

const ROD_AXES: [Vec3; NUM_TORQUE_RODS] = [
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(0.0, 1.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
];

impl AocsSimulation {
    pub fn new(config: SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut registry = ParamRegistry::new();
        let ids = ParamIds::intern(&mut registry);
        let frame = registry.frame();

        let mut sim = Self {
            dt: SIM_DT,
            time: 0.0,
            running: false,
            state: SpacecraftState::default(),
            magnetometer: Magnetometer::new(),
            rate_sensor: RateSensor::new(),
            sun_sensors: std::array::from_fn(|i| SunSensor::new(i, SUN_BORESIGHTS[i])),
            reaction_wheels: std::array::from_fn(ReactionWheel::new),
            thrusters: std::array::from_fn(|i| {
                let (position, direction) = THRUSTER_MOUNTS[i];
                Thruster::new(i, position, direction)
            }),
            torque_rods: std::array::from_fn(|i| TorqueRod::new(i, ROD_AXES[i])),
            sadas: std::array::from_fn(Sada::new),
            wheel_allocation: config.wheel_allocation,
            rng,
            registry,
            frame,
            ids,
        };
        sim.power_on_all();
        sim.publish();
        sim
    }

    fn power_on_all(&mut self) {
        self.magnetometer.powered = true;
        self.magnetometer.op_mode = MagMode::Operational;
        self.rate_sensor.powered = true;
        for sensor in &mut self.sun_sensors {
            sensor.powered = true;
        }
        for wheel in &mut self.reaction_wheels {
            wheel.powered = true;
            wheel.motor_enabled = true;
            wheel.mode = RwMode::Operate;
        }
        for thruster in &mut self.thrusters {
            thruster.powered = true;
        }
        for rod in &mut self.torque_rods {
            rod.powered = true;
        }
        for sada in &mut self.sadas {
            sada.powered = true;
            sada.deployed = true;
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Back to initial conditions: zero sim time, fresh spacecraft state,
    /// wheel speeds and commanded torques cleared. Equipment power states
    /// are untouched.
    pub fn reset(&mut self) {
        self.time = 0.0;
        self.state = SpacecraftState::default();
        for wheel in &mut self.reaction_wheels {
            wheel.speed_rpm = 0.0;
            wheel.commanded_torque_nm = 0.0;
        }
        self.publish();
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    /// Copy of the latest published frame; this is what housekeeping and
    /// one-shot reports sample under the read lock.
    pub fn sample(&self) -> TelemetryFrame {
        self.frame.clone()
    }

    pub fn frame(&self) -> &TelemetryFrame {
        &self.frame
    }

    /// One scheduler tick. Dynamics advance only while running; the frame is
    /// republished either way so command effects show up promptly.
    pub fn tick(&mut self) {
        if self.running {
            self.step_dynamics();
            self.time += self.dt;
        }
        self.publish();
    }

    fn step_dynamics(&mut self) {
        let dt = self.dt;

        // 1. Actuator torques in the body frame.
        let mut total_torque = Vec3::ZERO;

        for (i, wheel) in self.reaction_wheels.iter_mut().enumerate() {
            wheel.update(dt, &mut self.rng);
            total_torque += self.wheel_allocation[i] * wheel.reaction_torque();
        }

        let com = self.state.com;
        for thruster in &mut self.thrusters {
            thruster.update(dt, &mut self.rng);
            let (_force, torque) = thruster.force_torque(com, &mut self.rng);
            total_torque += torque;
        }

        for rod in &self.torque_rods {
            total_torque += rod.torque(self.state.magnetic_field_eci_nt);
        }

        // 2. Integrate the body rate over the diagonal inertia.
        let inertia = self.state.inertia;
        let alpha = Vec3::new(
            total_torque.x / inertia.x,
            total_torque.y / inertia.y,
            total_torque.z / inertia.z,
        );
        self.state.angular_rate += alpha * dt;

        // 3. Integrate the attitude quaternion and renormalise.
        self.state.quaternion = self.state.quaternion.integrate(self.state.angular_rate, dt);

        // 4. Sample sensors.
        self.magnetometer
            .update(self.state.magnetic_field_eci_nt, &mut self.rng);
        self.rate_sensor.update(
            self.state.angular_rate * RAD_TO_DEG,
            dt,
            &mut self.rng,
        );
        let sun_body = self
            .state
            .quaternion
            .rotate_into_body(self.state.sun_direction_eci);
        for sensor in &mut self.sun_sensors {
            sensor.update(sun_body, self.state.in_eclipse, &mut self.rng);
        }

        // 5. SADAs track their commanded angles.
        for sada in &mut self.sadas {
            sada.update(dt);
        }
    }

    /// Write every parameter into the flat frame.
    fn publish(&mut self) {
        let ids = &self.ids;
        let frame = &mut self.frame;

        frame.set(ids.core.sim_time, self.time);
        frame.set_bool(ids.core.sim_running, self.running);
        frame.set(ids.core.att_q_w, self.state.quaternion.w);
        frame.set(ids.core.att_q_x, self.state.quaternion.x);
        frame.set(ids.core.att_q_y, self.state.quaternion.y);
        frame.set(ids.core.att_q_z, self.state.quaternion.z);
        frame.set(ids.core.rate_x, self.state.angular_rate.x * RAD_TO_DEG);
        frame.set(ids.core.rate_y, self.state.angular_rate.y * RAD_TO_DEG);
        frame.set(ids.core.rate_z, self.state.angular_rate.z * RAD_TO_DEG);
        frame.set(ids.core.pos_x, self.state.position_m.x);
        frame.set(ids.core.pos_y, self.state.position_m.y);
        frame.set(ids.core.pos_z, self.state.position_m.z);
        frame.set_bool(ids.core.in_eclipse, self.state.in_eclipse);

        frame.set(ids.mag.x, self.magnetometer.measured_nt.x);
        frame.set(ids.mag.y, self.magnetometer.measured_nt.y);
        frame.set(ids.mag.z, self.magnetometer.measured_nt.z);
        frame.set(ids.mag.mode, self.magnetometer.op_mode.as_f64());

        frame.set(ids.gyro.x, self.rate_sensor.measured_deg_s.x);
        frame.set(ids.gyro.y, self.rate_sensor.measured_deg_s.y);
        frame.set(ids.gyro.z, self.rate_sensor.measured_deg_s.z);

        for (sensor, sun_ids) in self.sun_sensors.iter().zip(&ids.sun) {
            frame.set_bool(sun_ids.detected, sensor.sun_detected);
            frame.set(sun_ids.azimuth, sensor.azimuth_deg);
            frame.set(sun_ids.elevation, sensor.elevation_deg);
            frame.set(sun_ids.intensity, sensor.intensity);
        }

        for (wheel, wheel_ids) in self.reaction_wheels.iter().zip(&ids.wheels) {
            frame.set(wheel_ids.speed, wheel.measured_speed(&mut self.rng));
            frame.set(wheel_ids.temperature, wheel.temperature_c);
            frame.set(wheel_ids.current, wheel.current_a);
            frame.set(wheel_ids.cmd_torque, wheel.commanded_torque_nm);
            frame.set(
                wheel_ids.mode,
                match wheel.mode {
                    RwMode::Standby => 0.0,
                    RwMode::Operate => 1.0,
                },
            );
            frame.set_bool(wheel_ids.motor_enabled, wheel.motor_enabled);
        }

        for (thruster, thruster_ids) in self.thrusters.iter().zip(&ids.thrusters) {
            frame.set_bool(thruster_ids.firing, thruster.firing);
            frame.set(thruster_ids.temperature, thruster.temperature_c);
            frame.set(thruster_ids.flow, thruster.propellant_flow_gps);
        }

        for (rod, rod_ids) in self.torque_rods.iter().zip(&ids.rods) {
            frame.set(rod_ids.dipole, rod.actual_dipole());
            frame.set(rod_ids.commanded, rod.commanded_dipole_am2);
        }

        for (sada, sada_ids) in self.sadas.iter().zip(&ids.sadas) {
            frame.set(sada_ids.angle, sada.angle_deg);
            frame.set(sada_ids.commanded, sada.commanded_angle_deg);
            frame.set_bool(sada_ids.deployed, sada.deployed);
            frame.set(sada_ids.temperature, sada.temperature_c);
        }
    }

    /// Apply committed parameter-management writes. Returns the number of
    /// entries that mapped to a known parameter id.
    pub fn commit_parameters(&mut self, entries: &[(u16, f64)]) -> usize {
        let mut applied = 0;
        let mut attitude_touched = false;

        for &(id, value) in entries {
            let known = match id {
                100 => {
                    self.state.quaternion.w = value;
                    attitude_touched = true;
                    true
                }
                101 => {
                    self.state.quaternion.x = value;
                    attitude_touched = true;
                    true
                }
                102 => {
                    self.state.quaternion.y = value;
                    attitude_touched = true;
                    true
                }
                103 => {
                    self.state.quaternion.z = value;
                    attitude_touched = true;
                    true
                }
                104 => {
                    self.state.angular_rate.x = value / RAD_TO_DEG;
                    true
                }
                105 => {
                    self.state.angular_rate.y = value / RAD_TO_DEG;
                    true
                }
                106 => {
                    self.state.angular_rate.z = value / RAD_TO_DEG;
                    true
                }
                110 => {
                    self.state.in_eclipse = value != 0.0;
                    true
                }
                111 => {
                    self.state.sun_direction_eci.x = value;
                    true
                }
                112 => {
                    self.state.sun_direction_eci.y = value;
                    true
                }
                113 => {
                    self.state.sun_direction_eci.z = value;
                    true
                }
                114 => {
                    self.state.magnetic_field_eci_nt.x = value;
                    true
                }
                115 => {
                    self.state.magnetic_field_eci_nt.y = value;
                    true
                }
                116 => {
                    self.state.magnetic_field_eci_nt.z = value;
                    true
                }
                _ => false,
            };
            if known {
                applied += 1;
            }
        }

        if attitude_touched {
            self.state.quaternion = self.state.quaternion.normalized();
        }
        self.publish();
        applied
    }
}
