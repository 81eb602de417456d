//! Actuator models: reaction wheels, thrusters, torque rods, SADAs.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::gauss;
use super::math::{clamp, Vec3};

const RPM_PER_RAD_S: f64 = 60.0 / (2.0 * std::f64::consts::PI);
const G0: f64 = 9.81;

/// Rejection reasons for an equipment-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFault {
    UnknownOpcode,
    ShortPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RwMode {
    Standby,
    Operate,
}

/// Reaction wheel opcodes carried in TC[8,1] function payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwOpcode {
    MotorControl,
    SpeedTorqueTimeout,
    ResetControl,
    TorqueSpeedControl,
    ClearFaults,
    ModeControl,
}

impl RwOpcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::MotorControl),
            0x02 => Some(Self::SpeedTorqueTimeout),
            0x03 => Some(Self::ResetControl),
            0x04 => Some(Self::TorqueSpeedControl),
            0x05 => Some(Self::ClearFaults),
            0x0E => Some(Self::ModeControl),
            _ => None,
        }
    }
}

/// Reaction wheel: commanded-torque actuator with speed integration,
/// friction spin-down and a first-order thermal model.
#[derive(Debug, Clone)]
pub struct ReactionWheel {
    pub id: usize,
    pub powered: bool,
    pub mode: RwMode,
    pub motor_enabled: bool,

    pub inertia_kgm2: f64,
    pub max_speed_rpm: f64,
    pub max_torque_nm: f64,

    pub speed_rpm: f64,
    pub commanded_torque_nm: f64,
    pub speed_torque_timeout_s: f64,

    pub temperature_c: f64,
    pub current_a: f64,
    pub voltage_v: f64,
    pub fault_flags: u16,

    speed_noise_rpm: f64,
    torque_noise_nm: f64,
}

impl ReactionWheel {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            powered: false,
            mode: RwMode::Standby,
            motor_enabled: false,
            inertia_kgm2: 0.01,
            max_speed_rpm: 6000.0,
            max_torque_nm: 0.2,
            speed_rpm: 0.0,
            commanded_torque_nm: 0.0,
            speed_torque_timeout_s: 0.0,
            temperature_c: 25.0,
            current_a: 0.0,
            voltage_v: 28.0,
            fault_flags: 0,
            speed_noise_rpm: 0.5,
            torque_noise_nm: 0.001,
        }
    }

    pub fn update(&mut self, dt: f64, rng: &mut StdRng) {
        if !self.powered || !self.motor_enabled {
            // Friction spin-down, latching to zero below 1 RPM.
            let friction = 0.001 * self.speed_rpm.signum();
            self.speed_rpm -= friction / self.inertia_kgm2 * dt * RPM_PER_RAD_S;
            if self.speed_rpm.abs() < 1.0 {
                self.speed_rpm = 0.0;
            }
            return;
        }

        if self.mode == RwMode::Operate {
            let actual_torque = clamp(
                self.commanded_torque_nm + gauss(rng, self.torque_noise_nm),
                self.max_torque_nm,
            );
            let angular_accel = actual_torque / self.inertia_kgm2;
            self.speed_rpm += angular_accel * dt * RPM_PER_RAD_S;
            self.speed_rpm = clamp(self.speed_rpm, self.max_speed_rpm);

            self.current_a = self.commanded_torque_nm.abs() * 5.0 + 0.1;
            let power_w = self.current_a * self.voltage_v;
            self.temperature_c +=
                power_w * 0.001 * dt - (self.temperature_c - 25.0) * 0.01 * dt;
        }
    }

    pub fn measured_speed(&self, rng: &mut StdRng) -> f64 {
        self.speed_rpm + gauss(rng, self.speed_noise_rpm)
    }

    /// Torque applied back onto the spacecraft body (opposite of the wheel
    /// torque), zero when the wheel cannot actuate.
    pub fn reaction_torque(&self) -> f64 {
        if self.powered && self.motor_enabled {
            -self.commanded_torque_nm
        } else {
            0.0
        }
    }

    pub fn process_command(&mut self, opcode: u8, payload: &[u8]) -> Result<(), CommandFault> {
        match RwOpcode::from_u8(opcode).ok_or(CommandFault::UnknownOpcode)? {
            RwOpcode::MotorControl => {
                self.motor_enabled = payload.first().is_some_and(|&b| b == 1);
                Ok(())
            }
            RwOpcode::ModeControl => {
                self.mode = if payload.first().is_some_and(|&b| b == 1) {
                    RwMode::Operate
                } else {
                    RwMode::Standby
                };
                Ok(())
            }
            RwOpcode::ResetControl => {
                self.motor_enabled = false;
                self.mode = RwMode::Standby;
                self.commanded_torque_nm = 0.0;
                self.fault_flags = 0;
                Ok(())
            }
            RwOpcode::TorqueSpeedControl => {
                let value = read_f32(payload).ok_or(CommandFault::ShortPayload)?;
                self.commanded_torque_nm = clamp(f64::from(value), self.max_torque_nm);
                Ok(())
            }
            RwOpcode::SpeedTorqueTimeout => {
                let value = read_f32(payload).ok_or(CommandFault::ShortPayload)?;
                self.speed_torque_timeout_s = f64::from(value).max(0.0);
                Ok(())
            }
            RwOpcode::ClearFaults => {
                self.fault_flags = 0;
                Ok(())
            }
        }
    }
}

fn read_f32(payload: &[u8]) -> Option<f32> {
    if payload.len() < 4 {
        return None;
    }
    Some(f32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Electric propulsion thruster with a thrust-error fraction and a simple
/// heat-up/cool-down temperature model.
#[derive(Debug, Clone)]
pub struct Thruster {
    pub id: usize,
    pub powered: bool,
    pub firing: bool,

    pub thrust_nominal_n: f64,
    pub isp_s: f64,
    pub position_m: Vec3,
    pub direction: Vec3,
    pub thrust_error: f64,

    pub temperature_c: f64,
    pub propellant_flow_gps: f64,
}

impl Thruster {
    pub fn new(id: usize, position_m: Vec3, direction: Vec3) -> Self {
        Self {
            id,
            powered: false,
            firing: false,
            thrust_nominal_n: 0.1,
            isp_s: 3000.0,
            position_m,
            direction,
            thrust_error: 0.02,
            temperature_c: 25.0,
            propellant_flow_gps: 0.0,
        }
    }

    pub fn update(&mut self, dt: f64, rng: &mut StdRng) {
        if !self.powered {
            self.firing = false;
            self.propellant_flow_gps = 0.0;
            return;
        }

        if self.firing {
            // thrust = Isp * g0 * mdot
            self.propellant_flow_gps = self.actual_thrust(rng) / (self.isp_s * G0) * 1000.0;
            self.temperature_c += 0.5 * dt;
        } else {
            self.propellant_flow_gps = 0.0;
            self.temperature_c -= (self.temperature_c - 25.0) * 0.1 * dt;
        }
    }

    pub fn actual_thrust(&self, rng: &mut StdRng) -> f64 {
        if !self.firing || !self.powered {
            return 0.0;
        }
        self.thrust_nominal_n * (1.0 + gauss(rng, self.thrust_error))
    }

    /// Body-frame force and torque about the centre of mass.
    pub fn force_torque(&self, com: Vec3, rng: &mut StdRng) -> (Vec3, Vec3) {
        if !self.firing || !self.powered {
            return (Vec3::ZERO, Vec3::ZERO);
        }
        let force = self.direction * self.actual_thrust(rng);
        let lever = self.position_m - com;
        (force, lever.cross(force))
    }
}

/// Magnetorquer rod: commanded dipole saturated at +/-50 A*m^2.
#[derive(Debug, Clone)]
pub struct TorqueRod {
    pub id: usize,
    pub powered: bool,
    pub axis: Vec3,
    pub commanded_dipole_am2: f64,
    pub saturation_am2: f64,
}

impl TorqueRod {
    pub fn new(id: usize, axis: Vec3) -> Self {
        Self {
            id,
            powered: false,
            axis,
            commanded_dipole_am2: 0.0,
            saturation_am2: 50.0,
        }
    }

    pub fn actual_dipole(&self) -> f64 {
        if !self.powered {
            return 0.0;
        }
        clamp(self.commanded_dipole_am2, self.saturation_am2)
    }

    /// T = m x B. The field is taken in nT numerically, matching the
    /// check-out fixture this model reproduces; the result is not rescaled
    /// to SI torque.
    pub fn torque(&self, magnetic_field_nt: Vec3) -> Vec3 {
        let moment = self.axis * self.actual_dipole();
        moment.cross(magnetic_field_nt)
    }
}

/// Solar array drive assembly: rate-limited slew toward a commanded angle.
#[derive(Debug, Clone)]
pub struct Sada {
    pub id: usize,
    pub powered: bool,
    pub deployed: bool,
    pub angle_deg: f64,
    pub commanded_angle_deg: f64,
    pub max_rate_deg_s: f64,
    pub temperature_c: f64,
}

impl Sada {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            powered: false,
            deployed: false,
            angle_deg: 0.0,
            commanded_angle_deg: 0.0,
            max_rate_deg_s: 1.0,
            temperature_c: 25.0,
        }
    }

    pub fn update(&mut self, dt: f64) {
        if !self.powered || !self.deployed {
            return;
        }
        let error = self.commanded_angle_deg - self.angle_deg;
        self.angle_deg += clamp(error, self.max_rate_deg_s * dt);
    }
}
