//! Sensor observation models: magnetometer, rate sensor, sun sensors.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::gauss;
use super::math::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MagMode {
    Init,
    Service,
    Operational,
}

impl MagMode {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Init => 0.0,
            Self::Service => 1.0,
            Self::Operational => 2.0,
        }
    }
}

/// Three-axis magnetometer with per-axis scale factor, bias and Gaussian
/// noise. Reads zero unless powered and in operational mode.
#[derive(Debug, Clone)]
pub struct Magnetometer {
    pub powered: bool,
    pub op_mode: MagMode,
    pub scale_factor: Vec3,
    pub bias_nt: Vec3,
    pub noise_nt: f64,
    pub measured_nt: Vec3,
}

impl Magnetometer {
    pub fn new() -> Self {
        Self {
            powered: false,
            op_mode: MagMode::Init,
            scale_factor: Vec3::new(1.0, 1.0, 1.0),
            bias_nt: Vec3::ZERO,
            noise_nt: 10.0,
            measured_nt: Vec3::ZERO,
        }
    }

    pub fn update(&mut self, true_field_nt: Vec3, rng: &mut StdRng) {
        if !self.powered || self.op_mode != MagMode::Operational {
            self.measured_nt = Vec3::ZERO;
            return;
        }

        self.measured_nt = Vec3::new(
            true_field_nt.x * self.scale_factor.x + self.bias_nt.x + gauss(rng, self.noise_nt),
            true_field_nt.y * self.scale_factor.y + self.bias_nt.y + gauss(rng, self.noise_nt),
            true_field_nt.z * self.scale_factor.z + self.bias_nt.z + gauss(rng, self.noise_nt),
        );
    }
}

impl Default for Magnetometer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate sensor (gyro) with angular random walk, a drifting rate-random-walk
/// bias, scale-factor error and output quantisation. Units are deg/s.
#[derive(Debug, Clone)]
pub struct RateSensor {
    pub powered: bool,

    /// Angular random walk, deg/sqrt(hr).
    pub arw: f64,
    /// Rate random walk, deg/hr/sqrt(hr).
    pub rrw: f64,
    pub bias_deg_s: Vec3,
    pub scale_factor_error: f64,
    pub quantization_deg_s: f64,

    /// Random-walk component accumulated over the run.
    pub drift_bias_deg_s: Vec3,
    pub measured_deg_s: Vec3,
}

impl RateSensor {
    pub fn new() -> Self {
        Self {
            powered: false,
            arw: 0.003,
            rrw: 0.0001,
            bias_deg_s: Vec3::new(0.01, 0.01, 0.01),
            scale_factor_error: 0.0001,
            quantization_deg_s: 0.001,
            drift_bias_deg_s: Vec3::ZERO,
            measured_deg_s: Vec3::ZERO,
        }
    }

    pub fn update(&mut self, true_rate_deg_s: Vec3, dt: f64, rng: &mut StdRng) {
        if !self.powered {
            self.measured_deg_s = Vec3::ZERO;
            return;
        }

        // Bias drift: random walk in deg/s.
        let rrw_sigma = self.rrw * dt.sqrt() / 3600.0;
        self.drift_bias_deg_s += Vec3::new(
            gauss(rng, rrw_sigma),
            gauss(rng, rrw_sigma),
            gauss(rng, rrw_sigma),
        );

        let arw_sigma = self.arw * (1.0 / dt).sqrt() / 60.0;
        let gain = 1.0 + self.scale_factor_error;
        let raw = Vec3::new(
            true_rate_deg_s.x * gain
                + self.bias_deg_s.x
                + self.drift_bias_deg_s.x
                + gauss(rng, arw_sigma),
            true_rate_deg_s.y * gain
                + self.bias_deg_s.y
                + self.drift_bias_deg_s.y
                + gauss(rng, arw_sigma),
            true_rate_deg_s.z * gain
                + self.bias_deg_s.z
                + self.drift_bias_deg_s.z
                + gauss(rng, arw_sigma),
        );

        let q = self.quantization_deg_s;
        self.measured_deg_s = Vec3::new(
            (raw.x / q).round() * q,
            (raw.y / q).round() * q,
            (raw.z / q).round() * q,
        );
    }
}

impl Default for RateSensor {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-head sun sensor. Reports azimuth/elevation/intensity when the sun
/// is inside the field of view and the spacecraft is not in eclipse.
#[derive(Debug, Clone)]
pub struct SunSensor {
    pub id: usize,
    pub powered: bool,

    /// Boresight direction in the body frame.
    pub boresight: Vec3,
    /// Half-angle field of view, degrees.
    pub fov_deg: f64,
    pub noise_deg: f64,

    pub sun_detected: bool,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub intensity: f64,
}

impl SunSensor {
    pub fn new(id: usize, boresight: Vec3) -> Self {
        Self {
            id,
            powered: false,
            boresight,
            fov_deg: 60.0,
            noise_deg: 0.1,
            sun_detected: false,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            intensity: 0.0,
        }
    }

    fn clear(&mut self) {
        self.sun_detected = false;
        self.azimuth_deg = 0.0;
        self.elevation_deg = 0.0;
        self.intensity = 0.0;
    }

    pub fn update(&mut self, sun_direction_body: Vec3, in_eclipse: bool, rng: &mut StdRng) {
        if !self.powered || in_eclipse {
            self.clear();
            return;
        }

        let sun = sun_direction_body.normalized();
        let cos_angle = self.boresight.dot(sun).clamp(-1.0, 1.0);
        let angle_deg = cos_angle.acos().to_degrees();
        if angle_deg > self.fov_deg {
            self.clear();
            return;
        }

        self.sun_detected = true;
        self.azimuth_deg = sun.y.atan2(sun.x).to_degrees() + gauss(rng, self.noise_deg);
        self.elevation_deg = sun
            .z
            .atan2((sun.x * sun.x + sun.y * sun.y).sqrt())
            .to_degrees()
            + gauss(rng, self.noise_deg);
        self.intensity = cos_angle.max(0.0) + gauss(rng, 0.01);
    }
}
