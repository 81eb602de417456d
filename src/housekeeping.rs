//! Housekeeping report structures and their scheduling.
//!
//! The endpoint holds a table of HK structures, each an ordered list of
//! parameters sampled from the simulation frame and emitted as TM[3,25] at a
//! configured interval. The table is shared between TC handlers (service-3
//! mutations) and the scheduler poll, guarded by one mutex at the call site.

use std::collections::BTreeMap;

use heapless::Vec as BoundedVec;
use static_assertions::const_assert;

use crate::params::{ParamId, ParamRegistry, TelemetryFrame};

/// Upper bound on parameters per HK structure.
pub const MAX_HK_PARAMS: usize = 16;

/// Scheduler poll period; the floor on achievable report rates.
pub const HK_POLL_PERIOD_MS: u64 = 100;

// A full HK report must fit comfortably inside one session read chunk.
const_assert!(2 + MAX_HK_PARAMS * 4 <= 4096);

pub type HkParamList = BoundedVec<ParamId, MAX_HK_PARAMS>;

/// One housekeeping report structure.
#[derive(Debug, Clone)]
pub struct HkStructure {
    pub structure_id: u16,
    pub enabled: bool,
    pub interval_s: f64,
    pub params: HkParamList,
    /// Mission time of the last interval-driven report. One-shot reports do
    /// not touch this.
    pub last_report_s: Option<f64>,
}

impl HkStructure {
    pub fn new(structure_id: u16) -> Self {
        Self {
            structure_id,
            enabled: false,
            interval_s: 1.0,
            params: HkParamList::new(),
            last_report_s: None,
        }
    }

    fn due(&self, now_s: f64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_report_s {
            None => true,
            Some(last) => now_s - last >= self.interval_s,
        }
    }

    /// Sample this structure's parameters from a frame, in declared order.
    pub fn sample(&self, frame: &TelemetryFrame) -> Vec<f32> {
        self.params.iter().map(|&id| frame.get(id)).collect()
    }
}

/// The endpoint's housekeeping table.
#[derive(Debug, Default)]
pub struct HkTable {
    structures: BTreeMap<u16, HkStructure>,
}

/// Default structures the endpoint ships with: `(id, interval_s, names)`.
/// The controller-side decoder table is derived from the same rows so the
/// two stay in lock-step.
pub const DEFAULT_STRUCTURES: [(u16, f64, &[&str]); 6] = [
    (
        1,
        1.0,
        &[
            "att_q_w", "att_q_x", "att_q_y", "att_q_z", "rate_x", "rate_y", "rate_z",
        ],
    ),
    (
        2,
        0.5,
        &[
            "rw0_speed",
            "rw1_speed",
            "rw2_speed",
            "rw3_speed",
            "rw0_temperature",
            "rw1_temperature",
            "rw2_temperature",
            "rw3_temperature",
            "rw0_cmd_torque",
            "rw1_cmd_torque",
            "rw2_cmd_torque",
            "rw3_cmd_torque",
        ],
    ),
    (
        3,
        1.0,
        &[
            "mag_x",
            "mag_y",
            "mag_z",
            "gyro_x",
            "gyro_y",
            "gyro_z",
            "ss0_detected",
            "ss0_azimuth",
            "ss0_elevation",
        ],
    ),
    (
        4,
        1.0,
        &[
            "thr0_firing",
            "thr1_firing",
            "thr2_firing",
            "thr3_firing",
            "thr0_temperature",
            "thr1_temperature",
            "thr2_temperature",
            "thr3_temperature",
        ],
    ),
    (
        5,
        2.0,
        &[
            "sada0_angle",
            "sada1_angle",
            "sada0_deployed",
            "sada1_deployed",
        ],
    ),
    (
        6,
        1.0,
        &["sim_time", "sim_running", "pos_x", "pos_y", "pos_z", "in_eclipse"],
    ),
];

/// Parameter names of a default structure, for the controller-side decoder.
pub fn structure_param_names(structure_id: u16) -> &'static [&'static str] {
    DEFAULT_STRUCTURES
        .iter()
        .find(|(id, _, _)| *id == structure_id)
        .map(|(_, _, names)| *names)
        .unwrap_or(&[])
}

impl HkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with the default structures, enabled, with their
    /// parameter names resolved against the simulation registry.
    pub fn with_defaults(registry: &ParamRegistry) -> Self {
        let mut table = Self::new();
        for (id, interval_s, names) in DEFAULT_STRUCTURES {
            let mut structure = HkStructure::new(id);
            structure.enabled = true;
            structure.interval_s = interval_s;
            for name in names {
                if let Some(param) = registry.lookup(name) {
                    // Default lists are sized within MAX_HK_PARAMS.
                    let _ = structure.params.push(param);
                }
            }
            table.structures.insert(id, structure);
        }
        table
    }

    /// TC[3,1]: create a structure, initially disabled with no parameters.
    /// Re-creating an existing id resets it.
    pub fn create(&mut self, structure_id: u16) {
        self.structures
            .insert(structure_id, HkStructure::new(structure_id));
    }

    /// TC[3,3]: delete; a no-op when absent.
    pub fn delete(&mut self, structure_id: u16) {
        self.structures.remove(&structure_id);
    }

    /// TC[3,5]/[3,6]: returns false when the structure does not exist.
    pub fn set_enabled(&mut self, structure_id: u16, enabled: bool) -> bool {
        match self.structures.get_mut(&structure_id) {
            Some(structure) => {
                structure.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// TC[3,31]: zero and sub-poll intervals are accepted; the poll period
    /// bounds the actual emission rate.
    pub fn set_interval(&mut self, structure_id: u16, interval_s: f64) -> bool {
        match self.structures.get_mut(&structure_id) {
            Some(structure) => {
                structure.interval_s = interval_s.max(0.0);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, structure_id: u16) -> Option<&HkStructure> {
        self.structures.get(&structure_id)
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Collect every enabled structure whose interval has elapsed, marking it
    /// reported at `now_s`. Missed intervals coalesce into a single report:
    /// the mark is set to now, not advanced interval-by-interval, so a pause
    /// never produces a catch-up burst.
    pub fn collect_due(&mut self, now_s: f64) -> Vec<(u16, HkParamList)> {
        let mut due = Vec::new();
        for structure in self.structures.values_mut() {
            if structure.due(now_s) {
                structure.last_report_s = Some(now_s);
                due.push((structure.structure_id, structure.params.clone()));
            }
        }
        due
    }
}
