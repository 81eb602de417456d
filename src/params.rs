//! Interned telemetry parameter names.
//!
//! The simulation publishes a flat map of named float parameters. Names are
//! interned once at startup into small `ParamId` handles; the hot paths (tick
//! publication, housekeeping sampling) work on ids and a dense frame, and the
//! string names only reappear at the observability boundary.

use std::collections::HashMap;

/// Handle for one telemetry parameter in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(u16);

impl ParamId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Name-to-id interning table. Built once when the simulation is constructed
/// and immutable afterwards.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    names: Vec<String>,
    index: HashMap<String, ParamId>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the existing id if it was seen before.
    pub fn intern(&mut self, name: impl Into<String>) -> ParamId {
        let name = name.into();
        if let Some(&id) = self.index.get(&name) {
            return id;
        }
        let id = ParamId(self.names.len() as u16);
        self.names.push(name.clone());
        self.index.insert(name, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.names[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fresh frame sized for every interned parameter.
    pub fn frame(&self) -> TelemetryFrame {
        TelemetryFrame {
            values: vec![0.0; self.names.len()],
        }
    }
}

/// Dense snapshot of all parameter values, indexed by `ParamId`. Cheap to
/// clone; housekeeping sampling takes a copy under the simulation read lock.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFrame {
    values: Vec<f32>,
}

impl TelemetryFrame {
    pub fn set(&mut self, id: ParamId, value: f64) {
        self.values[id.index()] = value as f32;
    }

    pub fn set_bool(&mut self, id: ParamId, value: bool) {
        self.values[id.index()] = if value { 1.0 } else { 0.0 };
    }

    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stringly-typed view for external consumers.
    pub fn snapshot(&self, registry: &ParamRegistry) -> HashMap<String, f64> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| (registry.name(ParamId(i as u16)).to_owned(), f64::from(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut registry = ParamRegistry::new();
        let a = registry.intern("rw0_speed");
        let b = registry.intern("rw0_speed");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name(a), "rw0_speed");
    }

    #[test]
    fn frame_round_trips_values() {
        let mut registry = ParamRegistry::new();
        let speed = registry.intern("rw0_speed");
        let eclipse = registry.intern("in_eclipse");

        let mut frame = registry.frame();
        frame.set(speed, 1234.5);
        frame.set_bool(eclipse, true);

        assert_eq!(frame.get(speed), 1234.5);
        assert_eq!(frame.get(eclipse), 1.0);

        let map = frame.snapshot(&registry);
        assert_eq!(map["rw0_speed"], 1234.5);
        assert_eq!(map["in_eclipse"], 1.0);
    }
}
