use std::sync::Arc;

use aocs_scoe::decoder::{BufferedPointWriter, TelemetryStore};
use aocs_scoe::housekeeping::structure_param_names;
use aocs_scoe::protocol::{MissionClock, PacketFactory};

fn factory() -> PacketFactory {
    PacketFactory::new(100, 1, MissionClock::started_now())
}

#[test]
fn test_hk_report_round_trips_through_store() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    // Structure 1: attitude quaternion + body rates, in declared order.
    let names = structure_param_names(1);
    let values: Vec<f32> = vec![1.0, 0.0, 0.0, 0.0, 0.25, -0.5, 0.75];
    assert_eq!(names.len(), values.len());

    let tm = factory.hk_report(1, &values);
    store.ingest(&tm);

    for (name, value) in names.iter().zip(&values) {
        let cached = store.get(name).unwrap_or_else(|| panic!("{name} missing"));
        assert!((cached - f64::from(*value)).abs() < 1e-6);
    }
    assert_eq!(store.report_count(), 1);
    assert_eq!(store.decode_error_count(), 0);
    assert!(store.seconds_since_update().is_some());
}

#[test]
fn test_excess_values_are_discarded() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    // Structure 5 declares four names; send six values.
    let tm = factory.hk_report(5, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    store.ingest(&tm);

    assert_eq!(store.parameter_count(), 4);
    assert_eq!(store.get("sada0_angle"), Some(1.0));
    assert_eq!(store.get("sada1_deployed"), Some(4.0));
}

#[test]
fn test_value_deficit_leaves_later_names_untouched() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    let tm = factory.hk_report(1, &[0.5, 0.5, 0.5]);
    store.ingest(&tm);

    assert_eq!(store.get("att_q_w"), Some(0.5));
    assert_eq!(store.get("att_q_z"), None);
    assert_eq!(store.get("rate_x"), None);
    assert_eq!(store.parameter_count(), 3);
}

#[test]
fn test_last_write_wins_per_name() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    store.ingest(&factory.hk_report(6, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    store.ingest(&factory.hk_report(6, &[2.0, 1.0, 0.0, 0.0, 0.0, 0.0]));

    assert_eq!(store.get("sim_time"), Some(2.0));
    assert_eq!(store.get("sim_running"), Some(1.0));
    assert_eq!(store.report_count(), 2);
}

#[test]
fn test_short_payload_counts_as_decode_error() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    let mut tm = factory.hk_report(1, &[]);
    tm.data = vec![0x01]; // one byte, no structure id
    store.ingest(&tm);

    assert_eq!(store.decode_error_count(), 1);
    assert_eq!(store.report_count(), 0);
}

#[test]
fn test_unmapped_structure_updates_nothing() {
    let mut factory = factory();
    let store = TelemetryStore::new();

    let tm = factory.hk_report(999, &[1.0, 2.0]);
    store.ingest(&tm);

    assert_eq!(store.parameter_count(), 0);
    // Still a well-formed report.
    assert_eq!(store.report_count(), 1);
}

#[test]
fn test_points_flow_to_sinks() {
    let mut factory = factory();
    let store = TelemetryStore::new();
    let writer = Arc::new(BufferedPointWriter::new(64));
    store.add_sink(writer.clone());

    store.ingest(&factory.hk_report(5, &[10.0, 20.0, 1.0, 1.0]));

    let points = writer.drain();
    assert_eq!(points.len(), 4);
    assert_eq!(points[0].structure_id, 5);
    assert_eq!(points[0].parameter, "sada0_angle");
    assert_eq!(points[0].value, 10.0);
}

#[test]
fn test_full_sink_is_swallowed() {
    let mut factory = factory();
    let store = TelemetryStore::new();
    // Capacity two: the third point fails, the ingest survives.
    let writer = Arc::new(BufferedPointWriter::new(2));
    store.add_sink(writer.clone());

    store.ingest(&factory.hk_report(5, &[1.0, 2.0, 3.0, 4.0]));

    assert_eq!(writer.len(), 2);
    assert_eq!(store.report_count(), 1);
    assert_eq!(store.get("sada1_deployed"), Some(4.0));
}

#[tokio::test]
async fn test_observers_receive_snapshots_and_slow_ones_drop() {
    let mut factory = factory();
    let store = TelemetryStore::new();
    let mut updates = store.subscribe(1);

    store.ingest(&factory.hk_report(6, &[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]));
    // Queue depth is one: this update is dropped, not blocking.
    store.ingest(&factory.hk_report(6, &[2.0, 1.0, 0.0, 0.0, 0.0, 0.0]));

    let snapshot = updates.recv().await.expect("first snapshot");
    assert_eq!(snapshot.values["sim_time"], 1.0);
    assert!(updates.try_recv().is_err(), "second update was dropped");
}

#[test]
fn test_closed_observers_are_pruned() {
    let mut factory = factory();
    let store = TelemetryStore::new();
    let updates = store.subscribe(4);
    drop(updates);

    // Must not fail or leak; the dead observer is pruned on notify.
    store.ingest(&factory.hk_report(6, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
    assert_eq!(store.report_count(), 1);
}

#[test]
fn test_snapshot_is_a_consistent_copy() {
    let mut factory = factory();
    let store = TelemetryStore::new();
    store.ingest(&factory.hk_report(6, &[5.0, 1.0, 7.0, 8.0, 9.0, 0.0]));

    let snapshot = store.snapshot();
    assert_eq!(snapshot["sim_time"], 5.0);
    assert_eq!(snapshot["pos_x"], 7.0);

    // Later ingests do not mutate the copy.
    store.ingest(&factory.hk_report(6, &[6.0, 1.0, 7.0, 8.0, 9.0, 0.0]));
    assert_eq!(snapshot["sim_time"], 5.0);
}
