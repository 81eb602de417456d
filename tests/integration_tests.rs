use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use aocs_scoe::client::ScoeLink;
use aocs_scoe::config::{ControllerConfig, EndpointConfig};
use aocs_scoe::decoder::TelemetryStore;
use aocs_scoe::protocol::eden::EdenFramer;
use aocs_scoe::server::{MockAocsServer, ShutdownHandle};
use aocs_scoe::sim::AocsSimulation;

struct Endpoint {
    shutdown: ShutdownHandle,
    addr: SocketAddr,
    sim: Arc<RwLock<AocsSimulation>>,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start_endpoint_on(port: u16, seed: u64) -> Endpoint {
    let config = EndpointConfig {
        host: "127.0.0.1".to_owned(),
        port,
        seed: Some(seed),
        ..EndpointConfig::default()
    };
    let server = MockAocsServer::bind(config)
        .await
        .expect("endpoint bind failed");
    let addr = server.local_addr().expect("local addr");
    let sim = server.simulation();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.serve());
    Endpoint {
        shutdown,
        addr,
        sim,
        task,
    }
}

async fn start_endpoint(seed: u64) -> Endpoint {
    start_endpoint_on(0, seed).await
}

async fn connect_link(addr: SocketAddr) -> (ScoeLink, Arc<TelemetryStore>) {
    let config = ControllerConfig {
        aocs_host: addr.ip().to_string(),
        aocs_port: addr.port(),
        retry_period_ms: 200,
        ..ControllerConfig::default()
    };
    let store = Arc::new(TelemetryStore::new());
    let link = ScoeLink::spawn(config, Arc::clone(&store));
    assert!(
        link.wait_connected(Duration::from_secs(6)).await,
        "link did not connect in time"
    );
    (link, store)
}

async fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_and_connection_test() {
    let endpoint = start_endpoint(1).await;
    let (link, _store) = connect_link(endpoint.addr).await;

    assert!(link.status().connected);
    let ok = link.send_connection_test().await.expect("send failed");
    assert!(ok, "connection test must resolve true");

    link.shutdown();
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_and_observe_running_sim() {
    let endpoint = start_endpoint(2).await;
    let (link, store) = connect_link(endpoint.addr).await;

    assert!(link.start_simulation().await.expect("send failed"));

    // Default structure 6 reports once a second.
    let running = {
        let store = Arc::clone(&store);
        wait_for(Duration::from_secs(2), move || {
            store.get("sim_running") == Some(1.0)
        })
        .await
    };
    assert!(running, "sim_running never reached the cache");

    let t0 = store.get("sim_time").expect("sim_time cached");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let t1 = store.get("sim_time").expect("sim_time cached");
    assert!(t1 > t0, "sim_time must increase while running: {t0} -> {t1}");

    link.shutdown();
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commanded_wheel_spin_up_is_observable() {
    let endpoint = start_endpoint(3).await;
    let (link, store) = connect_link(endpoint.addr).await;

    assert!(link.start_simulation().await.expect("send failed"));
    assert!(link.set_rw_torque(0, 0.05).await.expect("send failed"));

    // Wheel housekeeping reports every 0.5 s.
    let torque_seen = {
        let store = Arc::clone(&store);
        wait_for(Duration::from_secs(2), move || {
            store
                .get("rw0_cmd_torque")
                .is_some_and(|torque| (torque - 0.05).abs() < 1e-3)
        })
        .await
    };
    assert!(torque_seen, "commanded torque never decoded");

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let speed = store.get("rw0_speed").expect("rw0_speed cached");
    assert!(
        speed > 1000.0 && speed <= 6000.5,
        "wheel should be spinning up toward the clamp: {speed}"
    );

    link.shutdown();
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_torque_rod_clamp_over_the_wire() {
    let endpoint = start_endpoint(4).await;
    let (link, _store) = connect_link(endpoint.addr).await;

    assert!(link.set_torque_rod(0, 1000.0).await.expect("send failed"));

    let sim = endpoint.sim.read().await;
    assert_eq!(sim.torque_rods[0].commanded_dipole_am2, 1000.0);
    assert_eq!(sim.torque_rods[0].actual_dipole(), 50.0);
    let dipole = sim.registry().lookup("mtr0_dipole").expect("registered");
    drop(sim);

    // The published frame carries the saturated value after the next tick.
    let clamped = {
        let sim = Arc::clone(&endpoint.sim);
        wait_for(Duration::from_secs(1), move || {
            sim.try_read()
                .map(|sim| sim.frame().get(dipole) == 50.0)
                .unwrap_or(false)
        })
        .await
    };
    assert!(clamped, "frame never showed the saturated dipole");

    link.shutdown();
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eclipse_blinds_sun_sensors_end_to_end() {
    let endpoint = start_endpoint(5).await;
    let (link, store) = connect_link(endpoint.addr).await;

    assert!(link.start_simulation().await.expect("send failed"));

    // Sun on the +X boresight: sensor 0 sees it first.
    let lit = {
        let store = Arc::clone(&store);
        wait_for(Duration::from_secs(2), move || {
            store.get("ss0_detected") == Some(1.0)
        })
        .await
    };
    assert!(lit, "sun sensor 0 should detect the sun before the eclipse");

    assert!(link.stage_parameter(110, 1.0).await.expect("send failed"));
    assert!(link.apply_parameters().await.expect("send failed"));

    let blind = {
        let store = Arc::clone(&store);
        wait_for(Duration::from_secs(2), move || {
            store.get("ss0_detected") == Some(0.0)
        })
        .await
    };
    assert!(blind, "eclipse must blind the sun sensor within one interval");

    link.shutdown();
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_after_endpoint_restart() {
    let endpoint = start_endpoint(6).await;
    let addr = endpoint.addr;
    let (link, _store) = connect_link(addr).await;

    assert!(link.send_connection_test().await.expect("send failed"));

    // Kill the endpoint; the link must notice quickly.
    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;

    let dropped = {
        let link = link.clone();
        wait_for(Duration::from_secs(2), move || !link.connected()).await
    };
    assert!(dropped, "link did not flip to disconnected");

    // Restart on the same port. The listener port can linger briefly, so
    // retry the bind.
    let mut restarted = None;
    for _ in 0..50 {
        let config = EndpointConfig {
            host: "127.0.0.1".to_owned(),
            port: addr.port(),
            seed: Some(7),
            ..EndpointConfig::default()
        };
        match MockAocsServer::bind(config).await {
            Ok(server) => {
                let shutdown = server.shutdown_handle();
                let task = tokio::spawn(server.serve());
                restarted = Some((shutdown, task));
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    let (shutdown, task) = restarted.expect("could not rebind the endpoint port");

    // The same link recovers without caller intervention.
    assert!(
        link.wait_connected(Duration::from_secs(5)).await,
        "link did not reconnect"
    );
    assert!(link.send_connection_test().await.expect("send failed"));

    link.shutdown();
    shutdown.shutdown();
    let _ = task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_survives_a_dropped_session() {
    let endpoint = start_endpoint(8).await;

    let mut doomed = TcpStream::connect(endpoint.addr).await.expect("connect");
    let mut survivor = TcpStream::connect(endpoint.addr).await.expect("connect");

    // Both sessions should see broadcast housekeeping.
    let mut buf = [0u8; 1024];
    let n = doomed.read(&mut buf).await.expect("doomed read");
    assert!(n > 0);
    let n = survivor.read(&mut buf).await.expect("survivor read");
    assert!(n > 0);

    drop(doomed);

    // The survivor keeps receiving complete frames after the peer is gone.
    let mut framer = EdenFramer::new();
    let mut frames = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline && frames == 0 {
        match tokio::time::timeout(Duration::from_millis(500), survivor.read(&mut buf)).await {
            Ok(Ok(0)) => panic!("survivor session was closed"),
            Ok(Ok(n)) => {
                framer.push(&buf[..n]);
                while framer.next_packet().is_some() {
                    frames += 1;
                }
            }
            Ok(Err(err)) => panic!("survivor read failed: {err}"),
            Err(_) => {}
        }
    }
    assert!(frames > 0, "survivor stopped receiving broadcasts");

    endpoint.shutdown.shutdown();
    let _ = endpoint.task.await;
}
