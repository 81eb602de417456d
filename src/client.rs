//! Resilient EDEN/PUS client for the SCOE controller.
//!
//! One supervised connection loop owns the session to the endpoint: dial,
//! probe with TC[17,1], pump inbound telemetry, and on any disconnect fail
//! all in-flight commands and redial on a fixed period. Telecommands are
//! correlated to their verification reports by CCSDS sequence count, so
//! out-of-order verification is fine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::decoder::TelemetryStore;
use crate::protocol::{
    eden, eden::EdenFramer, subtype, MissionClock, PacketFactory, PacketType, PusPacket,
    ServiceType, ACK_ALL,
};
use crate::services::function;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected to the endpoint")]
    NotConnected,
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-manager states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Dialing,
    Connected,
    Draining,
}

/// Externally visible link status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub last_update_seconds: Option<f64>,
    pub telemetry_count: usize,
}

struct LinkShared {
    config: ControllerConfig,
    factory: Mutex<PacketFactory>,
    pending: Mutex<HashMap<u16, oneshot::Sender<bool>>>,
    state_tx: watch::Sender<LinkState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    store: Arc<TelemetryStore>,
}

impl LinkShared {
    fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: LinkState) {
        // send_replace updates the value even with no live subscribers.
        let _ = self.state_tx.send_replace(state);
    }

    /// Resolve every in-flight command as failed and clear the table. Runs
    /// on every transition to `Disconnected`.
    async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(false);
        }
    }

    /// Mint, frame and send a TC, then await its verification report with
    /// the configured deadline. `Ok(false)` covers rejection and timeout.
    async fn send_telecommand(&self, service: u8, sub: u8, data: &[u8]) -> Result<bool, LinkError> {
        if self.state() != LinkState::Connected {
            return Err(LinkError::NotConnected);
        }

        let tc = self.factory.lock().await.tc(service, sub, data, ACK_ALL);
        let seq = tc.ccsds.sequence_count;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        let bytes = eden::wrap(&tc.encode());
        let write_result = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.write_all(&bytes).await.map_err(LinkError::from),
                None => Err(LinkError::NotConnected),
            }
        };
        if let Err(err) = write_result {
            self.pending.lock().await.remove(&seq);
            return Err(err);
        }
        debug!(service, sub, seq, "sent TC");

        let deadline = Duration::from_millis(self.config.command_timeout_ms);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => Ok(result),
            // Sender dropped without a verdict; treat as failure.
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                debug!(service, sub, seq, "verification deadline expired");
                Ok(false)
            }
        }
    }

    async fn process_telemetry(&self, tm: PusPacket) {
        match ServiceType::from_u8(tm.service()) {
            Some(ServiceType::RequestVerification) => self.resolve_verification(&tm).await,
            Some(ServiceType::Housekeeping)
                if tm.service_subtype() == subtype::TM_HK_REPORT =>
            {
                self.store.ingest(&tm);
            }
            Some(ServiceType::ConnectionTest)
                if tm.service_subtype() == subtype::TM_CONNECTION_REPORT =>
            {
                debug!("connection test report received");
            }
            _ => {
                debug!(
                    service = tm.service(),
                    sub = tm.service_subtype(),
                    "unhandled TM"
                );
            }
        }
    }

    async fn resolve_verification(&self, tm: &PusPacket) {
        if tm.data.len() < 2 {
            self.store.count_decode_error();
            return;
        }
        let seq = u16::from_be_bytes([tm.data[0], tm.data[1]]);
        let verdict = matches!(
            tm.service_subtype(),
            subtype::TM_ACCEPTANCE_SUCCESS | subtype::TM_EXECUTION_SUCCESS
        );

        if let Some(sender) = self.pending.lock().await.remove(&seq) {
            let _ = sender.send(verdict);
        } else {
            debug!(seq, "verification for unknown or expired command");
        }
    }
}

/// Handle to the controller link. Cloneable; dropping all clones does not
/// stop the connection manager, use [`ScoeLink::shutdown`].
#[derive(Clone)]
pub struct ScoeLink {
    shared: Arc<LinkShared>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ScoeLink {
    /// Spawn the connection manager and return the handle.
    pub fn spawn(config: ControllerConfig, store: Arc<TelemetryStore>) -> Self {
        let clock = MissionClock::started_now();
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(LinkShared {
            factory: Mutex::new(PacketFactory::new(config.apid, config.source_id, clock)),
            config,
            pending: Mutex::new(HashMap::new()),
            state_tx,
            writer: Mutex::new(None),
            store,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(connection_manager(Arc::clone(&shared), shutdown_rx));

        Self {
            shared,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            connected: self.connected(),
            last_update_seconds: self.shared.store.seconds_since_update(),
            telemetry_count: self.shared.store.parameter_count(),
        }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.shared.store
    }

    /// Wait until the link reports connected, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state_rx = self.shared.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *state_rx.borrow_and_update() == LinkState::Connected {
                return true;
            }
            match tokio::time::timeout_at(deadline, state_rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return false,
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send_replace(true);
    }

    /// Send an arbitrary telecommand and await its verification verdict.
    pub async fn send_raw(&self, service: u8, sub: u8, data: &[u8]) -> Result<bool, LinkError> {
        self.shared.send_telecommand(service, sub, data).await
    }

    pub async fn send_connection_test(&self) -> Result<bool, LinkError> {
        self.shared
            .send_telecommand(17, subtype::TC_CONNECTION_TEST, &[])
            .await
    }

    pub async fn start_simulation(&self) -> Result<bool, LinkError> {
        self.perform_function(&[function::SIM_START]).await
    }

    pub async fn stop_simulation(&self) -> Result<bool, LinkError> {
        self.perform_function(&[function::SIM_STOP]).await
    }

    pub async fn reset_simulation(&self) -> Result<bool, LinkError> {
        self.perform_function(&[function::SIM_RESET]).await
    }

    pub async fn apply_parameters(&self) -> Result<bool, LinkError> {
        self.perform_function(&[function::APPLY_PARAMETERS]).await
    }

    pub async fn run_self_test(&self) -> Result<bool, LinkError> {
        self.perform_function(&[function::SELF_TEST]).await
    }

    /// Reaction-wheel torque command: function 0x10+wheel, opcode 0x04.
    pub async fn set_rw_torque(&self, wheel: u8, torque_nm: f32) -> Result<bool, LinkError> {
        let mut data = ArrayVec::<u8, 6>::new();
        data.push(function::RW_BASE + wheel);
        data.push(0x04);
        data.try_extend_from_slice(&torque_nm.to_be_bytes())
            .expect("payload fits");
        self.perform_function(&data).await
    }

    pub async fn set_thruster(&self, thruster: u8, firing: bool) -> Result<bool, LinkError> {
        let data = [function::THRUSTER_BASE + thruster, u8::from(firing)];
        self.perform_function(&data).await
    }

    pub async fn set_torque_rod(&self, rod: u8, dipole_am2: f32) -> Result<bool, LinkError> {
        let mut data = ArrayVec::<u8, 5>::new();
        data.push(function::TORQUE_ROD_BASE + rod);
        data.try_extend_from_slice(&dipole_am2.to_be_bytes())
            .expect("payload fits");
        self.perform_function(&data).await
    }

    pub async fn set_sada_angle(&self, sada: u8, angle_deg: f32) -> Result<bool, LinkError> {
        let mut data = ArrayVec::<u8, 5>::new();
        data.push(function::SADA_BASE + sada);
        data.try_extend_from_slice(&angle_deg.to_be_bytes())
            .expect("payload fits");
        self.perform_function(&data).await
    }

    pub async fn enable_hk_report(&self, structure_id: u16) -> Result<bool, LinkError> {
        self.shared
            .send_telecommand(3, subtype::TC_ENABLE_HK_REPORT, &structure_id.to_be_bytes())
            .await
    }

    pub async fn disable_hk_report(&self, structure_id: u16) -> Result<bool, LinkError> {
        self.shared
            .send_telecommand(3, subtype::TC_DISABLE_HK_REPORT, &structure_id.to_be_bytes())
            .await
    }

    pub async fn request_hk_report(&self, structure_id: u16) -> Result<bool, LinkError> {
        self.shared
            .send_telecommand(3, subtype::TC_ONE_SHOT_HK, &structure_id.to_be_bytes())
            .await
    }

    pub async fn set_hk_interval(
        &self,
        structure_id: u16,
        interval_s: f32,
    ) -> Result<bool, LinkError> {
        let mut data = ArrayVec::<u8, 6>::new();
        data.try_extend_from_slice(&structure_id.to_be_bytes())
            .expect("payload fits");
        data.try_extend_from_slice(&interval_s.to_be_bytes())
            .expect("payload fits");
        self.shared
            .send_telecommand(3, subtype::TC_MODIFY_HK_INTERVAL, &data)
            .await
    }

    pub async fn stage_parameter(&self, param_id: u16, value: f32) -> Result<bool, LinkError> {
        let mut data = ArrayVec::<u8, 6>::new();
        data.try_extend_from_slice(&param_id.to_be_bytes())
            .expect("payload fits");
        data.try_extend_from_slice(&value.to_be_bytes())
            .expect("payload fits");
        self.shared
            .send_telecommand(20, subtype::TC_SET_PARAMETER, &data)
            .await
    }

    async fn perform_function(&self, data: &[u8]) -> Result<bool, LinkError> {
        self.shared
            .send_telecommand(8, subtype::TC_PERFORM_FUNCTION, data)
            .await
    }
}

/// Supervised dial/receive loop with fixed-period retry.
async fn connection_manager(shared: Arc<LinkShared>, mut shutdown: watch::Receiver<bool>) {
    let host = shared.config.aocs_host.clone();
    let port = shared.config.aocs_port;
    let retry = Duration::from_millis(shared.config.retry_period_ms);

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(LinkState::Dialing);
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                info!(%host, port, "connected to AOCS endpoint");
                let (read_half, write_half) = stream.into_split();
                *shared.writer.lock().await = Some(write_half);
                shared.set_state(LinkState::Connected);

                // Liveness probe; the verdict only matters in the logs.
                let probe_shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    match probe_shared
                        .send_telecommand(17, subtype::TC_CONNECTION_TEST, &[])
                        .await
                    {
                        Ok(true) => info!("connection test passed"),
                        Ok(false) => warn!("connection test failed"),
                        Err(err) => warn!(%err, "connection test not sent"),
                    }
                });

                receive_loop(&shared, read_half, &mut shutdown).await;

                shared.set_state(LinkState::Draining);
                *shared.writer.lock().await = None;
                shared.fail_all_pending().await;
                shared.set_state(LinkState::Disconnected);
                info!("disconnected from AOCS endpoint");
            }
            Err(err) => {
                shared.set_state(LinkState::Disconnected);
                warn!(%err, %host, port, "dial failed, retrying");
                tokio::select! {
                    () = tokio::time::sleep(retry) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    shared.set_state(LinkState::Disconnected);
    shared.fail_all_pending().await;
    debug!("connection manager exited");
}

async fn receive_loop(
    shared: &Arc<LinkShared>,
    mut reader: tokio::net::tcp::OwnedReadHalf,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut framer = EdenFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    framer.push(&buf[..n]);
                    while let Some(packet) = framer.next_packet() {
                        match PusPacket::decode(&packet) {
                            Ok(tm) if tm.packet_type() == PacketType::Tm => {
                                shared.process_telemetry(tm).await;
                            }
                            Ok(_) => debug!("ignoring inbound TC packet"),
                            Err(err) => {
                                shared.store.count_decode_error();
                                warn!(%err, "dropping undecodable telemetry");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "link read failed");
                    break;
                }
            }
        }
    }
}
