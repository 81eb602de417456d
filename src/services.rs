//! Telecommand dispatch for the mock AOCS endpoint.
//!
//! Every inbound TC passes through one `TcHandler`: pre-dispatch validation
//! (with an acceptance report when requested), dispatch by (service, subtype)
//! and an execution report after the side effects have been applied. Ack bits
//! are honoured per TC, so any verification stream can be suppressed by the
//! sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::housekeeping::HkTable;
use crate::protocol::{
    eden, subtype, PacketFactory, PusPacket, ServiceType, ACK_ACCEPTANCE, ACK_COMPLETION,
};
use crate::sim::actuators::CommandFault;
use crate::sim::{
    AocsSimulation, NUM_REACTION_WHEELS, NUM_SADAS, NUM_THRUSTERS, NUM_TORQUE_RODS,
};

/// Numeric error codes carried in TM[1,2] and TM[1,8].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcError {
    UnknownService,
    UnknownSubtype,
    MalformedPayload,
    UnknownFunction,
    IndexOutOfRange,
    Internal,
}

impl TcError {
    pub fn code(self) -> u32 {
        match self {
            Self::UnknownService => 1,
            Self::UnknownSubtype => 2,
            Self::MalformedPayload => 3,
            Self::UnknownFunction => 4,
            Self::IndexOutOfRange => 5,
            Self::Internal => 6,
        }
    }
}

/// Function ids for TC[8,1].
pub mod function {
    pub const SIM_START: u8 = 0x01;
    pub const SIM_STOP: u8 = 0x02;
    pub const SIM_RESET: u8 = 0x03;
    pub const APPLY_PARAMETERS: u8 = 0x04;
    pub const SELF_TEST: u8 = 0x05;
    pub const RW_BASE: u8 = 0x10;
    pub const THRUSTER_BASE: u8 = 0x20;
    pub const TORQUE_ROD_BASE: u8 = 0x30;
    pub const SADA_BASE: u8 = 0x40;
}

const SELF_TEST_DURATION: Duration = Duration::from_secs(1);

/// Outbound handle for one client session: a bounded TM queue plus a close
/// signal. Queue overflow closes the session rather than blocking anything.
#[derive(Debug, Clone)]
pub struct SessionSender {
    pub id: u64,
    tx: mpsc::Sender<Vec<u8>>,
    closer: Arc<Notify>,
}

impl SessionSender {
    pub fn new(id: u64, tx: mpsc::Sender<Vec<u8>>, closer: Arc<Notify>) -> Self {
        Self { id, tx, closer }
    }

    /// Queue bytes for this session. On overflow or a gone writer the
    /// session is marked for closure and `false` is returned.
    pub fn send_or_close(&self, bytes: Vec<u8>) -> bool {
        match self.tx.try_send(bytes) {
            Ok(()) => true,
            Err(_) => {
                self.closer.notify_one();
                false
            }
        }
    }

    pub fn close(&self) {
        self.closer.notify_one();
    }

    pub fn closed(&self) -> &Notify {
        &self.closer
    }
}

/// Staged TC[20,3] writes, committed atomically by function 0x04.
pub type StagedParameters = HashMap<u16, f64>;

/// Shared-state telecommand dispatcher.
#[derive(Clone)]
pub struct TcHandler {
    sim: Arc<RwLock<AocsSimulation>>,
    hk: Arc<Mutex<HkTable>>,
    staged: Arc<Mutex<StagedParameters>>,
    factory: Arc<Mutex<PacketFactory>>,
}

impl TcHandler {
    pub fn new(
        sim: Arc<RwLock<AocsSimulation>>,
        hk: Arc<Mutex<HkTable>>,
        staged: Arc<Mutex<StagedParameters>>,
        factory: Arc<Mutex<PacketFactory>>,
    ) -> Self {
        Self {
            sim,
            hk,
            staged,
            factory,
        }
    }

    /// Process one decoded telecommand from a session.
    pub async fn handle(&self, tc: PusPacket, session: &SessionSender) {
        let ack = tc.pus.ack_flags;
        let service = tc.service();
        let sub = tc.service_subtype();

        if let Err(err) = validate(&tc) {
            warn!(service, sub, code = err.code(), "TC rejected at acceptance");
            if ack & ACK_ACCEPTANCE != 0 {
                let tm = self.factory.lock().await.acceptance_failure(&tc, err.code());
                self.send_tm(session, &tm);
            }
            return;
        }

        if ack & ACK_ACCEPTANCE != 0 {
            let tm = self.factory.lock().await.acceptance_success(&tc);
            self.send_tm(session, &tm);
        }

        debug!(service, sub, seq = tc.ccsds.sequence_count, "dispatching TC");
        let result = self.dispatch(&tc, session).await;

        if ack & ACK_COMPLETION != 0 {
            let tm = {
                let mut factory = self.factory.lock().await;
                match result {
                    Ok(()) => factory.execution_success(&tc),
                    Err(err) => factory.execution_failure(&tc, err.code()),
                }
            };
            self.send_tm(session, &tm);
        } else if let Err(err) = result {
            debug!(service, sub, code = err.code(), "TC failed without completion ack");
        }
    }

    async fn dispatch(&self, tc: &PusPacket, session: &SessionSender) -> Result<(), TcError> {
        // Validation already established the service is known.
        let service = ServiceType::from_u8(tc.service()).ok_or(TcError::UnknownService)?;
        match service {
            ServiceType::Housekeeping => self.dispatch_housekeeping(tc, session).await,
            ServiceType::FunctionManagement => self.dispatch_function(tc).await,
            ServiceType::ConnectionTest => self.dispatch_connection_test(tc, session).await,
            ServiceType::ParameterManagement => self.dispatch_parameter(tc).await,
            ServiceType::RequestVerification => Err(TcError::UnknownSubtype),
        }
    }

    async fn dispatch_housekeeping(
        &self,
        tc: &PusPacket,
        session: &SessionSender,
    ) -> Result<(), TcError> {
        let sub = tc.service_subtype();
        if !matches!(
            sub,
            subtype::TC_CREATE_HK_REPORT
                | subtype::TC_DELETE_HK_REPORT
                | subtype::TC_ENABLE_HK_REPORT
                | subtype::TC_DISABLE_HK_REPORT
                | subtype::TC_ONE_SHOT_HK
                | subtype::TC_MODIFY_HK_INTERVAL
        ) {
            return Err(TcError::UnknownSubtype);
        }

        let data = &tc.data;
        let structure_id = u16::from_be_bytes([data[0], data[1]]);

        // The table mutex is held across the mutation and the dispatch it
        // belongs to, making service-3 handling re-entrant with the poll.
        let mut hk = self.hk.lock().await;
        match sub {
            subtype::TC_CREATE_HK_REPORT => {
                hk.create(structure_id);
                info!(structure_id, "created HK structure");
                Ok(())
            }
            subtype::TC_DELETE_HK_REPORT => {
                hk.delete(structure_id);
                info!(structure_id, "deleted HK structure");
                Ok(())
            }
            subtype::TC_ENABLE_HK_REPORT => {
                if !hk.set_enabled(structure_id, true) {
                    debug!(structure_id, "enable for unknown HK structure");
                }
                Ok(())
            }
            subtype::TC_DISABLE_HK_REPORT => {
                if !hk.set_enabled(structure_id, false) {
                    debug!(structure_id, "disable for unknown HK structure");
                }
                Ok(())
            }
            subtype::TC_ONE_SHOT_HK => {
                let Some(structure) = hk.get(structure_id) else {
                    debug!(structure_id, "one-shot request for unknown HK structure");
                    return Ok(());
                };
                let frame = self.sim.read().await.sample();
                let values = structure.sample(&frame);
                drop(hk);

                let tm = self.factory.lock().await.hk_report(structure_id, &values);
                self.send_tm(session, &tm);
                Ok(())
            }
            subtype::TC_MODIFY_HK_INTERVAL => {
                let interval =
                    f32::from_be_bytes([data[2], data[3], data[4], data[5]]);
                if !interval.is_finite() || interval < 0.0 {
                    return Err(TcError::MalformedPayload);
                }
                hk.set_interval(structure_id, f64::from(interval));
                info!(structure_id, interval, "modified HK interval");
                Ok(())
            }
            _ => Err(TcError::UnknownSubtype),
        }
    }

    async fn dispatch_function(&self, tc: &PusPacket) -> Result<(), TcError> {
        if tc.service_subtype() != subtype::TC_PERFORM_FUNCTION {
            return Err(TcError::UnknownSubtype);
        }
        let data = &tc.data;
        if data.is_empty() {
            return Err(TcError::MalformedPayload);
        }
        let function_id = data[0];

        match function_id {
            function::SIM_START => {
                self.sim.write().await.start();
                info!("simulation started");
                Ok(())
            }
            function::SIM_STOP => {
                self.sim.write().await.stop();
                info!("simulation stopped");
                Ok(())
            }
            function::SIM_RESET => {
                self.sim.write().await.reset();
                info!("simulation reset");
                Ok(())
            }
            function::APPLY_PARAMETERS => {
                let entries: Vec<(u16, f64)> = {
                    let mut staged = self.staged.lock().await;
                    staged.drain().collect()
                };
                let applied = self.sim.write().await.commit_parameters(&entries);
                info!(staged = entries.len(), applied, "applied staged parameters");
                Ok(())
            }
            function::SELF_TEST => {
                info!("self-test started");
                tokio::time::sleep(SELF_TEST_DURATION).await;
                info!("self-test completed");
                Ok(())
            }
            id if (function::RW_BASE..function::RW_BASE + 0x10).contains(&id) => {
                let wheel = usize::from(id - function::RW_BASE);
                if wheel >= NUM_REACTION_WHEELS {
                    return Err(TcError::IndexOutOfRange);
                }
                if data.len() < 2 {
                    return Err(TcError::MalformedPayload);
                }
                let opcode = data[1];
                let payload = &data[2..];
                self.sim.write().await.reaction_wheels[wheel]
                    .process_command(opcode, payload)
                    .map_err(|fault| match fault {
                        CommandFault::UnknownOpcode => TcError::UnknownFunction,
                        CommandFault::ShortPayload => TcError::MalformedPayload,
                    })?;
                info!(wheel, opcode, "reaction wheel command");
                Ok(())
            }
            id if (function::THRUSTER_BASE..function::THRUSTER_BASE + 0x10).contains(&id) => {
                let thruster = usize::from(id - function::THRUSTER_BASE);
                if thruster >= NUM_THRUSTERS {
                    return Err(TcError::IndexOutOfRange);
                }
                if data.len() < 2 {
                    return Err(TcError::MalformedPayload);
                }
                let firing = data[1] == 1;
                self.sim.write().await.thrusters[thruster].firing = firing;
                info!(thruster, firing, "thruster command");
                Ok(())
            }
            id if (function::TORQUE_ROD_BASE..function::TORQUE_ROD_BASE + 0x10).contains(&id) => {
                let rod = usize::from(id - function::TORQUE_ROD_BASE);
                if rod >= NUM_TORQUE_RODS {
                    return Err(TcError::IndexOutOfRange);
                }
                let dipole = read_f32(&data[1..]).ok_or(TcError::MalformedPayload)?;
                self.sim.write().await.torque_rods[rod].commanded_dipole_am2 = f64::from(dipole);
                info!(rod, dipole, "torque rod command");
                Ok(())
            }
            id if (function::SADA_BASE..function::SADA_BASE + 0x10).contains(&id) => {
                let sada = usize::from(id - function::SADA_BASE);
                if sada >= NUM_SADAS {
                    return Err(TcError::IndexOutOfRange);
                }
                let angle = read_f32(&data[1..]).ok_or(TcError::MalformedPayload)?;
                self.sim.write().await.sadas[sada].commanded_angle_deg = f64::from(angle);
                info!(sada, angle, "SADA command");
                Ok(())
            }
            _ => Err(TcError::UnknownFunction),
        }
    }

    async fn dispatch_connection_test(
        &self,
        tc: &PusPacket,
        session: &SessionSender,
    ) -> Result<(), TcError> {
        if tc.service_subtype() != subtype::TC_CONNECTION_TEST {
            return Err(TcError::UnknownSubtype);
        }
        let tm = self.factory.lock().await.connection_report();
        self.send_tm(session, &tm);
        debug!(session = session.id, "connection test report sent");
        Ok(())
    }

    async fn dispatch_parameter(&self, tc: &PusPacket) -> Result<(), TcError> {
        if tc.service_subtype() != subtype::TC_SET_PARAMETER {
            return Err(TcError::UnknownSubtype);
        }
        let data = &tc.data;
        let param_id = u16::from_be_bytes([data[0], data[1]]);
        let value = f32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        self.staged.lock().await.insert(param_id, f64::from(value));
        info!(param_id, value, "staged parameter");
        Ok(())
    }

    fn send_tm(&self, session: &SessionSender, tm: &PusPacket) {
        let bytes = eden::wrap(&tm.encode());
        if !session.send_or_close(bytes) {
            warn!(session = session.id, "session queue full, closing");
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

/// Pre-dispatch acceptance checks: the service must exist and the payload
/// must be long enough for the addressed subtype.
fn validate(tc: &PusPacket) -> Result<(), TcError> {
    let service = ServiceType::from_u8(tc.service()).ok_or(TcError::UnknownService)?;
    if let Some(min_len) = min_payload_len(service, tc.service_subtype()) {
        if tc.data.len() < min_len {
            return Err(TcError::MalformedPayload);
        }
    }
    Ok(())
}

/// Minimum payload length per known (service, subtype); `None` leaves the
/// length check to the execution stage.
fn min_payload_len(service: ServiceType, sub: u8) -> Option<usize> {
    match (service, sub) {
        (ServiceType::Housekeeping, subtype::TC_MODIFY_HK_INTERVAL) => Some(6),
        (ServiceType::Housekeeping, _)
            if matches!(
                sub,
                subtype::TC_CREATE_HK_REPORT
                    | subtype::TC_DELETE_HK_REPORT
                    | subtype::TC_ENABLE_HK_REPORT
                    | subtype::TC_DISABLE_HK_REPORT
                    | subtype::TC_ONE_SHOT_HK
            ) =>
        {
            Some(2)
        }
        (ServiceType::FunctionManagement, subtype::TC_PERFORM_FUNCTION) => Some(1),
        (ServiceType::ConnectionTest, subtype::TC_CONNECTION_TEST) => Some(0),
        (ServiceType::ParameterManagement, subtype::TC_SET_PARAMETER) => Some(6),
        _ => None,
    }
}
