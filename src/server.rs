//! Mock AOCS endpoint: TCP session server plus the simulation and
//! housekeeping tasks.
//!
//! Each accepted session gets its own inbound framer and a bounded outbound
//! queue drained by a writer task. Verification TMs and one-shot reports are
//! unicast on the session that issued the TC; interval housekeeping is
//! broadcast to every live session. A failing or backed-up session is
//! ejected on its own; the simulation ticker and the housekeeping poll are
//! never blocked by session I/O.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::housekeeping::{HkTable, HK_POLL_PERIOD_MS};
use crate::protocol::{eden, eden::EdenFramer, MissionClock, PacketFactory, PacketType, PusPacket};
use crate::services::{SessionSender, StagedParameters, TcHandler};
use crate::sim::{AocsSimulation, SimConfig, SIM_DT};

const SESSION_QUEUE_DEPTH: usize = 64;
const READ_CHUNK: usize = 4096;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type SessionMap = Arc<Mutex<HashMap<u64, SessionSender>>>;

/// Cooperative shutdown trigger for a running server.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send_replace(true);
    }
}

/// The mock AOCS endpoint.
pub struct MockAocsServer {
    listener: TcpListener,
    sim: Arc<RwLock<AocsSimulation>>,
    hk: Arc<Mutex<HkTable>>,
    factory: Arc<Mutex<PacketFactory>>,
    handler: TcHandler,
    sessions: SessionMap,
    clock: MissionClock,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MockAocsServer {
    /// Bind the listener and build the endpoint state. The simulation starts
    /// stopped; TC[8,1] function 0x01 starts it.
    pub async fn bind(config: EndpointConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

        let clock = MissionClock::started_now();
        let sim = AocsSimulation::new(SimConfig {
            seed: config.seed,
            ..SimConfig::default()
        });
        let hk = Arc::new(Mutex::new(HkTable::with_defaults(sim.registry())));
        let sim = Arc::new(RwLock::new(sim));
        let staged: Arc<Mutex<StagedParameters>> = Arc::new(Mutex::new(HashMap::new()));
        let factory = Arc::new(Mutex::new(PacketFactory::new(
            config.apid,
            config.source_id,
            clock,
        )));

        let handler = TcHandler::new(
            Arc::clone(&sim),
            Arc::clone(&hk),
            staged,
            Arc::clone(&factory),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener,
            sim,
            hk,
            factory,
            handler,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared simulation state, for embedding and test harnesses.
    pub fn simulation(&self) -> Arc<RwLock<AocsSimulation>> {
        Arc::clone(&self.sim)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Run until the shutdown handle fires: 80 Hz simulation ticker, 10 Hz
    /// housekeeping poll and the accept loop.
    pub async fn serve(self) -> io::Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "mock AOCS endpoint listening");

        let sim_task = tokio::spawn(simulation_loop(
            Arc::clone(&self.sim),
            self.shutdown_rx.clone(),
        ));
        let hk_task = tokio::spawn(housekeeping_loop(
            Arc::clone(&self.sim),
            Arc::clone(&self.hk),
            Arc::clone(&self.factory),
            Arc::clone(&self.sessions),
            self.clock,
            self.shutdown_rx.clone(),
        ));

        let next_session_id = AtomicU64::new(1);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let id = next_session_id.fetch_add(1, Ordering::Relaxed);
                            info!(session = id, %peer, "client connected");

                            let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
                            let session = SessionSender::new(id, tx, Arc::new(Notify::new()));
                            self.sessions.lock().await.insert(id, session.clone());

                            tokio::spawn(run_session(
                                stream,
                                session,
                                rx,
                                self.handler.clone(),
                                Arc::clone(&self.sessions),
                                self.shutdown_rx.clone(),
                            ));
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("endpoint shutting down");
        {
            // Wake every session loop; their writer tasks drain with a
            // bounded timeout.
            let sessions = self.sessions.lock().await;
            for session in sessions.values() {
                session.close();
            }
        }
        let _ = tokio::join!(sim_task, hk_task);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

async fn simulation_loop(sim: Arc<RwLock<AocsSimulation>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(SIM_DT));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sim.write().await.tick();
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("simulation loop exited");
}

async fn housekeeping_loop(
    sim: Arc<RwLock<AocsSimulation>>,
    hk: Arc<Mutex<HkTable>>,
    factory: Arc<Mutex<PacketFactory>>,
    sessions: SessionMap,
    clock: MissionClock,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(HK_POLL_PERIOD_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let due = hk.lock().await.collect_due(clock.elapsed_secs_f64());
                if due.is_empty() {
                    continue;
                }

                // One frame snapshot serves every due structure this poll.
                let frame = sim.read().await.sample();
                for (structure_id, params) in due {
                    let values: Vec<f32> = params.iter().map(|&id| frame.get(id)).collect();
                    let tm = factory.lock().await.hk_report(structure_id, &values);
                    broadcast(&sessions, eden::wrap(&tm.encode())).await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("housekeeping loop exited");
}

/// Send to every live session; sessions that cannot keep up are ejected and
/// the rest are unaffected.
async fn broadcast(sessions: &SessionMap, bytes: Vec<u8>) {
    let mut dead = Vec::new();
    {
        let guard = sessions.lock().await;
        for (&id, session) in guard.iter() {
            if !session.send_or_close(bytes.clone()) {
                dead.push(id);
            }
        }
    }
    if !dead.is_empty() {
        let mut guard = sessions.lock().await;
        for id in dead {
            if guard.remove(&id).is_some() {
                warn!(session = id, "ejected session from broadcast");
            }
        }
    }
}

async fn run_session(
    stream: TcpStream,
    session: SessionSender,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    handler: TcHandler,
    sessions: SessionMap,
    mut shutdown: watch::Receiver<bool>,
) {
    let id = session.id;
    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut framer = EdenFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            _ = session.closed().notified() => {
                info!(session = id, "session closed by server");
                break;
            }
            _ = shutdown.changed() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    framer.push(&buf[..n]);
                    while let Some(packet) = framer.next_packet() {
                        match PusPacket::decode(&packet) {
                            Ok(tc) if tc.packet_type() == PacketType::Tc => {
                                handler.handle(tc, &session).await;
                            }
                            Ok(_) => debug!(session = id, "ignoring inbound TM packet"),
                            Err(err) => {
                                warn!(session = id, %err, "dropping undecodable packet");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(session = id, %err, "session read failed");
                    break;
                }
            }
        }
    }

    sessions.lock().await.remove(&id);
    drop(session);
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await;
    info!(session = id, "client disconnected");
}
