//! # AOCS SCOE
//!
//! Special check-out equipment for an attitude and orbit control system:
//! a mock AOCS endpoint that runs a fixed-rate rigid-body attitude
//! simulation behind ECSS PUS services over an EDEN-framed TCP link, and a
//! SCOE controller that drives it, decodes housekeeping telemetry and caches
//! latest values for external adapters.
//!
//! ## Features
//!
//! - **EDEN/PUS wire codec**: CCSDS primary header, PUS-C secondary header,
//!   CRC-16-CCITT, sync-marked outer framing with restartable reassembly
//! - **PUS services**: request verification (1), housekeeping (3), function
//!   management (8), connection test (17), parameter management (20)
//! - **AOCS simulation**: 80 Hz attitude propagation with reaction wheels,
//!   thrusters, torque rods, SADAs, and noisy sensor models
//! - **Resilient controller link**: auto-reconnect, sequence-correlated
//!   command verification with deadlines, latest-value telemetry cache
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use aocs_scoe::config::{ControllerConfig, EndpointConfig};
//! use aocs_scoe::decoder::TelemetryStore;
//! use aocs_scoe::server::MockAocsServer;
//! use aocs_scoe::client::ScoeLink;
//!
//! # async fn run() -> std::io::Result<()> {
//! // Endpoint side
//! let server = MockAocsServer::bind(EndpointConfig::default()).await?;
//! tokio::spawn(server.serve());
//!
//! // Controller side
//! let store = Arc::new(TelemetryStore::new());
//! let link = ScoeLink::spawn(ControllerConfig::default(), store);
//! link.start_simulation().await.ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - wire codec, packet factory, mission clock
//! - [`sim`] - simulation core: dynamics, sensors, actuators
//! - [`params`] - interned telemetry parameter registry
//! - [`housekeeping`] - HK structure table and scheduling
//! - [`services`] - telecommand dispatch and verification reporting
//! - [`server`] - endpoint session server and task wiring
//! - [`client`] - resilient controller link
//! - [`decoder`] - telemetry decoding and the latest-value store
//! - [`config`] - process configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod client;
pub mod config;
pub mod decoder;
pub mod housekeeping;
pub mod params;
pub mod protocol;
pub mod server;
pub mod services;
pub mod sim;

// Re-export the main entry points for convenience.
pub use client::{LinkStatus, ScoeLink};
pub use decoder::TelemetryStore;
pub use protocol::{PacketFactory, PusPacket};
pub use server::MockAocsServer;
pub use sim::AocsSimulation;
