//! printdeck: one aggregation point for a fleet of Moonraker/Klipper printers.
//!
//! Each configured printer gets a supervisor actor that keeps a reconnecting
//! JSON-RPC link to its Moonraker host, folds the pushed status fragments into
//! a typed snapshot and derives a fused print-completion estimate. The web
//! module relays those views and forwards operator commands.

pub mod config;
pub mod error;
pub mod hass;
pub mod printer;
pub mod registry;
pub mod rpc;
pub mod web;

pub use config::{Config, PrinterConfig, TimingConfig};
pub use error::HubError;
pub use printer::{
    ConnectionState, FirmwareState, PrinterHandle, PrinterUpdate, PrinterView,
};
pub use printer::estimator::JobEstimate;
pub use registry::PrinterRegistry;
