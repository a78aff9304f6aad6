//! Hardware drivers
//!
//! This module contains the storage controller driver and the inter-chip bus
//! interface used by the power-management code.

pub mod i2c;
pub mod msc;
