//! Hexagonal boundary to the Zigbee stack, attribute store, and the
//! peripherals the core treats as external collaborators.
//!
//! The Zigbee stack itself (cluster/attribute registration, ZCL dispatch)
//! is explicitly out of scope — this module only defines the port traits
//! the core calls through. `adapters/` holds the concrete implementations.

pub mod ports;
