//! Implementation of the Generic Attribute Profile (GATT).
//!
//! GATT describes a service framework that uses the Attribute Protocol for discovery and
//! interaction: a [`db`] holding services/characteristics/descriptors as flattened
//! attributes, and a [`server`] that answers ATT requests against that database.

pub mod characteristic;
pub mod db;
pub mod server;
