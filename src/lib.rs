//! A host-side Bluetooth Low Energy (BLE) protocol library.
//!
//! This crate implements the **Attribute Protocol (ATT)** server and its
//! **Generic Attribute Profile (GATT)** database, together with the wire codec
//! machinery that feeds them: GAP advertising data records and HCI LE command/
//! return parameter encoding.
//!
//! # Layout
//!
//! * [`att`] — the Attribute Protocol: PDU catalogue ([`att::pdus`]), attribute
//!   handles ([`att::handle`]), per-attribute permissions ([`att::permissions`]),
//!   and the connection that pumps PDUs between a [`socket::Socket`] and a
//!   request handler ([`att::connection`]).
//! * [`gatt`] — the Generic Attribute Profile built on top of ATT: the
//!   in-memory attribute database ([`gatt::db`]), typed characteristic data
//!   ([`gatt::characteristic`]), and the server that answers requests against
//!   the database ([`gatt::server`]).
//! * [`gap`] — Generic Access Profile advertising data records.
//! * [`hci`] — a narrow slice of the HCI LE Controller command/event parameter
//!   catalogue, scoped to what a GATT-server-only host needs to reason about.
//! * [`bytes`] — the little-endian, length-validated codec primitives
//!   ([`bytes::ToBytes`]/[`bytes::FromBytes`]) every PDU, AD structure, and HCI
//!   parameter block in this crate is built on.
//! * [`uuid`] — 16-, 32- and 128-bit Bluetooth UUIDs.
//! * [`socket`] — the external transport seam this crate is driven through;
//!   L2CAP framing, the HCI transport, and controller drivers all live below
//!   it and are out of scope here.
//!
//! # Using the stack
//!
//! Implement [`socket::Socket`] for whatever delivers framed ATT PDUs on your
//! platform, build a [`gatt::db::GattDatabase`] out of [`gatt::db::ServiceDef`]s,
//! and drive a [`gatt::server::GattServer`] by calling
//! [`gatt::server::GattServer::read`]/[`gatt::server::GattServer::write`]
//! whenever the socket may have work (see [`gatt::server`] for the full
//! request-handling contract and its cooperative scheduling model).

#[macro_use]
mod utils;
pub mod att;
pub mod bytes;
mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod socket;
pub mod uuid;

pub use self::error::Error;
