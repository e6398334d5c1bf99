//! Generic Access Profile (GAP) data: advertising/scan response records.
//!
//! GAP role management (advertising/scanning/connection state machines) is out of
//! scope for this crate; only the data format used to describe a device's
//! advertised capabilities is implemented here.

pub mod ad;
