//! A narrow slice of the Host Controller Interface (HCI) LE Controller command
//! and event parameter catalogue.
//!
//! Only command/return-parameter encoding lives here; the HCI transport that
//! carries these bytes to and from a controller (UART, USB, a virtual driver)
//! is out of scope, same as the [`socket`](crate::socket) boundary below ATT.
//! The commands and events below are the ones a GATT-server-only host needs to
//! bring an LE link up: setting advertising data and parameters, enabling
//! advertising, sizing the LE ACL data pool, negotiating the LE data length,
//! and learning about the resulting connection.

use crate::{bytes::*, Error};

/// OGF (Opcode Group Field) for all LE Controller Commands.
const OGF_LE_CONTROLLER: u16 = 0x08;

/// Combines an OGF and OCF (Opcode Command Field) into the 16-bit HCI command opcode.
const fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

/// A bounded transmit power level, in dBm, in the range `[-127, 126]`.
///
/// The full `i8` range also contains `-128` and `127`, which the Bluetooth Core
/// Spec reserves (`127` means "not available"); this type's fallible
/// constructor keeps those out of any computation that uses a `TxPower`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxPower(i8);

impl TxPower {
    pub const MIN: Self = Self(-127);
    pub const MAX: Self = Self(126);

    /// Returns `None` if `dbm` is outside `[-127, 126]`.
    pub fn new(dbm: i8) -> Option<Self> {
        if (-127..=126).contains(&dbm) {
            Some(Self(dbm))
        } else {
            None
        }
    }

    pub fn dbm(self) -> i8 {
        self.0
    }
}

impl ToBytes for TxPower {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_i8(self.0)
    }
}

impl FromBytes<'_> for TxPower {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Self::new(bytes.read_i8()?).ok_or(Error::InvalidValue)
    }
}

/// A bounded `MaxTxOctets` value for *LE Set Data Length*, in `[0x001B, 0x00FB]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaxTxOctets(u16);

impl MaxTxOctets {
    pub const MIN: Self = Self(0x001B);
    pub const MAX: Self = Self(0x00FB);

    pub fn new(octets: u16) -> Option<Self> {
        if (0x001B..=0x00FB).contains(&octets) {
            Some(Self(octets))
        } else {
            None
        }
    }

    pub fn octets(self) -> u16 {
        self.0
    }
}

impl ToBytes for MaxTxOctets {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

impl FromBytes<'_> for MaxTxOctets {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Self::new(bytes.read_u16_le()?).ok_or(Error::InvalidValue)
    }
}

/// A bounded `MaxTxTime` value for *LE Set Data Length*, in microseconds,
/// `[0x0148, 0x4290]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaxTxTime(u16);

impl MaxTxTime {
    pub const MIN: Self = Self(0x0148);
    pub const MAX: Self = Self(0x4290);

    pub fn new(micros: u16) -> Option<Self> {
        if (0x0148..=0x4290).contains(&micros) {
            Some(Self(micros))
        } else {
            None
        }
    }

    pub fn micros(self) -> u16 {
        self.0
    }
}

impl ToBytes for MaxTxTime {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

impl FromBytes<'_> for MaxTxTime {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Self::new(bytes.read_u16_le()?).ok_or(Error::InvalidValue)
    }
}

bitflags::bitflags! {
    /// A subset of the LE Controller feature bits reported by *Read Remote Used
    /// Features* (Bluetooth Core Spec Vol 6 Part B §4.6). Only the bits this
    /// crate's callers have a use for are named; everything else round-trips
    /// through the raw `u64`.
    #[derive(Default)]
    pub struct LeFeatures: u64 {
        const LE_ENCRYPTION                          = 1 << 0;
        const CONNECTION_PARAMETERS_REQUEST_PROCEDURE = 1 << 1;
        const EXTENDED_REJECT_INDICATION             = 1 << 2;
        const LE_DATA_PACKET_LENGTH_EXTENSION        = 1 << 5;
        const LL_PRIVACY                             = 1 << 6;
        const EXTENDED_SCANNER_FILTER_POLICIES       = 1 << 7;
        const LE_2M_PHY                              = 1 << 8;
        const LE_CODED_PHY                           = 1 << 11;
        const LE_EXTENDED_ADVERTISING                = 1 << 12;
    }
}

impl ToBytes for LeFeatures {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u64_le(self.bits())
    }
}

impl FromBytes<'_> for LeFeatures {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self::from_bits_truncate(u64::from_le_bytes(
            bytes.read_array()?,
        )))
    }
}

/// *LE Read Buffer Size* (OCF `0x0002`) has no command parameters.
pub struct ReadBufferSize;

impl ReadBufferSize {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x0002);
}

/// Return parameters for *LE Read Buffer Size*.
#[derive(Debug, Copy, Clone)]
pub struct ReadBufferSizeReturn {
    pub status: u8,
    pub hc_le_data_packet_length: u16,
    pub hc_total_num_le_data_packets: u8,
}

impl ToBytes for ReadBufferSizeReturn {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.status)?;
        writer.write_u16_le(self.hc_le_data_packet_length)?;
        writer.write_u8(self.hc_total_num_le_data_packets)
    }
}

impl FromBytes<'_> for ReadBufferSizeReturn {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            status: bytes.read_u8()?,
            hc_le_data_packet_length: bytes.read_u16_le()?,
            hc_total_num_le_data_packets: bytes.read_u8()?,
        })
    }
}

/// *LE Set Advertising Parameters* command parameters (OCF `0x0006`).
#[derive(Debug, Copy, Clone)]
pub struct SetAdvertisingParameters {
    pub adv_interval_min: u16,
    pub adv_interval_max: u16,
    pub adv_type: u8,
    pub own_address_type: u8,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    pub adv_channel_map: u8,
    pub adv_filter_policy: u8,
}

impl SetAdvertisingParameters {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x0006);
    pub const LENGTH: usize = 15;
}

impl ToBytes for SetAdvertisingParameters {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.adv_interval_min)?;
        writer.write_u16_le(self.adv_interval_max)?;
        writer.write_u8(self.adv_type)?;
        writer.write_u8(self.own_address_type)?;
        writer.write_u8(self.peer_address_type)?;
        writer.write_slice(&self.peer_address)?;
        writer.write_u8(self.adv_channel_map)?;
        writer.write_u8(self.adv_filter_policy)
    }
}

impl FromBytes<'_> for SetAdvertisingParameters {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(Self {
            adv_interval_min: bytes.read_u16_le()?,
            adv_interval_max: bytes.read_u16_le()?,
            adv_type: bytes.read_u8()?,
            own_address_type: bytes.read_u8()?,
            peer_address_type: bytes.read_u8()?,
            peer_address: bytes.read_array()?,
            adv_channel_map: bytes.read_u8()?,
            adv_filter_policy: bytes.read_u8()?,
        })
    }
}

/// Shared shape of *LE Set Advertising Data* (OCF `0x0008`) and *LE Set Scan
/// Response Data* (OCF `0x0009`): a length byte followed by a fixed 31-byte
/// payload buffer, zero-padded past `length`.
#[derive(Debug, Copy, Clone)]
pub struct AdvertisingPayload {
    pub length: u8,
    pub data: [u8; 31],
}

impl AdvertisingPayload {
    pub const LENGTH: usize = 32;

    /// Builds a payload from a packed AD structure buffer (see
    /// [`crate::gap::ad::pack`]), which must be at most 31 bytes.
    pub fn from_packed(packed: &[u8]) -> Option<Self> {
        if packed.len() > 31 {
            return None;
        }
        let mut data = [0u8; 31];
        data[..packed.len()].copy_from_slice(packed);
        Some(Self {
            length: packed.len() as u8,
            data,
        })
    }
}

impl ToBytes for AdvertisingPayload {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.length)?;
        writer.write_slice(&self.data)
    }
}

impl FromBytes<'_> for AdvertisingPayload {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        let length = bytes.read_u8()?;
        if usize::from(length) > 31 {
            return Err(Error::InvalidValue);
        }
        Ok(Self {
            length,
            data: bytes.read_array()?,
        })
    }
}

pub struct SetAdvertisingData;
impl SetAdvertisingData {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x0008);
}

pub struct SetScanResponseData;
impl SetScanResponseData {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x0009);
}

/// *LE Set Advertising Enable* command parameters (OCF `0x000A`).
#[derive(Debug, Copy, Clone)]
pub struct SetAdvertisingEnable {
    pub enable: bool,
}

impl SetAdvertisingEnable {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x000A);
    pub const LENGTH: usize = 1;
}

impl ToBytes for SetAdvertisingEnable {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.enable as u8)
    }
}

impl FromBytes<'_> for SetAdvertisingEnable {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(Self {
            enable: bytes.read_u8()? != 0,
        })
    }
}

/// *LE Set Data Length* command parameters (OCF `0x0022`).
#[derive(Debug, Copy, Clone)]
pub struct SetDataLength {
    pub connection_handle: u16,
    pub tx_octets: MaxTxOctets,
    pub tx_time: MaxTxTime,
}

impl SetDataLength {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x0022);
    pub const LENGTH: usize = 6;
}

impl ToBytes for SetDataLength {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.connection_handle)?;
        self.tx_octets.to_bytes(writer)?;
        self.tx_time.to_bytes(writer)
    }
}

impl FromBytes<'_> for SetDataLength {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(Self {
            connection_handle: bytes.read_u16_le()?,
            tx_octets: MaxTxOctets::from_bytes(bytes)?,
            tx_time: MaxTxTime::from_bytes(bytes)?,
        })
    }
}

/// *LE Read Transmit Power* (OCF `0x004B`) has no command parameters.
pub struct ReadTransmitPower;
impl ReadTransmitPower {
    pub const OPCODE: u16 = opcode(OGF_LE_CONTROLLER, 0x004B);
}

/// Return parameters for *LE Read Transmit Power*.
#[derive(Debug, Copy, Clone)]
pub struct ReadTransmitPowerReturn {
    pub status: u8,
    pub min_tx_power: TxPower,
    pub max_tx_power: TxPower,
}

impl ToBytes for ReadTransmitPowerReturn {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.status)?;
        self.min_tx_power.to_bytes(writer)?;
        self.max_tx_power.to_bytes(writer)
    }
}

impl FromBytes<'_> for ReadTransmitPowerReturn {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            status: bytes.read_u8()?,
            min_tx_power: TxPower::from_bytes(bytes)?,
            max_tx_power: TxPower::from_bytes(bytes)?,
        })
    }
}

/// *LE Connection Complete* event parameters (LE Meta Event subevent `0x01`).
///
/// The outer HCI event framing (event code `0x3E`, total parameter length) is
/// the HCI transport's concern; this is the subevent payload only.
#[derive(Debug, Copy, Clone)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub role: u8,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    pub conn_interval: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
    pub master_clock_accuracy: u8,
}

impl LeConnectionComplete {
    pub const SUBEVENT_CODE: u8 = 0x01;
    pub const LENGTH: usize = 18;
}

impl ToBytes for LeConnectionComplete {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.status)?;
        writer.write_u16_le(self.connection_handle)?;
        writer.write_u8(self.role)?;
        writer.write_u8(self.peer_address_type)?;
        writer.write_slice(&self.peer_address)?;
        writer.write_u16_le(self.conn_interval)?;
        writer.write_u16_le(self.conn_latency)?;
        writer.write_u16_le(self.supervision_timeout)?;
        writer.write_u8(self.master_clock_accuracy)
    }
}

impl FromBytes<'_> for LeConnectionComplete {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(Self {
            status: bytes.read_u8()?,
            connection_handle: bytes.read_u16_le()?,
            role: bytes.read_u8()?,
            peer_address_type: bytes.read_u8()?,
            peer_address: bytes.read_array()?,
            conn_interval: bytes.read_u16_le()?,
            conn_latency: bytes.read_u16_le()?,
            supervision_timeout: bytes.read_u16_le()?,
            master_clock_accuracy: bytes.read_u8()?,
        })
    }
}

/// *LE Read Remote Used Features Complete* event parameters (LE Meta Event
/// subevent `0x04`).
#[derive(Debug, Copy, Clone)]
pub struct LeReadRemoteUsedFeaturesComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub le_features: LeFeatures,
}

impl LeReadRemoteUsedFeaturesComplete {
    pub const SUBEVENT_CODE: u8 = 0x04;
    pub const LENGTH: usize = 11;
}

impl ToBytes for LeReadRemoteUsedFeaturesComplete {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.status)?;
        writer.write_u16_le(self.connection_handle)?;
        self.le_features.to_bytes(writer)
    }
}

impl FromBytes<'_> for LeReadRemoteUsedFeaturesComplete {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        if bytes.bytes_left() != Self::LENGTH {
            return Err(Error::InvalidLength);
        }
        Ok(Self {
            status: bytes.read_u8()?,
            connection_handle: bytes.read_u16_le()?,
            le_features: LeFeatures::from_bytes(bytes)?,
        })
    }
}
