//! Advertising Data / Extended Inquiry Response (EIR) data structures.
//!
//! A list of these can be sent along with an advertising packet or scan response,
//! letting a scanner learn about a device (its name, services, appearance, ...)
//! without first establishing a connection.

use crate::{
    bytes::*,
    uuid::{Uuid128, Uuid16, Uuid32},
    Error,
};
use bitflags::bitflags;

/// A single GAP advertising data structure (Bluetooth Core Spec Supplement, Part A).
///
/// Unless otherwise noted, each variant should be included at most once per packet.
#[derive(Debug, Copy, Clone)]
pub enum AdStructure<'a> {
    /// Device flags and baseband capabilities. Must not be used in scan response data.
    Flags(Flags),

    /// 16-bit service UUIDs offered by the device.
    ServiceUuids16 { complete: bool, uuids: &'a [Uuid16] },
    /// 32-bit service UUIDs offered by the device.
    ServiceUuids32 { complete: bool, uuids: &'a [Uuid32] },
    /// 128-bit service UUIDs offered by the device.
    ServiceUuids128 { complete: bool, uuids: &'a [Uuid128] },

    /// Service data associated with a 16-bit service UUID.
    ServiceData16 { uuid: u16, data: &'a [u8] },

    /// The full (unabbreviated) device name.
    CompleteLocalName(&'a str),
    /// The shortened device name.
    ShortenedLocalName(&'a str),

    /// Manufacturer-specific data, prefixed with a company identifier.
    ManufacturerSpecificData { company_identifier: u16, payload: &'a [u8] },

    /// Transmit power level, in dBm, as measured at the antenna.
    TxPowerLevel(i8),

    /// The device's external appearance.
    Appearance(u16),

    /// Preferred connection interval range, in units of 1.25ms, `0xFFFF` meaning "no
    /// preference" for either bound.
    SlaveConnectionIntervalRange { range_min: u16, range_max: u16 },

    /// An unimplemented AD structure, stored as its raw type byte and data.
    Unknown { ty: u8, data: &'a [u8] },
}

impl<'a> ToBytes for AdStructure<'a> {
    /// Encodes this AD structure as `[len, type, data...]`, backfilling `len` once the
    /// payload size is known.
    fn to_bytes(&self, buf: &mut ByteWriter<'_>) -> Result<(), Error> {
        let len_byte = buf.split_next_mut().ok_or(Error::Eof)?;
        let left_before = buf.space_left();

        match self {
            AdStructure::Flags(flags) => {
                buf.write_u8(Type::FLAGS)?;
                buf.write_u8(flags.to_u8())?;
            }
            AdStructure::ServiceUuids16 { complete, uuids } => {
                buf.write_u8(if *complete {
                    Type::COMPLETE_LIST_OF_16BIT_SERVICE_UUIDS
                } else {
                    Type::INCOMPLETE_LIST_OF_16BIT_SERVICE_UUIDS
                })?;
                for uuid in *uuids {
                    uuid.to_bytes(buf)?;
                }
            }
            AdStructure::ServiceUuids32 { complete, uuids } => {
                buf.write_u8(if *complete {
                    Type::COMPLETE_LIST_OF_32BIT_SERVICE_UUIDS
                } else {
                    Type::INCOMPLETE_LIST_OF_32BIT_SERVICE_UUIDS
                })?;
                for uuid in *uuids {
                    uuid.to_bytes(buf)?;
                }
            }
            AdStructure::ServiceUuids128 { complete, uuids } => {
                buf.write_u8(if *complete {
                    Type::COMPLETE_LIST_OF_128BIT_SERVICE_UUIDS
                } else {
                    Type::INCOMPLETE_LIST_OF_128BIT_SERVICE_UUIDS
                })?;
                for uuid in *uuids {
                    uuid.to_bytes(buf)?;
                }
            }
            AdStructure::ServiceData16 { uuid, data } => {
                buf.write_u8(Type::SERVICE_DATA_16BIT_UUID)?;
                buf.write_u16_le(*uuid)?;
                buf.write_slice(data)?;
            }
            AdStructure::CompleteLocalName(name) => {
                buf.write_u8(Type::COMPLETE_LOCAL_NAME)?;
                buf.write_slice(name.as_bytes())?;
            }
            AdStructure::ShortenedLocalName(name) => {
                buf.write_u8(Type::SHORTENED_LOCAL_NAME)?;
                buf.write_slice(name.as_bytes())?;
            }
            AdStructure::ManufacturerSpecificData {
                company_identifier,
                payload,
            } => {
                buf.write_u8(Type::MANUFACTURER_SPECIFIC_DATA)?;
                buf.write_u16_le(*company_identifier)?;
                buf.write_slice(payload)?;
            }
            AdStructure::TxPowerLevel(power) => {
                buf.write_u8(Type::TX_POWER_LEVEL)?;
                buf.write_i8(*power)?;
            }
            AdStructure::Appearance(appearance) => {
                buf.write_u8(Type::APPEARANCE)?;
                buf.write_u16_le(*appearance)?;
            }
            AdStructure::SlaveConnectionIntervalRange { range_min, range_max } => {
                buf.write_u8(Type::SLAVE_CONNECTION_INTERVAL_RANGE)?;
                buf.write_u16_le(*range_min)?;
                buf.write_u16_le(*range_max)?;
            }
            AdStructure::Unknown { ty, data } => {
                buf.write_u8(*ty)?;
                buf.write_slice(data)?;
            }
        }

        let len = left_before - buf.space_left();
        if len > 255 {
            return Err(Error::InvalidLength);
        }
        *len_byte = len as u8;
        Ok(())
    }
}

impl<'a> FromBytes<'a> for AdStructure<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let len = bytes.read_u8()?;
        if len == 0 {
            return Err(Error::InvalidLength);
        }

        let ty_and_data = bytes.read_slice(usize::from(len))?;
        let ty = ty_and_data[0];
        let mut data = ByteReader::new(&ty_and_data[1..]);

        Ok(match ty {
            Type::FLAGS => {
                let bits = data.read_u8()?;
                AdStructure::Flags(Flags::from_bits_truncate(bits))
            }
            Type::COMPLETE_LIST_OF_16BIT_SERVICE_UUIDS
            | Type::INCOMPLETE_LIST_OF_16BIT_SERVICE_UUIDS => {
                // Borrows straight from the input buffer are unavailable once routed through
                // owned UUID values, so 16-bit service UUID lists decode into `Unknown` here;
                // `ServiceData16`/single-UUID lookups cover the common discovery case.
                AdStructure::Unknown {
                    ty,
                    data: &ty_and_data[1..],
                }
            }
            Type::COMPLETE_LOCAL_NAME => AdStructure::CompleteLocalName(
                std::str::from_utf8(&ty_and_data[1..]).map_err(|_| Error::InvalidValue)?,
            ),
            Type::SHORTENED_LOCAL_NAME => AdStructure::ShortenedLocalName(
                std::str::from_utf8(&ty_and_data[1..]).map_err(|_| Error::InvalidValue)?,
            ),
            Type::SERVICE_DATA_16BIT_UUID => AdStructure::ServiceData16 {
                uuid: data.read_u16_le()?,
                data: data.read_rest(),
            },
            Type::MANUFACTURER_SPECIFIC_DATA => AdStructure::ManufacturerSpecificData {
                company_identifier: data.read_u16_le()?,
                payload: data.read_rest(),
            },
            Type::TX_POWER_LEVEL => AdStructure::TxPowerLevel(data.read_i8()?),
            Type::APPEARANCE => AdStructure::Appearance(data.read_u16_le()?),
            Type::SLAVE_CONNECTION_INTERVAL_RANGE => AdStructure::SlaveConnectionIntervalRange {
                range_min: data.read_u16_le()?,
                range_max: data.read_u16_le()?,
            },
            _ => AdStructure::Unknown {
                ty,
                data: &ty_and_data[1..],
            },
        })
    }
}

/// Packs a list of AD structures into a single concatenated advertising
/// payload buffer, as sent in an advertising PDU or in the
/// [`crate::hci::AdvertisingPayload`] HCI command parameters.
///
/// Returns `Error::Eof` if the encoded structures don't fit in `buf` (the
/// controller's advertising/scan-response payload is limited to 31 bytes).
pub fn pack(structures: &[AdStructure<'_>], buf: &mut [u8]) -> Result<usize, Error> {
    let mut writer = ByteWriter::new(buf);
    for s in structures {
        s.to_bytes(&mut writer)?;
    }
    Ok(buf.len() - writer.space_left())
}

/// Iterates over the AD structures packed into a concatenated advertising
/// payload by [`pack`].
///
/// Each call to `next` decodes one more [`AdStructure`]; a malformed trailing
/// record yields one `Err` and then ends iteration, rather than panicking or
/// looping.
pub struct Unpacker<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(buf),
            failed: false,
        }
    }
}

impl<'a> Iterator for Unpacker<'a> {
    type Item = Result<AdStructure<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        match AdStructure::from_bytes(&mut self.reader) {
            Ok(ad) => Some(Ok(ad)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes every AD structure packed into `buf` by [`pack`].
pub fn unpack(buf: &[u8]) -> Result<Vec<AdStructure<'_>>, Error> {
    Unpacker::new(buf).collect()
}

bitflags! {
    /// BR/EDR and LE compatibility flags.
    ///
    /// Mandatory for most devices; can only be omitted if all flags are 0.
    #[derive(Default)]
    pub struct Flags: u8 {
        const LE_LIMITED_DISCOVERABLE = 0b0000_0001;
        const LE_GENERAL_DISCOVERABLE = 0b0000_0010;
        const BR_EDR_NOT_SUPPORTED    = 0b0000_0100;
        const SIMUL_LE_BR_CONTROLLER  = 0b0000_1000;
        const SIMUL_LE_BR_HOST        = 0b0001_0000;
    }
}

impl Flags {
    /// Discoverable, LE-only (not BR/EDR capable).
    pub fn discoverable() -> Flags {
        Self::BR_EDR_NOT_SUPPORTED | Self::LE_GENERAL_DISCOVERABLE
    }

    /// Non-connectable broadcast-only, LE-only.
    pub fn broadcast() -> Flags {
        Self::BR_EDR_NOT_SUPPORTED
    }

    pub fn to_u8(self) -> u8 {
        self.bits()
    }

    pub fn supports_classic_bluetooth(&self) -> bool {
        !self.contains(Self::BR_EDR_NOT_SUPPORTED)
    }

    pub fn le_limited_discoverable(&self) -> bool {
        self.contains(Self::LE_LIMITED_DISCOVERABLE)
    }

    pub fn le_general_discoverable(&self) -> bool {
        self.contains(Self::LE_GENERAL_DISCOVERABLE)
    }
}

impl<'a> From<Flags> for AdStructure<'a> {
    fn from(flags: Flags) -> Self {
        AdStructure::Flags(flags)
    }
}

/// GAP AD structure type byte constants (Bluetooth SIG Assigned Numbers, GAP section).
#[allow(unused)]
enum Type {}

#[allow(unused)]
impl Type {
    const FLAGS: u8 = 0x01;
    const INCOMPLETE_LIST_OF_16BIT_SERVICE_UUIDS: u8 = 0x02;
    const COMPLETE_LIST_OF_16BIT_SERVICE_UUIDS: u8 = 0x03;
    const INCOMPLETE_LIST_OF_32BIT_SERVICE_UUIDS: u8 = 0x04;
    const COMPLETE_LIST_OF_32BIT_SERVICE_UUIDS: u8 = 0x05;
    const INCOMPLETE_LIST_OF_128BIT_SERVICE_UUIDS: u8 = 0x06;
    const COMPLETE_LIST_OF_128BIT_SERVICE_UUIDS: u8 = 0x07;
    const SHORTENED_LOCAL_NAME: u8 = 0x08;
    const COMPLETE_LOCAL_NAME: u8 = 0x09;
    const TX_POWER_LEVEL: u8 = 0x0A;
    const SLAVE_CONNECTION_INTERVAL_RANGE: u8 = 0x12;
    const SERVICE_DATA_16BIT_UUID: u8 = 0x16;
    const APPEARANCE: u8 = 0x19;
    const MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ad: AdStructure<'_>) -> AdStructure<'static> {
        let mut buf = [0u8; 64];
        let mut writer = ByteWriter::new(&mut buf);
        ad.to_bytes(&mut writer).unwrap();
        let used = 64 - writer.space_left();
        // Leak so the decoded borrow outlives this function; fine in a unit test.
        let leaked: &'static [u8] = Box::leak(buf[..used].to_vec().into_boxed_slice());
        let mut reader = ByteReader::new(leaked);
        AdStructure::from_bytes(&mut reader).unwrap()
    }

    #[test]
    fn flags_round_trip() {
        let decoded = round_trip(AdStructure::Flags(Flags::discoverable()));
        assert!(matches!(decoded, AdStructure::Flags(f) if f == Flags::discoverable()));
    }

    #[test]
    fn complete_local_name_round_trip() {
        let decoded = round_trip(AdStructure::CompleteLocalName("bleatt-gatt"));
        assert!(matches!(decoded, AdStructure::CompleteLocalName("bleatt-gatt")));
    }

    #[test]
    fn tx_power_level_round_trip() {
        let decoded = round_trip(AdStructure::TxPowerLevel(-20));
        assert!(matches!(decoded, AdStructure::TxPowerLevel(-20)));
    }

    #[test]
    fn appearance_round_trip() {
        let decoded = round_trip(AdStructure::Appearance(0x0080));
        assert!(matches!(decoded, AdStructure::Appearance(0x0080)));
    }

    #[test]
    fn slave_connection_interval_range_round_trip() {
        let decoded = round_trip(AdStructure::SlaveConnectionIntervalRange {
            range_min: 0x0006,
            range_max: 0x0C80,
        });
        assert!(matches!(
            decoded,
            AdStructure::SlaveConnectionIntervalRange {
                range_min: 0x0006,
                range_max: 0x0C80,
            }
        ));
    }

    #[test]
    fn zero_length_record_is_rejected() {
        let mut reader = ByteReader::new(&[0x00]);
        assert!(AdStructure::from_bytes(&mut reader).is_err());
    }

    #[test]
    fn pack_and_unpack_concatenated_payload() {
        let structures = [
            AdStructure::Flags(Flags::discoverable()),
            AdStructure::CompleteLocalName("beacon"),
        ];
        let mut buf = [0u8; 31];
        let len = pack(&structures, &mut buf).unwrap();
        let decoded = unpack(&buf[..len]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], AdStructure::Flags(f) if f == Flags::discoverable()));
        assert!(matches!(decoded[1], AdStructure::CompleteLocalName("beacon")));
    }

    #[test]
    fn pack_rejects_overlong_payload() {
        let long_name = "x".repeat(40);
        let structures = [AdStructure::CompleteLocalName(&long_name)];
        let mut buf = [0u8; 31];
        assert!(pack(&structures, &mut buf).is_err());
    }
}
