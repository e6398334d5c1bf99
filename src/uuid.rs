//! Bluetooth UUIDs (16, 32 or 128 bits).
//!
//! Bluetooth assigns UUIDs to identify services, characteristics and descriptors. In
//! order to save space, many common UUIDs can be represented and transmitted as 16-
//! or 32-bit aliases instead of the full 128 bits.
//!
//! The shorter UUIDs can be converted to their full 128-bit counterparts by making use
//! of the Bluetooth Base UUID, which is defined as `00000000-0000-1000-8000-00805F9B34FB`.
//!
//! A 16-bit UUID alias is converted to its 32-bit equivalent by zero-extending it:
//! `0xABCD` becomes `0x0000ABCD`. A 32-bit UUID alias is then converted to its full
//! 128-bit equivalent by placing it in the first 4 bytes of the Base UUID. Hence
//! `0x1234ABCD` becomes `1234ABCD-0000-1000-8000-00805F9B34FB`.

use crate::{bytes::*, Error};
use std::fmt;

const BASE_UUID: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, /*-*/ 0x00, 0x00, /*-*/ 0x10, 00, /*-*/ 0x80, 0x00,
    /*-*/ 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

/// A 16-bit UUID alias.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid16(pub u16);

/// A 32-bit UUID alias.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid32(pub u32);

/// A full 128-bit UUID.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Uuid128([u8; 16]);

impl Uuid128 {
    /// Creates a 128-bit UUID from 16 raw bytes (encoded in big-endian).
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parses a UUID string literal, panicking when the string is malformed.
    ///
    /// This is meant to be used in constant contexts.
    pub const fn parse_static(s: &'static str) -> Self {
        const fn parse_nibble(nibble: u8) -> u8 {
            let hex_digit_out_of_range = 1;
            match nibble {
                b'0'..=b'9' => nibble - b'0',
                b'a'..=b'f' => nibble - b'a' + 10,
                _ => [0][hex_digit_out_of_range],
            }
        }

        let expected_dash = 1;
        let unexpected_trailing_data = 1;

        // full UUID: 0000fd6f-0000-1000-8000-00805f9b34fb (36 chars/bytes)
        // dashes at offsets 8, 13, 18, 23
        let mut index = 0;
        let mut bytes = [0; 16];

        macro_rules! eat_byte {
            ($s:ident[$i:ident..]) => {{
                let hi = parse_nibble($s.as_bytes()[$i]);
                $i += 1;
                let lo = parse_nibble($s.as_bytes()[$i]);
                $i += 1;
                (hi << 4) | lo
            }};
        }

        macro_rules! eat_dash {
            ($s:ident[$i:ident..]) => {{
                match $s.as_bytes()[$i] {
                    b'-' => {}
                    _ => [()][expected_dash],
                }
                $i += 1;
            }};
        }

        bytes[0] = eat_byte!(s[index..]);
        bytes[1] = eat_byte!(s[index..]);
        bytes[2] = eat_byte!(s[index..]);
        bytes[3] = eat_byte!(s[index..]);
        eat_dash!(s[index..]);
        bytes[4] = eat_byte!(s[index..]);
        bytes[5] = eat_byte!(s[index..]);
        eat_dash!(s[index..]);
        bytes[6] = eat_byte!(s[index..]);
        bytes[7] = eat_byte!(s[index..]);
        eat_dash!(s[index..]);
        bytes[8] = eat_byte!(s[index..]);
        bytes[9] = eat_byte!(s[index..]);
        eat_dash!(s[index..]);
        bytes[10] = eat_byte!(s[index..]);
        bytes[11] = eat_byte!(s[index..]);
        bytes[12] = eat_byte!(s[index..]);
        bytes[13] = eat_byte!(s[index..]);
        bytes[14] = eat_byte!(s[index..]);
        bytes[15] = eat_byte!(s[index..]);

        // String must end here.
        if s.len() > index {
            [()][unexpected_trailing_data];
        }

        Uuid128(bytes)
    }

    /// Returns the raw 16 bytes of this UUID, in big-endian order.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl From<Uuid16> for Uuid32 {
    fn from(smol: Uuid16) -> Self {
        Uuid32(smol.0.into())
    }
}

impl From<Uuid16> for Uuid128 {
    fn from(uuid: Uuid16) -> Self {
        Uuid32::from(uuid).into()
    }
}

impl From<Uuid32> for Uuid128 {
    fn from(uuid: Uuid32) -> Self {
        let mut buf = BASE_UUID;
        buf[..4].copy_from_slice(&uuid.0.to_be_bytes());
        Uuid128(buf)
    }
}

impl ToBytes for Uuid16 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_slice(&self.0.to_le_bytes())
    }
}

impl ToBytes for Uuid32 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_slice(&self.0.to_le_bytes())
    }
}

impl ToBytes for Uuid128 {
    fn to_bytes(&self, buffer: &mut ByteWriter<'_>) -> Result<(), Error> {
        buffer.write_slice(&self.0)
    }
}

impl FromBytes<'_> for Uuid16 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        let array = bytes.read_array()?;
        Ok(Uuid16(u16::from_le_bytes(array)))
    }
}

impl FromBytes<'_> for Uuid32 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        let array = bytes.read_array()?;
        Ok(Uuid32(u32::from_le_bytes(array)))
    }
}

impl FromBytes<'_> for Uuid128 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        let array = bytes.read_array()?;
        Ok(Uuid128(array))
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({:04x})", self.0)
    }
}

impl fmt::Debug for Uuid32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid32({:08x})", self.0)
    }
}

impl fmt::Debug for Uuid128 {
    #[allow(clippy::many_single_char_names, clippy::just_underscores_and_digits)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [_0, _1, _2, _3, _4, _5, _6, _7, _8, _9, _10, _11, _12, _13, _14, _15] = self.0;
        let a = u32::from_be_bytes([_0, _1, _2, _3]);
        let b = u16::from_be_bytes([_4, _5]);
        let c = u16::from_be_bytes([_6, _7]);
        let d = u16::from_be_bytes([_8, _9]);
        let e = u64::from_be_bytes([0, 0, _10, _11, _12, _13, _14, _15]);
        write!(f, "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}", a, b, c, d, e)
    }
}

/// A Bluetooth UUID of any supported width.
///
/// This is the data-model-level UUID type: it can hold a 16-, 32- or
/// 128-bit alias. The Attribute Protocol wire format, however, only ever transmits
/// 16- or 128-bit UUIDs (a 32-bit UUID is always widened to 128 bits before being put
/// on the wire) — see [`crate::att::pdus::AttUuid`] for that narrower wire type.
#[derive(Debug, Copy, Clone)]
pub enum BluetoothUuid {
    Uuid16(Uuid16),
    Uuid32(Uuid32),
    Uuid128(Uuid128),
}

impl BluetoothUuid {
    /// Widens `self` to its full 128-bit representation.
    pub fn as_uuid128(self) -> Uuid128 {
        match self {
            BluetoothUuid::Uuid16(u) => u.into(),
            BluetoothUuid::Uuid32(u) => u.into(),
            BluetoothUuid::Uuid128(u) => u,
        }
    }
}

impl PartialEq for BluetoothUuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_uuid128() == other.as_uuid128()
    }
}

impl Eq for BluetoothUuid {}

impl From<Uuid16> for BluetoothUuid {
    fn from(u: Uuid16) -> Self {
        BluetoothUuid::Uuid16(u)
    }
}

impl From<Uuid32> for BluetoothUuid {
    fn from(u: Uuid32) -> Self {
        BluetoothUuid::Uuid32(u)
    }
}

impl From<Uuid128> for BluetoothUuid {
    fn from(u: Uuid128) -> Self {
        BluetoothUuid::Uuid128(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fmt() {
        // Check that all leading 0s are printed.
        let uuid = Uuid128::from_bytes([
            0x02, 0x3e, 0x45, 0x67, 0x08, 0x9b, 0x02, 0xd3, 0x04, 0x56, 0x00, 0x66, 0x14, 0x17,
            0x40, 0x00,
        ]);

        assert_eq!(
            format!("{:?}", uuid),
            "023e4567-089b-02d3-0456-006614174000"
        );
    }

    #[test]
    fn convert() {
        let uuid = 0xfd6f; // Apple Inc. / Exposure Notification Service
        let uuid = Uuid128::from(Uuid16(uuid));

        assert_eq!(
            format!("{:?}", uuid),
            "0000fd6f-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn parse() {
        let uuid = "0000fd6f-0000-1000-8000-00805f9b34fb";
        assert_eq!(format!("{:?}", Uuid128::parse_static(uuid)), uuid);
    }

    #[test]
    fn widening_equality() {
        let a = BluetoothUuid::Uuid16(Uuid16(0x1800));
        let b = BluetoothUuid::Uuid128(Uuid128::from(Uuid16(0x1800)));
        assert_eq!(a, b);
    }

    proptest! {
        /// A 16-bit alias is zero-extended to 32 bits before widening, so its two bytes
        /// land at the bottom of the first 4-byte field (indices 2..4), not the top.
        #[test]
        fn uuid16_widens_into_base_uuid(raw in any::<u16>()) {
            let widened = Uuid128::from(Uuid16(raw)).to_bytes();
            let mut expected = BASE_UUID;
            expected[2..4].copy_from_slice(&raw.to_be_bytes());
            prop_assert_eq!(widened, expected);
        }

        /// A 32-bit alias widens the same way, across all 4 bytes of the first field.
        #[test]
        fn uuid32_widens_into_base_uuid(raw in any::<u32>()) {
            let widened = Uuid128::from(Uuid32(raw)).to_bytes();
            let mut expected = BASE_UUID;
            expected[..4].copy_from_slice(&raw.to_be_bytes());
            prop_assert_eq!(widened, expected);
        }
    }
}
