//! The in-memory GATT attribute database.
//!
//! Attributes are stored as a flat, handle-ordered sequence, generalized to grow at
//! runtime via [`GattDatabase::add`]. Attributes are not linked to their enclosing
//! service; enclosure is answered by linear scan over neighboring handles instead.

use crate::{
    att::{handle::Handle, permissions::AttPermissions},
    gatt::characteristic::Properties,
    uuid::{BluetoothUuid, Uuid16},
    Error,
};

/// GATT declaration/descriptor UUIDs used to flatten services into attributes.
pub mod declarations {
    use crate::uuid::Uuid16;

    pub const PRIMARY_SERVICE: Uuid16 = Uuid16(0x2800);
    pub const SECONDARY_SERVICE: Uuid16 = Uuid16(0x2801);
    pub const INCLUDE: Uuid16 = Uuid16(0x2802);
    pub const CHARACTERISTIC: Uuid16 = Uuid16(0x2803);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid16 = Uuid16(0x2901);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = Uuid16(0x2902);
}

/// A single attribute stored in the database.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: Handle,
    pub uuid: BluetoothUuid,
    pub value: Vec<u8>,
    pub permissions: AttPermissions,
}

/// A contiguous, non-overlapping range of handles rooted at a service declaration
///.
#[derive(Debug, Copy, Clone)]
pub struct AttributeGroup {
    pub start_handle: Handle,
    pub end_handle: Handle,
}

/// Definition of a descriptor to be added to a characteristic.
pub struct DescriptorDef {
    pub uuid: BluetoothUuid,
    pub value: Vec<u8>,
    pub permissions: AttPermissions,
}

impl DescriptorDef {
    pub fn new(uuid: impl Into<BluetoothUuid>, value: Vec<u8>, permissions: AttPermissions) -> Self {
        Self {
            uuid: uuid.into(),
            value,
            permissions,
        }
    }
}

/// Definition of a characteristic to be added to a service.
pub struct CharacteristicDef {
    pub uuid: BluetoothUuid,
    pub value: Vec<u8>,
    pub permissions: AttPermissions,
    pub properties: Properties,
    pub descriptors: Vec<DescriptorDef>,
}

impl CharacteristicDef {
    pub fn new(
        uuid: impl Into<BluetoothUuid>,
        value: Vec<u8>,
        permissions: AttPermissions,
        properties: Properties,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            value,
            permissions,
            properties,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: DescriptorDef) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Adds a Client Characteristic Configuration descriptor, initialized to
    /// all-zero (no subscription).
    pub fn with_cccd(self) -> Self {
        self.with_descriptor(DescriptorDef::new(
            declarations::CLIENT_CHARACTERISTIC_CONFIGURATION,
            vec![0x00, 0x00],
            AttPermissions::READABLE_WRITABLE,
        ))
    }
}

/// Definition of a service to be added to the database.
pub struct ServiceDef {
    pub uuid: BluetoothUuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDef>,
}

impl ServiceDef {
    pub fn primary(uuid: impl Into<BluetoothUuid>) -> Self {
        Self {
            uuid: uuid.into(),
            primary: true,
            characteristics: Vec::new(),
        }
    }

    pub fn secondary(uuid: impl Into<BluetoothUuid>) -> Self {
        Self {
            uuid: uuid.into(),
            primary: false,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: CharacteristicDef) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

fn uuid_decl_value(uuid: BluetoothUuid) -> Vec<u8> {
    match uuid {
        BluetoothUuid::Uuid16(u) => u.0.to_le_bytes().to_vec(),
        BluetoothUuid::Uuid32(_) | BluetoothUuid::Uuid128(_) => {
            uuid.as_uuid128().to_bytes().to_vec()
        }
    }
}

/// The in-memory GATT database.
#[derive(Default)]
pub struct GattDatabase {
    attributes: Vec<Attribute>,
    groups: Vec<AttributeGroup>,
}

impl GattDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self) -> Handle {
        self.attributes
            .last()
            .and_then(|a| a.handle.next())
            .unwrap_or(Handle::FIRST)
    }

    /// Flattens `service` into attributes and appends them to the database,
    /// returning the resulting group's `(startHandle, endHandle)`.
    pub fn add(&mut self, service: ServiceDef) -> (Handle, Handle) {
        let start_handle = self.next_handle();
        let decl_uuid = if service.primary {
            declarations::PRIMARY_SERVICE
        } else {
            declarations::SECONDARY_SERVICE
        };

        self.attributes.push(Attribute {
            handle: start_handle,
            uuid: decl_uuid.into(),
            value: uuid_decl_value(service.uuid),
            permissions: AttPermissions::READABLE,
        });

        for characteristic in service.characteristics {
            let decl_handle = self.next_handle();
            let value_handle = decl_handle.next().expect("handle space exhausted");

            let mut decl_value = Vec::with_capacity(3 + 16);
            decl_value.push(characteristic.properties.bits());
            decl_value.extend_from_slice(&value_handle.as_u16().to_le_bytes());
            decl_value.extend_from_slice(&uuid_decl_value(characteristic.uuid));

            self.attributes.push(Attribute {
                handle: decl_handle,
                uuid: declarations::CHARACTERISTIC.into(),
                value: decl_value,
                permissions: AttPermissions::READABLE,
            });

            self.attributes.push(Attribute {
                handle: value_handle,
                uuid: characteristic.uuid,
                value: characteristic.value,
                permissions: characteristic.permissions,
            });

            for descriptor in characteristic.descriptors {
                let descriptor_handle = self.next_handle();
                self.attributes.push(Attribute {
                    handle: descriptor_handle,
                    uuid: descriptor.uuid,
                    value: descriptor.value,
                    permissions: descriptor.permissions,
                });
            }
        }

        let end_handle = self
            .attributes
            .last()
            .map(|a| a.handle)
            .unwrap_or(start_handle);
        self.groups.push(AttributeGroup {
            start_handle,
            end_handle,
        });

        (start_handle, end_handle)
    }

    /// Removes the service (and all its attributes) whose group starts at
    /// `start_handle`.
    pub fn remove(&mut self, start_handle: Handle) {
        if let Some(pos) = self.groups.iter().position(|g| g.start_handle == start_handle) {
            let group = self.groups.remove(pos);
            self.attributes
                .retain(|a| !(a.handle >= group.start_handle && a.handle <= group.end_handle));
        }
    }

    /// Overwrites an attribute's value. No length validation is performed.
    pub fn write(&mut self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        match self.attributes.iter_mut().find(|a| a.handle == handle) {
            Some(attr) => {
                attr.value = value;
                Ok(())
            }
            None => Err(Error::InvalidValue),
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.attributes.iter().any(|a| a.handle == handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.handle == handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.handle == handle)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Read By Group Type: groups whose service UUID equals `uuid` and whose range
    /// is wholly contained in `[start, end]`.
    pub fn read_by_group_type(
        &self,
        start: Handle,
        end: Handle,
        uuid: BluetoothUuid,
    ) -> Vec<(Handle, Handle, &[u8])> {
        self.groups
            .iter()
            .filter(|g| g.start_handle >= start && g.end_handle <= end)
            .filter_map(|g| {
                let decl = self.get(g.start_handle)?;
                if decl.uuid == uuid {
                    Some((g.start_handle, g.end_handle, decl.value.as_slice()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Read By Type: every attribute in `[start, end]` whose UUID equals `uuid`.
    pub fn read_by_type(&self, start: Handle, end: Handle, uuid: BluetoothUuid) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.handle >= start && a.handle <= end && a.uuid == uuid)
            .collect()
    }

    /// Find Information: every attribute in `[start, end]`.
    pub fn find_information(&self, start: Handle, end: Handle) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.handle >= start && a.handle <= end)
            .collect()
    }

    /// Find By Type Value: attributes in `[start, end]` with a 16-bit `uuid` whose
    /// value equals `value`, paired with the end handle of their enclosing group.
    pub fn find_by_type_value(
        &self,
        start: Handle,
        end: Handle,
        uuid: Uuid16,
        value: &[u8],
    ) -> Vec<(Handle, Handle)> {
        self.attributes
            .iter()
            .filter(|a| {
                a.handle >= start
                    && a.handle <= end
                    && a.uuid == BluetoothUuid::Uuid16(uuid)
                    && a.value == value
            })
            .map(|a| {
                let group_end = self.attribute_group(a.handle).map(|g| g.end_handle).unwrap_or(a.handle);
                (a.handle, group_end)
            })
            .collect()
    }

    /// Returns the group enclosing `handle`, found via linear scan: attributes do not
    /// point back to their enclosing group.
    pub fn attribute_group(&self, handle: Handle) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| handle >= g.start_handle && handle <= g.end_handle)
    }

    /// Returns the characteristic declaration attribute (UUID `0x2803`) that
    /// precedes the characteristic containing `handle`, if any.
    pub fn enclosing_characteristic_declaration(&self, handle: Handle) -> Option<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.handle <= handle && a.uuid == BluetoothUuid::Uuid16(declarations::CHARACTERISTIC))
            .last()
    }

    /// Returns the handle of the first non-declaration attribute whose UUID equals `uuid`,
    /// backing a `writeValue(data, uuid)`-style lookup.
    pub fn find_handle_by_uuid(&self, uuid: BluetoothUuid) -> Option<Handle> {
        const DECLARATION_UUIDS: [Uuid16; 3] = [
            declarations::PRIMARY_SERVICE,
            declarations::SECONDARY_SERVICE,
            declarations::CHARACTERISTIC,
        ];
        self.attributes
            .iter()
            .find(|a| {
                a.uuid == uuid && !DECLARATION_UUIDS.iter().any(|d| a.uuid == BluetoothUuid::Uuid16(*d))
            })
            .map(|a| a.handle)
    }

    /// Returns the Client Characteristic Configuration descriptor's current value
    /// for the characteristic containing `handle`, if one exists.
    pub fn cccd_for(&self, handle: Handle) -> Option<&[u8]> {
        let decl = self.enclosing_characteristic_declaration(handle)?;
        let value_handle = Handle::from_raw(u16::from_le_bytes([decl.value[1], decl.value[2]]));
        let group = self.attribute_group(decl.handle)?;
        self.attributes
            .iter()
            .filter(|a| a.handle > value_handle && a.handle <= group.end_handle)
            .find(|a| a.uuid == BluetoothUuid::Uuid16(declarations::CLIENT_CHARACTERISTIC_CONFIGURATION))
            .map(|a| a.value.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::Uuid16;
    use proptest::prelude::*;

    fn sample() -> GattDatabase {
        let mut db = GattDatabase::new();
        db.add(
            ServiceDef::primary(Uuid16(0xFFF0)).with_characteristic(
                CharacteristicDef::new(
                    Uuid16(0xFFF1),
                    vec![0xAA],
                    AttPermissions::READABLE_WRITABLE,
                    Properties::READ | Properties::WRITE | Properties::NOTIFY,
                )
                .with_cccd(),
            ),
        );
        db
    }

    #[test]
    fn add_assigns_ascending_contiguous_handles() {
        let db = sample();
        let handles: Vec<u16> = db.attributes.iter().map(|a| a.handle.as_u16()).collect();
        assert_eq!(handles, vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_by_group_type_finds_primary_service() {
        let db = sample();
        let results = db.read_by_group_type(
            Handle::from_raw(1),
            Handle::from_raw(0xFFFF),
            declarations::PRIMARY_SERVICE.into(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, Handle::from_raw(1));
        assert_eq!(results[0].1, Handle::from_raw(4));
    }

    #[test]
    fn attribute_group_lookup_via_linear_scan() {
        let db = sample();
        let group = db.attribute_group(Handle::from_raw(3)).unwrap();
        assert_eq!(group.start_handle, Handle::from_raw(1));
        assert_eq!(group.end_handle, Handle::from_raw(4));
    }

    #[test]
    fn cccd_starts_all_zero() {
        let db = sample();
        assert_eq!(db.cccd_for(Handle::from_raw(3)), Some(&[0x00, 0x00][..]));
    }

    proptest! {
        /// Every service added to the database is assigned a handle range strictly
        /// after the previous one, with no gaps.
        #[test]
        fn handles_are_strictly_ascending_and_contiguous(characteristic_counts in
            prop::collection::vec(0usize..4, 1..8))
        {
            let mut db = GattDatabase::new();
            let mut previous_end = 0u16;
            for (i, count) in characteristic_counts.iter().enumerate() {
                let mut service = ServiceDef::primary(Uuid16(0xFFF0 + i as u16));
                for j in 0..*count {
                    service = service.with_characteristic(CharacteristicDef::new(
                        Uuid16(0xA000 + j as u16),
                        vec![0x00],
                        AttPermissions::READABLE,
                        Properties::READ,
                    ));
                }
                let (start, end) = db.add(service);
                prop_assert!(start.as_u16() > previous_end);
                prop_assert!(end.as_u16() >= start.as_u16());
                previous_end = end.as_u16();
            }

            let handles: Vec<u16> = db.attributes.iter().map(|a| a.handle.as_u16()).collect();
            for pair in handles.windows(2) {
                prop_assert_eq!(pair[1], pair[0] + 1);
            }
        }
    }
}
