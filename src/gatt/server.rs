//! The GATT server: orchestrates the attribute database and the ATT connection, answering
//! requests against a growable [`GattDatabase`] over a [`Socket`]-backed [`AttConnection`].

use std::collections::VecDeque;

use crate::{
    att::{
        connection::{AttConnection, RequestHandler, Responder},
        handle::Handle,
        pdus::{AttError, AttPdu, AttUuid, ErrorCode},
        permissions::AttPermissions,
    },
    gatt::db::{declarations, Attribute, GattDatabase, ServiceDef},
    socket::{SecurityLevel, Socket, SocketError},
    uuid::BluetoothUuid,
    utils::HexSlice,
};

const CCCD_NOTIFY: u16 = 0x0001;
const CCCD_INDICATE: u16 = 0x0002;

fn att_uuid_to_bluetooth_uuid(uuid: AttUuid) -> BluetoothUuid {
    match uuid {
        AttUuid::Uuid16(u) => BluetoothUuid::Uuid16(u),
        AttUuid::Uuid128(u) => BluetoothUuid::Uuid128(u),
    }
}

#[derive(Copy, Clone)]
enum Access {
    Read,
    Write,
}

fn check_access(
    attr: &Attribute,
    access: Access,
    security_level: SecurityLevel,
    handle: Handle,
) -> Result<(), AttError> {
    let (allowed, required) = match access {
        Access::Read => (attr.permissions.can_read(), attr.permissions.required_read_security()),
        Access::Write => (attr.permissions.can_write(), attr.permissions.required_write_security()),
    };

    if !allowed {
        let code = match access {
            Access::Read => ErrorCode::ReadNotPermitted,
            Access::Write => ErrorCode::WriteNotPermitted,
        };
        return Err(AttError::new(code, handle));
    }

    if let Some(required) = required {
        if security_level < required {
            let code = if required == SecurityLevel::High {
                ErrorCode::InsufficientAuthentication
            } else {
                ErrorCode::InsufficientEncryption
            };
            return Err(AttError::new(code, handle));
        }
    }

    Ok(())
}

/// Packs Read By Type results: a run of same-value-length entries, each `(handle, value)`,
/// truncated and bounded to fit `mtu`. Returns the per-entry length and the
/// concatenated entry bytes.
fn pack_by_type(mtu: u16, matches: &[(Handle, &[u8])]) -> Option<(u8, Vec<u8>)> {
    const HEADER: usize = 4; // opcode + length + handle
    const HARD_CAP: usize = 253;
    let mtu = mtu as usize;
    let (_, first_value) = matches.first()?;
    let value_len = first_value.len().min(mtu.saturating_sub(HEADER)).min(HARD_CAP);
    let entry_len = 2 + value_len;

    let mut out = Vec::new();
    let mut used = 2; // opcode + length, accounted by the caller's PDU framing
    for (handle, value) in matches {
        if value.len() != first_value.len() {
            break;
        }
        if used + entry_len > mtu {
            break;
        }
        out.extend_from_slice(&handle.as_u16().to_le_bytes());
        out.extend_from_slice(&value[..value_len]);
        used += entry_len;
    }
    Some((entry_len as u8, out))
}

/// Packs Read By Group Type results: `(start, end, value)` triples. Returns the
/// per-entry length and the concatenated entry bytes.
fn pack_by_group_type(mtu: u16, matches: &[(Handle, Handle, &[u8])]) -> Option<(u8, Vec<u8>)> {
    const HEADER: usize = 6; // opcode + length + handle + group_end
    const HARD_CAP: usize = 251;
    let mtu = mtu as usize;
    let (_, _, first_value) = matches.first()?;
    let value_len = first_value.len().min(mtu.saturating_sub(HEADER)).min(HARD_CAP);
    let entry_len = 4 + value_len;

    let mut out = Vec::new();
    let mut used = 2;
    for (start, end, value) in matches {
        if value.len() != first_value.len() {
            break;
        }
        if used + entry_len > mtu {
            break;
        }
        out.extend_from_slice(&start.as_u16().to_le_bytes());
        out.extend_from_slice(&end.as_u16().to_le_bytes());
        out.extend_from_slice(&value[..value_len]);
        used += entry_len;
    }
    Some((entry_len as u8, out))
}

/// Packs Find Information results, stopping at the first UUID-width change.
fn pack_find_information(mtu: u16, attrs: &[&Attribute]) -> Option<(u8, Vec<u8>)> {
    let mtu = mtu as usize;
    let first = attrs.first()?;
    let first_is_128 = !matches!(first.uuid, BluetoothUuid::Uuid16(_));
    let (format, entry_len) = if first_is_128 { (2u8, 2 + 16) } else { (1u8, 2 + 2) };

    let mut out = Vec::new();
    let mut used = 2; // opcode + format
    for attr in attrs {
        let is_128 = !matches!(attr.uuid, BluetoothUuid::Uuid16(_));
        if is_128 != first_is_128 {
            break;
        }
        if used + entry_len > mtu {
            break;
        }
        out.extend_from_slice(&attr.handle.as_u16().to_le_bytes());
        match attr.uuid {
            BluetoothUuid::Uuid16(u) => out.extend_from_slice(&u.0.to_le_bytes()),
            BluetoothUuid::Uuid32(_) | BluetoothUuid::Uuid128(_) => {
                out.extend_from_slice(&attr.uuid.as_uuid128().to_bytes())
            }
        }
        used += entry_len;
    }
    Some((format, out))
}

/// One queued, not-yet-applied prepared write.
struct PreparedWrite {
    handle: Handle,
    value: Vec<u8>,
}

/// Application-supplied callback slots.
#[derive(Default)]
struct Callbacks {
    log: Option<Box<dyn FnMut(&str)>>,
    will_read: Option<Box<dyn FnMut(BluetoothUuid, Handle, &[u8], u16) -> Result<(), ErrorCode>>>,
    will_write: Option<Box<dyn FnMut(BluetoothUuid, Handle, &[u8], &[u8]) -> Result<(), ErrorCode>>>,
    did_write: Option<Box<dyn FnMut(Handle, &[u8])>>,
}

/// The state that backs request handling: the database, the prepared-write queue, and the
/// application callbacks. Split out from [`GattServer`] so the server's `read`/`write` pumps can
/// borrow this and the [`AttConnection`] as disjoint fields at the same time.
struct GattServerInner {
    database: GattDatabase,
    maximum_prepared_writes: usize,
    prepared_writes: Vec<PreparedWrite>,
    callbacks: Callbacks,
    /// Value changes committed during the current `handle_request` call, to be routed to
    /// subscribed clients once the borrow on `self` ends.
    pending_value_changes: Vec<(Handle, Vec<u8>)>,
}

impl GattServerInner {
    fn log(&mut self, message: impl AsRef<str>) {
        if let Some(cb) = &mut self.callbacks.log {
            cb(message.as_ref());
        }
    }

    fn apply_write(&mut self, handle: Handle, value: &[u8]) -> Result<(), ErrorCode> {
        let attr = self.database.get(handle).expect("handle existence already checked");
        let uuid = attr.uuid;
        let old_value = attr.value.clone();
        if let Some(cb) = &mut self.callbacks.will_write {
            cb(uuid, handle, &old_value, value)?;
        }
        self.database
            .write(handle, value.to_vec())
            .map_err(|_| ErrorCode::InvalidHandle)?;
        if let Some(cb) = &mut self.callbacks.did_write {
            cb(handle, value);
        }
        self.pending_value_changes.push((handle, value.to_vec()));
        Ok(())
    }

    fn read_value(&mut self, handle: Handle, offset: u16) -> Result<Vec<u8>, ErrorCode> {
        let attr = self.database.get(handle).expect("handle existence already checked");
        let uuid = attr.uuid;
        let value = attr.value.clone();
        if let Some(cb) = &mut self.callbacks.will_read {
            cb(uuid, handle, &value, offset)?;
        }
        Ok(value)
    }
}

impl RequestHandler for GattServerInner {
    fn handle_request(
        &mut self,
        pdu: &AttPdu<'_>,
        responder: &mut Responder<'_>,
    ) -> Result<(), AttError> {
        let mtu = responder.mtu();
        let security_level = responder.security_level();

        match *pdu {
            AttPdu::ReadReq { handle } => {
                let attr = self
                    .database
                    .get(handle)
                    .ok_or_else(|| AttError::new(ErrorCode::InvalidHandle, handle))?;
                check_access(attr, Access::Read, security_level, handle)?;
                let value = self
                    .read_value(handle, 0)
                    .map_err(|code| AttError::new(code, handle))?;
                responder
                    .send(AttPdu::ReadRsp {
                        value: HexSlice(&value),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))
            }

            AttPdu::ReadBlobReq { handle, offset: raw_offset } => {
                let attr = self
                    .database
                    .get(handle)
                    .ok_or_else(|| AttError::new(ErrorCode::InvalidHandle, handle))?;
                check_access(attr, Access::Read, security_level, handle)?;
                let offset = raw_offset as usize;
                let full_len = attr.value.len();
                if full_len <= mtu as usize - 1 {
                    return Err(AttError::new(ErrorCode::AttributeNotLong, handle));
                }
                if offset > full_len {
                    return Err(AttError::new(ErrorCode::InvalidOffset, handle));
                }
                let value = self
                    .read_value(handle, raw_offset)
                    .map_err(|code| AttError::new(code, handle))?;
                responder
                    .send(AttPdu::ReadBlobRsp {
                        value: HexSlice(&value[offset..]),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))
            }

            AttPdu::WriteReq { handle, value } => {
                if !self.database.contains(handle) {
                    return Err(AttError::new(ErrorCode::InvalidHandle, handle));
                }
                let attr = self.database.get(handle).unwrap();
                check_access(attr, Access::Write, security_level, handle)?;
                self.apply_write(handle, value.as_ref())
                    .map_err(|code| AttError::new(code, handle))?;
                responder
                    .send(AttPdu::WriteRsp)
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))
            }

            AttPdu::WriteCommand { handle, value } | AttPdu::SignedWriteCommand { handle, value, .. } => {
                // Commands never receive a response, success or failure; silently
                // drop the write if the handle or permission check fails.
                if let Some(attr) = self.database.get(handle) {
                    if check_access(attr, Access::Write, security_level, handle).is_ok() {
                        let _ = self.apply_write(handle, value.as_ref());
                    }
                }
                Ok(())
            }

            AttPdu::ReadByTypeReq {
                handle_range,
                attribute_type,
            } => {
                let range = handle_range.check()?;
                let uuid = att_uuid_to_bluetooth_uuid(attribute_type);
                let matches: Vec<&Attribute> = self.database.read_by_type(range.start(), range.end(), uuid);
                if matches.is_empty() {
                    return Err(AttError::attribute_not_found());
                }
                for attr in &matches {
                    check_access(attr, Access::Read, security_level, attr.handle)?;
                }
                let pairs: Vec<(Handle, &[u8])> =
                    matches.iter().map(|a| (a.handle, a.value.as_slice())).collect();
                let (length, data) = pack_by_type(mtu, &pairs).expect("matches is non-empty");
                responder
                    .send(AttPdu::ReadByTypeRsp {
                        length,
                        data_list: HexSlice(&data),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, range.start()))
            }

            AttPdu::ReadByGroupReq {
                handle_range,
                group_type,
            } => {
                let range = handle_range.check()?;
                let uuid = att_uuid_to_bluetooth_uuid(group_type);
                let is_service_group = uuid == BluetoothUuid::Uuid16(declarations::PRIMARY_SERVICE)
                    || uuid == BluetoothUuid::Uuid16(declarations::SECONDARY_SERVICE);
                if !is_service_group {
                    return Err(AttError::new(ErrorCode::UnsupportedGroupType, range.start()));
                }
                let matches = self.database.read_by_group_type(range.start(), range.end(), uuid);
                if matches.is_empty() {
                    return Err(AttError::attribute_not_found());
                }
                let (length, data) = pack_by_group_type(mtu, &matches).expect("matches is non-empty");
                responder
                    .send(AttPdu::ReadByGroupRsp {
                        length,
                        data_list: HexSlice(&data),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, range.start()))
            }

            AttPdu::FindInformationReq { handle_range } => {
                let range = handle_range.check()?;
                let attrs = self.database.find_information(range.start(), range.end());
                if attrs.is_empty() {
                    return Err(AttError::attribute_not_found());
                }
                let (format, data) = pack_find_information(mtu, &attrs).expect("attrs is non-empty");
                responder
                    .send(AttPdu::FindInformationRsp {
                        format,
                        data: HexSlice(&data),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, range.start()))
            }

            AttPdu::FindByTypeValueReq {
                handle_range,
                attribute_type,
                attribute_value,
            } => {
                let range = handle_range.check()?;
                let uuid = crate::uuid::Uuid16(attribute_type);
                let matches = self.database.find_by_type_value(
                    range.start(),
                    range.end(),
                    uuid,
                    attribute_value.as_ref(),
                );
                if matches.is_empty() {
                    return Err(AttError::attribute_not_found());
                }
                let mut data = Vec::new();
                for (found, group_end) in &matches {
                    if data.len() + 4 > mtu as usize - 1 {
                        break;
                    }
                    data.extend_from_slice(&found.as_u16().to_le_bytes());
                    data.extend_from_slice(&group_end.as_u16().to_le_bytes());
                }
                responder
                    .send(AttPdu::FindByTypeValueRsp {
                        handles_information_list: HexSlice(&data),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, range.start()))
            }

            AttPdu::ReadMultipleReq { handles } => {
                let raw = handles.as_ref();
                if raw.is_empty() || raw.len() % 2 != 0 {
                    return Err(AttError::new(ErrorCode::InvalidPdu, Handle::NULL));
                }
                let mut values = Vec::new();
                for chunk in raw.chunks_exact(2) {
                    let handle = Handle::from_raw(u16::from_le_bytes([chunk[0], chunk[1]]));
                    let attr = self
                        .database
                        .get(handle)
                        .ok_or_else(|| AttError::new(ErrorCode::InvalidHandle, handle))?;
                    check_access(attr, Access::Read, security_level, handle)?;
                    let value = self
                        .read_value(handle, 0)
                        .map_err(|code| AttError::new(code, handle))?;
                    if values.len() + value.len() > mtu as usize - 1 {
                        break;
                    }
                    values.extend_from_slice(&value);
                }
                responder
                    .send(AttPdu::ReadMultipleRsp {
                        values: HexSlice(&values),
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, Handle::NULL))
            }

            AttPdu::PrepareWriteReq {
                handle,
                offset,
                value,
            } => {
                let attr = self
                    .database
                    .get(handle)
                    .ok_or_else(|| AttError::new(ErrorCode::InvalidHandle, handle))?;
                check_access(attr, Access::Write, security_level, handle)?;
                if self.prepared_writes.len() >= self.maximum_prepared_writes {
                    return Err(AttError::new(ErrorCode::PrepareQueueFull, handle));
                }
                self.prepared_writes.push(PreparedWrite {
                    handle,
                    value: value.as_ref().to_vec(),
                });
                responder
                    .send(AttPdu::PrepareWriteRsp {
                        handle,
                        offset,
                        value,
                    })
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, handle))
            }

            AttPdu::ExecuteWriteReq { flags } => {
                if flags == 0x00 {
                    self.log(format!("cancelling {} prepared write(s)", self.prepared_writes.len()));
                    self.prepared_writes.clear();
                    return responder
                        .send(AttPdu::ExecuteWriteRsp)
                        .map_err(|_| AttError::new(ErrorCode::UnlikelyError, Handle::NULL));
                }

                // Group queued writes by handle, preserving queue order within each group, then
                // concatenate and apply; fire `didWrite` in ascending handle order.
                let mut by_handle: Vec<(Handle, Vec<u8>)> = Vec::new();
                for write in self.prepared_writes.drain(..) {
                    match by_handle.iter_mut().find(|(h, _)| *h == write.handle) {
                        Some((_, buf)) => buf.extend_from_slice(&write.value),
                        None => by_handle.push((write.handle, write.value)),
                    }
                }
                by_handle.sort_by_key(|(h, _)| *h);

                for (handle, value) in &by_handle {
                    self.apply_write(*handle, value)
                        .map_err(|code| AttError::new(code, *handle))?;
                }

                responder
                    .send(AttPdu::ExecuteWriteRsp)
                    .map_err(|_| AttError::new(ErrorCode::UnlikelyError, Handle::NULL))
            }

            // Responses are never valid as incoming PDUs for a server.
            AttPdu::ErrorRsp { .. }
            | AttPdu::ExchangeMtuRsp { .. }
            | AttPdu::FindInformationRsp { .. }
            | AttPdu::FindByTypeValueRsp { .. }
            | AttPdu::ReadByTypeRsp { .. }
            | AttPdu::ReadRsp { .. }
            | AttPdu::ReadBlobRsp { .. }
            | AttPdu::ReadMultipleRsp { .. }
            | AttPdu::ReadByGroupRsp { .. }
            | AttPdu::WriteRsp { .. }
            | AttPdu::PrepareWriteRsp { .. }
            | AttPdu::ExecuteWriteRsp { .. }
            | AttPdu::HandleValueNotification { .. }
            | AttPdu::HandleValueIndication { .. } => {
                Err(AttError::new(ErrorCode::InvalidPdu, Handle::NULL))
            }

            // ExchangeMtuReq and HandleValueConfirmation are intercepted by AttConnection before
            // reaching the handler; Unknown opcodes fall through to RequestNotSupported.
            AttPdu::ExchangeMtuReq { .. } | AttPdu::HandleValueConfirmation | AttPdu::Unknown { .. } => {
                Err(AttError::new(ErrorCode::RequestNotSupported, Handle::NULL))
            }
        }
    }
}

/// A GATT server bound to a single client connection.
///
/// Construct with [`GattServer::new`], register the services that make up the database, then
/// drive it by calling [`GattServer::read`] and [`GattServer::write`] whenever the underlying
/// socket may have work. Concurrency is strictly cooperative: nothing runs except inside those
/// two calls.
pub struct GattServer<S: Socket> {
    connection: AttConnection<S>,
    inner: GattServerInner,
    pending_indications: VecDeque<(Handle, Vec<u8>)>,
}

impl<S: Socket> GattServer<S> {
    pub fn new(socket: S, preferred_mtu: u16, maximum_prepared_writes: usize) -> Self {
        Self {
            connection: AttConnection::new(socket, preferred_mtu),
            inner: GattServerInner {
                database: GattDatabase::new(),
                maximum_prepared_writes,
                prepared_writes: Vec::new(),
                callbacks: Callbacks::default(),
                pending_value_changes: Vec::new(),
            },
            pending_indications: VecDeque::new(),
        }
    }

    /// Adds a service to the database.
    pub fn add_service(&mut self, service: ServiceDef) -> (Handle, Handle) {
        self.inner.database.add(service)
    }

    pub fn database(&self) -> &GattDatabase {
        &self.inner.database
    }

    pub fn database_mut(&mut self) -> &mut GattDatabase {
        &mut self.inner.database
    }

    pub fn maximum_transmission_unit(&self) -> u16 {
        self.connection.mtu()
    }

    pub fn preferred_maximum_transmission_unit(&self) -> u16 {
        self.connection.preferred_mtu()
    }

    pub fn maximum_prepared_writes(&self) -> usize {
        self.inner.maximum_prepared_writes
    }

    pub fn set_log(&mut self, f: impl FnMut(&str) + 'static) {
        self.inner.callbacks.log = Some(Box::new(f));
    }

    /// `f(uuid, handle, value, offset)`, called before an incoming read is served.
    pub fn set_will_read(
        &mut self,
        f: impl FnMut(BluetoothUuid, Handle, &[u8], u16) -> Result<(), ErrorCode> + 'static,
    ) {
        self.inner.callbacks.will_read = Some(Box::new(f));
    }

    /// `f(uuid, handle, old_value, new_value)`, called before an incoming write is applied.
    pub fn set_will_write(
        &mut self,
        f: impl FnMut(BluetoothUuid, Handle, &[u8], &[u8]) -> Result<(), ErrorCode> + 'static,
    ) {
        self.inner.callbacks.will_write = Some(Box::new(f));
    }

    pub fn set_did_write(&mut self, f: impl FnMut(Handle, &[u8]) + 'static) {
        self.inner.callbacks.did_write = Some(Box::new(f));
    }

    /// Registers a callback fired whenever the connection's outbound send queue
    /// transitions from empty to non-empty; see [`AttConnection::set_write_pending`].
    pub fn set_write_pending(&mut self, f: impl FnMut() + 'static) {
        self.connection.set_write_pending(f);
    }

    /// Overwrites `handle`'s value and routes the change to subscribed clients.
    pub fn write_value(&mut self, handle: Handle, value: Vec<u8>) -> Result<(), crate::Error> {
        if !self.inner.database.contains(handle) {
            return Err(crate::Error::InvalidValue);
        }
        self.inner
            .database
            .write(handle, value.clone())
            .map_err(|_| crate::Error::InvalidValue)?;
        self.route_value_change(handle, &value).ok();
        Ok(())
    }

    /// Like [`GattServer::write_value`], but looks the handle up by UUID.
    pub fn write_value_by_uuid(&mut self, uuid: BluetoothUuid, value: Vec<u8>) -> Result<(), crate::Error> {
        let handle = self
            .inner
            .database
            .find_handle_by_uuid(uuid)
            .ok_or(crate::Error::InvalidValue)?;
        self.write_value(handle, value)
    }

    fn route_value_change(&mut self, handle: Handle, value: &[u8]) -> Result<(), SocketError> {
        let cccd = match self.inner.database.cccd_for(handle) {
            Some(bits) => bits.to_vec(),
            None => return Ok(()),
        };
        let bits = u16::from_le_bytes([
            cccd.first().copied().unwrap_or(0),
            cccd.get(1).copied().unwrap_or(0),
        ]);

        if bits & CCCD_NOTIFY != 0 {
            self.connection.send_notification(handle, value)?;
        }
        if bits & CCCD_INDICATE != 0 {
            if self.connection.is_awaiting_confirmation() {
                self.pending_indications.push_back((handle, value.to_vec()));
            } else {
                self.connection.send_indication(handle, value)?;
            }
        }
        Ok(())
    }

    /// Pumps one inbound PDU and routes any resulting value changes to subscribers.
    pub fn read(&mut self) -> Result<bool, SocketError> {
        let processed = self.connection.read(&mut self.inner)?;

        let changes = std::mem::take(&mut self.inner.pending_value_changes);
        for (handle, value) in changes {
            self.route_value_change(handle, &value)?;
        }

        if !self.connection.is_awaiting_confirmation() {
            if let Some((handle, value)) = self.pending_indications.pop_front() {
                self.connection.send_indication(handle, &value)?;
            }
        }

        Ok(processed)
    }

    /// Flushes buffered outbound state; see [`AttConnection::write`].
    pub fn write(&mut self) -> bool {
        self.connection.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        att::permissions::AttPermissions,
        bytes::{ByteReader, FromBytes},
        gatt::{characteristic::Properties, db::CharacteristicDef},
        socket::SecurityLevel,
        uuid::Uuid16,
    };
    use proptest::prelude::*;
    use std::{cell::RefCell, collections::VecDeque as Queue, rc::Rc};

    #[derive(Default)]
    struct SharedSocketState {
        inbound: Queue<Vec<u8>>,
        outbound: Vec<Vec<u8>>,
    }

    #[derive(Clone)]
    struct MockSocket(Rc<RefCell<SharedSocketState>>);

    impl MockSocket {
        fn new() -> (Self, Rc<RefCell<SharedSocketState>>) {
            let shared = Rc::new(RefCell::new(SharedSocketState::default()));
            (Self(shared.clone()), shared)
        }
    }

    impl Socket for MockSocket {
        fn send(&mut self, pdu: &[u8]) -> Result<(), SocketError> {
            self.0.borrow_mut().outbound.push(pdu.to_vec());
            Ok(())
        }

        fn recv(&mut self) -> Result<Option<Vec<u8>>, SocketError> {
            Ok(self.0.borrow_mut().inbound.pop_front())
        }

        fn security_level(&self) -> SecurityLevel {
            SecurityLevel::Sdp
        }
    }

    fn server_with_battery_service() -> (GattServer<MockSocket>, Rc<RefCell<SharedSocketState>>) {
        let (socket, shared) = MockSocket::new();
        let mut server = GattServer::new(socket, 23, 50);
        server.add_service(
            ServiceDef::primary(Uuid16(0x180F)).with_characteristic(
                CharacteristicDef::new(
                    Uuid16(0x2A19),
                    vec![80],
                    AttPermissions::READABLE_WRITABLE,
                    Properties::READ | Properties::WRITE | Properties::NOTIFY,
                )
                .with_cccd(),
            ),
        );
        (server, shared)
    }

    #[test]
    fn read_request_returns_attribute_value() {
        let (mut server, shared) = server_with_battery_service();
        // Handles: 1=service decl, 2=characteristic decl, 3=value, 4=CCCD.
        shared.borrow_mut().inbound.push_back(vec![0x0A, 0x03, 0x00]); // ReadReq handle=3
        assert!(server.read().unwrap());
        let outbound = shared.borrow().outbound.clone();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0], vec![0x0B, 80]); // ReadRsp value=[80]
    }

    #[test]
    fn read_unknown_handle_yields_invalid_handle_error() {
        let (mut server, shared) = server_with_battery_service();
        shared.borrow_mut().inbound.push_back(vec![0x0A, 0xFF, 0xFF]); // ReadReq handle=0xFFFF
        assert!(server.read().unwrap());
        let outbound = shared.borrow().outbound.clone();
        assert_eq!(outbound[0], vec![0x01, 0x0A, 0xFF, 0xFF, 0x01]); // ErrorRsp(ReadReq, 0xFFFF, InvalidHandle)
    }

    #[test]
    fn write_request_commits_and_responds() {
        let (mut server, shared) = server_with_battery_service();
        shared
            .borrow_mut()
            .inbound
            .push_back(vec![0x12, 0x03, 0x00, 99]); // WriteReq handle=3 value=[99]
        assert!(server.read().unwrap());
        assert_eq!(shared.borrow().outbound[0], vec![0x13]); // WriteRsp
        assert_eq!(server.database().get(Handle::from_raw(3)).unwrap().value, vec![99]);
    }

    #[test]
    fn write_value_notifies_subscribed_client() {
        let (mut server, shared) = server_with_battery_service();
        // Subscribe to notifications by writing 0x0001 (Notify) to the CCCD (handle 4).
        server
            .database_mut()
            .write(Handle::from_raw(4), vec![0x01, 0x00])
            .unwrap();
        server.write_value(Handle::from_raw(3), vec![42]).unwrap();
        let outbound = shared.borrow().outbound.clone();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0], vec![0x1B, 0x03, 0x00, 42]); // HandleValueNotification
    }

    #[test]
    fn prepare_write_queue_full_is_rejected() {
        let (socket, shared) = MockSocket::new();
        let mut server = GattServer::new(socket, 23, 1);
        server.add_service(
            ServiceDef::primary(Uuid16(0x180F)).with_characteristic(CharacteristicDef::new(
                Uuid16(0x2A19),
                vec![0],
                AttPermissions::READABLE_WRITABLE,
                Properties::READ | Properties::WRITE,
            )),
        );
        let prepare = vec![0x16, 0x02, 0x00, 0x00, 0x00, 1]; // PrepareWriteReq handle=2 offset=0 value=[1]
        shared.borrow_mut().inbound.push_back(prepare.clone());
        shared.borrow_mut().inbound.push_back(prepare);
        assert!(server.read().unwrap());
        assert!(server.read().unwrap());
        let outbound = shared.borrow().outbound.clone();
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[0][0], 0x17); // first accepted: PrepareWriteRsp
        assert_eq!(outbound[1], vec![0x01, 0x16, 0x02, 0x00, 0x09]); // second rejected: PrepareQueueFull
    }

    #[test]
    fn pack_by_type_truncates_to_hard_cap() {
        let long_value = vec![0xAB; 300];
        let handle = Handle::from_raw(1);
        let (length, packed) = pack_by_type(517, &[(handle, &long_value)]).unwrap();
        assert_eq!(length as usize, 2 + 253);
        assert_eq!(packed.len(), 2 + 253);
    }

    #[test]
    fn pack_by_type_stops_on_mtu_boundary() {
        let v = vec![0xAB; 18];
        let handle = Handle::from_raw(1);
        let matches = vec![(handle, v.as_slice()), (handle, v.as_slice()), (handle, v.as_slice())];
        let (_, packed) = pack_by_type(23, &matches).unwrap();
        // entry size = 2 + 18 = 20; used starts at 2; only one entry fits in 23 bytes.
        assert_eq!(packed.len(), 20);
    }

    #[test]
    fn find_information_stops_at_uuid_width_change() {
        let a1 = Attribute {
            handle: Handle::from_raw(1),
            uuid: BluetoothUuid::Uuid16(Uuid16(0x2800)),
            value: vec![],
            permissions: AttPermissions::READABLE,
        };
        let a2 = Attribute {
            handle: Handle::from_raw(2),
            uuid: BluetoothUuid::Uuid128(crate::uuid::Uuid128::from_bytes([0; 16])),
            value: vec![],
            permissions: AttPermissions::READABLE,
        };
        let (format, data) = pack_find_information(517, &[&a1, &a2]).unwrap();
        assert_eq!(format, 1);
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn will_write_observes_uuid_and_old_and_new_values() {
        let (mut server, shared) = server_with_battery_service();
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();
        server.set_will_write(move |uuid, handle, old_value, new_value| {
            *seen_clone.borrow_mut() = Some((uuid, handle, old_value.to_vec(), new_value.to_vec()));
            Ok(())
        });
        shared
            .borrow_mut()
            .inbound
            .push_back(vec![0x12, 0x03, 0x00, 99]); // WriteReq handle=3 value=[99]
        assert!(server.read().unwrap());
        let (uuid, handle, old_value, new_value) = seen.borrow_mut().take().unwrap();
        assert_eq!(uuid, BluetoothUuid::Uuid16(Uuid16(0x2A19)));
        assert_eq!(handle, Handle::from_raw(3));
        assert_eq!(old_value, vec![80]);
        assert_eq!(new_value, vec![99]);
    }

    #[test]
    fn will_read_observes_uuid_value_and_offset() {
        let (mut server, shared) = server_with_battery_service();
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();
        server.set_will_read(move |uuid, handle, value, offset| {
            *seen_clone.borrow_mut() = Some((uuid, handle, value.to_vec(), offset));
            Ok(())
        });
        shared.borrow_mut().inbound.push_back(vec![0x0A, 0x03, 0x00]); // ReadReq handle=3
        assert!(server.read().unwrap());
        let (uuid, handle, value, offset) = seen.borrow_mut().take().unwrap();
        assert_eq!(uuid, BluetoothUuid::Uuid16(Uuid16(0x2A19)));
        assert_eq!(handle, Handle::from_raw(3));
        assert_eq!(value, vec![80]);
        assert_eq!(offset, 0);
    }

    #[test]
    fn set_write_pending_fires_when_a_response_is_sent() {
        let (mut server, shared) = server_with_battery_service();
        let fired = Rc::new(RefCell::new(0));
        let fired_clone = fired.clone();
        server.set_write_pending(move || *fired_clone.borrow_mut() += 1);
        shared.borrow_mut().inbound.push_back(vec![0x0A, 0x03, 0x00]); // ReadReq handle=3
        assert!(server.read().unwrap());
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn read_blob_on_short_value_is_rejected_regardless_of_offset() {
        let (mut server, shared) = server_with_battery_service();
        shared
            .borrow_mut()
            .inbound
            .push_back(vec![0x0C, 0x03, 0x00, 0x01, 0x00]); // ReadBlobReq handle=3 offset=1
        assert!(server.read().unwrap());
        assert_eq!(
            shared.borrow().outbound[0],
            vec![0x01, 0x0C, 0x03, 0x00, 0x0B] // ErrorRsp AttributeNotLong
        );
    }

    #[test]
    fn exchange_mtu_end_to_end_via_raw_pdu() {
        let mut reader = ByteReader::new(&[0x03, 23, 0]);
        let pdu = AttPdu::from_bytes(&mut reader).unwrap();
        assert!(matches!(pdu, AttPdu::ExchangeMtuRsp { mtu: 23 }));
    }

    proptest! {
        /// Whatever `pack_by_type` returns always fits the negotiated MTU, including
        /// the 2 bytes of opcode+length the caller prepends.
        #[test]
        fn pack_by_type_never_exceeds_mtu(
            mtu in 23u16..517,
            value_len in 0usize..40,
            count in 1usize..10,
        ) {
            let value = vec![0xABu8; value_len];
            let matches: Vec<_> = (0..count)
                .map(|i| (Handle::from_raw(i as u16 + 1), value.as_slice()))
                .collect();
            if let Some((_, packed)) = pack_by_type(mtu, &matches) {
                prop_assert!(2 + packed.len() <= mtu as usize);
            }
        }

        /// Same bound for Read By Group Type's triples.
        #[test]
        fn pack_by_group_type_never_exceeds_mtu(
            mtu in 23u16..517,
            value_len in 0usize..40,
            count in 1usize..10,
        ) {
            let value = vec![0xCDu8; value_len];
            let matches: Vec<_> = (0..count)
                .map(|i| {
                    let h = Handle::from_raw(i as u16 + 1);
                    (h, h, value.as_slice())
                })
                .collect();
            if let Some((_, packed)) = pack_by_group_type(mtu, &matches) {
                prop_assert!(2 + packed.len() <= mtu as usize);
            }
        }
    }
}
