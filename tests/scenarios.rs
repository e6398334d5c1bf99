//! End-to-end scenario tests against a mock [`Socket`], covering literal
//! request/response byte sequences for common ATT/GATT exchanges.
//!
//! All scenarios share the same database shape: a single primary service at
//! handle 1 (UUID `0xFFF1`), a characteristic declaration at handle 2, its
//! value at handle 3 (UUID `0xFFF1`, value `[0xAA]`, readable/writable), and a
//! Client Characteristic Configuration descriptor at handle 4.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use bleatt::{
    att::{handle::Handle, permissions::AttPermissions},
    gatt::{
        characteristic::Properties,
        db::{CharacteristicDef, ServiceDef},
        server::GattServer,
    },
    socket::{SecurityLevel, Socket, SocketError},
    uuid::Uuid16,
};

#[derive(Default)]
struct SharedSocketState {
    inbound: VecDeque<Vec<u8>>,
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

fn server() -> (GattServer<MockSocket>, Rc<RefCell<SharedSocketState>>) {
    let (socket, shared) = MockSocket::new();
    let mut server = GattServer::new(socket, 23, 50);
    server.add_service(
        ServiceDef::primary(Uuid16(0xFFF1)).with_characteristic(
            CharacteristicDef::new(
                Uuid16(0xFFF1),
                vec![0xAA],
                AttPermissions::READABLE_WRITABLE,
                Properties::READ | Properties::WRITE | Properties::NOTIFY,
            )
            .with_cccd(),
        ),
    );
    (server, shared)
}

fn push(shared: &Rc<RefCell<SharedSocketState>>, bytes: &[u8]) {
    shared.borrow_mut().inbound.push_back(bytes.to_vec());
}

fn last_outbound(shared: &Rc<RefCell<SharedSocketState>>) -> Vec<u8> {
    shared.borrow().outbound.last().cloned().unwrap()
}

/// 1. MTU Exchange: request 23, effective MTU becomes 23.
#[test]
fn mtu_exchange() {
    let (mut server, shared) = server();
    push(&shared, &[0x02, 23, 0]); // ExchangeMtuReq mtu=23
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x03, 23, 0]); // ExchangeMtuRsp mtu=23 (preferred == requested here)
    assert_eq!(server.maximum_transmission_unit(), 23);
}

/// 1b. MTU Exchange where the client's MTU is below the server's preferred MTU: the
/// response still reports the preferred MTU, while the negotiated MTU is the minimum.
#[test]
fn mtu_exchange_response_reports_preferred_mtu() {
    let (socket, shared) = MockSocket::new();
    let mut server = GattServer::new(socket, 50, 10);
    push(&shared, &[0x02, 30, 0]); // ExchangeMtuReq mtu=30
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x03, 50, 0]); // ExchangeMtuRsp mtu=50 (preferred)
    assert_eq!(server.maximum_transmission_unit(), 30);
}

/// 2. Read Request on the characteristic value handle.
#[test]
fn read_request() {
    let (mut server, shared) = server();
    push(&shared, &[0x0A, 0x03, 0x00]); // ReadReq handle=3
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x0B, 0xAA]); // ReadRsp value=[0xAA]
}

/// 3. Write Request overwrites the value; a subsequent read observes it.
#[test]
fn write_request_then_read_back() {
    let (mut server, shared) = server();
    push(&shared, &[0x12, 0x03, 0x00, 0xBB, 0xCC]); // WriteReq handle=3 value=[0xBB,0xCC]
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x13]); // WriteRsp

    push(&shared, &[0x0A, 0x03, 0x00]); // ReadReq handle=3
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x0B, 0xBB, 0xCC]);
}

/// 4. Read Blob on a value shorter than MTU - 1 fails with AttributeNotLong.
#[test]
fn read_blob_on_short_value_is_rejected() {
    let (mut server, shared) = server();
    push(&shared, &[0x0C, 0x03, 0x00, 0x00, 0x00]); // ReadBlobReq handle=3 offset=0
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x01, 0x0C, 0x03, 0x00, 0x0B]); // ErrorRsp AttributeNotLong
}

/// 4b. Read Blob on a short value is rejected the same way at a non-zero offset:
/// AttributeNotLong does not depend on the requested offset.
#[test]
fn read_blob_on_short_value_is_rejected_at_nonzero_offset() {
    let (mut server, shared) = server();
    push(&shared, &[0x0C, 0x03, 0x00, 0x01, 0x00]); // ReadBlobReq handle=3 offset=1
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x01, 0x0C, 0x03, 0x00, 0x0B]); // ErrorRsp AttributeNotLong
}

/// 5. Read By Group Type for primary services across the full handle space.
#[test]
fn read_by_group_type_for_primary_services() {
    let (mut server, shared) = server();
    push(&shared, &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]); // ReadByGroupReq [1,0xFFFF] type=0x2800
    assert!(server.read().unwrap());
    let response = last_outbound(&shared);
    assert_eq!(response[0], 0x11); // ReadByGroupRsp
    assert_eq!(response[1], 6); // length: 2 (handle) + 2 (group end) + 2 (value)
    assert_eq!(&response[2..], &[0x01, 0x00, 0x04, 0x00, 0xF1, 0xFF]);
}

/// 6. Prepare Write + Execute Write(write=1) concatenates queued parts in order,
/// and (since the CCCD was subscribed to notifications) emits a notification.
#[test]
fn prepare_and_execute_write_concatenates_and_notifies() {
    let (mut server, shared) = server();
    // Subscribe the characteristic at handle 3 (CCCD at handle 4) to notifications.
    server
        .database_mut()
        .write(Handle::from_raw(4), vec![0x01, 0x00])
        .unwrap();

    // PrepareWriteReq handle=3 offset=0 value="HE"
    push(&shared, &[0x16, 0x03, 0x00, 0x00, 0x00, b'H', b'E']);
    assert!(server.read().unwrap());
    assert_eq!(
        last_outbound(&shared),
        vec![0x17, 0x03, 0x00, 0x00, 0x00, b'H', b'E']
    );

    // PrepareWriteReq handle=3 offset=2 value="LLO"
    push(&shared, &[0x16, 0x03, 0x00, 0x02, 0x00, b'L', b'L', b'O']);
    assert!(server.read().unwrap());
    assert_eq!(
        last_outbound(&shared),
        vec![0x17, 0x03, 0x00, 0x02, 0x00, b'L', b'L', b'O']
    );

    // ExecuteWriteReq flags=1 (write)
    push(&shared, &[0x18, 0x01]);
    assert!(server.read().unwrap());

    assert_eq!(
        server.database().get(Handle::from_raw(3)).unwrap().value,
        b"HELLO".to_vec()
    );

    let outbound = shared.borrow().outbound.clone();
    // ExecuteWriteRsp, then the routed notification.
    assert_eq!(outbound[outbound.len() - 2], vec![0x19]);
    assert_eq!(
        outbound[outbound.len() - 1],
        [&[0x1B, 0x03, 0x00][..], b"HELLO"].concat()
    );
}

/// Prepare Write queue overflow returns PrepareQueueFull and leaves the queue size
/// unchanged.
#[test]
fn prepare_write_queue_overflow_is_rejected() {
    let (socket, shared) = MockSocket::new();
    let mut server = GattServer::new(socket, 23, 1);
    server.add_service(ServiceDef::primary(Uuid16(0xFFF1)).with_characteristic(
        CharacteristicDef::new(
            Uuid16(0xFFF1),
            vec![0xAA],
            AttPermissions::READABLE_WRITABLE,
            Properties::READ | Properties::WRITE,
        ),
    ));

    let prepare = [0x16, 0x03, 0x00, 0x00, 0x00, 1];
    push(&shared, &prepare);
    push(&shared, &prepare);
    assert!(server.read().unwrap());
    assert!(server.read().unwrap());

    let outbound = shared.borrow().outbound.clone();
    assert_eq!(outbound[0][0], 0x17); // first accepted
    assert_eq!(outbound[1], vec![0x01, 0x16, 0x03, 0x00, 0x09]); // second: PrepareQueueFull
}

/// Execute Write(cancel) discards the queue without applying any writes.
#[test]
fn execute_write_cancel_discards_queue() {
    let (mut server, shared) = server();
    push(&shared, &[0x16, 0x03, 0x00, 0x00, 0x00, 1, 2, 3]); // PrepareWriteReq
    assert!(server.read().unwrap());
    push(&shared, &[0x18, 0x00]); // ExecuteWriteReq flags=cancel
    assert!(server.read().unwrap());
    assert_eq!(last_outbound(&shared), vec![0x19]); // ExecuteWriteRsp
    assert_eq!(server.database().get(Handle::from_raw(3)).unwrap().value, vec![0xAA]);
}
