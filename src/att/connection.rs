//! The ATT connection: pumps PDUs between a [`Socket`] and a registered request handler.
//!
//! Reads one datagram per call, intercepts Exchange MTU and Handle Value Confirmation
//! itself, and dispatches everything else to the registered [`RequestHandler`].

use crate::{
    att::{
        handle::Handle,
        pdus::{AttError, AttPdu, ErrorCode, Opcode},
    },
    bytes::{ByteReader, ByteWriter, FromBytes, ToBytes},
    socket::{SecurityLevel, Socket, SocketError},
    utils::HexSlice,
};

/// The default `ATT_MTU` before any Exchange MTU negotiation has happened.
pub const DEFAULT_MTU: u16 = 23;

/// The largest `ATT_MTU` this crate will negotiate (Bluetooth Core Spec limit).
pub const MAX_MTU: u16 = 517;

/// Handles one incoming request or command PDU, writing a response (if any) through `responder`.
///
/// Returning `Err` for a request causes an `ErrorRsp` with that [`AttError`] to be sent; for a
/// command it is swallowed, since commands never receive a response.
pub trait RequestHandler {
    fn handle_request(
        &mut self,
        pdu: &AttPdu<'_>,
        responder: &mut Responder<'_>,
    ) -> Result<(), AttError>;

    /// Called when the client confirms a previously sent indication.
    fn handle_confirmation(&mut self) {}
}

/// A handle to the connection's outbound path, scoped to a single inbound PDU's response.
pub struct Responder<'a> {
    socket: &'a mut dyn Socket,
    write_pending: &'a mut Option<Box<dyn FnMut()>>,
    mtu: u16,
    security_level: SecurityLevel,
}

impl<'a> Responder<'a> {
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// The security level of the link this PDU arrived on, for permission checks.
    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn send(&mut self, pdu: AttPdu<'_>) -> Result<(), SocketError> {
        let mut buf = vec![0u8; self.mtu as usize];
        let mut writer = ByteWriter::new(&mut buf);
        pdu.to_bytes(&mut writer)
            .expect("PDU encoding must fit within the negotiated MTU");
        let used = buf.len() - writer.space_left();
        buf.truncate(used);
        if let Some(cb) = self.write_pending {
            cb();
        }
        self.socket.send(&buf)
    }
}

/// An established ATT connection over a [`Socket`].
pub struct AttConnection<S: Socket> {
    socket: S,
    mtu: u16,
    preferred_mtu: u16,
    awaiting_confirmation: bool,
    /// Fired just before a PDU is handed to the socket. Sends are synchronous, so the
    /// outbound queue never holds more than one PDU at a time: every send is therefore
    /// its own empty-to-non-empty transition, which is exactly the signal external
    /// event loops use this callback for.
    write_pending: Option<Box<dyn FnMut()>>,
}

impl<S: Socket> AttConnection<S> {
    /// Creates a connection that will request `preferred_mtu` during MTU negotiation.
    ///
    /// `preferred_mtu` is clamped to `[DEFAULT_MTU, MAX_MTU]`.
    pub fn new(socket: S, preferred_mtu: u16) -> Self {
        Self {
            socket,
            mtu: DEFAULT_MTU,
            preferred_mtu: preferred_mtu.clamp(DEFAULT_MTU, MAX_MTU),
            awaiting_confirmation: false,
            write_pending: None,
        }
    }

    /// Registers a callback invoked whenever the outbound send queue transitions from
    /// empty to non-empty, so an external event loop knows there is work to flush.
    pub fn set_write_pending(&mut self, f: impl FnMut() + 'static) {
        self.write_pending = Some(Box::new(f));
    }

    /// The currently negotiated `ATT_MTU`.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// The `ATT_MTU` this connection will request on Exchange MTU.
    pub fn preferred_mtu(&self) -> u16 {
        self.preferred_mtu
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.socket.security_level()
    }

    /// Whether an indication has been sent and not yet confirmed by the client.
    ///
    /// The Bluetooth Core Spec permits only one outstanding indication at a time.
    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    /// Pumps one inbound PDU, if one is available without blocking, dispatching requests and
    /// commands to `handler`.
    ///
    /// Returns `Ok(true)` if a PDU was processed, `Ok(false)` if none was available. Socket
    /// errors propagate unchanged.
    pub fn read(&mut self, handler: &mut impl RequestHandler) -> Result<bool, SocketError> {
        let datagram = match self.socket.recv()? {
            Some(d) => d,
            None => return Ok(false),
        };

        let opcode_byte = datagram.first().copied().unwrap_or(0);
        let mut reader = ByteReader::new(&datagram);
        let pdu = match AttPdu::from_bytes(&mut reader) {
            Ok(pdu) => pdu,
            Err(_) => {
                log::debug!("ATT<- malformed PDU (opcode={:#04x})", opcode_byte);
                self.send_error(Opcode::from(opcode_byte), Handle::NULL, ErrorCode::InvalidPdu)?;
                return Ok(true);
            }
        };
        log::debug!("ATT<- {:?}", pdu);

        if let AttPdu::ExchangeMtuReq { mtu: client_mtu } = pdu {
            self.negotiate_mtu(client_mtu);
            // The response always reports the server's preferred MTU, regardless of what
            // the client asked for; the effective MTU used by both sides is the clamped
            // minimum computed in `negotiate_mtu`.
            self.send(AttPdu::ExchangeMtuRsp { mtu: self.preferred_mtu })?;
            return Ok(true);
        }

        if let AttPdu::HandleValueConfirmation = pdu {
            self.awaiting_confirmation = false;
            handler.handle_confirmation();
            return Ok(true);
        }

        let opcode = pdu.opcode();
        let mtu = self.mtu;
        let security_level = self.socket.security_level();
        let outcome = {
            let mut responder = Responder {
                socket: &mut self.socket,
                write_pending: &mut self.write_pending,
                mtu,
                security_level,
            };
            handler.handle_request(&pdu, &mut responder)
        };

        if let Err(att_err) = outcome {
            if opcode.is_command() {
                log::debug!("ATT<- ignoring failed command {:?}: {:?}", opcode, att_err);
            } else {
                self.send_error(opcode, att_err.handle(), att_err.error_code())?;
            }
        }

        Ok(true)
    }

    /// Flushes any buffered outbound state.
    ///
    /// Responses and notifications are written synchronously through [`Socket::send`] as soon as
    /// they are produced, so there is nothing to buffer; this exists for API parity with
    /// [`GattServer::write`](crate::gatt::server::GattServer::write) and always returns `false`.
    pub fn write(&mut self) -> bool {
        false
    }

    fn negotiate_mtu(&mut self, client_mtu: u16) {
        self.mtu = client_mtu.min(self.preferred_mtu).clamp(DEFAULT_MTU, MAX_MTU);
    }

    pub fn send(&mut self, pdu: AttPdu<'_>) -> Result<(), SocketError> {
        let mtu = self.mtu;
        let security_level = self.socket.security_level();
        let mut responder = Responder {
            socket: &mut self.socket,
            write_pending: &mut self.write_pending,
            mtu,
            security_level,
        };
        responder.send(pdu)
    }

    pub fn send_error(
        &mut self,
        opcode: Opcode,
        handle: Handle,
        error_code: ErrorCode,
    ) -> Result<(), SocketError> {
        self.send(AttPdu::ErrorRsp {
            opcode,
            handle,
            error_code,
        })
    }

    /// Sends an unacknowledged notification, truncating `value` to fit `mtu() - 3`.
    pub fn send_notification(&mut self, handle: Handle, value: &[u8]) -> Result<(), SocketError> {
        self.send(AttPdu::HandleValueNotification {
            handle,
            value: HexSlice(value),
        })
    }

    /// Sends an indication and marks the connection as awaiting the client's confirmation.
    pub fn send_indication(&mut self, handle: Handle, value: &[u8]) -> Result<(), SocketError> {
        self.awaiting_confirmation = true;
        self.send(AttPdu::HandleValueIndication {
            handle,
            value: HexSlice(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    struct MockSocket {
        inbound: VecDeque<Vec<u8>>,
        outbound: Vec<Vec<u8>>,
        security_level: SecurityLevel,
    }

    impl MockSocket {
        fn new() -> Self {
            Self {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                security_level: SecurityLevel::Sdp,
            }
        }
    }

    impl Socket for MockSocket {
        fn send(&mut self, pdu: &[u8]) -> Result<(), SocketError> {
            self.outbound.push(pdu.to_vec());
            Ok(())
        }

        fn recv(&mut self) -> Result<Option<Vec<u8>>, SocketError> {
            Ok(self.inbound.pop_front())
        }

        fn security_level(&self) -> SecurityLevel {
            self.security_level
        }
    }

    struct EchoHandler;

    impl RequestHandler for EchoHandler {
        fn handle_request(
            &mut self,
            pdu: &AttPdu<'_>,
            responder: &mut Responder<'_>,
        ) -> Result<(), AttError> {
            match pdu {
                AttPdu::ReadReq { handle } => {
                    responder
                        .send(AttPdu::ReadRsp {
                            value: HexSlice(&[0xAB]),
                        })
                        .unwrap();
                    let _ = handle;
                    Ok(())
                }
                _ => Err(AttError::new(ErrorCode::RequestNotSupported, Handle::NULL)),
            }
        }
    }

    #[test]
    fn exchange_mtu_negotiates_minimum() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x02, 100, 0]); // ExchangeMtuReq mtu=100
        let mut conn = AttConnection::new(socket, 50);
        assert!(conn.read(&mut EchoHandler).unwrap());
        assert_eq!(conn.mtu(), 50);
    }

    #[test]
    fn exchange_mtu_response_reports_preferred_mtu() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x02, 30, 0]); // ExchangeMtuReq mtu=30
        let mut conn = AttConnection::new(socket, 50);
        assert!(conn.read(&mut EchoHandler).unwrap());
        // Response carries the server's preferred MTU, not min(client, preferred).
        assert_eq!(conn.socket.outbound[0], vec![0x03, 50, 0]);
        assert_eq!(conn.mtu(), 30); // effective MTU is still the clamped minimum
    }

    #[test]
    fn write_pending_fires_on_each_send() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x0A, 0x01, 0x00]); // ReadReq handle=1
        let mut conn = AttConnection::new(socket, DEFAULT_MTU);
        let fired = Rc::new(RefCell::new(0));
        let fired_clone = fired.clone();
        conn.set_write_pending(move || *fired_clone.borrow_mut() += 1);
        assert!(conn.read(&mut EchoHandler).unwrap());
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn unhandled_request_rejects_with_request_not_supported() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x12, 0x01, 0x00]); // WriteReq handle=1 (EchoHandler only knows ReadReq)
        let mut conn = AttConnection::new(socket, DEFAULT_MTU);
        assert!(conn.read(&mut EchoHandler).unwrap());
    }

    #[test]
    fn malformed_pdu_yields_invalid_pdu_error() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x0A]); // ReadReq with no handle bytes
        let mut conn = AttConnection::new(socket, DEFAULT_MTU);
        assert!(conn.read(&mut EchoHandler).unwrap());
    }

    #[test]
    fn registered_handler_responds() {
        let mut socket = MockSocket::new();
        socket.inbound.push_back(vec![0x0A, 0x01, 0x00]); // ReadReq handle=1
        let mut conn = AttConnection::new(socket, DEFAULT_MTU);
        assert!(conn.read(&mut EchoHandler).unwrap());
    }

    #[test]
    fn command_failure_is_silently_ignored() {
        let mut socket = MockSocket::new();
        // WriteCommand (0x52) to a handler that always errors; must not produce a response.
        socket.inbound.push_back(vec![0x52, 0x01, 0x00, 0xFF]);
        let mut conn = AttConnection::new(socket, DEFAULT_MTU);
        assert!(conn.read(&mut EchoHandler).unwrap());
    }
}
