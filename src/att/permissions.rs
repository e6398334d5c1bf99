//! Per-attribute access permissions.

use bitflags::bitflags;

bitflags! {
    /// The set of operations a client is permitted to perform on an attribute.
    ///
    /// `READ_ENCRYPT`/`WRITE_ENCRYPT` demand at least [`SecurityLevel::Medium`], and
    /// `READ_AUTHENTICATION`/`WRITE_AUTHENTICATION` demand at least
    /// [`SecurityLevel::High`], checked against the socket's reported security level.
    ///
    /// [`SecurityLevel::Medium`]: crate::socket::SecurityLevel::Medium
    /// [`SecurityLevel::High`]: crate::socket::SecurityLevel::High
    #[derive(Default)]
    pub struct AttPermissions: u8 {
        const READ                 = 0b0000_0001;
        const WRITE                = 0b0000_0010;
        const READ_ENCRYPT         = 0b0000_0100;
        const WRITE_ENCRYPT        = 0b0000_1000;
        const READ_AUTHENTICATION  = 0b0001_0000;
        const WRITE_AUTHENTICATION = 0b0010_0000;
    }
}

impl AttPermissions {
    /// Readable without any additional security requirement.
    pub const READABLE: Self = Self::READ;

    /// Writable without any additional security requirement.
    pub const WRITABLE: Self = Self::WRITE;

    /// Readable and writable without any additional security requirement.
    pub const READABLE_WRITABLE: Self = Self {
        bits: Self::READ.bits | Self::WRITE.bits,
    };

    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Minimum security level required to read this attribute, if any requirement is set.
    pub fn required_read_security(self) -> Option<crate::socket::SecurityLevel> {
        if self.contains(Self::READ_AUTHENTICATION) {
            Some(crate::socket::SecurityLevel::High)
        } else if self.contains(Self::READ_ENCRYPT) {
            Some(crate::socket::SecurityLevel::Medium)
        } else {
            None
        }
    }

    /// Minimum security level required to write this attribute, if any requirement is set.
    pub fn required_write_security(self) -> Option<crate::socket::SecurityLevel> {
        if self.contains(Self::WRITE_AUTHENTICATION) {
            Some(crate::socket::SecurityLevel::High)
        } else if self.contains(Self::WRITE_ENCRYPT) {
            Some(crate::socket::SecurityLevel::Medium)
        } else {
            None
        }
    }
}
