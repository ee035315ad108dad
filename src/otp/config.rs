//! OTP configuration surface

use std::time::Duration;

/// Bluetooth SIG assigned PSM for the Object Transfer Channel.
pub const PSM_DEFAULT: u16 = 0x0025;

/// Default data channel MTU for object transfer.
pub const CHANNEL_MTU_DEFAULT: u16 = 512;

/// Minimum legal data channel MTU.
pub const CHANNEL_MTU_MIN: u16 = 23;

/// Default bound on session-lock acquisition.
pub const LOCK_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// Which side of the profile this engine instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub role: Role,
    /// PSM for the Object Transfer Channel.
    pub psm: u16,
    /// Data channel MTU.
    pub channel_mtu: u16,
    /// Client only: start OTS discovery as soon as service discovery on a
    /// new connection completes.
    pub auto_discover: bool,
    /// Bound on session-lock acquisition before the call fails.
    pub lock_timeout: Duration,
}

impl OtpConfig {
    pub fn client() -> Self {
        Self::for_role(Role::Client)
    }

    pub fn server() -> Self {
        Self::for_role(Role::Server)
    }

    fn for_role(role: Role) -> Self {
        Self {
            role,
            psm: PSM_DEFAULT,
            channel_mtu: CHANNEL_MTU_DEFAULT,
            auto_discover: true,
            lock_timeout: LOCK_TIMEOUT_DEFAULT,
        }
    }

    /// Replace zero values with defaults and clamp the MTU to its legal
    /// minimum, the way the profile treats an unset configuration.
    pub fn normalized(mut self) -> Self {
        if self.psm == 0 {
            self.psm = PSM_DEFAULT;
        }
        if self.channel_mtu == 0 {
            self.channel_mtu = CHANNEL_MTU_DEFAULT;
        }
        if self.channel_mtu < CHANNEL_MTU_MIN {
            self.channel_mtu = CHANNEL_MTU_MIN;
        }
        if self.lock_timeout.is_zero() {
            self.lock_timeout = LOCK_TIMEOUT_DEFAULT;
        }
        self
    }
}
