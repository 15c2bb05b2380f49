// Session configuration, optionally read from the environment
//
// OBEX_MTU_RX:      receive MTU advertised in CONNECT (default: 1024)
// OBEX_MTU_TX_MAX:  upper bound for the negotiated transmit MTU (default: 1024)
// OBEX_SRM:         1 = ask for Single Response Mode on PUT/GET (default: 0)
// OBEX_KEEP_SERVER: 1 = keep listening after a peer connects (default: 0)
use obex_core::{OBEX_DEFAULT_MTU, OBEX_MAXIMUM_MTU, OBEX_MINIMUM_MTU};
use obex_transport::InitFlags;
use std::env;

/// How responses are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// One response for every request packet.
    #[default]
    Normal,
    /// Single Response Mode: bodies stream without per-packet responses.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub mtu_rx: u16,
    pub mtu_tx_max: u16,
    pub rsp_mode: ResponseMode,
    pub flags: InitFlags,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            mtu_rx: OBEX_DEFAULT_MTU,
            mtu_tx_max: OBEX_DEFAULT_MTU,
            rsp_mode: ResponseMode::Normal,
            flags: InitFlags::empty(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = SessionConfig::default();

        let mtu_rx = env::var("OBEX_MTU_RX")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(clamp_mtu)
            .unwrap_or(defaults.mtu_rx);

        let mtu_tx_max = env::var("OBEX_MTU_TX_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(clamp_mtu)
            .unwrap_or(defaults.mtu_tx_max);

        let rsp_mode = match env::var("OBEX_SRM").ok().as_deref() {
            Some("1") => ResponseMode::Single,
            _ => ResponseMode::Normal,
        };

        let mut flags = InitFlags::empty();
        if env::var("OBEX_KEEP_SERVER").ok().as_deref() == Some("1") {
            flags.insert(InitFlags::KEEP_SERVER);
        }

        SessionConfig {
            mtu_rx,
            mtu_tx_max,
            rsp_mode,
            flags,
        }
    }

    pub fn with_mtu(mut self, mtu_rx: u16, mtu_tx_max: u16) -> Self {
        self.mtu_rx = clamp_mtu(mtu_rx as u32);
        self.mtu_tx_max = clamp_mtu(mtu_tx_max as u32);
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.rsp_mode = mode;
        self
    }

    pub fn with_flags(mut self, flags: InitFlags) -> Self {
        self.flags = flags;
        self
    }
}

fn clamp_mtu(value: u32) -> u16 {
    value.clamp(OBEX_MINIMUM_MTU as u32, OBEX_MAXIMUM_MTU as u32) as u16
}
