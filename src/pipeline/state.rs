//! Connection state machine.
//!
//! [`ConnectionState`] is what callers observe.  [`StateCell`] stores it in an
//! atomic together with one internal phase, *closing*, which exists only
//! while teardown runs and reads back as [`ConnectionState::Disconnected`].
//!
//! ```text
//! Idle ─────────start──────▶ Connecting ──channel open──▶ Connected
//!   ▲                            │                           │
//!   └──negotiation/connect error─┘                           │
//!                                │ stop / failure            │ stop / close / failure
//!                                ▼                           ▼
//!                             (closing) ──teardown done──▶ Disconnected
//!
//! Disconnected ──start──▶ Connecting
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never started, or a start attempt failed before the channel opened.
    Idle,
    /// Session negotiation or channel connect in progress.
    Connecting,
    /// Channel open; audio flows in both directions.
    Connected,
    /// Torn down.  `start` may be called again.
    Disconnected,
}

impl ConnectionState {
    /// Label used in connection-state notifications.
    ///
    /// ```
    /// use translate_bridge::pipeline::ConnectionState;
    ///
    /// assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
    /// assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }

    /// `true` while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    fn to_raw(self) -> u8 {
        match self {
            ConnectionState::Idle => IDLE,
            ConnectionState::Connecting => CONNECTING,
            ConnectionState::Connected => CONNECTED,
            ConnectionState::Disconnected => DISCONNECTED,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => ConnectionState::Idle,
            CONNECTING => ConnectionState::Connecting,
            CONNECTED => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StateCell
// ---------------------------------------------------------------------------

const IDLE: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;
const DISCONNECTED: u8 = 3;
const CLOSING: u8 = 4;

/// Lock-free holder of the connection state.  Every transition is a
/// compare-and-swap, so exactly one caller wins each edge.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    /// Current state; the closing phase reads as `Disconnected`.
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// `true` only between the start of teardown and its end.
    pub fn is_closing(&self) -> bool {
        self.0.load(Ordering::Acquire) == CLOSING
    }

    /// `Idle | Disconnected → Connecting`.  `false` if a run is already
    /// active or still closing.
    pub fn begin_connecting(&self) -> bool {
        [IDLE, DISCONNECTED].into_iter().any(|from| {
            self.0
                .compare_exchange(from, CONNECTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Single-edge transition; `true` if the state was `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Connecting | Connected → closing`.  Only the winner runs teardown.
    pub fn begin_closing(&self) -> bool {
        [CONNECTED, CONNECTING].into_iter().any(|from| {
            self.0
                .compare_exchange(from, CLOSING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// `closing → Disconnected`.
    pub fn finish_closing(&self) {
        let _ = self.0.compare_exchange(
            CLOSING,
            DISCONNECTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
