//! Broadcast channel selection.
//!
//! The transport state is a one-way degradation latch: once the primary
//! exchange channel is detected as invalid, every later publish goes to
//! the hidden fallback channel. The latch is never reset automatically
//! within the process lifetime; recovering the primary channel is a
//! manual operation (restart after the incident is resolved).

use std::sync::atomic::{AtomicBool, Ordering};

/// The two logical broadcast channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The regular exchange channel.
    Primary,
    /// The hidden channel used after degradation.
    Fallback,
}

/// Process-wide transport selector state.
#[derive(Debug, Default)]
pub struct TransportState {
    using_fallback: AtomicBool,
}

impl TransportState {
    /// Creates a fresh state pointing at the primary channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the currently selected channel.
    #[must_use]
    pub fn current(&self) -> Channel {
        if self.using_fallback.load(Ordering::SeqCst) {
            Channel::Fallback
        } else {
            Channel::Primary
        }
    }

    /// Latches the state to the fallback channel.
    ///
    /// Returns `true` if this call performed the flip; repeated calls
    /// are harmless and return `false`.
    pub fn degrade(&self) -> bool {
        !self.using_fallback.swap(true, Ordering::SeqCst)
    }

    /// Whether the latch has been flipped.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.using_fallback.load(Ordering::SeqCst)
    }
}
