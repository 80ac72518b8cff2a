//! Open-channel registry
//!
//! One push channel per logical session: the registry records which channel
//! ids currently have a connection, so a remounted view cannot open a second
//! one. This is an explicitly owned object with a register/unregister
//! lifecycle, not ambient global state.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Registry of channel ids with an open push connection
#[derive(Default)]
pub struct ChannelRegistry {
    open: Mutex<HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a channel as open
    ///
    /// Returns `false` when the channel is already registered; the caller
    /// must not open a second connection in that case.
    pub fn register(&self, channel_id: &str) -> bool {
        self.open.lock().insert(channel_id.to_string())
    }

    /// Clear the open marker for a channel
    pub fn unregister(&self, channel_id: &str) {
        self.open.lock().remove(channel_id);
    }

    pub fn is_open(&self, channel_id: &str) -> bool {
        self.open.lock().contains(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_exclusive() {
        let registry = ChannelRegistry::new();
        assert!(registry.register("room-1"));
        assert!(!registry.register("room-1"));
        assert!(registry.register("room-2"));
    }

    #[test]
    fn test_unregister_releases_the_marker() {
        let registry = ChannelRegistry::new();
        assert!(registry.register("room-1"));
        registry.unregister("room-1");
        assert!(!registry.is_open("room-1"));
        assert!(registry.register("room-1"));
    }
}
