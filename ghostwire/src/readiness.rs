use parking_lot::RwLock;

/// Readiness signals for the watcher. Both flags are monotonic; once set
/// they never clear, so a healthy report can never regress within one
/// process.
#[derive(Debug, Default)]
pub struct Readiness {
    flags: RwLock<Flags>,
}

#[derive(Copy, Clone, Debug, Default)]
struct Flags {
    chain_verified: bool,
    labels_read: bool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_chain_verified(&self) {
        self.flags.write().chain_verified = true;
    }

    pub fn set_labels_read(&self) {
        self.flags.write().labels_read = true;
    }

    pub fn is_ready(&self) -> bool {
        let flags = *self.flags.read();
        flags.chain_verified && flags.labels_read
    }

    /// `(chain_verified, labels_read)` for diagnostics.
    pub fn snapshot(&self) -> (bool, bool) {
        let flags = *self.flags.read();
        (flags.chain_verified, flags.labels_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_only_when_both_flags_set() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());

        readiness.set_chain_verified();
        assert!(!readiness.is_ready());
        assert_eq!(readiness.snapshot(), (true, false));

        readiness.set_labels_read();
        assert!(readiness.is_ready());
        assert_eq!(readiness.snapshot(), (true, true));
    }

    #[test]
    fn flags_are_monotonic() {
        let readiness = Readiness::new();
        readiness.set_chain_verified();
        readiness.set_labels_read();
        // Setting again keeps the flags up.
        readiness.set_chain_verified();
        assert!(readiness.is_ready());
    }
}
