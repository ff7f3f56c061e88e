use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use signal_hook::consts::signal::SIGINT;

/// A flag which asks a running loop to tear its child down.
///
/// Both runners check it between steps.
/// Cloned flags share the state.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag which is raised by SIGINT.
    ///
    /// Registering it replaces the default SIGINT behaviour of the process,
    /// so Ctrl-C will no longer kill it.
    pub fn on_sigint() -> io::Result<Self> {
        let interrupt = Self::new();
        let _ = signal_hook::flag::register(SIGINT, Arc::clone(&interrupt.flag))?;
        Ok(interrupt)
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lowers the flag and returns whether it was raised.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_between_clones() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        assert!(!interrupt.is_raised());

        clone.raise();
        assert!(interrupt.is_raised());
        assert!(interrupt.take());
        assert!(!clone.is_raised());
    }
}
