use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-type enable flag. Subtypes share the flag of their base type.
#[derive(Debug, Clone)]
pub(crate) struct TypeSwitch(Arc<AtomicBool>);

impl TypeSwitch {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

/// Switches a type off for its lifetime and restores the prior value on drop,
/// including during unwinding.
#[derive(Debug)]
pub(crate) struct SwitchGuard {
    switch: TypeSwitch,
    prior: bool,
}

impl SwitchGuard {
    pub(crate) fn disable(switch: &TypeSwitch) -> Self {
        let prior = switch.get();
        switch.set(false);
        Self {
            switch: switch.clone(),
            prior,
        }
    }
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        self.switch.set(self.prior);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_enabled() {
        let switch = TypeSwitch::new();
        {
            let _guard = SwitchGuard::disable(&switch);
            assert!(!switch.get());
        }
        assert!(switch.get());
    }

    #[test]
    fn guard_keeps_disabled_switch_disabled() {
        let switch = TypeSwitch::new();
        switch.set(false);
        drop(SwitchGuard::disable(&switch));
        assert!(!switch.get());
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let switch = TypeSwitch::new();
        let outer = SwitchGuard::disable(&switch);
        let inner = SwitchGuard::disable(&switch);
        drop(inner);
        assert!(!switch.get());
        drop(outer);
        assert!(switch.get());
    }
}
