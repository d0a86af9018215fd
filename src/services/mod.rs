//! Monitoring services
//!
//! The leaf capabilities (command execution, probing, wifi switching) and the
//! two loops built on top of them: the monitor and the command responder.

pub mod command;
pub mod monitor;
pub mod pending;
pub mod prober;
pub mod responder;
pub mod wifi;

use std::any::Any;

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_panic_payload() {
        let panic = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*panic), "boom");

        let panic = std::panic::catch_unwind(|| panic!("{} failed", "probe")).unwrap_err();
        assert_eq!(panic_message(&*panic), "probe failed");

        let panic = std::panic::catch_unwind(|| std::panic::panic_any(7)).unwrap_err();
        assert_eq!(panic_message(&*panic), "unknown panic");
    }
}
