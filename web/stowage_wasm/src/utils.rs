//! Utility functions for WASM setup.

/// Sets up the panic hook for better error messages.
///
/// Called automatically when the module initializes. Panic messages are
/// forwarded to the browser console.
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
