use std::sync::Once;

use ledger_bft::logging::init_logger;
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Set up the crate's logger once per test binary.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        // Another test harness may already own the global logger.
        let _ = init_logger(level);
    })
}
