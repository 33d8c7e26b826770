pub(crate) mod bridge;

pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod node;

use std::{
    thread,
    time::{Duration, Instant},
};

/// Poll `condition` until it holds or `timeout` passes. Returns whether it held.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
