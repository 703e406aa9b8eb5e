use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use tandem_shared::{ChannelError, Delivery};

/// Polls `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Drains a blocking receive into a queue so tests can wait with a timeout.
/// The thread stops at the first error.
pub fn spawn_receiver<F>(receive: F) -> Receiver<Delivery>
where
    F: Fn() -> Result<Delivery, ChannelError> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        while let Ok(delivery) = receive() {
            if tx.send(delivery).is_err() {
                break;
            }
        }
    });
    rx
}
