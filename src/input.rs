//! Button edge sources.
//!
//! Each source owns an [`EventSender`] and pushes one
//! [`ModeEvent::ButtonPressed`] per press. In development mode pressing Enter
//! on the terminal stands in for the physical button; hardware builds use the
//! GPIO watcher in `hardware`.

use crate::mode::{EventSender, ModeEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Forward one press per input line until the reader or the machine goes away.
///
/// Returns the number of presses forwarded.
pub async fn forward_presses<R: AsyncBufRead + Unpin>(reader: R, tx: EventSender) -> usize {
    let mut lines = reader.lines();
    let mut presses = 0;
    while let Ok(Some(_)) = lines.next_line().await {
        if tx.send(ModeEvent::ButtonPressed).is_err() {
            debug!("mode machine gone, stopping button source");
            break;
        }
        presses += 1;
    }
    presses
}

/// Treat every Enter on stdin as a button press.
pub fn spawn_stdin_button(tx: EventSender) -> JoinHandle<usize> {
    info!("press Enter to simulate the wake button");
    tokio::spawn(forward_presses(BufReader::new(tokio::io::stdin()), tx))
}
