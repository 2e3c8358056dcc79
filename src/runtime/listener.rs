//! Callback surface the event loop dispatches into.

use crate::runtime::connection::Connection;

/// Event callbacks for a role driven by the event loop.
///
/// Every method has a no-op default so a role only implements what it
/// needs: a server typically handles `on_accept`/`on_read`, a client
/// `on_connect`/`on_read`/`on_write`.
///
/// Callbacks run on the loop thread and must never block. To drop a
/// connection call [`Connection::close`]; to end the loop call
/// [`Control::stop`].
pub trait Listener {
    /// Per-connection state stored in each [`Connection`].
    type Attachment: Default;

    /// A listening socket accepted `conn`, now registered for reads.
    fn on_accept(&mut self, _conn: &mut Connection<Self::Attachment>, _ctl: &mut Control) {}

    /// An outgoing connect completed; `conn` is registered for reads and writes.
    fn on_connect(&mut self, _conn: &mut Connection<Self::Attachment>, _ctl: &mut Control) {}

    /// `conn` is readable.
    fn on_read(&mut self, _conn: &mut Connection<Self::Attachment>, _ctl: &mut Control) {}

    /// `conn` is writable.
    fn on_write(&mut self, _conn: &mut Connection<Self::Attachment>, _ctl: &mut Control) {}
}

/// Loop controls available from inside a callback.
#[derive(Debug, Default)]
pub struct Control {
    stop: bool,
}

impl Control {
    /// Ask the loop to return after the current dispatch batch.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_stop_is_idempotent() {
        let mut ctl = Control::default();
        assert!(!ctl.is_stopping());
        ctl.stop();
        ctl.stop();
        assert!(ctl.is_stopping());
    }
}
