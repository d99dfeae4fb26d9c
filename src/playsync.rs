// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::{Arc, Condvar, Mutex};

/// A cancel handle is attached to a playing voice or a running output stream.
/// Cancelling is a hard stop: the render side drops the source on the next
/// block without any fade. It's the holder's responsibility to respect a
/// cancel request.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("Error getting lock")
    }

    /// Blocks until the handle is cancelled. Returns immediately if it
    /// already was.
    pub fn wait(&self) {
        let _unused = self
            .condvar
            .wait_while(
                self.cancelled.lock().expect("Error getting lock"),
                |cancelled| !*cancelled,
            )
            .expect("Error getting lock");
    }

    /// Cancels the operation. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().expect("Error getting lock");
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_unblocks_waiter() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || cancel_handle.wait())
        };

        cancel_handle.cancel();
        assert!(join.join().is_ok());
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_wait_after_cancel_returns_immediately() {
        let cancel_handle = CancelHandle::new();
        cancel_handle.cancel();
        cancel_handle.cancel();
        cancel_handle.wait();
        assert!(cancel_handle.is_cancelled());
    }
}
