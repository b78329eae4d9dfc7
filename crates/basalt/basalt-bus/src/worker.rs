//! The background frame-servicing thread shared by every bus handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use basalt_transport::Transport;

use crate::BusError;

/// Where a worker starts in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Service every live frame, oldest first.
    Oldest,
    /// Service only frames committed after attaching.
    MostRecent,
}

/// A thread that drains committed frames from one transport.
///
/// The worker remembers its cursor offset across lock releases and
/// revalidates it on every pass, so frames evicted while a callback ran are
/// skipped by re-entering at the head. Each serviced frame is copied out of
/// the arena before the lock is dropped; callbacks never run under the
/// transport lock.
pub(crate) struct Worker {
    transport: Arc<Transport>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        transport: Arc<Transport>,
        init: Init,
        mut on_frame: impl FnMut(&[u8]) + Send + 'static,
        mut on_error: impl FnMut(BusError) + Send + 'static,
    ) -> Result<Worker, BusError> {
        // Position before the caller regains control, so nothing committed
        // after `spawn` returns can be skipped.
        let mut resume_off = 0u64;
        if init == Init::MostRecent {
            let mut locked = transport.lock()?;
            if !locked.empty() && locked.jump_tail().is_ok() {
                resume_off = locked.cursor_off();
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_transport = Arc::clone(&transport);
        let thread_stop = Arc::clone(&stop);

        let join = std::thread::spawn(move || {
            tracing::debug!("bus worker started");

            loop {
                let payload = {
                    let mut locked = match thread_transport.lock() {
                        Ok(locked) => locked,
                        Err(e) => {
                            on_error(e.into());
                            break;
                        }
                    };
                    locked.seek(resume_off);

                    let waited = locked
                        .wait(|l| thread_stop.load(Ordering::Acquire) || l.has_next());
                    if let Err(e) = waited {
                        on_error(e.into());
                        break;
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }

                    if let Err(e) = locked.next() {
                        on_error(e.into());
                        break;
                    }
                    resume_off = locked.cursor_off();
                    match locked.frame() {
                        Ok(frame) => frame.payload.to_vec(),
                        Err(e) => {
                            on_error(e.into());
                            break;
                        }
                    }
                };

                on_frame(&payload);
            }
            tracing::debug!("bus worker stopped");
        });

        Ok(Worker { transport, stop, join: Some(join) })
    }

    /// Stops the worker and joins its thread. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        if self.join.is_none() {
            return;
        }
        self.stop.store(true, Ordering::Release);
        // Kick the worker out of its condition wait.
        if let Ok(locked) = self.transport.lock() {
            let _ = locked.notify_all();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
