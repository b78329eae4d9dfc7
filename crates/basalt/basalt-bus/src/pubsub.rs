//! Publish/subscribe over one transport per topic.

use std::sync::Arc;

use basalt_arena::{ArenaFile, FileOptions};
use basalt_packet::{Packet, PacketView};
use basalt_transport::Transport;

use crate::worker::{Init, Worker};
use crate::{BusError, commit_packet, topic};

/// Writes packets onto a pub/sub topic.
pub struct Publisher {
    transport: Arc<Transport>,
}

impl Publisher {
    pub fn open(name: &str, opts: &FileOptions) -> Result<Publisher, BusError> {
        let file = ArenaFile::open(topic::pubsub_path(name), opts)?;
        let transport = Arc::new(Transport::new(file.into_arena())?);
        Ok(Publisher { transport })
    }

    /// Commits `pkt` as one frame. Oldest frames are evicted if the topic's
    /// arena is out of room.
    pub fn publish(&self, pkt: &Packet) -> Result<(), BusError> {
        commit_packet(&self.transport, pkt)
    }
}

/// Reads packets from a pub/sub topic on a background thread.
pub struct Subscriber {
    worker: Worker,
}

impl Subscriber {
    pub fn open(
        name: &str,
        opts: &FileOptions,
        init: Init,
        mut on_packet: impl FnMut(PacketView<'_>) + Send + 'static,
    ) -> Result<Subscriber, BusError> {
        let file = ArenaFile::open(topic::pubsub_path(name), opts)?;
        let transport = Arc::new(Transport::new(file.into_arena())?);

        let worker = Worker::spawn(
            transport,
            init,
            move |buf| match PacketView::parse(buf) {
                Ok(view) => on_packet(view),
                Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
            },
            |e| tracing::error!(error = %e, "subscriber worker failed"),
        )?;
        Ok(Subscriber { worker })
    }

    /// Stops the background worker and waits for it to finish.
    pub fn close(mut self) {
        self.worker.shutdown();
    }
}
