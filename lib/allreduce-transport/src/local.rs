use std::{collections::HashMap, sync::Arc};

use allreduce_types::Rank;
use error_stack::Report;
use tokio::sync::{mpsc, Notify};

use crate::{
    envelope::Envelope,
    error::{Result, TransportError},
    transport::Transport,
};

/// An in-process stand-in for the real network this crate treats as an external collaborator
/// (§1, §6.1): one unbounded channel per rank, fed by a [`LocalTransport`] handle cloned out to
/// every other rank. FIFO per `(src, dest)` holds because each rank only ever sends through its
/// own cloned [`mpsc::UnboundedSender`], and a single sender's sends are delivered in order.
pub struct LocalNetwork<T> {
    senders: HashMap<Rank, mpsc::UnboundedSender<Envelope<T>>>,
}

impl<T> LocalNetwork<T> {
    /// Builds one inbox per rank in `ranks`, returning the network (for minting
    /// [`LocalTransport`] handles) and the map of receivers, one of which each simulated rank
    /// takes ownership of to drive its [`run_rank`] loop.
    #[must_use]
    pub fn new(
        ranks: impl IntoIterator<Item = Rank>,
    ) -> (Self, HashMap<Rank, mpsc::UnboundedReceiver<Envelope<T>>>) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for rank in ranks {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(rank, tx);
            receivers.insert(rank, rx);
        }
        (Self { senders }, receivers)
    }

    /// Mints a transport handle that can reach every rank in the network. Every rank uses one
    /// of these as its `Transport<T>` implementation.
    #[must_use]
    pub fn transport(&self) -> LocalTransport<T> {
        LocalTransport {
            senders: self.senders.clone(),
        }
    }
}

impl<T> Clone for LocalNetwork<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LocalTransport<T> {
    senders: HashMap<Rank, mpsc::UnboundedSender<Envelope<T>>>,
}

impl<T: Send + Sync + 'static> Transport<T> for LocalTransport<T> {
    fn send(&self, dest: Rank, envelope: Envelope<T>) -> Result<()> {
        let sender = self
            .senders
            .get(&dest)
            .ok_or_else(|| Report::new(TransportError::UnknownDestination(dest)))?;
        sender
            .send(envelope)
            .map_err(|_dropped| Report::new(TransportError::Disconnected(dest)))
    }
}

/// The consumed `isTerminated` surface (§6), driven by an explicit signal rather than a real
/// scheduler idle-detection pass — this repository's ranks never go idle in a way that would
/// need polling, they just run until told to stop.
#[derive(Clone, Default)]
pub struct Shutdown {
    notify: Arc<Notify>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn watcher(&self) -> ShutdownWatcher {
        ShutdownWatcher {
            notify: Arc::clone(&self.notify),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownWatcher {
    notify: Arc<Notify>,
}

impl ShutdownWatcher {
    pub async fn terminated(&self) {
        self.notify.notified().await;
    }
}

/// Drives one simulated rank's `runScheduler()` loop (§6): pulls envelopes off its inbox,
/// handing each to `on_envelope`, until [`Shutdown::signal`] fires or every sender to this rank
/// has been dropped.
pub async fn run_rank<T>(
    inbox: &mut mpsc::UnboundedReceiver<Envelope<T>>,
    shutdown: &ShutdownWatcher,
    mut on_envelope: impl FnMut(Envelope<T>),
) {
    loop {
        tokio::select! {
            () = shutdown.terminated() => return,
            envelope = inbox.recv() => {
                match envelope {
                    Some(envelope) => on_envelope(envelope),
                    None => return,
                }
            }
        }
    }
}
