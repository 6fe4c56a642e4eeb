//! Posted Acts
//!
//! A posted act is a deferred closure run at the start of the next
//! `Manager::update()`. Acts are how outside code (input handlers, other
//! threads) feeds new values into providers without touching the graph while
//! a tick is in progress.
//!
//! Acts pushed on the manager's own thread go straight into a local FIFO.
//! Acts sent through a [`PostHandle`] from other threads travel over a channel
//! and are moved into the FIFO when a tick begins.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::Manager;
use crate::error::{FlowError, Result};

/// A deferred action run by the manager during `update()`.
pub type PostedAct = Box<dyn FnOnce(&mut Manager) + Send>;

/// Cloneable handle for posting acts from any thread.
#[derive(Clone)]
pub struct PostHandle {
    tx: UnboundedSender<PostedAct>,
}

impl PostHandle {
    /// Queue `act` for the manager's next tick.
    ///
    /// Fails with [`FlowError::Closed`] once the manager has been dropped.
    pub fn post<F>(&self, act: F) -> Result<()>
    where
        F: FnOnce(&mut Manager) + Send + 'static,
    {
        self.tx.send(Box::new(act)).map_err(|_| FlowError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for PostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// FIFO of acts waiting for the next tick.
pub(crate) struct ActQueue {
    local: VecDeque<PostedAct>,
    remote_tx: UnboundedSender<PostedAct>,
    remote_rx: UnboundedReceiver<PostedAct>,
}

impl ActQueue {
    pub fn new() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            local: VecDeque::new(),
            remote_tx,
            remote_rx,
        }
    }

    pub fn push(&mut self, act: PostedAct) {
        self.local.push_back(act);
    }

    pub fn handle(&self) -> PostHandle {
        PostHandle {
            tx: self.remote_tx.clone(),
        }
    }

    /// Move acts posted from other threads behind the local ones.
    pub fn collect_remote(&mut self) {
        while let Ok(act) = self.remote_rx.try_recv() {
            self.local.push_back(act);
        }
    }

    /// Take every queued act. Acts pushed afterwards form the next round.
    pub fn take_round(&mut self) -> VecDeque<PostedAct> {
        std::mem::take(&mut self.local)
    }

    /// Drop everything still queued, returning how many acts were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.local.len();
        self.local.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}
