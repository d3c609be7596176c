//! Cluster directory views and the coordinator that hands them out.
//!
//! The directory is the per-peer state each peer publishes (which machine it
//! is and a business card per table it serves). A table interface only needs
//! the slice for its own table, so the coordinator projects the directory
//! into a per-table `DirectorySubview`.
//!
//! Subviews are created only on the coordinator task, which owns the
//! directory subscription. A shard asks for one by message and receives an
//! owned handle that is safe to read from any thread:
//!
//! ```text
//! shard ── Subview{table, reply} ──► Coordinator ──► spawn projection task
//!   ▲                                                      │
//!   └──────────── DirectorySubview (watch receiver) ◄──────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tessera_core::{MachineId, PeerId, TableId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::error::DirectoryError;

/// Depth of the coordinator's command queue.
const COORDINATOR_QUEUE_DEPTH: usize = 256;

/// Opaque contact information a peer publishes for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCard(Bytes);

impl BusinessCard {
    /// Creates a business card from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Everything one peer publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDirectory {
    machine_id: MachineId,
    cards: BTreeMap<TableId, BusinessCard>,
}

impl PeerDirectory {
    /// Creates the entry of a peer running as `machine_id`, with no cards.
    #[must_use]
    pub const fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            cards: BTreeMap::new(),
        }
    }

    /// Returns the entry with a card published for `table_id`.
    #[must_use]
    pub fn with_card(mut self, table_id: TableId, card: BusinessCard) -> Self {
        self.cards.insert(table_id, card);
        self
    }

    /// Returns the machine this peer runs as.
    #[must_use]
    pub const fn machine_id(&self) -> MachineId {
        self.machine_id
    }

    /// Returns the card published for `table_id`.
    #[must_use]
    pub fn card(&self, table_id: TableId) -> Option<&BusinessCard> {
        self.cards.get(&table_id)
    }
}

/// Directory contents: every connected peer and what it publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryState {
    peers: BTreeMap<PeerId, PeerDirectory>,
}

impl DirectoryState {
    /// Creates an empty directory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }

    /// Returns the directory with `peer` publishing `entry`.
    #[must_use]
    pub fn with_peer(mut self, peer: PeerId, entry: PeerDirectory) -> Self {
        self.peers.insert(peer, entry);
        self
    }

    /// Sets or replaces what `peer` publishes.
    pub fn set_peer(&mut self, peer: PeerId, entry: PeerDirectory) {
        self.peers.insert(peer, entry);
    }

    /// Removes a peer that disconnected.
    pub fn remove_peer(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    /// Projects the directory onto one table.
    ///
    /// Every known peer appears; peers that publish nothing for the table
    /// map to a state without a card.
    #[must_use]
    pub fn project(&self, table_id: TableId) -> TableCards {
        self.peers
            .iter()
            .map(|(&peer, entry)| {
                let state = PeerTableState {
                    machine_id: entry.machine_id,
                    card: entry.card(table_id).cloned(),
                };
                (peer, state)
            })
            .collect()
    }
}

/// What one peer publishes for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTableState {
    /// The machine the peer runs as.
    pub machine_id: MachineId,
    /// The peer's card for the table, if it serves it.
    pub card: Option<BusinessCard>,
}

/// Per-table projection of the directory.
pub type TableCards = BTreeMap<PeerId, PeerTableState>;

/// Read-only, watchable view of the directory for one table.
///
/// Cloning is cheap and clones may be read from any thread. The projection
/// behind it stops once every clone is dropped.
#[derive(Debug, Clone)]
pub struct DirectorySubview {
    table_id: TableId,
    rx: watch::Receiver<Arc<TableCards>>,
}

impl DirectorySubview {
    /// Creates a subview that never changes.
    #[must_use]
    pub fn fixed(table_id: TableId, cards: TableCards) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(cards));
        Self { table_id, rx }
    }

    /// Returns the table this subview covers.
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the current projection.
    #[must_use]
    pub fn current(&self) -> Arc<TableCards> {
        Arc::clone(&self.rx.borrow())
    }

    /// Returns the peer and card of the peer running as `machine_id`.
    #[must_use]
    pub fn card_for_machine(&self, machine_id: MachineId) -> Option<(PeerId, BusinessCard)> {
        self.rx.borrow().iter().find_map(|(&peer, state)| {
            if state.machine_id != machine_id {
                return None;
            }
            state.card.clone().map(|card| (peer, card))
        })
    }

    /// Returns the number of peers publishing a card for the table.
    #[must_use]
    pub fn card_count(&self) -> usize {
        self.rx
            .borrow()
            .values()
            .filter(|state| state.card.is_some())
            .count()
    }

    /// Waits until at least one peer publishes a card for the table.
    ///
    /// Never returns if the projection stops before that happens.
    pub async fn wait_for_card(&mut self) {
        let found = self
            .rx
            .wait_for(|cards| cards.values().any(|state| state.card.is_some()))
            .await
            .is_ok();
        if !found {
            std::future::pending::<()>().await;
        }
    }

    /// Waits for the projection to change.
    ///
    /// Returns false once the projection has stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Commands accepted by the coordinator.
#[derive(Debug)]
enum CoordinatorCommand {
    Subview {
        table_id: TableId,
        reply: oneshot::Sender<DirectorySubview>,
    },
}

/// Handle for requesting subviews from the coordinator.
#[derive(Debug, Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl DirectoryHandle {
    /// Requests the directory subview for `table_id`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::CoordinatorUnavailable` if the coordinator
    /// has stopped.
    pub async fn subview(&self, table_id: TableId) -> Result<DirectorySubview, DirectoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::Subview { table_id, reply })
            .await
            .map_err(|_| DirectoryError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| DirectoryError::CoordinatorUnavailable)
    }
}

/// Owner of the directory subscription.
///
/// Runs on the coordinating runtime; everything it hands out is `Send`.
#[derive(Debug)]
pub struct Coordinator {
    directory: watch::Receiver<Arc<DirectoryState>>,
    commands: mpsc::Receiver<CoordinatorCommand>,
}

impl Coordinator {
    /// Creates a coordinator and the handle used to reach it.
    #[must_use]
    pub fn new(directory: watch::Receiver<Arc<DirectoryState>>) -> (Self, DirectoryHandle) {
        let (tx, commands) = mpsc::channel(COORDINATOR_QUEUE_DEPTH);
        (
            Self {
                directory,
                commands,
            },
            DirectoryHandle { tx },
        )
    }

    /// Serves subview requests until `shutdown` fires or every handle is dropped.
    ///
    /// Projection tasks stop with it.
    #[instrument(skip_all, name = "directory_coordinator")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Directory coordinator started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(CoordinatorCommand::Subview { table_id, reply }) => {
                        let subview = self.open_subview(table_id, &shutdown);
                        // The requester may have been cancelled meanwhile.
                        let _ = reply.send(subview);
                    }
                    None => break,
                },
            }
        }
        debug!("Directory coordinator stopped");
    }

    fn open_subview(&self, table_id: TableId, shutdown: &CancellationToken) -> DirectorySubview {
        let mut directory = self.directory.clone();
        let initial = directory.borrow_and_update().project(table_id);
        let (tx, rx) = watch::channel(Arc::new(initial));
        tokio::spawn(project_table(directory, table_id, tx, shutdown.clone()));
        trace!(table_id = %table_id, "Opened directory subview");
        DirectorySubview { table_id, rx }
    }
}

/// Keeps one table's projection up to date until nobody reads it.
async fn project_table(
    mut directory: watch::Receiver<Arc<DirectoryState>>,
    table_id: TableId,
    tx: watch::Sender<Arc<TableCards>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tx.closed() => break,
            changed = directory.changed() => {
                if changed.is_err() {
                    break;
                }
                let cards = directory.borrow_and_update().project(table_id);
                tx.send_if_modified(|current| {
                    if **current == cards {
                        return false;
                    }
                    *current = Arc::new(cards);
                    true
                });
            }
        }
    }
    trace!(table_id = %table_id, "Directory subview closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> DirectoryState {
        DirectoryState::new()
            .with_peer(
                PeerId::new(1),
                PeerDirectory::new(MachineId::new(10))
                    .with_card(TableId::new(1), BusinessCard::new(&b"m10-t1"[..])),
            )
            .with_peer(PeerId::new(2), PeerDirectory::new(MachineId::new(20)))
    }

    #[test]
    fn test_project_lists_every_peer() {
        let cards = directory().project(TableId::new(1));

        assert_eq!(cards.len(), 2);
        assert_eq!(
            cards[&PeerId::new(1)].card,
            Some(BusinessCard::new(&b"m10-t1"[..]))
        );
        assert_eq!(cards[&PeerId::new(2)].card, None);
        assert_eq!(cards[&PeerId::new(2)].machine_id, MachineId::new(20));
    }

    #[test]
    fn test_fixed_subview_lookup() {
        let table = TableId::new(1);
        let subview = DirectorySubview::fixed(table, directory().project(table));

        assert_eq!(subview.card_count(), 1);
        assert_eq!(
            subview.card_for_machine(MachineId::new(10)),
            Some((PeerId::new(1), BusinessCard::new(&b"m10-t1"[..])))
        );
        assert_eq!(subview.card_for_machine(MachineId::new(20)), None);
    }

    #[tokio::test]
    async fn test_subview_follows_directory() {
        let table = TableId::new(2);
        let (dir_tx, dir_rx) = watch::channel(Arc::new(directory()));
        let (coordinator, handle) = Coordinator::new(dir_rx);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(coordinator.run(shutdown.clone()));

        let mut subview = handle.subview(table).await.unwrap();
        assert_eq!(subview.table_id(), table);
        assert_eq!(subview.card_count(), 0);

        let mut updated = directory();
        updated.set_peer(
            PeerId::new(2),
            PeerDirectory::new(MachineId::new(20)).with_card(table, BusinessCard::new(&b"m20"[..])),
        );
        dir_tx.send_replace(Arc::new(updated));

        subview.wait_for_card().await;
        assert_eq!(
            subview.card_for_machine(MachineId::new(20)).map(|(peer, _)| peer),
            Some(PeerId::new(2))
        );

        shutdown.cancel();
        running.await.unwrap();
        assert!(!subview.changed().await);
        assert_eq!(
            handle.subview(table).await.unwrap_err(),
            DirectoryError::CoordinatorUnavailable
        );
    }
}
