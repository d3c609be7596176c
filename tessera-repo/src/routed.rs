//! Reference table interface that routes keys to primaries.
//!
//! `RoutedInterface` combines the shard's routing snapshot with the table's
//! directory subview: the snapshot says which machine is primary for a key,
//! the subview says how to reach it.

use futures::FutureExt;
use tessera_core::{PeerId, TableId};
use tessera_routing::{Route, Router, RoutingResult};

use crate::directory::{BusinessCard, DirectorySubview};
use crate::interface::{ConstructContext, Constructed, InterfaceConstructor};

/// Where a key lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// The routing decision.
    pub route: Route,
    /// The primary's peer and card, if it currently publishes one for the table.
    pub contact: Option<(PeerId, BusinessCard)>,
}

/// Table interface resolving keys against routing and the directory.
#[derive(Debug)]
pub struct RoutedInterface {
    table_id: TableId,
    router: Router,
    directory: DirectorySubview,
}

impl RoutedInterface {
    /// Returns the table this interface serves.
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Locates the primary for `key`.
    ///
    /// # Errors
    ///
    /// Returns a routing error if the current snapshot has no primary for
    /// the key.
    pub fn locate(&self, key: &[u8]) -> RoutingResult<Location> {
        let route = self.router.primary_for(self.table_id, key)?;
        let contact = self.directory.card_for_machine(route.machine_id);
        Ok(Location { route, contact })
    }

    /// Returns the table's directory subview.
    #[must_use]
    pub const fn directory(&self) -> &DirectorySubview {
        &self.directory
    }
}

/// Builds [`RoutedInterface`]s.
///
/// An interface is ready once some peer publishes a card for its table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutedConstructor;

impl InterfaceConstructor for RoutedConstructor {
    type Interface = RoutedInterface;

    fn construct(&self, ctx: ConstructContext) -> Constructed<RoutedInterface> {
        let mut directory = ctx.directory.clone();
        let ready = async move { directory.wait_for_card().await }.boxed_local();
        Constructed {
            interface: RoutedInterface {
                table_id: ctx.table_id,
                router: Router::new(ctx.routing),
                directory: ctx.directory,
            },
            ready,
        }
    }
}
