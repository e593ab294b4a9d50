//! Speedtest server selection
//!
//! Holds the currently selected reference server. The selection is either
//! pinned to a fixed identifier for the lifetime of the process or left to
//! auto-select the closest server, in which case it is re-evaluated before
//! every measurement run.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::{ReferenceServer, ServerId, ServerRegistry};
use crate::error::SelectorError;

/// How the reference server is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Always use the server with this identifier; refresh is a no-op
    Pinned(ServerId),
    /// Track the closest-ranked server on every refresh
    Auto,
}

/// Tracks the selected speedtest server
pub struct ServerSelector {
    registry: Arc<dyn ServerRegistry>,
    selection: Selection,
    current: ReferenceServer,
}

impl std::fmt::Debug for ServerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSelector")
            .field("selection", &self.selection)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ServerSelector {
    /// Select the initial server from the registry
    ///
    /// With `pinned` set, the server with that identifier is looked up and
    /// pinning overrides auto-selection for the lifetime of this selector;
    /// a missing identifier fails with [`SelectorError::ServerNotFound`]
    /// and never falls back to auto-selection. Without `pinned`, the
    /// closest-ranked server wins.
    pub async fn select_initial(
        registry: Arc<dyn ServerRegistry>,
        pinned: Option<ServerId>,
    ) -> Result<Self, SelectorError> {
        match pinned {
            Some(id) => {
                let matches = registry
                    .fetch_closest(&[id])
                    .await
                    .map_err(|_| SelectorError::ServerNotFound(id))?;
                let server = matches
                    .into_iter()
                    .next()
                    .ok_or(SelectorError::ServerNotFound(id))?;

                info!(
                    "Pinned speedtest server {} ({}, {})",
                    server.id, server.sponsor, server.name
                );
                Ok(Self {
                    registry,
                    selection: Selection::Pinned(id),
                    current: server,
                })
            }
            None => {
                let catalog = registry
                    .fetch_catalog()
                    .await
                    .map_err(|_| SelectorError::NoServersAvailable)?;
                let server = catalog
                    .closest()
                    .first()
                    .cloned()
                    .ok_or(SelectorError::NoServersAvailable)?;

                info!(
                    "Selected speedtest server {} ({}, {}) at {:.1} km",
                    server.id, server.sponsor, server.name, server.distance_km
                );
                Ok(Self {
                    registry,
                    selection: Selection::Auto,
                    current: server,
                })
            }
        }
    }

    /// Re-evaluate the selection against a fresh catalog
    ///
    /// No-op when pinned. In auto mode the selection is replaced only when
    /// the top-ranked identifier differs from the current one; a failed
    /// registry call leaves the previous selection in place.
    pub async fn refresh(&mut self) -> Result<(), SelectorError> {
        if let Selection::Pinned(_) = self.selection {
            return Ok(());
        }

        let catalog = self
            .registry
            .fetch_catalog()
            .await
            .map_err(SelectorError::RefreshFailed)?;
        let best = catalog
            .closest()
            .first()
            .ok_or_else(|| SelectorError::RefreshFailed(anyhow::anyhow!("catalog is empty")))?;

        if best.id != self.current.id {
            info!(
                "Selected new speedtest server {} ({}, {})",
                best.id, best.sponsor, best.name
            );
            self.current = best.clone();
        } else {
            debug!("Speedtest server {} still closest", self.current.id);
        }
        Ok(())
    }

    /// The currently selected server
    #[must_use]
    pub fn current(&self) -> &ReferenceServer {
        &self.current
    }

    /// The selection mode
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection
    }
}
