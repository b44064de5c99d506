//! Core engine: the fetch → evaluate → size → execute loop and the
//! components it drives.

pub mod accountant;
pub mod clock;
pub mod executor;
pub mod ledger;
pub mod reconciler;
pub mod session;

use std::sync::Arc;

use crate::data::MarketDataFeed;
use crate::platforms::ExchangeClient;
use crate::storage::journal::TradeJournal;
use crate::storage::PositionStore;
use crate::types::{EngineError, Mode};
use clock::Clock;

/// The mode-scoped collaborator set a session runs against.
///
/// Dry-run and live sessions share all engine logic and differ only in
/// what is injected here: the fill source, the balance source, the store
/// namespace and the journal file.
pub struct Venue {
    pub mode: Mode,
    pub exchange: Arc<dyn ExchangeClient>,
    pub feed: Arc<dyn MarketDataFeed>,
    pub store: Arc<dyn PositionStore>,
    pub journal: Option<Arc<TradeJournal>>,
    pub clock: Arc<dyn Clock>,
}

impl Venue {
    /// Every mode-tagged collaborator must agree with `mode`.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.store.mode() != self.mode {
            return Err(EngineError::ModeMismatch {
                expected: self.mode,
                found: self.store.mode(),
            });
        }
        if let Some(journal) = &self.journal {
            if journal.mode() != self.mode {
                return Err(EngineError::ModeMismatch {
                    expected: self.mode,
                    found: journal.mode(),
                });
            }
        }
        Ok(())
    }
}
