//! Trading session: routes market events through the engine to a venue.

use crate::execution::{ExecutionVenue, TargetExposure};
use crate::feed::EventFeed;
use crate::market::MarketEvent;
use crate::persistence::HedgeJournal;
use crate::strategy::{BarOutcome, HedgeEngine};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Running counters for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub bars: u64,
    pub quotes: u64,
    pub recalculations: u64,
    pub hedges_opened: u64,
    pub hedges_closed: u64,
    pub fills: u64,
    pub rejections: u64,
    pub dropped_events: u64,
}

/// Drives one engine against one execution venue.
pub struct HedgeSession<V: ExecutionVenue> {
    engine: HedgeEngine,
    venue: Arc<V>,
    journal: Option<HedgeJournal>,
    stats: SessionStats,
}

impl<V: ExecutionVenue> HedgeSession<V> {
    pub fn new(engine: HedgeEngine, venue: Arc<V>) -> Self {
        Self {
            engine,
            venue,
            journal: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_journal(mut self, journal: HedgeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Process one market event.
    ///
    /// Bars mark the venue at their close before the engine sees them, so
    /// instructions fill at the bar's price. Returns the engine's outcome for
    /// bars and `None` for quotes.
    pub async fn handle(&mut self, event: MarketEvent) -> Result<Option<BarOutcome>> {
        match event {
            MarketEvent::Quote(quote) => {
                self.engine.on_quote(&quote)?;
                self.stats.quotes += 1;
                Ok(None)
            }
            MarketEvent::Bar(bar) => {
                let symbol = self.engine.universe().symbol(bar.instrument).to_string();
                self.venue.mark_price(&symbol, bar.close).await;

                let outcome = self.engine.on_bar(&bar)?;
                self.stats.bars += 1;
                if outcome.recalculated.is_some() {
                    self.stats.recalculations += 1;
                }
                self.stats.hedges_opened += outcome.opened.len() as u64;
                self.stats.hedges_closed += outcome.closed.len() as u64;

                self.execute(&outcome.instructions).await;
                self.journal_outcome(&outcome)?;

                Ok(Some(outcome))
            }
        }
    }

    /// Send instructions to the venue, rolling back any it refuses.
    async fn execute(&mut self, instructions: &[TargetExposure]) {
        for instruction in instructions {
            match self.venue.set_target_exposure(instruction).await {
                Ok(fill) => {
                    self.stats.fills += 1;
                    debug!(
                        symbol = %fill.symbol,
                        traded = %fill.traded,
                        net = %fill.net,
                        "Instruction filled"
                    );
                    if let Some(journal) = &self.journal {
                        if let Err(e) = journal.record_fill(&fill, &instruction.tag) {
                            warn!(error = %e, "Failed to journal fill");
                        }
                    }
                }
                Err(e) => {
                    self.stats.rejections += 1;
                    warn!(symbol = %instruction.symbol, error = %e, "Execution rejected");
                    self.engine.on_execution_rejected(instruction);
                }
            }
        }
    }

    fn journal_outcome(&self, outcome: &BarOutcome) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        if outcome.opened.is_empty() && outcome.closed.is_empty() {
            return Ok(());
        }
        for closed in &outcome.closed {
            journal.record_close(closed)?;
        }
        for opened in &outcome.opened {
            journal.record_open(opened)?;
        }
        journal.snapshot_open_hedges(self.engine.ledger(), self.engine.universe())
    }

    /// Consume events until every feed handle is dropped.
    pub async fn run(&mut self, mut feed: EventFeed) -> Result<SessionStats> {
        info!("Session started");
        while let Some(event) = feed.next().await {
            if let Err(e) = self.handle(event).await {
                self.stats.dropped_events += 1;
                warn!(error = %e, "Event dropped");
            }
        }
        info!(
            bars = self.stats.bars,
            opened = self.stats.hedges_opened,
            closed = self.stats.hedges_closed,
            rejections = self.stats.rejections,
            "Session finished"
        );
        Ok(self.stats.clone())
    }

    pub fn engine(&self) -> &HedgeEngine {
        &self.engine
    }

    pub fn venue(&self) -> &Arc<V> {
        &self.venue
    }

    pub fn journal(&self) -> Option<&HedgeJournal> {
        self.journal.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}
