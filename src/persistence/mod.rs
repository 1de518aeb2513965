//! SQLite hedge journal.
//!
//! Records what the engine and venue did so a run can be inspected afterwards:
//! - Hedge open/close events
//! - Venue fills
//! - Snapshot of currently open hedges
//! - Equity snapshots

use crate::execution::Fill;
use crate::market::Universe;
use crate::strategy::{HedgeClosed, HedgeLedger, HedgeOpened};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A recorded hedge open or close.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEvent {
    pub timestamp: DateTime<Utc>,
    /// "open" or "close"
    pub kind: String,
    pub main_symbol: String,
    pub sub_symbol: String,
    pub action: String,
    pub points: Option<Decimal>,
    pub currency: Option<Decimal>,
}

/// An open hedge as last snapshotted.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalHedge {
    pub main_symbol: String,
    pub sub_symbol: String,
    pub action: String,
    pub correlation: Decimal,
    pub main_volume: Decimal,
    pub main_entry: Decimal,
    pub sub_volume: Decimal,
    pub sub_entry: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Aggregates over closed hedges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalSummary {
    pub opened: u64,
    pub closed: u64,
    pub winning: u64,
    pub total_points: Decimal,
    pub total_currency: Decimal,
    pub last_event: Option<DateTime<Utc>>,
    pub last_equity: Option<Decimal>,
}

/// SQLite-backed journal of hedge activity.
pub struct HedgeJournal {
    conn: Connection,
}

fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_default()
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl HedgeJournal {
    /// Open (or create) a journal, initializing the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open journal at {:?}", db_path.as_ref()))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Hedge journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hedge_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                main_symbol TEXT NOT NULL,
                sub_symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                correlation TEXT,
                hedge_range TEXT,
                main_volume TEXT,
                sub_volume TEXT,
                points TEXT,
                currency TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hedge_events_timestamp ON hedge_events(timestamp);

            CREATE TABLE IF NOT EXISTS open_hedges (
                pair TEXT PRIMARY KEY,
                main_symbol TEXT NOT NULL,
                sub_symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                correlation TEXT NOT NULL,
                main_volume TEXT NOT NULL,
                main_entry TEXT NOT NULL,
                sub_volume TEXT NOT NULL,
                sub_entry TEXT NOT NULL,
                opened_at TEXT
            );

            CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                traded TEXT NOT NULL,
                net TEXT NOT NULL,
                price TEXT NOT NULL,
                commission TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                tag TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_symbol ON fills(symbol);

            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                balance TEXT NOT NULL,
                equity TEXT NOT NULL,
                open_hedges INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON equity_snapshots(timestamp);
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    pub fn record_open(&self, event: &HedgeOpened) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO hedge_events (timestamp, kind, main_symbol, sub_symbol, action,
                                      correlation, hedge_range, main_volume, sub_volume)
            VALUES (?1, 'open', ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.at.to_rfc3339(),
                event.main_symbol,
                event.sub_symbol,
                event.action.to_string(),
                event.correlation.to_string(),
                event.hedge_range.to_string(),
                event.main.volume.to_string(),
                event.sub.volume.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn record_close(&self, event: &HedgeClosed) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO hedge_events (timestamp, kind, main_symbol, sub_symbol, action,
                                      points, currency)
            VALUES (?1, 'close', ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.at.to_rfc3339(),
                event.main_symbol,
                event.sub_symbol,
                event.action.to_string(),
                event.pnl.points.to_string(),
                event.pnl.currency.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn record_fill(&self, fill: &Fill, tag: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO fills (timestamp, symbol, traded, net, price, commission, realized_pnl, tag)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                fill.filled_at.to_rfc3339(),
                fill.symbol,
                fill.traded.to_string(),
                fill.net.to_string(),
                fill.price.to_string(),
                fill.commission.to_string(),
                fill.realized_pnl.to_string(),
                tag,
            ],
        )?;
        Ok(())
    }

    pub fn record_equity(
        &self,
        at: DateTime<Utc>,
        balance: Decimal,
        equity: Decimal,
        open_hedges: usize,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO equity_snapshots (timestamp, balance, equity, open_hedges)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                at.to_rfc3339(),
                balance.to_string(),
                equity.to_string(),
                open_hedges,
            ],
        )?;
        Ok(())
    }

    /// Replace the open-hedge snapshot with the ledger's open hedges.
    pub fn snapshot_open_hedges(&self, ledger: &HedgeLedger, universe: &Universe) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM open_hedges", [])?;

        for state in ledger.open_hedges() {
            tx.execute(
                r#"
                INSERT INTO open_hedges (pair, main_symbol, sub_symbol, action, correlation,
                                         main_volume, main_entry, sub_volume, sub_entry, opened_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    state.key.to_string(),
                    universe.symbol(state.key.main()),
                    universe.symbol(state.key.sub()),
                    state.action.to_string(),
                    state.correlation.to_string(),
                    state.main.volume.to_string(),
                    state.main.entry_price.unwrap_or_default().to_string(),
                    state.sub.volume.to_string(),
                    state.sub.entry_price.unwrap_or_default().to_string(),
                    state.opened_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        }

        tx.commit()?;
        debug!(open = ledger.open_count(), "Open hedges snapshotted");
        Ok(())
    }

    pub fn open_hedges(&self) -> Result<Vec<JournalHedge>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT main_symbol, sub_symbol, action, correlation, main_volume, main_entry,
                   sub_volume, sub_entry, opened_at
            FROM open_hedges
            ORDER BY pair
            "#,
        )?;

        let hedges = stmt
            .query_map([], |row| {
                let opened_at: Option<String> = row.get(8)?;
                Ok(JournalHedge {
                    main_symbol: row.get(0)?,
                    sub_symbol: row.get(1)?,
                    action: row.get(2)?,
                    correlation: parse_decimal(&row.get::<_, String>(3)?),
                    main_volume: parse_decimal(&row.get::<_, String>(4)?),
                    main_entry: parse_decimal(&row.get::<_, String>(5)?),
                    sub_volume: parse_decimal(&row.get::<_, String>(6)?),
                    sub_entry: parse_decimal(&row.get::<_, String>(7)?),
                    opened_at: opened_at.as_deref().and_then(parse_time),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(hedges)
    }

    /// Most recent hedge events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<JournalEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, kind, main_symbol, sub_symbol, action, points, currency
            FROM hedge_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit], |row| {
                let timestamp: String = row.get(0)?;
                let points: Option<String> = row.get(5)?;
                let currency: Option<String> = row.get(6)?;
                Ok(JournalEvent {
                    timestamp: parse_time(&timestamp).unwrap_or_else(Utc::now),
                    kind: row.get(1)?,
                    main_symbol: row.get(2)?,
                    sub_symbol: row.get(3)?,
                    action: row.get(4)?,
                    points: points.as_deref().map(parse_decimal),
                    currency: currency.as_deref().map(parse_decimal),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }

    pub fn summary(&self) -> Result<JournalSummary> {
        let mut summary = JournalSummary::default();

        let mut stmt = self
            .conn
            .prepare("SELECT timestamp, kind, points, currency FROM hedge_events ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        for row in rows {
            let (timestamp, kind, points, currency) = row?;
            summary.last_event = parse_time(&timestamp);
            if kind == "open" {
                summary.opened += 1;
                continue;
            }
            summary.closed += 1;
            let currency = currency.as_deref().map(parse_decimal).unwrap_or_default();
            if currency > Decimal::ZERO {
                summary.winning += 1;
            }
            summary.total_currency += currency;
            summary.total_points += points.as_deref().map(parse_decimal).unwrap_or_default();
        }

        summary.last_equity = self
            .conn
            .query_row(
                "SELECT equity FROM equity_snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|raw| parse_decimal(&raw));

        Ok(summary)
    }

    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing hedge journal");
        self.conn.execute_batch(
            r#"
            DELETE FROM hedge_events;
            DELETE FROM open_hedges;
            DELETE FROM fills;
            DELETE FROM equity_snapshots;
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{InstrumentId, InstrumentSpec};
    use crate::strategy::{HedgeAction, HedgeLeg, HedgePnl, PairKey};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn key() -> PairKey {
        PairKey::new(InstrumentId(0), InstrumentId(1)).unwrap()
    }

    fn opened_event() -> HedgeOpened {
        HedgeOpened {
            key: key(),
            main_symbol: "EURUSD".to_string(),
            sub_symbol: "GBPUSD".to_string(),
            action: HedgeAction::BuyMainSellSub,
            correlation: dec!(0.93),
            hedge_range: dec!(-140),
            main: HedgeLeg {
                instrument: InstrumentId(0),
                direction: 1,
                volume: dec!(0.12),
                entry_price: Some(dec!(1.0850)),
            },
            sub: HedgeLeg {
                instrument: InstrumentId(1),
                direction: -1,
                volume: dec!(0.1),
                entry_price: Some(dec!(1.2640)),
            },
            at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    fn closed_event(currency: Decimal) -> HedgeClosed {
        HedgeClosed {
            key: key(),
            main_symbol: "EURUSD".to_string(),
            sub_symbol: "GBPUSD".to_string(),
            action: HedgeAction::BuyMainSellSub,
            pnl: HedgePnl {
                points: currency,
                currency,
            },
            opened_at: None,
            at: Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_summary_counts_events() {
        let journal = HedgeJournal::new(":memory:").unwrap();
        journal.record_open(&opened_event()).unwrap();
        journal.record_close(&closed_event(dec!(120))).unwrap();
        journal.record_open(&opened_event()).unwrap();
        journal.record_close(&closed_event(dec!(-30))).unwrap();
        journal
            .record_equity(Utc::now(), dec!(10090), dec!(10090), 0)
            .unwrap();

        let summary = journal.summary().unwrap();
        assert_eq!(summary.opened, 2);
        assert_eq!(summary.closed, 2);
        assert_eq!(summary.winning, 1);
        assert_eq!(summary.total_currency, dec!(90));
        assert_eq!(summary.last_equity, Some(dec!(10090)));

        let recent = journal.recent_events(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, "close");
        assert_eq!(recent[0].currency, Some(dec!(-30)));
    }

    #[test]
    fn test_open_hedge_snapshot_replaces_previous() {
        let journal = HedgeJournal::new(":memory:").unwrap();
        let universe = Universe::new(vec![
            InstrumentSpec::new("EURUSD", dec!(0.0001)),
            InstrumentSpec::new("GBPUSD", dec!(0.0001)),
        ])
        .unwrap();

        let mut ledger = HedgeLedger::new();
        ledger.upsert_qualified(key(), dec!(0.93), dec!(1.2));
        ledger.get_mut(&key()).unwrap().open(
            HedgeAction::SellMainBuySub,
            (dec!(0.12), dec!(0.1)),
            (dec!(1.0850), dec!(1.2640)),
            Utc::now(),
        );

        journal.snapshot_open_hedges(&ledger, &universe).unwrap();
        let hedges = journal.open_hedges().unwrap();
        assert_eq!(hedges.len(), 1);
        assert_eq!(hedges[0].main_symbol, "EURUSD");
        assert_eq!(hedges[0].main_entry, dec!(1.0850));
        assert_eq!(hedges[0].sub_volume, dec!(0.1));

        ledger.get_mut(&key()).unwrap().close();
        journal.snapshot_open_hedges(&ledger, &universe).unwrap();
        assert!(journal.open_hedges().unwrap().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let journal = HedgeJournal::new(":memory:").unwrap();
        journal.record_open(&opened_event()).unwrap();
        journal.clear_all().unwrap();
        assert_eq!(journal.summary().unwrap(), JournalSummary::default());
    }
}
