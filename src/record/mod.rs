//! Canonical record shapes.
//!
//! Every upstream payload is normalized into one of a fixed set of record
//! kinds, each with a fixed, ordered column list. The column list is the
//! destination table's schema; a record's cell count must match it exactly.

use serde::{Deserialize, Serialize};

/// The kind of a normalized record, selecting its column schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Spot/derivatives ticker snapshot.
    MarketTick,
    /// Wallet/account balance per coin.
    Balance,
    /// Order history entry.
    Order,
    /// Trade execution with realized P&L.
    Execution,
    /// Open position snapshot.
    Position,
}

impl RecordKind {
    /// The canonical header row for this kind.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            RecordKind::MarketTick => &[
                "timestamp",
                "source",
                "symbol",
                "price_usd",
                "change_24h_percent",
                "market_cap_usd",
                "volume_24h",
                "sync_id",
                "raw_data",
            ],
            RecordKind::Balance => &[
                "timestamp",
                "account",
                "coin",
                "wallet_balance",
                "available_balance",
                "locked_balance",
                "equity",
                "usd_value",
                "unrealised_pnl",
                "cum_realised_pnl",
                "accrued_interest",
                "borrow_amount",
                "sync_id",
                "raw_data",
            ],
            RecordKind::Order => &[
                "timestamp",
                "account",
                "category",
                "symbol",
                "order_id",
                "order_link_id",
                "side",
                "order_type",
                "qty",
                "price",
                "time_in_force",
                "order_status",
                "avg_price",
                "cum_exec_qty",
                "cum_exec_value",
                "cum_exec_fee",
                "reduce_only",
                "close_on_trigger",
                "created_time",
                "updated_time",
                "reject_reason",
                "stop_order_type",
                "trigger_price",
                "take_profit",
                "stop_loss",
                "tp_trigger_by",
                "sl_trigger_by",
                "trigger_direction",
                "position_idx",
                "sync_id",
                "raw_data",
            ],
            RecordKind::Execution => &[
                "execution_time",
                "account",
                "symbol",
                "side",
                "executed_qty",
                "entry_price",
                "exit_price",
                "realized_pnl",
                "execution_type",
                "trade_id",
                "fee",
                "fee_currency",
                "created_time",
                "data_source",
                "sync_id",
                "raw_data",
            ],
            RecordKind::Position => &[
                "timestamp",
                "account",
                "category",
                "symbol",
                "side",
                "size",
                "position_value",
                "entry_price",
                "mark_price",
                "liq_price",
                "unrealised_pnl",
                "realised_pnl",
                "cum_realised_pnl",
                "leverage",
                "margin_mode",
                "position_status",
                "created_time",
                "updated_time",
                "data_source",
                "sync_id",
                "raw_data",
            ],
        }
    }

    /// Number of columns in this kind's schema.
    pub fn width(&self) -> usize {
        self.columns().len()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::MarketTick => "market_tick",
            RecordKind::Balance => "balance",
            RecordKind::Order => "order",
            RecordKind::Execution => "execution",
            RecordKind::Position => "position",
        }
    }
}

/// A single cell in a normalized row.
///
/// Missing numerics normalize to `Float(0.0)`, missing identifiers to
/// `Text("")`, and optional metrics to `Empty` (rendered as an empty cell).
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
    Empty,
}

impl Cell {
    /// Render the cell for the tabular store.
    pub fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Float(f) => format_float(*f),
            Cell::Int(i) => i.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

/// Format a float without scientific notation or trailing noise.
fn format_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Cell::Float(f)
    }
}

/// One normalized row bound for a destination table.
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    /// Event timestamp, used to advance the sync cursor.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Natural key for deduplication (source + exchange-assigned id).
    /// `None` for kinds without a stable upstream id (ticks, balances).
    pub natural_key: Option<String>,
    pub cells: Vec<Cell>,
}

impl Record {
    /// True if the cell count matches the kind's schema.
    pub fn matches_schema(&self) -> bool {
        self.cells.len() == self.kind.width()
    }

    /// Rendered row for the tabular store.
    pub fn render(&self) -> Vec<String> {
        self.cells.iter().map(Cell::render).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_widths() {
        assert_eq!(RecordKind::MarketTick.width(), 9);
        assert_eq!(RecordKind::Balance.width(), 14);
        assert_eq!(RecordKind::Order.width(), 31);
        assert_eq!(RecordKind::Execution.width(), 16);
        assert_eq!(RecordKind::Position.width(), 21);
    }

    #[test]
    fn test_every_kind_carries_sync_id_and_raw_data() {
        for kind in [
            RecordKind::MarketTick,
            RecordKind::Balance,
            RecordKind::Order,
            RecordKind::Execution,
            RecordKind::Position,
        ] {
            let cols = kind.columns();
            assert_eq!(cols[cols.len() - 2], "sync_id", "kind {:?}", kind);
            assert_eq!(cols[cols.len() - 1], "raw_data", "kind {:?}", kind);
        }
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(Cell::Float(65000.5).render(), "65000.5");
        assert_eq!(Cell::Float(120.0).render(), "120");
        assert_eq!(Cell::Int(3).render(), "3");
        assert_eq!(Cell::Bool(false).render(), "false");
        assert_eq!(Cell::Empty.render(), "");
        assert_eq!(Cell::from("BTCUSDT").render(), "BTCUSDT");
    }
}
