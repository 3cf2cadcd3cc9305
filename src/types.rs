use serde::Deserialize;

// ─── Market Side ───

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short. Entry quantities carry this sign.
    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

// ─── Orders ───

/// Label carried by every planned order. Matching ignores it; fills surface it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderTag {
    None,
    InitialEntry(Side),
    PrimaryRentry(Side),
    SecondaryRentry(Side),
    UnstuckEntry(Side),
    NormalClose(Side),
    UnstuckClose(Side),
    Bankruptcy(Side),
}

impl OrderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderTag::None => "",
            OrderTag::InitialEntry(Side::Long) => "long_ientry",
            OrderTag::InitialEntry(Side::Short) => "short_ientry",
            OrderTag::PrimaryRentry(Side::Long) => "long_primary_rentry",
            OrderTag::PrimaryRentry(Side::Short) => "short_primary_rentry",
            OrderTag::SecondaryRentry(Side::Long) => "long_secondary_rentry",
            OrderTag::SecondaryRentry(Side::Short) => "short_secondary_rentry",
            OrderTag::UnstuckEntry(Side::Long) => "long_unstuck_entry",
            OrderTag::UnstuckEntry(Side::Short) => "short_unstuck_entry",
            OrderTag::NormalClose(Side::Long) => "long_nclose",
            OrderTag::NormalClose(Side::Short) => "short_nclose",
            OrderTag::UnstuckClose(Side::Long) => "long_unstuck_close",
            OrderTag::UnstuckClose(Side::Short) => "short_unstuck_close",
            OrderTag::Bankruptcy(Side::Long) => "long_bankruptcy",
            OrderTag::Bankruptcy(Side::Short) => "short_bankruptcy",
        }
    }
}

impl std::fmt::Display for OrderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resting order: signed quantity, limit price, tag.
/// Long entries have qty > 0 and long closes qty < 0; short inverts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Order {
    pub qty: f64,
    pub price: f64,
    pub tag: OrderTag,
}

impl Order {
    pub const EMPTY: Order = Order {
        qty: 0.0,
        price: 0.0,
        tag: OrderTag::None,
    };
}

/// One node of a pre-computed entry ladder: the order itself plus the
/// cumulative position and wallet exposure it would leave behind.
#[derive(Clone, Copy, Debug)]
pub struct GridNode {
    pub qty: f64,
    pub price: f64,
    pub psize: f64,
    pub pprice: f64,
    pub wallet_exposure: f64,
}

// ─── Position ───

/// Signed net quantity held and its volume-weighted average entry price.
/// Long sizes are non-negative, short sizes non-positive; price >= 0.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub size: f64,
    pub price: f64,
}

impl Position {
    pub const FLAT: Position = Position {
        size: 0.0,
        price: 0.0,
    };

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }
}

// ─── Instrument ───

/// Immutable per-run instrument descriptor.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExchangeParams {
    pub qty_step: f64,
    pub price_step: f64,
    pub min_qty: f64,
    pub min_cost: f64,
    /// Contract multiplier (inverse contracts only).
    pub c_mult: f64,
    /// Inverse contract: qty quoted in quote currency, cost scales as 1/price.
    pub inverse: bool,
    /// Spot market: no leverage, no net shorts, wider breakeven markup.
    pub spot: bool,
    pub maker_fee: f64,
    /// Simulated order round-trip latency, added to grid refresh timestamps.
    pub latency_ms: f64,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            qty_step: 0.001,
            price_step: 0.01,
            min_qty: 0.001,
            min_cost: 5.0,
            c_mult: 1.0,
            inverse: false,
            spot: false,
            maker_fee: 0.0002,
            latency_ms: 1000.0,
        }
    }
}

// ─── Ticks ───

/// One trade observation. `qty == 0.0` means "no trade this tick" and is
/// skipped by the matching engine (EMAs still advance).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub ts: f64,
    pub qty: f64,
    pub price: f64,
}

// ─── Simulation Output Records ───

/// One execution event, appended per matched order.
#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub index: usize,
    pub timestamp: f64,
    pub pnl: f64,
    pub fee_paid: f64,
    pub balance: f64,
    pub equity: f64,
    pub qty: f64,
    pub price: f64,
    pub psize: f64,
    pub pprice: f64,
    pub tag: OrderTag,
}

/// Periodic account snapshot, appended once per simulated minute.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub timestamp: f64,
    pub balance: f64,
    pub equity: f64,
    pub bkr_price: f64,
    pub long_psize: f64,
    pub long_pprice: f64,
    pub short_psize: f64,
    pub short_pprice: f64,
    pub price: f64,
    pub closest_bkr: f64,
    pub balance_long: f64,
    pub balance_short: f64,
    pub equity_long: f64,
    pub equity_short: f64,
}
