// =============================================================================
// Symbol precision — static quantity/price rounding table
// =============================================================================
//
// Futures order endpoints reject quantities and prices with more decimals than
// the symbol's filters allow. A static table covers the majors; unknown
// symbols fall back to a conservative default. Rounding always truncates
// toward zero so a rounded order can never exceed the intended size.
// =============================================================================

/// (symbol, quantity decimals, price decimals)
const PRECISION_TABLE: &[(&str, u32, u32)] = &[
    ("BTCUSDT", 3, 1),
    ("ETHUSDT", 3, 2),
    ("BNBUSDT", 2, 2),
    ("XRPUSDT", 1, 4),
    ("SOLUSDT", 0, 2),
    ("ADAUSDT", 0, 4),
    ("DOGEUSDT", 0, 5),
    ("DOTUSDT", 1, 3),
    ("LINKUSDT", 2, 3),
    ("AVAXUSDT", 0, 3),
    ("LTCUSDT", 3, 2),
    ("MATICUSDT", 0, 4),
];

/// Default decimals for symbols not in the table.
const DEFAULT_QTY_DECIMALS: u32 = 2;
const DEFAULT_PRICE_DECIMALS: u32 = 4;

fn lookup(symbol: &str) -> (u32, u32) {
    PRECISION_TABLE
        .iter()
        .find(|(s, _, _)| *s == symbol)
        .map(|(_, q, p)| (*q, *p))
        .unwrap_or((DEFAULT_QTY_DECIMALS, DEFAULT_PRICE_DECIMALS))
}

/// Truncate `value` to `decimals` decimal places (toward zero).
fn truncate(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).floor() / factor
}

/// Round an order quantity down to the symbol's step precision.
pub fn round_quantity(symbol: &str, quantity: f64) -> f64 {
    let (qty_decimals, _) = lookup(symbol);
    truncate(quantity, qty_decimals)
}

/// Round a price down to the symbol's tick precision.
pub fn round_price(symbol: &str, price: f64) -> f64 {
    let (_, price_decimals) = lookup(symbol);
    truncate(price, price_decimals)
}

/// Format a quantity with exactly the symbol's decimals (no scientific
/// notation, no excess digits) for the order query string.
pub fn format_quantity(symbol: &str, quantity: f64) -> String {
    let (qty_decimals, _) = lookup(symbol);
    format!("{:.*}", qty_decimals as usize, round_quantity(symbol, quantity))
}

/// Format a price with exactly the symbol's decimals.
pub fn format_price(symbol: &str, price: f64) -> String {
    let (_, price_decimals) = lookup(symbol);
    format!("{:.*}", price_decimals as usize, round_price(symbol, price))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbol_quantity() {
        assert!((round_quantity("BTCUSDT", 0.123456) - 0.123).abs() < 1e-12);
        assert!((round_quantity("SOLUSDT", 3.9) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn known_symbol_price() {
        assert!((round_price("BTCUSDT", 42123.456) - 42123.4).abs() < 1e-9);
        assert!((round_price("XRPUSDT", 0.56789) - 0.5678).abs() < 1e-12);
    }

    #[test]
    fn unknown_symbol_uses_defaults() {
        assert!((round_quantity("FOOUSDT", 1.23456) - 1.23).abs() < 1e-12);
        assert!((round_price("FOOUSDT", 1.23456) - 1.2345).abs() < 1e-12);
    }

    #[test]
    fn rounding_can_hit_zero() {
        // Sub-step quantities truncate to zero — the client must reject these.
        assert_eq!(round_quantity("SOLUSDT", 0.7), 0.0);
        assert_eq!(round_quantity("BTCUSDT", 0.0004), 0.0);
    }

    #[test]
    fn formatting_matches_decimals() {
        assert_eq!(format_quantity("BTCUSDT", 0.1239), "0.123");
        assert_eq!(format_price("BTCUSDT", 42123.46), "42123.4");
        assert_eq!(format_quantity("SOLUSDT", 12.9), "12");
    }
}
