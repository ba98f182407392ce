//! Deterministic currency conversion for price annotations.
//!
//! The exchange rate is always an explicit parameter so different rate
//! regimes can be exercised deterministically; there is no global rate
//! table and no network lookup.

use crate::config::CurrencyConfig;
use crate::models::ItemMetadata;

/// Convert `amount` from one currency to another at the given rate.
///
/// `rate` is the number of `to` units per one `from` unit. Converting a
/// currency to itself returns the input unchanged, ignoring the rate.
/// `convert(convert(a, A, B, r), B, A, 1/r)` round-trips to `a` within
/// floating-point tolerance.
pub fn convert(amount: f64, from: &str, to: &str, rate: f64) -> f64 {
    if from == to {
        return amount;
    }
    amount * rate
}

/// Build a converted display string for a price fact, when the engine is
/// configured with a display currency and the item's metadata carries a
/// matching source currency and amount. Returns `None` otherwise; the
/// annotation is strictly additive and never blocks a response.
pub fn annotate(metadata: &ItemMetadata, config: &CurrencyConfig) -> Option<String> {
    let (source, display, rate) = match (&config.source, &config.display, config.rate) {
        (Some(s), Some(d), Some(r)) => (s, d, r),
        _ => return None,
    };
    let item_currency = metadata.currency.as_deref()?;
    let amount = metadata.amount?;

    if item_currency != source {
        return None;
    }

    let converted = convert(amount, source, display, rate);
    Some(format!("{:.2} {}", converted, display))
}
