use crate::config::PricingPolicy;
use crate::extract::record::PriceQuote;
use crate::extract::weight::{DEFAULT_WEIGHT_KG, round_two, weight_from_label};

/// Shipping cost in SGD for a parcel of `weight_kg`.
///
/// Up to 50 g is the flat base rate. Up to 1 kg each started 10 g adds 0.08;
/// past 1 kg each started 100 g adds 0.70 on top of the 8.00 kilogram rate.
pub fn shipping_sgd(weight_kg: f64) -> f64 {
    // Absorbs float noise only, so 1.01 kg stays one started 100 g step
    // while 50.4 g still starts a 10 g step.
    const EPSILON: f64 = 1e-6;
    let grams = weight_kg.max(0.0) * 1000.0;
    let steps = |over: f64, step: f64| (over / step - EPSILON).ceil().max(0.0);
    let cost = if grams <= 50.0 + EPSILON {
        0.40
    } else if grams <= 1000.0 + EPSILON {
        0.40 + steps(grams - 50.0, 10.0) * 0.08
    } else {
        8.00 + steps(grams - 1000.0, 100.0) * 0.70
    };
    round_two(cost)
}

/// Pre-discount listing price in SGD, rounded to cents.
pub fn listing_price_sgd(policy: &PricingPolicy, price_krw: u64, shipping_sgd: f64) -> f64 {
    let total_krw = price_krw as f64 + shipping_sgd * policy.exchange_rate;
    let selling = total_krw * policy.margin / (policy.exchange_rate * (1.0 - policy.fees_rate));
    round_two(selling / (1.0 - policy.discount_rate))
}

/// Page weight when it parses, else the generated estimate, else the default.
pub fn effective_weight(weight_raw: Option<&str>, estimate_kg: Option<f64>) -> f64 {
    weight_raw
        .and_then(weight_from_label)
        .or(estimate_kg.filter(|kg| kg.is_finite() && *kg > 0.0))
        .unwrap_or(DEFAULT_WEIGHT_KG)
}

pub fn quote(policy: &PricingPolicy, price_krw: u64, weight_kg: f64) -> PriceQuote {
    let shipping = shipping_sgd(weight_kg);
    PriceQuote {
        weight_kg,
        shipping_sgd: shipping,
        listing_price_sgd: listing_price_sgd(policy, price_krw, shipping),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipping_tiers() {
        assert_eq!(shipping_sgd(0.05), 0.40);
        assert_eq!(shipping_sgd(0.0), 0.40);
        assert_eq!(shipping_sgd(0.051), 0.48);
        assert_eq!(shipping_sgd(0.0504), 0.48);
        assert_eq!(shipping_sgd(1.0004), 8.70);
        assert_eq!(shipping_sgd(0.5), 4.00);
        assert_eq!(shipping_sgd(1.00), 8.00);
        assert_eq!(shipping_sgd(1.01), 8.70);
    }

    #[test]
    fn boundary_prices() {
        let policy = PricingPolicy::default();
        assert_eq!(quote(&policy, 5000, 0.05).listing_price_sgd, 10.99);
        let at_kilo = quote(&policy, 10000, 1.00).listing_price_sgd;
        let past_kilo = quote(&policy, 10000, 1.01).listing_price_sgd;
        assert_eq!(at_kilo, 38.57);
        assert_eq!(past_kilo, 40.18);
        assert!(past_kilo > at_kilo);
    }

    #[test]
    fn price_is_monotonic_in_weight() {
        let policy = PricingPolicy::default();
        let mut previous = 0.0;
        for step in 0..=300 {
            let weight = step as f64 * 0.01;
            let price = quote(&policy, 12900, weight).listing_price_sgd;
            assert!(price >= previous, "price dropped at {weight} kg");
            previous = price;
        }
    }

    #[test]
    fn weight_preference_order() {
        assert_eq!(effective_weight(Some("300g"), Some(1.5)), 0.3);
        assert_eq!(effective_weight(Some("규격 참조"), Some(1.5)), 1.5);
        assert_eq!(effective_weight(None, Some(f64::NAN)), 0.5);
        assert_eq!(effective_weight(None, None), 0.5);
    }
}
