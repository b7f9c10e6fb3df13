//! Cost derivation over aggregated usage. Out of core scope for policy
//! decisions, but part of the service interface the billing adapter calls.

use std::collections::HashMap;

/// Metric -> rate (currency units per metric unit, e.g. USD per GB-hour).
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, f64>,
}

impl PricingTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }

    pub fn default_rates() -> Self {
        Self::new(HashMap::from([
            ("compute_gb_hours".to_string(), 0.015),
            ("build_minutes".to_string(), 0.01),
            ("storage_gb_hours".to_string(), 0.0003),
            ("bandwidth_gb".to_string(), 0.09),
            ("custom_domains".to_string(), 0.0),
        ]))
    }

    pub fn calculate_cost(&self, summary: &HashMap<String, f64>) -> f64 {
        summary
            .iter()
            .map(|(metric, value)| value * self.rates.get(metric).copied().unwrap_or(0.0))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpriced_metric_contributes_nothing() {
        let table = PricingTable::new(HashMap::from([("compute_gb_hours".to_string(), 1.0)]));
        let summary = HashMap::from([("mystery_metric".to_string(), 100.0)]);
        assert_eq!(table.calculate_cost(&summary), 0.0);
    }

    #[test]
    fn default_rates_price_compute() {
        let table = PricingTable::default_rates();
        let summary = HashMap::from([("compute_gb_hours".to_string(), 10.0)]);
        assert_eq!(table.calculate_cost(&summary), 0.15);
    }
}
