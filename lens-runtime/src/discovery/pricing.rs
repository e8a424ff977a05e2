//! Regional storage prices, USD per GiB-month

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Multi-region used when a region has no entry of its own
pub const FALLBACK_REGION: &str = "US";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoragePricing {
    pub active_physical: f64,
    pub long_term_physical: f64,
    pub active_logical: f64,
    pub long_term_logical: f64,
}

impl StoragePricing {
    const fn new(
        active_physical: f64,
        long_term_physical: f64,
        active_logical: f64,
        long_term_logical: f64,
    ) -> Self {
        Self {
            active_physical,
            long_term_physical,
            active_logical,
            long_term_logical,
        }
    }

    /// SQL expression for the monthly physical storage cost of a row
    pub fn physical_cost_sql(&self) -> String {
        format!(
            "(IFNULL(active_physical_bytes, 0) * {} + IFNULL(long_term_physical_bytes, 0) * {}) / POW(1024, 3)",
            self.active_physical, self.long_term_physical
        )
    }

    /// SQL expression for the monthly logical storage cost of a row
    pub fn logical_cost_sql(&self) -> String {
        format!(
            "(IFNULL(active_logical_bytes, 0) * {} + IFNULL(long_term_logical_bytes, 0) * {}) / POW(1024, 3)",
            self.active_logical, self.long_term_logical
        )
    }
}

const TIER_A: StoragePricing = StoragePricing::new(0.046, 0.023, 0.02, 0.01);
const TIER_B: StoragePricing = StoragePricing::new(0.052, 0.026, 0.023, 0.016);
const TIER_C: StoragePricing = StoragePricing::new(0.044, 0.022, 0.02, 0.01);
const TIER_D: StoragePricing = StoragePricing::new(0.05, 0.025, 0.023, 0.016);
const TIER_E: StoragePricing = StoragePricing::new(0.04, 0.02, 0.023, 0.016);

lazy_static! {
    static ref PRICES: HashMap<&'static str, StoragePricing> = {
        let mut m = HashMap::new();
        for region in ["asia-east1", "asia-southeast1", "europe-north1"] {
            m.insert(region, TIER_A);
        }
        for region in [
            "asia-east2",
            "asia-northeast1",
            "asia-northeast2",
            "asia-northeast3",
            "asia-south1",
            "asia-south2",
            "asia-southeast2",
            "australia-southeast1",
            "australia-southeast2",
            "europe-central2",
            "europe-west2",
            "europe-west3",
            "europe-west8",
            "europe-west9",
        ] {
            m.insert(region, TIER_B);
        }
        for region in ["europe-west1", "europe-west4", "EU"] {
            m.insert(region, TIER_C);
        }
        for region in [
            "northamerica-northeast1",
            "northamerica-northeast2",
            "us-east4",
            "us-east5",
            "us-west2",
            "us-west3",
            "us-west4",
        ] {
            m.insert(region, TIER_D);
        }
        for region in ["us-central1", "us-west1"] {
            m.insert(region, TIER_E);
        }
        m.insert("europe-southwest1", StoragePricing::new(0.05, 0.025, 0.029, 0.02));
        m.insert("europe-west6", StoragePricing::new(0.056, 0.028, 0.025, 0.017));
        m.insert("southamerica-east1", StoragePricing::new(0.07, 0.035, 0.023, 0.016));
        m.insert("southamerica-west1", StoragePricing::new(0.06, 0.03, 0.033, 0.023));
        m.insert("us-east1", StoragePricing::new(0.044, 0.022, 0.023, 0.016));
        m.insert("us-south1", StoragePricing::new(0.05, 0.025, 0.028, 0.019));
        m.insert(FALLBACK_REGION, StoragePricing::new(0.04, 0.02, 0.02, 0.01));
        m
    };
}

/// Prices for `region`; multi-regions match case-insensitively
pub fn pricing_for(region: &str) -> StoragePricing {
    PRICES
        .get(region)
        .or_else(|| PRICES.get(region.to_ascii_uppercase().as_str()))
        .or_else(|| PRICES.get(region.to_ascii_lowercase().as_str()))
        .copied()
        .unwrap_or(PRICES[FALLBACK_REGION])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_regions() {
        assert_eq!(pricing_for("us-central1").active_physical, 0.04);
        assert_eq!(pricing_for("europe-west6").long_term_logical, 0.017);
        assert_eq!(pricing_for("asia-east1"), TIER_A);
    }

    #[test]
    fn test_multi_region_case_insensitive() {
        assert_eq!(pricing_for("eu"), pricing_for("EU"));
        assert_eq!(pricing_for("us"), pricing_for(FALLBACK_REGION));
    }

    #[test]
    fn test_unknown_region_falls_back_to_us() {
        assert_eq!(pricing_for("mars-north1"), pricing_for("US"));
    }

    #[test]
    fn test_cost_sql_mentions_byte_columns() {
        let sql = pricing_for("US").physical_cost_sql();
        assert!(sql.contains("active_physical_bytes, 0) * 0.04"));
        assert!(sql.contains("POW(1024, 3)"));
    }
}
