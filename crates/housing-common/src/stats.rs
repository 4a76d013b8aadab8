use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{PriceBucket, PropertyRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: PriceBucket,
    pub count: usize,
}

/// Dashboard summary panel over a normalized property set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySummary {
    pub count: usize,
    /// Every bucket in display order, including empty ones.
    pub price_buckets: Vec<BucketCount>,
    /// Lowest `monthly_min_price` and highest `monthly_max_price`, ignoring missing (0) prices.
    pub monthly_price_min: Option<f64>,
    pub monthly_price_max: Option<f64>,
    /// Mean amenity score, one decimal.
    pub average_amenity_score: Option<f64>,
    pub room_types: BTreeMap<String, usize>,
}

pub fn summarize(properties: &[PropertyRecord]) -> PropertySummary {
    let price_buckets = PriceBucket::ALL
        .iter()
        .map(|bucket| BucketCount {
            bucket: *bucket,
            count: properties.iter().filter(|p| p.price_bucket == *bucket).count(),
        })
        .collect();

    let positive = |v: f64| (v.is_finite() && v > 0.0).then_some(v);
    let monthly_price_min = properties
        .iter()
        .filter_map(|p| positive(p.monthly_min_price))
        .reduce(f64::min);
    let monthly_price_max = properties
        .iter()
        .filter_map(|p| positive(p.monthly_max_price).or_else(|| positive(p.monthly_min_price)))
        .reduce(f64::max);

    let average_amenity_score = (!properties.is_empty()).then(|| {
        let total: f64 = properties.iter().map(|p| f64::from(p.amenity_score)).sum();
        (total / properties.len() as f64 * 10.0).round() / 10.0
    });

    let mut room_types = BTreeMap::new();
    for p in properties {
        let key = p.room_type.clone().unwrap_or_else(|| "unspecified".to_string());
        *room_types.entry(key).or_insert(0) += 1;
    }

    PropertySummary {
        count: properties.len(),
        price_buckets,
        monthly_price_min,
        monthly_price_max,
        average_amenity_score,
        room_types,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize_records;

    #[test]
    fn summarizes_normalized_rows() {
        let rows: Vec<_> = [
            json!({ "latitude": "13.75", "longitude": "100.50", "monthly_min_price": "4500", "has_pool": "TRUE", "room_type": "studio" }),
            json!({ "latitude": "13.76", "longitude": "100.51", "monthly_min_price": "8000", "monthly_max_price": "12000", "room_type": "studio" }),
            json!({ "latitude": "13.77", "longitude": "100.52", "room_type": "1br" }),
            json!({ "latitude": "13.78", "longitude": "100.53" }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let properties = normalize_records(&rows);

        let summary = summarize(&properties);
        assert_eq!(summary.count, 4);
        let counts: Vec<usize> = summary.price_buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 0, 0, 2]);
        assert_eq!(summary.monthly_price_min, Some(4500.0));
        assert_eq!(summary.monthly_price_max, Some(12000.0));
        // one of twelve flags on one of four properties: 8 / 4
        assert_eq!(summary.average_amenity_score, Some(2.0));
        assert_eq!(summary.room_types["studio"], 2);
        assert_eq!(summary.room_types["unspecified"], 1);
    }

    #[test]
    fn empty_set_has_no_ranges() {
        let summary = summarize(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.monthly_price_min, None);
        assert_eq!(summary.average_amenity_score, None);
        assert_eq!(summary.price_buckets.len(), PriceBucket::ALL.len());
    }
}
