use serde::{Deserialize, Serialize};

/// A rental property normalized from one CKAN datastore row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Stable key from the row (`id`/`_id`) or a synthesized `name-lat-lng` composite.
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub monthly_min_price: f64,
    pub monthly_max_price: f64,
    pub daily_min_price: f64,
    pub daily_max_price: f64,
    /// Room size range in square meters.
    pub room_size_min: f64,
    pub room_size_max: f64,
    pub room_type: Option<String>,
    #[serde(flatten)]
    pub amenities: Amenities,
    pub contact: Contact,
    pub price_bucket: PriceBucket,
    /// Share of amenity flags that are set, 0-100.
    pub amenity_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: Option<String>,
    pub line_id: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Boolean facility flags, serialized flat under their CKAN column names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenities {
    pub has_air: bool,
    pub has_furniture: bool,
    pub has_tv: bool,
    pub has_fridge: bool,
    pub has_internet: bool,
    pub has_parking: bool,
    pub has_pool: bool,
    pub has_fitness: bool,
    pub has_security: bool,
    pub has_cctv: bool,
    pub has_elevator: bool,
    pub has_washing_machine: bool,
}

impl Amenities {
    pub const COLUMNS: [&'static str; 12] = [
        "has_air",
        "has_furniture",
        "has_tv",
        "has_fridge",
        "has_internet",
        "has_parking",
        "has_pool",
        "has_fitness",
        "has_security",
        "has_cctv",
        "has_elevator",
        "has_washing_machine",
    ];

    pub fn flags(&self) -> [bool; 12] {
        [
            self.has_air,
            self.has_furniture,
            self.has_tv,
            self.has_fridge,
            self.has_internet,
            self.has_parking,
            self.has_pool,
            self.has_fitness,
            self.has_security,
            self.has_cctv,
            self.has_elevator,
            self.has_washing_machine,
        ]
    }

    pub fn set(&mut self, column: &str, value: bool) {
        let slot = match column {
            "has_air" => &mut self.has_air,
            "has_furniture" => &mut self.has_furniture,
            "has_tv" => &mut self.has_tv,
            "has_fridge" => &mut self.has_fridge,
            "has_internet" => &mut self.has_internet,
            "has_parking" => &mut self.has_parking,
            "has_pool" => &mut self.has_pool,
            "has_fitness" => &mut self.has_fitness,
            "has_security" => &mut self.has_security,
            "has_cctv" => &mut self.has_cctv,
            "has_elevator" => &mut self.has_elevator,
            "has_washing_machine" => &mut self.has_washing_machine,
            _ => return,
        };
        *slot = value;
    }

    /// Percentage of flags that are set, rounded to the nearest integer.
    pub fn score(&self) -> u8 {
        let flags = self.flags();
        let present = flags.iter().filter(|f| **f).count();
        ((present as f64 / flags.len() as f64) * 100.0).round() as u8
    }
}

/// Monthly price band used by the dashboard's price filter and histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriceBucket {
    #[serde(rename = "under_5000")]
    Under5000,
    #[serde(rename = "5000_10000")]
    From5000To10000,
    #[serde(rename = "10000_15000")]
    From10000To15000,
    #[serde(rename = "15000_20000")]
    From15000To20000,
    #[serde(rename = "over_20000")]
    Over20000,
    #[serde(rename = "unknown")]
    Unknown,
}

impl PriceBucket {
    pub const ALL: [PriceBucket; 6] = [
        PriceBucket::Under5000,
        PriceBucket::From5000To10000,
        PriceBucket::From10000To15000,
        PriceBucket::From15000To20000,
        PriceBucket::Over20000,
        PriceBucket::Unknown,
    ];

    /// A price of 0 means the row had no usable price.
    pub fn for_monthly_price(price: f64) -> Self {
        if !price.is_finite() || price <= 0.0 {
            return PriceBucket::Unknown;
        }
        match price {
            p if p < 5_000.0 => PriceBucket::Under5000,
            p if p < 10_000.0 => PriceBucket::From5000To10000,
            p if p < 15_000.0 => PriceBucket::From10000To15000,
            p if p < 20_000.0 => PriceBucket::From15000To20000,
            _ => PriceBucket::Over20000,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            PriceBucket::Under5000 => "under_5000",
            PriceBucket::From5000To10000 => "5000_10000",
            PriceBucket::From10000To15000 => "10000_15000",
            PriceBucket::From15000To20000 => "15000_20000",
            PriceBucket::Over20000 => "over_20000",
            PriceBucket::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(PriceBucket::for_monthly_price(4_500.0), PriceBucket::Under5000);
        assert_eq!(PriceBucket::for_monthly_price(5_000.0), PriceBucket::From5000To10000);
        assert_eq!(PriceBucket::for_monthly_price(14_999.0), PriceBucket::From10000To15000);
        assert_eq!(PriceBucket::for_monthly_price(20_000.0), PriceBucket::Over20000);
        assert_eq!(PriceBucket::for_monthly_price(0.0), PriceBucket::Unknown);
        assert_eq!(PriceBucket::for_monthly_price(f64::NAN), PriceBucket::Unknown);
    }

    #[test]
    fn amenity_score_counts_set_flags() {
        let mut amenities = Amenities::default();
        assert_eq!(amenities.score(), 0);
        amenities.set("has_pool", true);
        amenities.set("has_air", true);
        amenities.set("has_helipad", true);
        assert_eq!(amenities.score(), 17);
        for column in Amenities::COLUMNS {
            amenities.set(column, true);
        }
        assert_eq!(amenities.score(), 100);
    }

    #[test]
    fn bucket_serializes_as_key() {
        for bucket in PriceBucket::ALL {
            let json = serde_json::to_value(bucket).unwrap();
            assert_eq!(json, bucket.key());
        }
    }
}
