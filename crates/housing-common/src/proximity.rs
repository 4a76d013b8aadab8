//! Proximity-to-services scoring.
//!
//! For a property location, each [`Category`] is queried against a [`PoiSource`] within a
//! fixed radius. The nearby count is mapped to a 0/40/60/80/100 category score, and the
//! category scores are combined with fixed weights into a single 0-100 score.
//!
//! Categories run one after another through a shared [`RequestQueue`] (concurrency 1 with a
//! density-dependent gap between requests). A 429 gets one retry after a back-off; a 504 gets
//! one retry with a smaller radius and a scaled-up count. Any other failure counts as zero
//! for that category only.
//!
//! Results live in a [`ProximityCache`] keyed by property id. At most one computation per id
//! is ever started; later requests for the same id are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::normalize::valid_coordinates;
use crate::overpass::{OverpassElement, OverpassError, PoiSource};

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("invalid coordinates: lat={lat} lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Transport,
    Convenience,
    Restaurant,
    Health,
    School,
}

impl Category {
    /// Processing order.
    pub const ALL: [Category; 5] = [
        Category::Transport,
        Category::Convenience,
        Category::Restaurant,
        Category::Health,
        Category::School,
    ];

    pub fn radius_m(self) -> u32 {
        match self {
            Category::Transport => 2_500,
            Category::Convenience => 1_000,
            Category::Restaurant => 1_500,
            Category::Health => 4_000,
            Category::School => 3_000,
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            Category::Transport => 0.25,
            Category::Convenience => 0.20,
            Category::Restaurant => 0.20,
            Category::Health => 0.20,
            Category::School => 0.15,
        }
    }

    /// Minimum counts for a score of 40, 60, 80 and 100.
    fn thresholds(self) -> [u32; 4] {
        match self {
            Category::Transport => [1, 3, 6, 10],
            Category::Convenience => [1, 3, 5, 8],
            Category::Restaurant => [1, 8, 15, 30],
            Category::Health => [1, 2, 3, 5],
            Category::School => [1, 2, 4, 6],
        }
    }

    pub fn score_for_count(self, count: u32) -> u8 {
        const SCORES: [u8; 4] = [40, 60, 80, 100];
        self.thresholds()
            .iter()
            .zip(SCORES)
            .rev()
            .find(|(min, _)| count >= **min)
            .map(|(_, score)| score)
            .unwrap_or(0)
    }

    fn filters(self) -> &'static [&'static str] {
        match self {
            Category::Transport => &[
                r#"["highway"="bus_stop"]"#,
                r#"["railway"~"^(station|halt|tram_stop|subway_entrance)$"]"#,
                r#"["public_transport"="station"]"#,
                r#"["amenity"="ferry_terminal"]"#,
            ],
            Category::Convenience => &[r#"["shop"~"^(convenience|supermarket)$"]"#],
            Category::Restaurant => &[r#"["amenity"~"^(restaurant|cafe|fast_food|food_court)$"]"#],
            Category::Health => &[r#"["amenity"~"^(hospital|clinic|doctors|pharmacy)$"]"#],
            Category::School => &[r#"["amenity"~"^(school|kindergarten|college|university)$"]"#],
        }
    }

    /// Overpass QL union of this category's filters around a point, with way centers.
    pub fn query(self, lat: f64, lng: f64, radius_m: u32) -> String {
        let mut q = String::from("[out:json][timeout:25];\n(\n");
        for filter in self.filters() {
            for kind in ["node", "way"] {
                q.push_str(&format!(
                    "  {kind}{filter}(around:{radius_m},{lat},{lng});\n"
                ));
            }
        }
        q.push_str(");\nout center;");
        q
    }
}

/// `round(Σ w·s / Σ w)` over the given category scores. With all five categories the weights
/// sum to 1 and this is the plain weighted sum.
pub fn weighted_score(scores: &[(Category, u8)]) -> u8 {
    let total_weight: f64 = scores.iter().map(|(c, _)| c.weight()).sum();
    if total_weight <= 0.0 {
        return 0;
    }
    let sum: f64 = scores.iter().map(|(c, s)| c.weight() * f64::from(*s)).sum();
    (sum / total_weight).round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Back-off before retrying a rate-limited (429) request.
    pub rate_limit_wait: Duration,
    /// Radius multiplier for the retry after a 504.
    pub timeout_radius_factor: f64,
    /// Count multiplier applied to the reduced-radius retry.
    pub timeout_count_factor: f64,
    /// Gap after a request that found fewer than 10 places.
    pub gap_sparse: Duration,
    /// Gap after a request that found fewer than 30 places.
    pub gap_medium: Duration,
    pub gap_dense: Duration,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            rate_limit_wait: Duration::from_secs(3),
            timeout_radius_factor: 0.7,
            timeout_count_factor: 1.4,
            gap_sparse: Duration::from_millis(150),
            gap_medium: Duration::from_millis(200),
            gap_dense: Duration::from_millis(250),
        }
    }
}

impl ScorerConfig {
    fn gap_after(&self, count: u32) -> Duration {
        match count {
            0..=9 => self.gap_sparse,
            10..=29 => self.gap_medium,
            _ => self.gap_dense,
        }
    }
}

/// Serializes upstream requests: one in flight at a time, with a caller-chosen gap before the
/// next one may start.
#[derive(Debug)]
pub struct RequestQueue {
    next_start: Mutex<Instant>,
}

/// Exclusive right to issue requests until released.
pub struct QueueSlot<'a> {
    next_start: MutexGuard<'a, Instant>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// Waits for the previous holder to release and its gap to elapse.
    pub async fn acquire(&self) -> QueueSlot<'_> {
        let next_start = self.next_start.lock().await;
        tokio::time::sleep_until(*next_start).await;
        QueueSlot { next_start }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSlot<'_> {
    pub fn release_after(mut self, gap: Duration) {
        *self.next_start = Instant::now() + gap;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScoreState {
    /// `partial` is the weighted score over the categories finished so far.
    Pending { partial: Option<u8> },
    Ready { score: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPlace {
    pub osm_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl NearbyPlace {
    fn from_element(element: OverpassElement) -> Option<Self> {
        let (latitude, longitude) = element.position()?;
        Some(Self {
            osm_id: element.id,
            latitude,
            longitude,
            name: element.tags.get("name").cloned(),
            tags: element.tags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNearby {
    /// Radius the places were found in; smaller than the category radius after a 504 retry.
    pub radius_m: u32,
    pub places: Vec<NearbyPlace>,
}

pub type NearbyData = BTreeMap<Category, CategoryNearby>;

/// Per-property scores and nearby-place data.
#[derive(Debug, Default)]
pub struct ProximityCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    scores: HashMap<String, ScoreState>,
    nearby: HashMap<String, NearbyData>,
}

impl ProximityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` for computation. Returns `false` when a score exists or is in progress.
    pub async fn try_begin(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.scores.contains_key(id) {
            return false;
        }
        inner
            .scores
            .insert(id.to_string(), ScoreState::Pending { partial: None });
        true
    }

    pub async fn publish_partial(&self, id: &str, partial: u8) {
        let mut inner = self.inner.lock().await;
        if let Some(ScoreState::Pending { partial: slot }) = inner.scores.get_mut(id) {
            *slot = Some(partial);
        }
    }

    pub async fn complete(&self, id: &str, score: u8) {
        let mut inner = self.inner.lock().await;
        inner
            .scores
            .insert(id.to_string(), ScoreState::Ready { score });
    }

    /// Records a zero score and forgets any nearby data gathered for `id`.
    pub async fn fail(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .scores
            .insert(id.to_string(), ScoreState::Ready { score: 0 });
        inner.nearby.remove(id);
    }

    pub async fn store_nearby(&self, id: &str, category: Category, nearby: CategoryNearby) {
        let mut inner = self.inner.lock().await;
        inner
            .nearby
            .entry(id.to_string())
            .or_default()
            .insert(category, nearby);
    }

    pub async fn state(&self, id: &str) -> Option<ScoreState> {
        self.inner.lock().await.scores.get(id).cloned()
    }

    pub async fn nearby(&self, id: &str) -> Option<NearbyData> {
        self.inner.lock().await.nearby.get(id).cloned()
    }
}

/// What one category lookup produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCount {
    pub category: Category,
    pub count: u32,
    /// `None` when the lookup failed and the category counts as zero.
    pub nearby: Option<CategoryNearby>,
}

pub struct ProximityScorer<S> {
    source: S,
    queue: RequestQueue,
    cache: Arc<ProximityCache>,
    config: ScorerConfig,
}

impl<S: PoiSource> ProximityScorer<S> {
    pub fn new(source: S, cache: Arc<ProximityCache>, config: ScorerConfig) -> Self {
        Self {
            source,
            queue: RequestQueue::new(),
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ProximityCache> {
        &self.cache
    }

    /// Scores `id` unless it already has a score or one is in progress, in which case the
    /// request is dropped and `None` is returned.
    pub async fn score(&self, id: &str, lat: f64, lng: f64) -> Option<u8> {
        if !self.cache.try_begin(id).await {
            debug!(id, "proximity score exists or is in progress, skipping");
            return None;
        }
        Some(self.run_claimed(id, lat, lng).await)
    }

    /// Runs the computation for an id already claimed with [`ProximityCache::try_begin`].
    /// Failures of the whole computation leave a score of 0 and no nearby data.
    pub async fn run_claimed(&self, id: &str, lat: f64, lng: f64) -> u8 {
        match self.compute(id, lat, lng).await {
            Ok(score) => {
                self.cache.complete(id, score).await;
                info!(id, score, "proximity score ready");
                score
            }
            Err(e) => {
                warn!(id, error = %e, "proximity scoring failed, recording 0");
                self.cache.fail(id).await;
                0
            }
        }
    }

    async fn compute(&self, id: &str, lat: f64, lng: f64) -> Result<u8, ScoreError> {
        if !valid_coordinates(lat, lng) {
            return Err(ScoreError::InvalidCoordinates { lat, lng });
        }

        let mut scores: Vec<(Category, u8)> = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let counted = self.count_category(category, lat, lng).await;
            if let Some(nearby) = counted.nearby {
                self.cache.store_nearby(id, category, nearby).await;
            }
            let score = category.score_for_count(counted.count);
            debug!(id, ?category, count = counted.count, score, "category scored");
            scores.push((category, score));

            if scores.len() % 2 == 0 && scores.len() < Category::ALL.len() {
                let partial = weighted_score(&scores);
                debug!(id, partial, done = scores.len(), "publishing partial proximity score");
                self.cache.publish_partial(id, partial).await;
            }
        }
        Ok(weighted_score(&scores))
    }

    /// Counts places for one category, applying the 429/504 retry rules.
    pub async fn count_category(&self, category: Category, lat: f64, lng: f64) -> CategoryCount {
        let slot = self.queue.acquire().await;
        let radius = category.radius_m();
        let first = self.source.query(&category.query(lat, lng, radius)).await;

        let counted = match first {
            Ok(elements) => found(category, radius, elements, 1.0),
            Err(OverpassError::RateLimited) => {
                warn!(
                    ?category,
                    wait_ms = self.config.rate_limit_wait.as_millis(),
                    "overpass rate limited, retrying once"
                );
                tokio::time::sleep(self.config.rate_limit_wait).await;
                match self.source.query(&category.query(lat, lng, radius)).await {
                    Ok(elements) => found(category, radius, elements, 1.0),
                    Err(e) => failed(category, &e),
                }
            }
            Err(OverpassError::GatewayTimeout) => {
                let reduced = (f64::from(radius) * self.config.timeout_radius_factor).round() as u32;
                warn!(?category, radius, reduced, "overpass timed out, retrying with smaller radius");
                match self.source.query(&category.query(lat, lng, reduced)).await {
                    Ok(elements) => {
                        found(category, reduced, elements, self.config.timeout_count_factor)
                    }
                    Err(e) => failed(category, &e),
                }
            }
            Err(e) => failed(category, &e),
        };

        slot.release_after(self.config.gap_after(counted.count));
        counted
    }
}

fn found(
    category: Category,
    radius_m: u32,
    elements: Vec<OverpassElement>,
    count_factor: f64,
) -> CategoryCount {
    let count = (elements.len() as f64 * count_factor).round() as u32;
    let places = elements
        .into_iter()
        .filter_map(NearbyPlace::from_element)
        .collect();
    CategoryCount {
        category,
        count,
        nearby: Some(CategoryNearby { radius_m, places }),
    }
}

fn failed(category: Category, err: &OverpassError) -> CategoryCount {
    warn!(?category, error = %err, "category lookup failed, counting as zero");
    CategoryCount {
        category,
        count: 0,
        nearby: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Elements(usize),
        RateLimited,
        Timeout,
        Broken,
    }

    /// Answers queries from a script and snapshots the cache state at every call.
    struct ScriptedSource {
        steps: StdMutex<VecDeque<Step>>,
        queries: StdMutex<Vec<String>>,
        observed: StdMutex<Vec<Option<ScoreState>>>,
        cache: Arc<ProximityCache>,
        id: String,
    }

    impl ScriptedSource {
        fn new(cache: Arc<ProximityCache>, id: &str, steps: &[Step]) -> Self {
            Self {
                steps: StdMutex::new(steps.iter().copied().collect()),
                queries: StdMutex::new(Vec::new()),
                observed: StdMutex::new(Vec::new()),
                cache,
                id: id.to_string(),
            }
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    fn elements(n: usize) -> Vec<OverpassElement> {
        (0..n)
            .map(|i| OverpassElement {
                kind: "node".to_string(),
                id: i as u64,
                lat: Some(13.75),
                lon: Some(100.5),
                center: None,
                tags: BTreeMap::from([("name".to_string(), format!("place {i}"))]),
            })
            .collect()
    }

    impl PoiSource for ScriptedSource {
        async fn query(&self, query: &str) -> Result<Vec<OverpassElement>, OverpassError> {
            let state = self.cache.state(&self.id).await;
            self.observed.lock().unwrap().push(state);
            self.queries.lock().unwrap().push(query.to_string());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Elements(0));
            match step {
                Step::Elements(n) => Ok(elements(n)),
                Step::RateLimited => Err(OverpassError::RateLimited),
                Step::Timeout => Err(OverpassError::GatewayTimeout),
                Step::Broken => Err(OverpassError::Upstream {
                    status: reqwest::StatusCode::BAD_REQUEST,
                    body: "parse error".to_string(),
                }),
            }
        }
    }

    fn quick_config() -> ScorerConfig {
        ScorerConfig {
            rate_limit_wait: Duration::ZERO,
            gap_sparse: Duration::ZERO,
            gap_medium: Duration::ZERO,
            gap_dense: Duration::ZERO,
            ..Default::default()
        }
    }

    fn scorer(id: &str, steps: &[Step]) -> ProximityScorer<ScriptedSource> {
        let cache = Arc::new(ProximityCache::new());
        let source = ScriptedSource::new(Arc::clone(&cache), id, steps);
        ProximityScorer::new(source, cache, quick_config())
    }

    #[test]
    fn radius_is_fixed_per_category() {
        for (lat, lng) in [(13.75, 100.5), (18.79, 98.98), (7.0, 100.0)] {
            let q = Category::Transport.query(lat, lng, Category::Transport.radius_m());
            assert!(q.contains(&format!("(around:2500,{lat},{lng})")));
        }
        for category in Category::ALL {
            assert!((500..=4_000).contains(&category.radius_m()));
        }
    }

    #[test]
    fn thresholds_match_documented_values() {
        assert_eq!(Category::Restaurant.score_for_count(50), 100);
        assert_eq!(Category::Restaurant.score_for_count(24), 80);
        assert_eq!(Category::Restaurant.score_for_count(8), 60);
        assert_eq!(Category::Restaurant.score_for_count(1), 40);
        assert_eq!(Category::Transport.score_for_count(10), 100);
        assert_eq!(Category::Health.score_for_count(2), 60);
        for category in Category::ALL {
            assert_eq!(category.score_for_count(0), 0);
            let mut previous = 0;
            for count in 0..200 {
                let score = category.score_for_count(count);
                assert!(score >= previous, "{category:?} not monotonic at {count}");
                previous = score;
            }
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = Category::ALL.iter().map(|c| c.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn weighted_average_of_all_categories() {
        // transport 3 -> 60, convenience 8 -> 100, restaurant 1 -> 40, health 2 -> 60, school 0 -> 0
        let s = scorer(
            "p1",
            &[
                Step::Elements(3),
                Step::Elements(8),
                Step::Elements(1),
                Step::Elements(2),
                Step::Elements(0),
            ],
        );
        let score = s.score("p1", 13.75, 100.5).await;
        let expected = (0.25f64 * 60.0 + 0.20 * 100.0 + 0.20 * 40.0 + 0.20 * 60.0 + 0.15 * 0.0)
            .round() as u8;
        assert_eq!(score, Some(expected));
        assert_eq!(expected, 55);
        assert_eq!(
            s.cache().state("p1").await,
            Some(ScoreState::Ready { score: 55 })
        );

        let nearby = s.cache().nearby("p1").await.unwrap();
        assert_eq!(nearby[&Category::Convenience].places.len(), 8);
        assert_eq!(nearby[&Category::Convenience].radius_m, 1_000);
        assert_eq!(
            nearby[&Category::Transport].places[0].name.as_deref(),
            Some("place 0")
        );
    }

    #[tokio::test]
    async fn rate_limited_request_is_retried_once_without_double_counting() {
        let s = scorer("p", &[Step::RateLimited, Step::Elements(7)]);
        let counted = s.count_category(Category::Transport, 13.75, 100.5).await;
        assert_eq!(counted.count, 7);
        let queries = s.source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], queries[1]);
    }

    #[tokio::test]
    async fn second_rate_limit_counts_as_zero() {
        let s = scorer("p", &[Step::RateLimited, Step::RateLimited]);
        let counted = s.count_category(Category::School, 13.75, 100.5).await;
        assert_eq!(counted.count, 0);
        assert!(counted.nearby.is_none());
        assert_eq!(s.source.queries().len(), 2);
    }

    #[tokio::test]
    async fn gateway_timeout_retries_with_reduced_radius_and_scales_count() {
        let s = scorer("p", &[Step::Timeout, Step::Elements(5)]);
        let counted = s.count_category(Category::Transport, 13.75, 100.5).await;
        assert_eq!(counted.count, (5.0f64 * 1.4).round() as u32);
        assert_eq!(counted.count, 7);
        let nearby = counted.nearby.unwrap();
        assert_eq!(nearby.radius_m, 1_750);
        assert_eq!(nearby.places.len(), 5);

        let queries = s.source.queries();
        assert!(queries[0].contains("around:2500,"));
        assert!(queries[1].contains("around:1750,"));
    }

    #[tokio::test]
    async fn other_failures_zero_one_category_and_continue() {
        let s = scorer(
            "p2",
            &[
                Step::Broken,
                Step::Elements(8),
                Step::Elements(30),
                Step::Elements(5),
                Step::Elements(6),
            ],
        );
        let score = s.score("p2", 13.75, 100.5).await.unwrap();
        // transport 0, the rest 100
        assert_eq!(score, 75);
        assert_eq!(s.source.queries().len(), 5);
        let nearby = s.cache().nearby("p2").await.unwrap();
        assert!(!nearby.contains_key(&Category::Transport));
        assert_eq!(nearby.len(), 4);
    }

    #[tokio::test]
    async fn partial_scores_published_every_two_categories() {
        let s = scorer(
            "p3",
            &[
                Step::Elements(10),
                Step::Elements(0),
                Step::Elements(30),
                Step::Elements(0),
                Step::Elements(0),
            ],
        );
        s.score("p3", 13.75, 100.5).await.unwrap();

        let observed = s.source.observed.lock().unwrap().clone();
        let pending = |partial| Some(ScoreState::Pending { partial });
        // 25 / 0.45 = 55.6 after two; (25 + 20) / 0.85 = 52.9 after four
        assert_eq!(
            observed,
            vec![
                pending(None),
                pending(None),
                pending(Some(56)),
                pending(Some(56)),
                pending(Some(53)),
            ]
        );
        assert_eq!(
            s.cache().state("p3").await,
            Some(ScoreState::Ready { score: 45 })
        );
    }

    #[tokio::test]
    async fn existing_score_is_not_recomputed() {
        let s = scorer("p4", &[Step::Elements(10); 5]);
        let first = s.score("p4", 13.75, 100.5).await;
        assert!(first.is_some());
        let calls = s.source.queries().len();

        assert_eq!(s.score("p4", 13.75, 100.5).await, None);
        assert_eq!(s.source.queries().len(), calls);
        assert_eq!(
            s.cache().state("p4").await,
            Some(ScoreState::Ready {
                score: first.unwrap()
            })
        );
    }

    #[tokio::test]
    async fn in_progress_score_drops_second_request() {
        let s = scorer("p5", &[]);
        assert!(s.cache().try_begin("p5").await);
        assert_eq!(s.score("p5", 13.75, 100.5).await, None);
        assert!(s.source.queries().is_empty());
    }

    #[tokio::test]
    async fn failed_computation_records_zero_and_discards_nearby() {
        let s = scorer("p6", &[]);
        s.cache()
            .store_nearby(
                "p6",
                Category::School,
                CategoryNearby {
                    radius_m: 3_000,
                    places: vec![],
                },
            )
            .await;

        assert_eq!(s.score("p6", f64::NAN, 100.5).await, Some(0));
        assert_eq!(
            s.cache().state("p6").await,
            Some(ScoreState::Ready { score: 0 })
        );
        assert!(s.cache().nearby("p6").await.is_none());
        assert!(s.source.queries().is_empty());
    }

    #[tokio::test]
    async fn queue_enforces_gap_between_requests() {
        let queue = RequestQueue::new();
        let slot = queue.acquire().await;
        slot.release_after(Duration::from_millis(40));

        let started = Instant::now();
        let slot = queue.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(35));
        slot.release_after(Duration::ZERO);
    }

    #[test]
    fn gap_depends_on_density() {
        let config = ScorerConfig::default();
        assert_eq!(config.gap_after(0), Duration::from_millis(150));
        assert_eq!(config.gap_after(12), Duration::from_millis(200));
        assert_eq!(config.gap_after(80), Duration::from_millis(250));
    }

    #[test]
    fn default_retry_settings() {
        let config = ScorerConfig::default();
        assert_eq!(config.rate_limit_wait, Duration::from_secs(3));
        assert_eq!(config.timeout_radius_factor, 0.7);
        assert_eq!(config.timeout_count_factor, 1.4);
    }

    #[test]
    fn score_state_serializes_with_status_tag() {
        let json = serde_json::to_value(ScoreState::Ready { score: 80 }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "ready", "score": 80 }));
        let json = serde_json::to_value(ScoreState::Pending { partial: None }).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "pending", "partial": null }));
    }
}
