//! Aggregations computed through an alias over several shards

use serde_json::{json, Value};
use shardfuse::aggregation::{AggregationRequest, BucketRequest, DateRangeSpec, RangeSpec};
use shardfuse::config::Config;
use shardfuse::error::{Result, ShardfuseError};
use shardfuse::index::{MemoryIndex, ShardExecutor};
use shardfuse::model::PartialResult;
use shardfuse::search::{IndexAlias, Query, SearchRequest};

fn phones() -> Vec<Value> {
    vec![
        json!({"id": "p1", "brand": "Apple", "model": "iphone pro", "price": 999, "released": "2023-09-22T00:00:00Z"}),
        json!({"id": "p2", "brand": "Apple", "model": "iphone max", "price": 1299, "released": "2024-09-20T00:00:00Z"}),
        json!({"id": "p3", "brand": "Samsung", "model": "galaxy s", "price": 799, "released": "2024-01-31T00:00:00Z"}),
        json!({"id": "p4", "brand": "Samsung", "model": "galaxy fold", "price": 899, "released": "2023-08-11T00:00:00Z"}),
        json!({"id": "p5", "brand": "Samsung", "model": "galaxy a", "price": 599, "released": "2024-03-15T00:00:00Z"}),
        json!({"id": "p6", "brand": "Google", "model": "pixel", "price": 699, "released": "2023-10-12T00:00:00Z"}),
        json!({"id": "p7", "brand": "Google", "model": "pixel pro", "price": 800}),
        json!({"id": "p8", "brand": "Nokia", "model": "classic"}),
    ]
}

/// Alias over `shard_count` shards, documents dealt round-robin
fn alias(shard_count: usize, config: &Config) -> IndexAlias {
    let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); shard_count];
    for (i, doc) in phones().into_iter().enumerate() {
        buckets[i % shard_count].push(doc);
    }
    let mut alias = IndexAlias::with_config("phones", config);
    for (i, docs) in buckets.into_iter().enumerate() {
        alias.add_index(MemoryIndex::from_documents(format!("shard-{}", i), docs).unwrap());
    }
    alias
}

#[tokio::test]
async fn test_terms_with_nested_avg_and_ranges() {
    let mut request = SearchRequest::new(Query::match_all()).with_size(0).add_aggregation(
        "by_brand",
        BucketRequest::terms("brand", 10)
            .with_sub_aggregation("avg_price", AggregationRequest::avg("price"))
            .with_sub_aggregation(
                "tiers",
                BucketRequest::range(
                    "price",
                    vec![
                        RangeSpec::new("budget", None, Some(800.0)),
                        RangeSpec::new("premium", Some(800.0), None),
                    ],
                ),
            ),
    );

    for shards in [1, 2, 3] {
        let result = alias(shards, &Config::default()).search(&mut request).await.unwrap();
        let samsung = result
            .aggregations
            .get("by_brand")
            .and_then(|r| r.bucket("samsung"))
            .unwrap();
        assert_eq!(samsung.count, 3, "{} shards", shards);

        let avg = samsung.sub_results.value("avg_price").unwrap();
        assert!((avg - 765.666_666).abs() < 1e-3);

        let tiers = samsung.sub_results.get("tiers").unwrap();
        assert_eq!(tiers.bucket("budget").unwrap().count, 2);
        assert_eq!(tiers.bucket("premium").unwrap().count, 1);
    }
}

#[tokio::test]
async fn test_avg_is_not_an_average_of_averages() {
    // one shard holds a single cheap phone, the other three expensive ones
    let mut cheap = MemoryIndex::new("cheap");
    cheap.insert(json!({"id": "c1", "price": 100})).unwrap();
    let expensive = MemoryIndex::from_documents(
        "expensive",
        vec![
            json!({"id": "e1", "price": 300}),
            json!({"id": "e2", "price": 300}),
            json!({"id": "e3", "price": 300}),
        ],
    )
    .unwrap();

    let mut alias = IndexAlias::new("all");
    alias.add_index(cheap).add_index(expensive);

    let mut request = SearchRequest::new(Query::match_all())
        .add_aggregation("avg_price", AggregationRequest::avg("price"))
        .add_aggregation("price_stats", AggregationRequest::stats("price"));
    let result = alias.search(&mut request).await.unwrap();

    assert_eq!(result.aggregations.value("avg_price"), Some(250.0));

    let stats = result
        .aggregations
        .get("price_stats")
        .and_then(|r| r.state())
        .and_then(|s| s.stats())
        .unwrap();
    assert_eq!(stats.count, 4);
    assert_eq!(stats.min, Some(100.0));
    assert_eq!(stats.max, Some(300.0));
    assert!((stats.std_dev.unwrap() - 86.602_540).abs() < 1e-5);
}

#[tokio::test]
async fn test_range_boundaries_are_half_open() {
    let mut request = SearchRequest::new(Query::match_all()).add_aggregation(
        "tiers",
        BucketRequest::range(
            "price",
            vec![
                RangeSpec::new("low", None, Some(800.0)),
                RangeSpec::new("mid", Some(800.0), Some(1000.0)),
                RangeSpec::new("high", Some(1000.0), None),
            ],
        ),
    );
    let result = alias(2, &Config::default()).search(&mut request).await.unwrap();
    let tiers = result.aggregations.get("tiers").unwrap();

    // 800 lands in "mid", not "low"
    assert_eq!(tiers.bucket("low").unwrap().count, 3);
    assert_eq!(tiers.bucket("mid").unwrap().count, 3);
    assert_eq!(tiers.bucket("high").unwrap().count, 1);

    let keys: Vec<&str> = tiers.buckets().unwrap().iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, vec!["low", "mid", "high"]);
    assert_eq!(tiers.bucket("mid").unwrap().min, Some(800.0));
}

#[tokio::test]
async fn test_date_ranges() {
    let mut request = SearchRequest::new(Query::match_all()).add_aggregation(
        "release_year",
        BucketRequest::date_range(
            "released",
            vec![
                DateRangeSpec::new("2023", Some("2023-01-01T00:00:00Z"), Some("2024-01-01T00:00:00Z")),
                DateRangeSpec::new("2024", Some("2024-01-01T00:00:00Z"), Some("2025-01-01T00:00:00Z")),
            ],
        ),
    );
    let result = alias(3, &Config::default()).search(&mut request).await.unwrap();
    let years = result.aggregations.get("release_year").unwrap();
    assert_eq!(years.bucket("2023").unwrap().count, 3);
    assert_eq!(years.bucket("2024").unwrap().count, 3);
}

#[tokio::test]
async fn test_invalid_date_is_rejected_up_front() {
    let mut request = SearchRequest::new(Query::match_all()).add_aggregation(
        "bad",
        BucketRequest::date_range(
            "released",
            vec![DateRangeSpec::new("x", Some("yesterday"), None)],
        ),
    );
    let err = alias(2, &Config::default()).search(&mut request).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_terms_filters_and_truncation() {
    let mut request = SearchRequest::new(Query::match_all())
        .add_aggregation("top_brand", BucketRequest::terms("brand", 1))
        .add_aggregation(
            "g_brands",
            BucketRequest::terms("brand", 10).with_prefix_filter("g"),
        )
        .add_aggregation(
            "pro_models",
            BucketRequest::terms("model", 10).with_regex_filter("^(pro|max)$"),
        );
    let result = alias(3, &Config::default()).search(&mut request).await.unwrap();

    let top = result.aggregations.get("top_brand").unwrap().buckets().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].key, "samsung");

    let g = result.aggregations.get("g_brands").unwrap().buckets().unwrap();
    let keys: Vec<&str> = g.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, vec!["google"]);

    let pro = result.aggregations.get("pro_models").unwrap();
    assert_eq!(pro.bucket("pro").unwrap().count, 2);
    assert_eq!(pro.bucket("max").unwrap().count, 1);
}

#[tokio::test]
async fn test_configured_default_terms_size() {
    let mut config = Config::default();
    config.aggregation.default_terms_size = 2;

    let mut request = SearchRequest::new(Query::match_all())
        .add_aggregation("brands", BucketRequest::terms("brand", 0));
    let result = alias(2, &config).search(&mut request).await.unwrap();
    let keys: Vec<&str> = result
        .aggregations
        .get("brands")
        .unwrap()
        .buckets()
        .unwrap()
        .iter()
        .map(|b| b.key.as_str())
        .collect();
    // samsung 3, then apple and google tie at 2 and break by key
    assert_eq!(keys, vec!["samsung", "apple"]);
}

#[tokio::test]
async fn test_undefined_metrics_are_none() {
    let mut request = SearchRequest::new(Query::term("brand", "nokia"))
        .add_aggregation("avg_price", AggregationRequest::avg("price"))
        .add_aggregation("min_price", AggregationRequest::min("price"))
        .add_aggregation("priced", AggregationRequest::count("price"));
    let result = alias(2, &Config::default()).search(&mut request).await.unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(result.aggregations.value("avg_price"), None);
    assert_eq!(result.aggregations.value("min_price"), None);
    assert_eq!(result.aggregations.value("priced"), Some(0.0));
}

#[tokio::test]
async fn test_fractional_sums_do_not_depend_on_shard_count() {
    let weights = [0.1, 0.2, 0.3, 0.7, 1e16, -1e16, 2.675, 1.0 / 3.0];
    let docs: Vec<Value> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| json!({"id": format!("w{}", i), "weight": w}))
        .collect();

    let request = || {
        SearchRequest::new(Query::match_all())
            .add_aggregation("sum", AggregationRequest::sum("weight"))
            .add_aggregation("avg", AggregationRequest::avg("weight"))
            .add_aggregation("squares", AggregationRequest::sum_squares("weight"))
            .add_aggregation("stats", AggregationRequest::stats("weight"))
    };

    let mut baseline = None;
    for shards in 1..=4 {
        let mut parts = vec![Vec::new(); shards];
        for (i, doc) in docs.iter().enumerate() {
            parts[i % shards].push(doc.clone());
        }
        let mut alias = IndexAlias::new("weights");
        for (i, part) in parts.into_iter().enumerate() {
            alias.add_index(MemoryIndex::from_documents(format!("w{}", i), part).unwrap());
        }

        let result = alias.search(&mut request()).await.unwrap();
        let values: Vec<Option<f64>> = ["sum", "avg", "squares", "stats"]
            .iter()
            .map(|name| result.aggregations.value(name))
            .collect();
        match &baseline {
            None => baseline = Some(values),
            Some(expected) => assert_eq!(&values, expected, "{} shards", shards),
        }
    }

    let sum = baseline.unwrap()[0].unwrap();
    assert!((sum - (1.3 + 2.675 + 1.0 / 3.0)).abs() < 1e-9);
}

/// Shard that answers but forgets the aggregations it was asked for
struct NoAggregations;

impl ShardExecutor for NoAggregations {
    fn name(&self) -> &str {
        "stale"
    }

    fn execute(&self, _request: &SearchRequest) -> Result<PartialResult> {
        Ok(PartialResult {
            total: 5,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_shard_missing_aggregations_fails_the_search() {
    let mut alias = IndexAlias::new("mixed");
    alias
        .add_index(MemoryIndex::from_documents("x", vec![json!({"id": "x", "price": 10})]).unwrap())
        .add_index(NoAggregations);

    let mut request = SearchRequest::new(Query::match_all())
        .add_aggregation("n", AggregationRequest::count("price"));
    let err = alias.search(&mut request).await.unwrap_err();
    assert!(matches!(err, ShardfuseError::ShapeMismatch { .. }), "{:?}", err);

    // a nested alias passes the same check up
    let mut inner = IndexAlias::new("inner");
    inner.add_index(NoAggregations);
    let mut outer = IndexAlias::new("outer");
    outer
        .add_index(MemoryIndex::from_documents("y", vec![json!({"id": "y", "price": 3})]).unwrap())
        .add_alias(inner);
    assert!(outer.search(&mut request).await.is_err());
}
