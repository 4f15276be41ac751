//! Per-shard aggregation tree: builds accumulators and snapshots results

use super::bucket::BucketAccumulator;
use super::metric::MetricAccumulator;
use super::result::{AggregationResult, AggregationResults};
use super::{AggregationRequest, AggregationsRequest};
use crate::error::Result;
use crate::index::FieldValueExtractor;

#[derive(Debug, Clone)]
enum AggregationNode {
    Metric(MetricAccumulator),
    Bucket(Box<BucketAccumulator>),
}

/// Per-shard accumulator tree built from an [`AggregationsRequest`].
///
/// Every bucket owns a fresh copy of its sub-tree, cloned from a prototype
/// the first time the bucket receives a document.
#[derive(Debug, Clone, Default)]
pub struct AggregationTree {
    nodes: Vec<(String, AggregationNode)>,
}

impl AggregationTree {
    /// Build the tree, rejecting bad filters or date bounds up front
    pub fn build(request: &AggregationsRequest) -> Result<Self> {
        let mut nodes = Vec::with_capacity(request.len());
        for (name, agg) in request.iter() {
            let node = match agg {
                AggregationRequest::Metric { kind, field } => {
                    AggregationNode::Metric(MetricAccumulator::new(*kind, field.clone()))
                }
                AggregationRequest::Bucket(bucket) => {
                    AggregationNode::Bucket(Box::new(BucketAccumulator::build(bucket)?))
                }
            };
            nodes.push((name.clone(), node));
        }
        Ok(Self { nodes })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Feed one matching document to every node
    pub fn consume(&mut self, doc_id: &str, extractor: &dyn FieldValueExtractor) {
        for (_, node) in &mut self.nodes {
            match node {
                AggregationNode::Metric(acc) => {
                    let value = extractor.numeric(doc_id, acc.field());
                    acc.consume(value);
                }
                AggregationNode::Bucket(acc) => acc.consume(doc_id, extractor),
            }
        }
    }

    /// Snapshot the tree as a mergeable result
    pub fn results(&self) -> AggregationResults {
        let mut results = AggregationResults::new();
        for (name, node) in &self.nodes {
            let result = match node {
                AggregationNode::Metric(acc) => {
                    AggregationResult::metric(acc.field(), acc.result())
                }
                AggregationNode::Bucket(acc) => acc.result(),
            };
            results.insert(name.clone(), result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BucketRequest, RangeSpec};
    use std::collections::HashMap;

    struct Products(HashMap<&'static str, (&'static str, f64)>);

    impl FieldValueExtractor for Products {
        fn numeric(&self, doc_id: &str, field: &str) -> Option<f64> {
            (field == "price").then(|| self.0.get(doc_id).map(|(_, p)| *p)).flatten()
        }

        fn terms(&self, doc_id: &str, field: &str) -> Vec<String> {
            if field != "brand" {
                return Vec::new();
            }
            self.0
                .get(doc_id)
                .map(|(b, _)| vec![b.to_string()])
                .unwrap_or_default()
        }
    }

    fn products() -> Products {
        Products(HashMap::from([
            ("p1", ("apple", 999.0)),
            ("p2", ("apple", 1299.0)),
            ("p3", ("samsung", 799.0)),
            ("p4", ("samsung", 899.0)),
            ("p5", ("samsung", 599.0)),
            ("p6", ("google", 699.0)),
            ("p7", ("google", 799.0)),
        ]))
    }

    #[test]
    fn test_nested_tree() {
        let request = AggregationsRequest::new()
            .with("max_price", AggregationRequest::max("price"))
            .with(
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
        let mut tree = AggregationTree::build(&request).unwrap();
        let docs = products();
        for id in ["p1", "p2", "p3", "p4", "p5", "p6", "p7"] {
            tree.consume(id, &docs);
        }
        let results = tree.results();

        assert_eq!(results.value("max_price"), Some(1299.0));
        let samsung = results.get("by_brand").unwrap().bucket("samsung").unwrap();
        assert_eq!(samsung.count, 3);
        let avg = samsung.sub_results.value("avg_price").unwrap();
        assert!((avg - 765.6666).abs() < 0.001);

        let tiers = samsung.sub_results.get("tiers").unwrap();
        assert_eq!(tiers.bucket("budget").unwrap().count, 2);
        assert_eq!(tiers.bucket("premium").unwrap().count, 1);
    }

    #[test]
    fn test_empty_request_builds_empty_tree() {
        let tree = AggregationTree::build(&AggregationsRequest::new()).unwrap();
        assert!(tree.is_empty());
        assert!(tree.results().is_empty());
    }
}
