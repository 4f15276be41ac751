use serde::{Deserialize, Serialize};

fn default_boost() -> f64 {
    1.0
}

/// Primary (full-text) query understood by the shard executors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    MatchAll {
        #[serde(default = "default_boost")]
        boost: f64,
    },
    MatchNone,
    /// Exact analyzed term in one field
    Term {
        field: String,
        term: String,
        #[serde(default = "default_boost")]
        boost: f64,
    },
    /// Free text, analyzed the same way as the field
    Match {
        field: String,
        text: String,
        #[serde(default = "default_boost")]
        boost: f64,
    },
    /// Half-open numeric range `[min, max)`
    NumericRange {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default = "default_boost")]
        boost: f64,
    },
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll { boost: 1.0 }
    }

    pub fn term(field: impl Into<String>, term: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
            boost: 1.0,
        }
    }

    pub fn matching(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Match {
            field: field.into(),
            text: text.into(),
            boost: 1.0,
        }
    }

    pub fn numeric_range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Query::NumericRange {
            field: field.into(),
            min,
            max,
            boost: 1.0,
        }
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.set_boost(boost);
        self
    }

    /// Boost of a boostable query, `None` otherwise
    pub fn boost(&self) -> Option<f64> {
        match self {
            Query::MatchAll { boost }
            | Query::Term { boost, .. }
            | Query::Match { boost, .. }
            | Query::NumericRange { boost, .. } => Some(*boost),
            Query::MatchNone => None,
        }
    }

    /// No-op for queries that carry no boost
    pub fn set_boost(&mut self, value: f64) {
        match self {
            Query::MatchAll { boost }
            | Query::Term { boost, .. }
            | Query::Match { boost, .. }
            | Query::NumericRange { boost, .. } => *boost = value,
            Query::MatchNone => {}
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::match_all()
    }
}

/// Vector similarity sub-query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnRequest {
    pub field: String,
    pub vector: Vec<f32>,
    pub k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f64>,
}

impl KnnRequest {
    pub fn new(field: impl Into<String>, vector: Vec<f32>, k: usize) -> Self {
        Self {
            field: field.into(),
            vector,
            k,
            boost: None,
        }
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    pub fn effective_boost(&self) -> f64 {
        self.boost.unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_none_is_not_boostable() {
        let mut query = Query::MatchNone;
        assert_eq!(query.boost(), None);
        query.set_boost(3.0);
        assert_eq!(query, Query::MatchNone);

        let query = Query::term("brand", "samsung").with_boost(2.5);
        assert_eq!(query.boost(), Some(2.5));
    }

    #[test]
    fn test_query_json_defaults_boost() {
        let query: Query =
            serde_json::from_str(r#"{"type":"match","field":"title","text":"phone"}"#).unwrap();
        assert_eq!(query.boost(), Some(1.0));
    }
}
