//! Symbol Similarity Table
//!
//! Groups and pairs of substantially identical securities, each with a
//! similarity score in [0, 1]. The wash-sale index turns this into a graph.

use crate::error::ValidationErrors;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A family of securities that track the same exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityGroup {
    /// Label, e.g. "S&P 500"
    #[serde(default)]
    pub name: Option<String>,
    pub symbols: Vec<String>,
    pub score: f64,
}

/// Two securities with a similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPair {
    pub a: String,
    pub b: String,
    pub score: f64,
}

/// Configured similarity data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTable {
    #[serde(default)]
    pub groups: Vec<SimilarityGroup>,
    #[serde(default)]
    pub pairs: Vec<SimilarPair>,
}

impl SimilarityTable {
    /// A table with no similarity data; only exact symbols match
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            pairs: Vec::new(),
        }
    }

    /// Load a table from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_group(mut self, name: &str, symbols: &[&str], score: f64) -> Self {
        self.groups.push(SimilarityGroup {
            name: Some(name.to_string()),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            score,
        });
        self
    }

    pub fn with_pair(mut self, a: &str, b: &str, score: f64) -> Self {
        self.pairs.push(SimilarPair {
            a: a.to_string(),
            b: b.to_string(),
            score,
        });
        self
    }

    /// Undirected graph keyed by upper-cased symbol, keeping the highest score
    /// when an edge is declared more than once.
    pub fn graph(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut graph: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut add_edge = |a: &str, b: &str, score: f64| {
            let (a, b) = (a.trim().to_uppercase(), b.trim().to_uppercase());
            if a == b {
                return;
            }
            for (from, to) in [(&a, &b), (&b, &a)] {
                let entry = graph.entry(from.clone()).or_default().entry(to.clone()).or_insert(score);
                if score > *entry {
                    *entry = score;
                }
            }
        };

        for group in &self.groups {
            for (i, a) in group.symbols.iter().enumerate() {
                for b in &group.symbols[i + 1..] {
                    add_edge(a, b, group.score);
                }
            }
        }
        for pair in &self.pairs {
            add_edge(&pair.a, &pair.b, pair.score);
        }

        graph
    }

    /// Similarity between two symbols; identical symbols score 1.0.
    ///
    /// Scans the declared groups and pairs directly, keeping the highest score.
    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        let (a, b) = (a.trim(), b.trim());
        if a.eq_ignore_ascii_case(b) {
            return Some(1.0);
        }
        let is = |symbol: &str, wanted: &str| symbol.trim().eq_ignore_ascii_case(wanted);

        let from_groups = self
            .groups
            .iter()
            .filter(|g| g.symbols.iter().any(|s| is(s, a)) && g.symbols.iter().any(|s| is(s, b)))
            .map(|g| g.score);
        let from_pairs = self
            .pairs
            .iter()
            .filter(|p| (is(&p.a, a) && is(&p.b, b)) || (is(&p.a, b) && is(&p.b, a)))
            .map(|p| p.score);

        from_groups.chain(from_pairs).reduce(f64::max)
    }

    pub fn validate(&self, prefix: &str, errors: &mut ValidationErrors) {
        let in_range = |score: f64| score.is_finite() && (0.0..=1.0).contains(&score);

        for (i, group) in self.groups.iter().enumerate() {
            if !in_range(group.score) {
                errors.push(format!("{}.groups[{}].score", prefix, i), "must be within [0, 1]");
            }
            if group.symbols.len() < 2 {
                errors.push(format!("{}.groups[{}].symbols", prefix, i), "needs at least two symbols");
            }
        }
        for (i, pair) in self.pairs.iter().enumerate() {
            if !in_range(pair.score) {
                errors.push(format!("{}.pairs[{}].score", prefix, i), "must be within [0, 1]");
            }
        }
    }
}

impl Default for SimilarityTable {
    /// Share classes and index funds commonly treated as substantially identical
    fn default() -> Self {
        Self::empty()
            .with_group("S&P 500", &["SPY", "VOO", "IVV", "SPLG"], 0.99)
            .with_group("Total US market", &["VTI", "ITOT", "SCHB"], 0.97)
            .with_group("Nasdaq-100", &["QQQ", "QQQM"], 0.99)
            .with_group("Total international", &["VXUS", "IXUS"], 0.96)
            .with_group("US aggregate bonds", &["AGG", "BND"], 0.95)
            .with_pair("GOOGL", "GOOG", 1.0)
            .with_pair("BRK.A", "BRK.B", 1.0)
            // Related but distinct indexes
            .with_pair("SPY", "VTI", 0.85)
            .with_pair("VOO", "VTI", 0.85)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substantially_identical() {
        let table = SimilarityTable::default();

        assert_eq!(table.score("SPY", "spy"), Some(1.0));
        assert_eq!(table.score("SPY", "VOO"), Some(0.99));
        assert_eq!(table.score("GOOG", "GOOGL"), Some(1.0));
        assert_eq!(table.score("AAPL", "MSFT"), None);
    }

    #[test]
    fn test_graph_keeps_highest_score() {
        let table = SimilarityTable::empty()
            .with_pair("AAA", "BBB", 0.5)
            .with_group("family", &["aaa", "bbb", "ccc"], 0.9);

        let graph = table.graph();
        assert_eq!(graph["AAA"]["BBB"], 0.9);
        assert_eq!(graph["BBB"]["AAA"], 0.9);
        assert_eq!(graph["CCC"].len(), 2);
        assert_eq!(table.score("bbb", " AAA "), Some(0.9));
    }

    #[test]
    fn test_score_matches_graph() {
        let table = SimilarityTable::default().with_pair("VOO", "SPY", 0.5);
        let graph = table.graph();

        for (from, neighbors) in &graph {
            for (to, &score) in neighbors {
                assert_eq!(table.score(from, to), Some(score), "{from} -> {to}");
            }
        }
        assert_eq!(table.score("VOO", "SPY"), Some(0.99));
        assert_eq!(table.score("SPY", "VTI"), Some(0.85));
        assert_eq!(table.score("SPY", "QQQ"), None);
    }

    #[test]
    fn test_from_json() {
        let table = SimilarityTable::from_json(
            r#"{"groups":[{"symbols":["SPY","VOO"],"score":0.99}],"pairs":[{"a":"X","b":"Y","score":0.4}]}"#,
        )
        .unwrap();

        assert_eq!(table.groups.len(), 1);
        assert_eq!(table.score("Y", "X"), Some(0.4));
    }

    #[test]
    fn test_validate_scores() {
        let table = SimilarityTable::empty()
            .with_group("bad", &["SPY"], 1.5)
            .with_pair("A", "B", f64::NAN);

        let mut errors = ValidationErrors::new();
        table.validate("similarity_table", &mut errors);

        assert_eq!(
            errors.fields(),
            vec![
                "similarity_table.groups[0].score",
                "similarity_table.groups[0].symbols",
                "similarity_table.pairs[0].score",
            ]
        );
    }
}
