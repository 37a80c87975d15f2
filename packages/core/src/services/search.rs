//! Schema Search
//!
//! Finds products whose typecode follows a given segment-length
//! arrangement ("schema"): `[4, 2, 3]` matches every product built from a
//! 4-char, then 2-char, then 3-char segment after the family prefix.
//! Matches cover leaves and intermediate products alike; with `prefix`
//! set, longer arrangements that start with the query also match.

use crate::db::SegmentTreeStore;
use crate::models::SegmentNode;
use crate::services::error::VariantServiceError;
use std::sync::Arc;

/// A segment-length arrangement query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaQuery {
    /// Expected code lengths after the family prefix, in order
    pub lengths: Vec<i64>,
    /// Match arrangements that merely start with `lengths`
    pub prefix: bool,
    /// Restrict to one family by its prefix code
    pub family: Option<String>,
}

impl SchemaQuery {
    pub fn exact(lengths: Vec<i64>) -> Self {
        Self {
            lengths,
            prefix: false,
            family: None,
        }
    }

    pub fn prefix(lengths: Vec<i64>) -> Self {
        Self {
            lengths,
            prefix: true,
            family: None,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Whether a concrete arrangement satisfies this query
    fn matches(&self, arrangement: &[i64]) -> bool {
        if self.prefix {
            arrangement.len() >= self.lengths.len()
                && arrangement[..self.lengths.len()] == self.lengths[..]
        } else {
            arrangement == self.lengths
        }
    }
}

/// Searches products by segment-length arrangement
pub struct SchemaSearch {
    store: Arc<SegmentTreeStore>,
}

impl SchemaSearch {
    pub fn new(store: Arc<SegmentTreeStore>) -> Self {
        Self { store }
    }

    /// All products (nodes carrying a `full_typecode`) whose path
    /// arrangement satisfies the query, ordered by typecode within each
    /// family
    pub async fn find_by_schema(
        &self,
        query: &SchemaQuery,
    ) -> Result<Vec<SegmentNode>, VariantServiceError> {
        let families = match &query.family {
            Some(code) => match self.store.family_by_code(code).await? {
                Some(family) => vec![family],
                None => return Ok(Vec::new()),
            },
            None => self.store.families().await?,
        };

        let mut matches = Vec::new();
        for family in families {
            for product in self.store.products_in_family(family.id).await? {
                let path = self.store.selectable_path(product.id).await?;
                // Arrangement excludes the family prefix segment
                let arrangement: Vec<i64> = path
                    .iter()
                    .skip(1)
                    .filter_map(|node| node.code())
                    .map(|code| code.len() as i64)
                    .collect();

                if query.matches(&arrangement) {
                    matches.push(product);
                }
            }
        }

        Ok(matches)
    }
}
