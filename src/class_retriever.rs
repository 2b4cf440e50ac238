//! Class Retriever (spec §4.5): aggregates a chunk's mentions into a single
//! hybrid-search query, falling back to a deterministic declaration-order
//! slice when retrieval times out or errors.

use crate::ontology::OntologyContext;
use crate::types::{ClassDefinition, Mention};

#[derive(Clone)]
pub struct ClassRetriever {
    default_k: usize,
}

impl ClassRetriever {
    #[must_use]
    pub const fn new(default_k: usize) -> Self {
        Self { default_k }
    }

    /// `join over mentions of (m.context != null ? "mention: context" : mention)`,
    /// separated by spaces (spec §4.5) — one search per chunk, not per
    /// mention.
    fn aggregate_query(mentions: &[Mention]) -> String {
        mentions
            .iter()
            .map(|m| match &m.context {
                Some(context) => format!("{}: {}", m.mention, context),
                None => m.mention.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn retrieve_candidates(
        &self,
        ontology: &OntologyContext,
        mentions: &[Mention],
        k: Option<usize>,
    ) -> Vec<ClassDefinition> {
        let k = k.unwrap_or(self.default_k);
        let query = Self::aggregate_query(mentions);

        match ontology.search_classes_hybrid(&query, k).await {
            Ok(classes) => classes,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "class retrieval failed, falling back to first-k classes in declaration order"
                );
                ontology.first_k_classes(k)
            }
        }
    }
}

impl Default for ClassRetriever {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassDefinition;
    use std::collections::HashMap;

    #[test]
    fn aggregate_query_joins_mention_and_context() {
        let mentions = vec![
            Mention {
                mention: "Alan Bean".to_string(),
                context: Some("an astronaut".to_string()),
            },
            Mention {
                mention: "NASA".to_string(),
                context: None,
            },
        ];
        assert_eq!(
            ClassRetriever::aggregate_query(&mentions),
            "Alan Bean: an astronaut NASA"
        );
    }

    #[tokio::test]
    async fn falls_back_to_first_k_when_query_is_unscorable() {
        let mut a = ClassDefinition::new("http://ex.org/A", "A");
        a.pref_labels = vec!["A".to_string()];
        let mut b = ClassDefinition::new("http://ex.org/B", "B");
        b.pref_labels = vec!["B".to_string()];

        let ontology = OntologyContext::new(
            vec![a, b],
            vec![],
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        )
        .unwrap();

        let retriever = ClassRetriever::new(10);
        let result = retriever
            .retrieve_candidates(&ontology, &[], Some(1))
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "http://ex.org/A");
    }
}
