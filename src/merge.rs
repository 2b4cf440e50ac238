//! Graph Merger (spec §4.10, §8): an associative, commutative merge of
//! per-chunk [`KnowledgeGraph`] fragments, with identity the empty graph.

use crate::types::{Entity, EntityId, KnowledgeGraph, Relation};
use std::collections::HashMap;

pub struct GraphMerger;

impl GraphMerger {
    /// `merge(g1, g2) -> KnowledgeGraph` (spec §4.10). Entities group by id:
    /// union of types (deduplicated, first-appearance order), union of
    /// attributes (later writes win, conflicts logged), union of mention
    /// spans, minimum chunk index, max grounding confidence. Relations
    /// dedupe on `(subjectId, predicate, object)`, keeping the
    /// highest-confidence evidence.
    #[must_use]
    pub fn merge(g1: KnowledgeGraph, g2: KnowledgeGraph) -> KnowledgeGraph {
        let mut entities: HashMap<EntityId, Entity> = HashMap::new();
        let mut entity_order: Vec<EntityId> = Vec::new();

        for entity in g1.entities.into_iter().chain(g2.entities) {
            match entities.get_mut(&entity.id) {
                Some(existing) => Self::merge_entity(existing, entity),
                None => {
                    entity_order.push(entity.id.clone());
                    entities.insert(entity.id.clone(), entity);
                }
            }
        }

        let merged_entities = entity_order
            .into_iter()
            .filter_map(|id| entities.remove(&id))
            .collect();

        let mut relations: HashMap<(EntityId, String, String), Relation> = HashMap::new();
        let mut relation_order: Vec<(EntityId, String, String)> = Vec::new();

        for relation in g1.relations.into_iter().chain(g2.relations) {
            let key = relation.identity();
            match relations.get_mut(&key) {
                Some(existing) => Self::keep_higher_confidence(existing, relation),
                None => {
                    relation_order.push(key.clone());
                    relations.insert(key, relation);
                }
            }
        }

        let merged_relations = relation_order
            .into_iter()
            .filter_map(|key| relations.remove(&key))
            .collect();

        KnowledgeGraph {
            entities: merged_entities,
            relations: merged_relations,
        }
    }

    /// Folds a sequence of fragments into one graph via repeated `merge`,
    /// starting from the empty identity — order-independent up to log order
    /// (spec §4.10, §8).
    #[must_use]
    pub fn fold(fragments: impl IntoIterator<Item = KnowledgeGraph>) -> KnowledgeGraph {
        fragments
            .into_iter()
            .fold(KnowledgeGraph::empty(), Self::merge)
    }

    fn merge_entity(existing: &mut Entity, incoming: Entity) {
        for ty in incoming.types {
            if !existing.types.contains(&ty) {
                existing.types.push(ty);
            }
        }

        for (key, value) in incoming.attributes {
            if let Some(previous) = existing.attributes.get(&key) {
                if *previous != value {
                    tracing::debug!(
                        entity = %existing.id,
                        attribute = %key,
                        "attribute conflict on merge, later write wins"
                    );
                }
            }
            existing.attributes.insert(key, value);
        }

        existing.mention_spans.extend(incoming.mention_spans);

        existing.chunk_index = match (existing.chunk_index, incoming.chunk_index) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };

        existing.grounding_confidence = match (existing.grounding_confidence, incoming.grounding_confidence) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
    }

    fn keep_higher_confidence(existing: &mut Relation, incoming: Relation) {
        let existing_confidence = existing.evidence.as_ref().and_then(|e| e.confidence).unwrap_or(0.0);
        let incoming_confidence = incoming.evidence.as_ref().and_then(|e| e.confidence).unwrap_or(0.0);
        if incoming_confidence > existing_confidence {
            *existing = incoming;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Evidence, Literal, RelationObject};

    fn entity(id: &str, types: &[&str]) -> Entity {
        Entity::new(id, id, types.iter().map(|t| (*t).to_string()).collect())
    }

    fn relation(subject: &str, predicate: &str, object: RelationObject, confidence: Option<f64>) -> Relation {
        Relation {
            subject_id: subject.to_string(),
            predicate: predicate.to_string(),
            object,
            evidence: confidence.map(|c| Evidence {
                text: String::new(),
                start_char: 0,
                end_char: 0,
                confidence: Some(c),
            }),
        }
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut g = KnowledgeGraph::empty();
        g.entities.push(entity("e1", &["Person"]));
        let merged_left = GraphMerger::merge(g.clone(), KnowledgeGraph::empty());
        let merged_right = GraphMerger::merge(KnowledgeGraph::empty(), g.clone());
        assert_eq!(merged_left.entities.len(), 1);
        assert_eq!(merged_right.entities.len(), 1);
    }

    #[test]
    fn merge_unions_entity_types_and_keeps_first_appearance_order() {
        let mut g1 = KnowledgeGraph::empty();
        g1.entities.push(entity("e1", &["Person"]));
        let mut g2 = KnowledgeGraph::empty();
        g2.entities.push(entity("e1", &["Employee", "Person"]));

        let merged = GraphMerger::merge(g1, g2);
        assert_eq!(merged.entities.len(), 1);
        assert_eq!(merged.entities[0].types, vec!["Person", "Employee"]);
    }

    #[test]
    fn merge_min_chunk_index_and_max_confidence() {
        let mut g1 = KnowledgeGraph::empty();
        let mut e1 = entity("e1", &["Person"]);
        e1.chunk_index = Some(3);
        e1.grounding_confidence = Some(0.4);
        g1.entities.push(e1);

        let mut g2 = KnowledgeGraph::empty();
        let mut e2 = entity("e1", &["Person"]);
        e2.chunk_index = Some(1);
        e2.grounding_confidence = Some(0.9);
        g2.entities.push(e2);

        let merged = GraphMerger::merge(g1, g2);
        assert_eq!(merged.entities[0].chunk_index, Some(1));
        assert_eq!(merged.entities[0].grounding_confidence, Some(0.9));
    }

    #[test]
    fn merge_attribute_conflict_later_write_wins() {
        let mut g1 = KnowledgeGraph::empty();
        let mut e1 = entity("e1", &["Person"]);
        e1.attributes.insert("name".to_string(), Literal::new("Alan"));
        g1.entities.push(e1);

        let mut g2 = KnowledgeGraph::empty();
        let mut e2 = entity("e1", &["Person"]);
        e2.attributes.insert("name".to_string(), Literal::new("Alan Bean"));
        g2.entities.push(e2);

        let merged = GraphMerger::merge(g1, g2);
        assert_eq!(merged.entities[0].attributes["name"].value, "Alan Bean");
    }

    #[test]
    fn merge_dedupes_relations_and_keeps_highest_confidence_evidence() {
        let mut g1 = KnowledgeGraph::empty();
        g1.relations.push(relation(
            "e1",
            "knows",
            RelationObject::Entity("e2".to_string()),
            Some(0.3),
        ));
        let mut g2 = KnowledgeGraph::empty();
        g2.relations.push(relation(
            "e1",
            "knows",
            RelationObject::Entity("e2".to_string()),
            Some(0.9),
        ));

        let merged = GraphMerger::merge(g1, g2);
        assert_eq!(merged.relations.len(), 1);
        assert_eq!(merged.relations[0].evidence.as_ref().unwrap().confidence, Some(0.9));
    }

    #[test]
    fn fold_is_commutative_up_to_order() {
        let mut g1 = KnowledgeGraph::empty();
        g1.entities.push(entity("e1", &["Person"]));
        let mut g2 = KnowledgeGraph::empty();
        g2.entities.push(entity("e2", &["Organization"]));
        let mut g3 = KnowledgeGraph::empty();
        g3.relations.push(relation(
            "e1",
            "worksFor",
            RelationObject::Entity("e2".to_string()),
            None,
        ));

        let forward = GraphMerger::fold(vec![g1.clone(), g2.clone(), g3.clone()]);
        let reversed = GraphMerger::fold(vec![g3, g2, g1]);

        let mut forward_ids: Vec<&str> = forward.entities.iter().map(|e| e.id.as_str()).collect();
        let mut reversed_ids: Vec<&str> = reversed.entities.iter().map(|e| e.id.as_str()).collect();
        forward_ids.sort_unstable();
        reversed_ids.sort_unstable();
        assert_eq!(forward_ids, reversed_ids);
        assert_eq!(forward.relations.len(), reversed.relations.len());
    }
}
