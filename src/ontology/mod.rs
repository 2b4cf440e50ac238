//! The Ontology Context (spec §4.1): an in-memory, immutable-after-load
//! snapshot of classes, properties, and their hierarchies.

pub mod docform;
pub mod retrieval;

pub use retrieval::{hash_embedding_key, RemoteVectorIndex, VectorIndex};

use crate::error::{Error, Result};
use crate::types::{local_name, ClassDefinition, Iri, PropertyDefinition};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Loaded once per extraction run and shared as an immutable snapshot
/// (spec §9). Cheap to clone: the heavy maps live behind `Arc`.
#[derive(Clone)]
pub struct OntologyContext {
    classes_by_id: Arc<HashMap<Iri, ClassDefinition>>,
    properties_by_id: Arc<HashMap<Iri, PropertyDefinition>>,
    /// child IRI -> direct parent IRIs.
    hierarchy: Arc<HashMap<Iri, Vec<Iri>>>,
    /// child IRI -> direct parent IRIs, for properties.
    property_hierarchy: Arc<HashMap<Iri, Vec<Iri>>>,
    metadata: Arc<HashMap<String, String>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    /// Declaration order, used for the deterministic "first K classes"
    /// fallback (spec §4.1, §4.5).
    class_order: Arc<Vec<Iri>>,
}

impl OntologyContext {
    /// Builds a context from its parts, rejecting a hierarchy that contains
    /// a cycle (spec §3: "a cycle is a fatal load error").
    pub fn new(
        classes: Vec<ClassDefinition>,
        properties: Vec<PropertyDefinition>,
        hierarchy: HashMap<Iri, Vec<Iri>>,
        property_hierarchy: HashMap<Iri, Vec<Iri>>,
        metadata: HashMap<String, String>,
    ) -> Result<Self> {
        Self::check_acyclic(&hierarchy)?;
        Self::check_acyclic(&property_hierarchy)?;

        let class_order = classes.iter().map(|c| c.id.clone()).collect();
        let classes_by_id = classes.into_iter().map(|c| (c.id.clone(), c)).collect();
        let properties_by_id = properties
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        Ok(Self {
            classes_by_id: Arc::new(classes_by_id),
            properties_by_id: Arc::new(properties_by_id),
            hierarchy: Arc::new(hierarchy),
            property_hierarchy: Arc::new(property_hierarchy),
            metadata: Arc::new(metadata),
            vector_index: None,
            class_order: Arc::new(class_order),
        })
    }

    /// Attach an optional remote vector index collaborator (spec §6). When
    /// absent, hybrid search degrades to lexical-only.
    #[must_use]
    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    fn check_acyclic(map: &HashMap<Iri, Vec<Iri>>) -> Result<()> {
        #[derive(PartialEq, Clone, Copy)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            map: &'a HashMap<Iri, Vec<Iri>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(Error::OntologyCycle(node.to_string()));
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(parents) = map.get(node) {
                for parent in parents {
                    visit(parent, map, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for node in map.keys() {
            visit(node, map, &mut marks)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_class(&self, iri: &str) -> Option<&ClassDefinition> {
        self.classes_by_id.get(iri)
    }

    #[must_use]
    pub fn get_property(&self, iri: &str) -> Option<&PropertyDefinition> {
        self.properties_by_id.get(iri)
    }

    #[must_use]
    pub fn get_super_classes(&self, iri: &str) -> Vec<Iri> {
        self.hierarchy.get(iri).cloned().unwrap_or_default()
    }

    /// O(n) over the hierarchy map, as the map is keyed by child (spec
    /// §4.1).
    #[must_use]
    pub fn get_sub_classes(&self, iri: &str) -> Vec<Iri> {
        self.hierarchy
            .iter()
            .filter(|(_, parents)| parents.iter().any(|p| p == iri))
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// BFS transitive closure over `hierarchy`, deduplicated, excluding
    /// `iri` itself. Defensively breaks cycles even though [`Self::new`]
    /// already rejects them at load time (spec §4.1).
    #[must_use]
    pub fn get_all_super_classes(&self, iri: &str) -> Vec<Iri> {
        Self::bfs_closure(iri, &self.hierarchy)
    }

    #[must_use]
    pub fn get_all_super_properties(&self, iri: &str) -> Vec<Iri> {
        Self::bfs_closure(iri, &self.property_hierarchy)
    }

    fn bfs_closure(start: &str, map: &HashMap<Iri, Vec<Iri>>) -> Vec<Iri> {
        let mut seen: HashSet<Iri> = HashSet::new();
        let mut queue: VecDeque<Iri> = VecDeque::new();
        queue.push_back(start.to_string());
        let mut visited_nodes: HashSet<Iri> = HashSet::new();
        visited_nodes.insert(start.to_string());

        while let Some(node) = queue.pop_front() {
            if let Some(parents) = map.get(&node) {
                for parent in parents {
                    if visited_nodes.insert(parent.clone()) {
                        seen.insert(parent.clone());
                        queue.push_back(parent.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Reflexive, transitive subclass check (spec §4.1): `child == parent`
    /// is always true.
    #[must_use]
    pub fn is_subclass_of(&self, child: &str, parent: &str) -> bool {
        child == parent || self.get_all_super_classes(child).iter().any(|c| c == parent)
    }

    #[must_use]
    pub fn is_subproperty_of(&self, child: &str, parent: &str) -> bool {
        child == parent
            || self
                .get_all_super_properties(child)
                .iter()
                .any(|p| p == parent)
    }

    /// Union of properties whose domain contains `iri`'s local name or any
    /// transitive ancestor's local name, compared case-insensitively (spec
    /// §3, §4.1). This is the documented "loses information across
    /// namespaces" fallback (spec §9 Open Questions); a debug log fires
    /// whenever the fallback actually contributes a property that an exact
    /// IRI match on `iri` would not have found.
    #[must_use]
    pub fn get_properties_for_class(&self, iri: &str) -> Vec<&PropertyDefinition> {
        let mut candidate_names: HashSet<String> = HashSet::new();
        candidate_names.insert(local_name(iri).to_lowercase());
        for ancestor in self.get_all_super_classes(iri) {
            candidate_names.insert(local_name(&ancestor).to_lowercase());
        }

        let mut result = Vec::new();
        for prop in self.properties_by_id.values() {
            let matches_by_iri = prop.domain.iter().any(|d| d == iri);
            let matches_by_local_name = prop
                .domain
                .iter()
                .any(|d| candidate_names.contains(&local_name(d).to_lowercase()));

            if matches_by_local_name && !matches_by_iri {
                tracing::debug!(
                    class = iri,
                    property = prop.id.as_str(),
                    "getPropertiesForClass matched via case-insensitive local name fallback, not exact IRI"
                );
            }

            if matches_by_iri || matches_by_local_name {
                result.push(prop);
            }
        }
        result
    }

    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes_by_id.values()
    }

    #[must_use]
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties_by_id.values()
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes_by_id.len()
    }

    /// Hybrid lexical + optional vector class search (spec §4.1, §4.5).
    /// Deterministic for a fixed ontology snapshot and query; never fails
    /// on an empty ontology.
    pub async fn search_classes_hybrid(&self, query: &str, k: usize) -> Result<Vec<ClassDefinition>> {
        retrieval::search_classes_hybrid(self, query, k).await
    }

    /// The deterministic fallback used when retrieval is unavailable: the
    /// first `k` classes in declaration order (spec §4.1, §4.5).
    #[must_use]
    pub fn first_k_classes(&self, k: usize) -> Vec<ClassDefinition> {
        self.class_order
            .iter()
            .take(k)
            .filter_map(|id| self.classes_by_id.get(id).cloned())
            .collect()
    }

    pub(crate) fn vector_index(&self) -> Option<&Arc<dyn VectorIndex>> {
        self.vector_index.as_ref()
    }
}
