//! Property Scoper (spec §4.8): the set of properties applicable to a
//! chunk's entity types, direct and inherited, deduplicated by IRI.

use crate::ontology::OntologyContext;
use crate::types::{Iri, PropertyDefinition};
use std::collections::HashSet;

pub struct PropertyScoper;

impl PropertyScoper {
    /// `∪ over t of ontology.getPropertiesForClass(t)`, deduplicated by
    /// property IRI (spec §4.8). Empty `type_iris` yields an empty result.
    #[must_use]
    pub fn properties_for(ontology: &OntologyContext, type_iris: &[Iri]) -> Vec<PropertyDefinition> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        for type_iri in type_iris {
            for prop in ontology.get_properties_for_class(type_iri) {
                if seen.insert(prop.id.as_str()) {
                    result.push(prop.clone());
                }
            }
        }
        result
    }
}
