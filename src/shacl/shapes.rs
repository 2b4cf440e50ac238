//! SHACL Shape Generator (spec §4.12): derives SHACL node/property shapes
//! from the ontology, either the in-memory [`OntologyContext`] or a raw OWL
//! RDF graph (spec §6's `generateShapesFromOntology(ontologyStore)`).

use crate::error::{Error, Result};
use crate::ontology::OntologyContext;
use crate::store::{OxigraphStore, RdfStore};
use crate::types::{Iri, RangeType};
use oxigraph::model::{BlankNode, GraphName, Literal as OxLiteral, NamedNode, Quad, Subject, Term};
use oxigraph::sparql::QueryResults;
use std::collections::HashMap;

const SH_NODE_SHAPE: &str = "http://www.w3.org/ns/shacl#NodeShape";
const SH_TARGET_CLASS: &str = "http://www.w3.org/ns/shacl#targetClass";
const SH_PROPERTY: &str = "http://www.w3.org/ns/shacl#property";
const SH_PATH: &str = "http://www.w3.org/ns/shacl#path";
const SH_CLASS: &str = "http://www.w3.org/ns/shacl#class";
const SH_DATATYPE: &str = "http://www.w3.org/ns/shacl#datatype";
const SH_NODE_KIND: &str = "http://www.w3.org/ns/shacl#nodeKind";
const SH_LITERAL: &str = "http://www.w3.org/ns/shacl#Literal";
const SH_MIN_COUNT: &str = "http://www.w3.org/ns/shacl#minCount";
const SH_MAX_COUNT: &str = "http://www.w3.org/ns/shacl#maxCount";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
const OWL_DATATYPE_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
const OWL_FUNCTIONAL_PROPERTY: &str = "http://www.w3.org/2002/07/owl#FunctionalProperty";
const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
const RDFS_SUBCLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
const OWL_ON_PROPERTY: &str = "http://www.w3.org/2002/07/owl#onProperty";
const OWL_MIN_CARDINALITY: &str = "http://www.w3.org/2002/07/owl#minCardinality";
const OWL_MAX_CARDINALITY: &str = "http://www.w3.org/2002/07/owl#maxCardinality";
const OWL_CARDINALITY: &str = "http://www.w3.org/2002/07/owl#cardinality";

/// One property's shape of derivation input: a domain class, the property
/// IRI, its range IRIs, whether it is an object or datatype property, and
/// whether it is functional (spec §4.12).
struct PropertyShapeInput {
    domain_class: Iri,
    property: Iri,
    range: Vec<Iri>,
    range_type: RangeType,
    is_functional: bool,
}

/// A cardinality restriction on a property for a class, derived from an
/// `owl:Restriction` on a `rdfs:subClassOf` axiom (spec §4.12).
pub struct CardinalityRestriction {
    pub class_iri: Iri,
    pub property_iri: Iri,
    pub min_count: Option<u32>,
    pub max_count: Option<u32>,
}

pub struct ShapeGenerator;

impl ShapeGenerator {
    /// Derives shapes from an already-loaded [`OntologyContext`] (spec
    /// §4.1, §4.12): one node shape per class, one property shape per
    /// inherited property. No OWL restriction axioms are available from
    /// this source, so cardinality beyond `isFunctional` is not derived
    /// here — use [`Self::generate_shapes_from_graph`] for that.
    pub fn generate_shapes_from_ontology(ontology: &OntologyContext) -> Result<OxigraphStore> {
        let mut inputs = Vec::new();
        for class in ontology.classes() {
            for prop in ontology.get_properties_for_class(&class.id) {
                inputs.push(PropertyShapeInput {
                    domain_class: class.id.clone(),
                    property: prop.id.clone(),
                    range: prop.range.clone(),
                    range_type: prop.range_type,
                    is_functional: prop.is_functional,
                });
            }
        }
        let class_iris: Vec<Iri> = ontology.classes().map(|c| c.id.clone()).collect();
        Self::build(&class_iris, &inputs, &[])
    }

    /// Derives shapes directly from an OWL RDF graph (spec §6
    /// `ShaclService.generateShapesFromOntology(ontologyStore)`): `owl:Class`
    /// declarations become node shapes, `owl:ObjectProperty`/
    /// `owl:DatatypeProperty` with `rdfs:domain`/`rdfs:range` become property
    /// shapes, `owl:FunctionalProperty` yields `sh:maxCount 1`, and
    /// `rdfs:subClassOf` cardinality restrictions yield `sh:minCount`/
    /// `sh:maxCount` (spec §8 scenario 4).
    pub fn generate_shapes_from_graph(ontology_store: &dyn RdfStore) -> Result<OxigraphStore> {
        let class_iris = Self::query_class_iris(ontology_store)?;
        let functional: std::collections::HashSet<Iri> =
            Self::query_named_node_set(ontology_store, "?p", &format!(
                "?p a <{OWL_FUNCTIONAL_PROPERTY}> ."
            ))?;

        let object_domains = Self::query_property_domains(ontology_store, OWL_OBJECT_PROPERTY)?;
        let datatype_domains = Self::query_property_domains(ontology_store, OWL_DATATYPE_PROPERTY)?;
        let ranges = Self::query_property_ranges(ontology_store)?;

        let mut inputs = Vec::new();
        for (property, domains) in object_domains {
            let range = ranges.get(&property).cloned().unwrap_or_default();
            for domain in domains {
                inputs.push(PropertyShapeInput {
                    domain_class: domain,
                    property: property.clone(),
                    range: range.clone(),
                    range_type: RangeType::Object,
                    is_functional: functional.contains(&property),
                });
            }
        }
        for (property, domains) in datatype_domains {
            let range = ranges.get(&property).cloned().unwrap_or_default();
            for domain in domains {
                inputs.push(PropertyShapeInput {
                    domain_class: domain,
                    property: property.clone(),
                    range: range.clone(),
                    range_type: RangeType::Datatype,
                    is_functional: functional.contains(&property),
                });
            }
        }

        let restrictions = Self::query_cardinality_restrictions(ontology_store)?;
        Self::build(&class_iris, &inputs, &restrictions)
    }

    fn build(
        class_iris: &[Iri],
        property_inputs: &[PropertyShapeInput],
        restrictions: &[CardinalityRestriction],
    ) -> Result<OxigraphStore> {
        let store = OxigraphStore::new()?;

        // Property shapes are keyed per (node shape, path) so cardinality
        // layers onto one shape instead of duplicating it (spec §4.12).
        let mut property_shapes: HashMap<(String, String), BlankNode> = HashMap::new();

        for class_iri in class_iris {
            let node_shape = named(&format!("{class_iri}Shape"))?;
            add(&store, node_shape.clone(), RDF_TYPE, named(SH_NODE_SHAPE)?)?;
            add(&store, node_shape.clone(), SH_TARGET_CLASS, named(class_iri)?)?;
        }

        for input in property_inputs {
            let node_shape = named(&format!("{}Shape", input.domain_class))?;
            let key = (input.domain_class.clone(), input.property.clone());
            let is_new = !property_shapes.contains_key(&key);
            let prop_shape = property_shapes.entry(key).or_insert_with(BlankNode::default).clone();

            if is_new {
                add(&store, node_shape, SH_PROPERTY, prop_shape.clone())?;
                add(&store, prop_shape.clone(), SH_PATH, named(&input.property)?)?;

                match input.range_type {
                    RangeType::Object => {
                        for range in &input.range {
                            add(&store, prop_shape.clone(), SH_CLASS, named(range)?)?;
                        }
                    }
                    RangeType::Datatype => {
                        let datatype = input.range.first().cloned().unwrap_or_else(|| XSD_STRING.to_string());
                        add(&store, prop_shape.clone(), SH_DATATYPE, named(&datatype)?)?;
                        add(&store, prop_shape.clone(), SH_NODE_KIND, named(SH_LITERAL)?)?;
                    }
                }
            }

            if input.is_functional {
                add(
                    &store,
                    prop_shape,
                    SH_MAX_COUNT,
                    Term::Literal(OxLiteral::from(1)),
                )?;
            }
        }

        for restriction in restrictions {
            let node_shape = named(&format!("{}Shape", restriction.class_iri))?;
            let key = (restriction.class_iri.clone(), restriction.property_iri.clone());
            let is_new = !property_shapes.contains_key(&key);
            let prop_shape = property_shapes.entry(key).or_insert_with(BlankNode::default).clone();

            if is_new {
                add(&store, node_shape, SH_PROPERTY, prop_shape.clone())?;
                add(&store, prop_shape.clone(), SH_PATH, named(&restriction.property_iri)?)?;
            }

            if let Some(min_count) = restriction.min_count {
                add(
                    &store,
                    prop_shape.clone(),
                    SH_MIN_COUNT,
                    Term::Literal(OxLiteral::from(i64::from(min_count))),
                )?;
            }
            if let Some(max_count) = restriction.max_count {
                add(
                    &store,
                    prop_shape,
                    SH_MAX_COUNT,
                    Term::Literal(OxLiteral::from(i64::from(max_count))),
                )?;
            }
        }

        Ok(store)
    }

    fn query_class_iris(store: &dyn RdfStore) -> Result<Vec<Iri>> {
        Self::query_named_node_list(store, "?c", &format!("?c a <{OWL_CLASS}> ."))
    }

    fn query_property_domains(
        store: &dyn RdfStore,
        property_type: &str,
    ) -> Result<HashMap<Iri, Vec<Iri>>> {
        let query = format!(
            "SELECT ?p ?d WHERE {{ ?p a <{property_type}> ; <{RDFS_DOMAIN}> ?d . }}"
        );
        let mut result: HashMap<Iri, Vec<Iri>> = HashMap::new();
        for (p, d) in Self::query_named_node_pairs(store, &query, "p", "d")? {
            result.entry(p).or_default().push(d);
        }
        Ok(result)
    }

    fn query_property_ranges(store: &dyn RdfStore) -> Result<HashMap<Iri, Vec<Iri>>> {
        let query = format!("SELECT ?p ?r WHERE {{ ?p <{RDFS_RANGE}> ?r . }}");
        let mut result: HashMap<Iri, Vec<Iri>> = HashMap::new();
        for (p, r) in Self::query_named_node_pairs(store, &query, "p", "r")? {
            result.entry(p).or_default().push(r);
        }
        Ok(result)
    }

    fn query_cardinality_restrictions(store: &dyn RdfStore) -> Result<Vec<CardinalityRestriction>> {
        let query = format!(
            "SELECT ?c ?p ?min ?max ?card WHERE {{ \
               ?c <{RDFS_SUBCLASS_OF}> ?r . ?r <{OWL_ON_PROPERTY}> ?p . \
               OPTIONAL {{ ?r <{OWL_MIN_CARDINALITY}> ?min }} \
               OPTIONAL {{ ?r <{OWL_MAX_CARDINALITY}> ?max }} \
               OPTIONAL {{ ?r <{OWL_CARDINALITY}> ?card }} }}"
        );
        let results = store.query(&query)?;
        let mut restrictions = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                let (Some(Term::NamedNode(class)), Some(Term::NamedNode(property))) =
                    (solution.get("c"), solution.get("p"))
                else {
                    continue;
                };
                let min = solution.get("min").and_then(literal_as_u32);
                let max = solution.get("max").and_then(literal_as_u32);
                let card = solution.get("card").and_then(literal_as_u32);
                if min.is_none() && max.is_none() && card.is_none() {
                    continue;
                }
                restrictions.push(CardinalityRestriction {
                    class_iri: class.as_str().to_string(),
                    property_iri: property.as_str().to_string(),
                    min_count: min.or(card),
                    max_count: max.or(card),
                });
            }
        }
        Ok(restrictions)
    }

    fn query_named_node_list(store: &dyn RdfStore, var: &str, pattern: &str) -> Result<Vec<Iri>> {
        let query = format!("SELECT {var} WHERE {{ {pattern} }}");
        let name = var.trim_start_matches('?');
        let results = store.query(&query)?;
        let mut out = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                if let Some(Term::NamedNode(node)) = solution.get(name) {
                    out.push(node.as_str().to_string());
                }
            }
        }
        Ok(out)
    }

    fn query_named_node_set(
        store: &dyn RdfStore,
        var: &str,
        pattern: &str,
    ) -> Result<std::collections::HashSet<Iri>> {
        Ok(Self::query_named_node_list(store, var, pattern)?
            .into_iter()
            .collect())
    }

    fn query_named_node_pairs(
        store: &dyn RdfStore,
        query: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<(Iri, Iri)>> {
        let results = store.query(query)?;
        let mut out = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                if let (Some(Term::NamedNode(x)), Some(Term::NamedNode(y))) =
                    (solution.get(a), solution.get(b))
                {
                    out.push((x.as_str().to_string(), y.as_str().to_string()));
                }
            }
        }
        Ok(out)
    }
}

fn literal_as_u32(term: &Term) -> Option<u32> {
    match term {
        Term::Literal(lit) => lit.value().parse().ok(),
        _ => None,
    }
}

fn named(iri: &str) -> Result<NamedNode> {
    NamedNode::new(iri).map_err(|e| Error::MalformedOntology(e.to_string()))
}

fn add(store: &OxigraphStore, subject: impl Into<Subject>, predicate: &str, object: impl Into<Term>) -> Result<()> {
    let predicate = named(predicate)?;
    store.add_quad(Quad::new(subject, predicate, object, GraphName::DefaultGraph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassDefinition, PropertyDefinition};
    use oxigraph::model::NamedNode as N;
    use std::collections::HashMap as StdHashMap;

    fn subject_predicate_object(store: &OxigraphStore, s: &str) -> Vec<(String, String)> {
        store
            .get_quads(
                Some(&oxigraph::model::Subject::NamedNode(N::new(s).unwrap())),
                None,
                None,
                None,
            )
            .unwrap()
            .into_iter()
            .map(|q| (q.predicate.as_str().to_string(), format!("{:?}", q.object)))
            .collect()
    }

    #[test]
    fn every_class_gets_exactly_one_node_shape_with_target_class() {
        let animal = ClassDefinition::new("http://ex.org/Animal", "Animal");
        let dog = ClassDefinition::new("http://ex.org/Dog", "Dog");
        let ontology = OntologyContext::new(
            vec![animal, dog],
            vec![],
            StdHashMap::new(),
            StdHashMap::new(),
            StdHashMap::new(),
        )
        .unwrap();

        let store = ShapeGenerator::generate_shapes_from_ontology(&ontology).unwrap();
        let animal_triples = subject_predicate_object(&store, "http://ex.org/AnimalShape");
        assert!(animal_triples.iter().any(|(p, _)| p == SH_TARGET_CLASS));
        let dog_triples = subject_predicate_object(&store, "http://ex.org/DogShape");
        assert!(dog_triples.iter().any(|(p, _)| p == SH_TARGET_CLASS));
    }

    #[test]
    fn datatype_property_yields_datatype_and_literal_nodekind() {
        let person = ClassDefinition::new("http://ex.org/Person", "Person");
        let mut name = PropertyDefinition::new("http://ex.org/name", "name", RangeType::Datatype);
        name.domain = vec!["http://ex.org/Person".to_string()];
        name.range = vec!["http://www.w3.org/2001/XMLSchema#string".to_string()];

        let ontology = OntologyContext::new(
            vec![person],
            vec![name],
            StdHashMap::new(),
            StdHashMap::new(),
            StdHashMap::new(),
        )
        .unwrap();

        let store = ShapeGenerator::generate_shapes_from_ontology(&ontology).unwrap();
        let all_quads = store.get_quads(None, None, None, None).unwrap();
        let datatype_count = all_quads
            .iter()
            .filter(|q| q.predicate.as_str() == SH_DATATYPE)
            .count();
        let nodekind_count = all_quads
            .iter()
            .filter(|q| q.predicate.as_str() == SH_NODE_KIND)
            .count();
        assert_eq!(datatype_count, 1);
        assert_eq!(nodekind_count, 1);
    }

    #[test]
    fn functional_property_yields_exactly_one_max_count_one() {
        let person = ClassDefinition::new("http://ex.org/Person", "Person");
        let mut has_spouse = PropertyDefinition::new(
            "http://ex.org/hasSpouse",
            "has spouse",
            RangeType::Object,
        );
        has_spouse.domain = vec!["http://ex.org/Person".to_string()];
        has_spouse.is_functional = true;

        let ontology = OntologyContext::new(
            vec![person],
            vec![has_spouse],
            StdHashMap::new(),
            StdHashMap::new(),
            StdHashMap::new(),
        )
        .unwrap();

        let store = ShapeGenerator::generate_shapes_from_ontology(&ontology).unwrap();
        let all_quads = store.get_quads(None, None, None, None).unwrap();
        let max_count_ones = all_quads
            .iter()
            .filter(|q| q.predicate.as_str() == SH_MAX_COUNT && q.object.to_string().contains('1'))
            .count();
        assert_eq!(max_count_ones, 1);
    }

    #[test]
    fn cardinality_restriction_from_graph_yields_min_and_max_count() {
        let ontology_store = OxigraphStore::new().unwrap();
        let team = N::new("http://ex.org/Team").unwrap();
        let restriction = oxigraph::model::BlankNode::default();
        let has_player = N::new("http://ex.org/hasPlayer").unwrap();

        add(&ontology_store, team.clone(), RDF_TYPE, named(OWL_CLASS).unwrap()).unwrap();
        add(
            &ontology_store,
            team,
            RDFS_SUBCLASS_OF,
            restriction.clone(),
        )
        .unwrap();
        add(
            &ontology_store,
            restriction.clone(),
            OWL_ON_PROPERTY,
            has_player,
        )
        .unwrap();
        add(
            &ontology_store,
            restriction.clone(),
            OWL_MIN_CARDINALITY,
            Term::Literal(OxLiteral::from(11)),
        )
        .unwrap();
        add(
            &ontology_store,
            restriction,
            OWL_MAX_CARDINALITY,
            Term::Literal(OxLiteral::from(25)),
        )
        .unwrap();

        let shapes = ShapeGenerator::generate_shapes_from_graph(&ontology_store).unwrap();
        let all_quads = shapes.get_quads(None, None, None, None).unwrap();
        let min_counts: Vec<_> = all_quads
            .iter()
            .filter(|q| q.predicate.as_str() == SH_MIN_COUNT)
            .collect();
        let max_counts: Vec<_> = all_quads
            .iter()
            .filter(|q| q.predicate.as_str() == SH_MAX_COUNT)
            .collect();
        assert_eq!(min_counts.len(), 1);
        assert_eq!(max_counts.len(), 1);
        assert!(min_counts[0].object.to_string().contains("11"));
        assert!(max_counts[0].object.to_string().contains("25"));
    }
}
