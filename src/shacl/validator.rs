//! SHACL Validator (spec §4.13): evaluates a populated RDF store against
//! shapes generated by [`super::shapes::ShapeGenerator`], returning a report
//! of violations. Never mutates either store.

use crate::error::{Error, Result};
use crate::store::RdfStore;
use crate::types::{ShaclValidationReport, ShaclViolation, Severity};
use oxigraph::sparql::QueryResults;

const SH_NODE_SHAPE: &str = "http://www.w3.org/ns/shacl#NodeShape";
const SH_TARGET_CLASS: &str = "http://www.w3.org/ns/shacl#targetClass";
const SH_PROPERTY: &str = "http://www.w3.org/ns/shacl#property";
const SH_PATH: &str = "http://www.w3.org/ns/shacl#path";
const SH_CLASS: &str = "http://www.w3.org/ns/shacl#class";
const SH_DATATYPE: &str = "http://www.w3.org/ns/shacl#datatype";
const SH_MIN_COUNT: &str = "http://www.w3.org/ns/shacl#minCount";
const SH_MAX_COUNT: &str = "http://www.w3.org/ns/shacl#maxCount";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

struct NodeShape {
    shape_iri: String,
    target_class: String,
}

struct PropertyShape {
    path: String,
    class: Option<String>,
    datatype: Option<String>,
    min_count: Option<u32>,
    max_count: Option<u32>,
}

pub struct ShaclValidator;

impl ShaclValidator {
    /// `validate(dataStore, shapesStore) -> ShaclValidationReport` (spec
    /// §4.13). Standard SHACL semantics over only the shapes derived by
    /// §4.12; never mutates `data_store` or `shapes_store`.
    pub fn validate(data_store: &dyn RdfStore, shapes_store: &dyn RdfStore) -> Result<ShaclValidationReport> {
        let node_shapes = Self::query_node_shapes(shapes_store)?;
        let mut violations = Vec::new();

        for node_shape in &node_shapes {
            let property_shapes = Self::query_property_shapes(shapes_store, &node_shape.shape_iri)?;
            let instances = Self::query_instances(data_store, &node_shape.target_class)?;

            for instance in &instances {
                for property_shape in &property_shapes {
                    violations.extend(Self::validate_property(data_store, instance, property_shape)?);
                }
            }
        }

        Ok(ShaclValidationReport {
            conforms: violations.is_empty(),
            violations,
        })
    }

    fn validate_property(
        data_store: &dyn RdfStore,
        instance: &str,
        shape: &PropertyShape,
    ) -> Result<Vec<ShaclViolation>> {
        let values = Self::query_property_values(data_store, instance, &shape.path)?;
        let mut violations = Vec::new();

        if let Some(min_count) = shape.min_count {
            if (values.len() as u32) < min_count {
                violations.push(ShaclViolation {
                    focus_node: instance.to_string(),
                    path: Some(shape.path.clone()),
                    value: None,
                    message: format!(
                        "property {} has {} value(s), fewer than minCount {min_count}",
                        shape.path,
                        values.len()
                    ),
                    severity: Severity::Violation,
                });
            }
        }

        if let Some(max_count) = shape.max_count {
            if (values.len() as u32) > max_count {
                violations.push(ShaclViolation {
                    focus_node: instance.to_string(),
                    path: Some(shape.path.clone()),
                    value: None,
                    message: format!(
                        "property {} has {} value(s), more than maxCount {max_count}",
                        shape.path,
                        values.len()
                    ),
                    severity: Severity::Violation,
                });
            }
        }

        if let Some(expected_class) = &shape.class {
            for value in &values {
                if let PropertyValue::Iri(iri) = value {
                    if !Self::instance_has_type(data_store, iri, expected_class)? {
                        violations.push(ShaclViolation {
                            focus_node: instance.to_string(),
                            path: Some(shape.path.clone()),
                            value: None,
                            message: format!(
                                "value {iri} of property {} is not an instance of class {expected_class}",
                                shape.path
                            ),
                            severity: Severity::Violation,
                        });
                    }
                }
            }
        }

        if let Some(expected_datatype) = &shape.datatype {
            for value in &values {
                if let PropertyValue::Literal { datatype, .. } = value {
                    if datatype.as_deref() != Some(expected_datatype.as_str())
                        && !(expected_datatype.ends_with("#string") && datatype.is_none())
                    {
                        violations.push(ShaclViolation {
                            focus_node: instance.to_string(),
                            path: Some(shape.path.clone()),
                            value: None,
                            message: format!(
                                "value of property {} has datatype {:?}, expected {expected_datatype}",
                                shape.path, datatype
                            ),
                            severity: Severity::Violation,
                        });
                    }
                }
            }
        }

        Ok(violations)
    }

    fn instance_has_type(data_store: &dyn RdfStore, instance: &str, class: &str) -> Result<bool> {
        let query = format!("ASK {{ <{instance}> <{RDF_TYPE}> <{class}> }}");
        match data_store.query(&query)? {
            QueryResults::Boolean(b) => Ok(b),
            _ => Ok(false),
        }
    }

    fn query_node_shapes(shapes_store: &dyn RdfStore) -> Result<Vec<NodeShape>> {
        let query = format!(
            "SELECT ?shape ?target WHERE {{ ?shape <{RDF_TYPE}> <{SH_NODE_SHAPE}> ; <{SH_TARGET_CLASS}> ?target . }}"
        );
        let results = shapes_store.query(&query)?;
        let mut shapes = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                if let (Some(shape), Some(target)) = (solution.get("shape"), solution.get("target")) {
                    shapes.push(NodeShape {
                        shape_iri: term_iri(shape),
                        target_class: term_iri(target),
                    });
                }
            }
        }
        Ok(shapes)
    }

    fn query_property_shapes(shapes_store: &dyn RdfStore, shape_iri: &str) -> Result<Vec<PropertyShape>> {
        let query = format!(
            "SELECT ?prop ?path ?class ?datatype ?minCount ?maxCount WHERE {{ \
               <{shape_iri}> <{SH_PROPERTY}> ?prop . ?prop <{SH_PATH}> ?path . \
               OPTIONAL {{ ?prop <{SH_CLASS}> ?class }} \
               OPTIONAL {{ ?prop <{SH_DATATYPE}> ?datatype }} \
               OPTIONAL {{ ?prop <{SH_MIN_COUNT}> ?minCount }} \
               OPTIONAL {{ ?prop <{SH_MAX_COUNT}> ?maxCount }} }}"
        );
        let results = shapes_store.query(&query)?;
        let mut shapes = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                let Some(path) = solution.get("path") else {
                    continue;
                };
                shapes.push(PropertyShape {
                    path: term_iri(path),
                    class: solution.get("class").map(term_iri),
                    datatype: solution.get("datatype").map(term_iri),
                    min_count: solution.get("minCount").and_then(term_u32),
                    max_count: solution.get("maxCount").and_then(term_u32),
                });
            }
        }
        Ok(shapes)
    }

    fn query_instances(data_store: &dyn RdfStore, target_class: &str) -> Result<Vec<String>> {
        let query = format!("SELECT ?instance WHERE {{ ?instance <{RDF_TYPE}> <{target_class}> . }}");
        let results = data_store.query(&query)?;
        let mut instances = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                if let Some(instance) = solution.get("instance") {
                    instances.push(term_iri(instance));
                }
            }
        }
        Ok(instances)
    }

    fn query_property_values(
        data_store: &dyn RdfStore,
        instance: &str,
        path: &str,
    ) -> Result<Vec<PropertyValue>> {
        let query = format!("SELECT ?value WHERE {{ <{instance}> <{path}> ?value . }}");
        let results = data_store.query(&query)?;
        let mut values = Vec::new();
        if let QueryResults::Solutions(solutions) = results {
            for solution in solutions {
                let solution = solution.map_err(|e| Error::Store(e.to_string()))?;
                if let Some(term) = solution.get("value") {
                    values.push(PropertyValue::from_term(term));
                }
            }
        }
        Ok(values)
    }
}

enum PropertyValue {
    Iri(String),
    Literal { datatype: Option<String> },
}

impl PropertyValue {
    fn from_term(term: &oxigraph::model::Term) -> Self {
        match term {
            oxigraph::model::Term::NamedNode(n) => Self::Iri(n.as_str().to_string()),
            oxigraph::model::Term::Literal(lit) => Self::Literal {
                datatype: Some(lit.datatype().as_str().to_string()),
            },
            _ => Self::Iri(term.to_string()),
        }
    }
}

fn term_iri(term: &oxigraph::model::Term) -> String {
    match term {
        oxigraph::model::Term::NamedNode(n) => n.as_str().to_string(),
        other => other.to_string(),
    }
}

fn term_u32(term: &oxigraph::model::Term) -> Option<u32> {
    match term {
        oxigraph::model::Term::Literal(lit) => lit.value().parse().ok(),
        _ => None,
    }
}
