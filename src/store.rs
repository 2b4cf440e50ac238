//! RDF store abstraction (spec §6, §9): `addQuad`/`removeQuad`/`getQuads`
//! plus raw SPARQL, backed by an in-memory `oxigraph` store. The Corrector
//! and SHACL Validator depend only on the [`RdfStore`] trait, not on
//! `oxigraph` directly, so any deterministic quad store can stand in.

use crate::error::{Error, Result};
use oxigraph::model::{GraphName, NamedNode, Quad, Subject, Term};
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

pub trait RdfStore: Send + Sync {
    fn add_quad(&self, quad: Quad) -> Result<()>;
    fn remove_quad(&self, quad: &Quad) -> Result<()>;
    fn get_quads(
        &self,
        subject: Option<&Subject>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&GraphName>,
    ) -> Result<Vec<Quad>>;
    fn query(&self, sparql: &str) -> Result<QueryResults>;
}

/// The default [`RdfStore`] implementation, wrapping an in-memory
/// `oxigraph::store::Store`.
pub struct OxigraphStore {
    store: Store,
}

impl OxigraphStore {
    pub fn new() -> Result<Self> {
        let store = Store::new().map_err(|e| Error::StoreConnection(e.to_string()))?;
        Ok(Self { store })
    }

    #[must_use]
    pub const fn inner(&self) -> &Store {
        &self.store
    }
}

impl RdfStore for OxigraphStore {
    fn add_quad(&self, quad: Quad) -> Result<()> {
        self.store
            .insert(&quad)
            .map(|_| ())
            .map_err(|e| Error::Store(e.to_string()))
    }

    fn remove_quad(&self, quad: &Quad) -> Result<()> {
        self.store
            .remove(quad)
            .map(|_| ())
            .map_err(|e| Error::Store(e.to_string()))
    }

    fn get_quads(
        &self,
        subject: Option<&Subject>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
        graph: Option<&GraphName>,
    ) -> Result<Vec<Quad>> {
        self.store
            .quads_for_pattern(
                subject.map(Subject::as_ref),
                predicate.map(NamedNode::as_ref),
                object.map(Term::as_ref),
                graph.map(GraphName::as_ref),
            )
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Store(e.to_string()))
    }

    fn query(&self, sparql: &str) -> Result<QueryResults> {
        self.store
            .query(sparql)
            .map_err(|e| Error::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::NamedNode as N;

    fn quad(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(
            N::new(s).unwrap(),
            N::new(p).unwrap(),
            N::new(o).unwrap(),
            GraphName::DefaultGraph,
        )
    }

    #[test]
    fn add_then_get_round_trips() {
        let store = OxigraphStore::new().unwrap();
        let q = quad(
            "http://ex.org/Alice",
            "http://ex.org/knows",
            "http://ex.org/Bob",
        );
        store.add_quad(q.clone()).unwrap();

        let subject = Subject::NamedNode(N::new("http://ex.org/Alice").unwrap());
        let found = store.get_quads(Some(&subject), None, None, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], q);
    }

    #[test]
    fn remove_drops_the_quad() {
        let store = OxigraphStore::new().unwrap();
        let q = quad(
            "http://ex.org/Alice",
            "http://ex.org/knows",
            "http://ex.org/Bob",
        );
        store.add_quad(q.clone()).unwrap();
        store.remove_quad(&q).unwrap();

        let subject = Subject::NamedNode(N::new("http://ex.org/Alice").unwrap());
        let found = store.get_quads(Some(&subject), None, None, None).unwrap();
        assert!(found.is_empty());
    }
}
