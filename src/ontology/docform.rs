//! The class/property "document form" projection (spec §4.3): a contract
//! downstream lexical indexes consume verbatim, so its shape is fixed, not
//! an implementation detail.

use crate::types::{local_name, ClassDefinition, PropertyDefinition};

/// Splits a camelCase/PascalCase identifier into space-separated lowercase
/// words, e.g. `"hasLegs"` -> `"has legs"`, `"URL"` -> `"url"`.
#[must_use]
pub fn split_camel_case(s: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && !current.is_empty() {
            let prev_is_lower = chars[i - 1].is_lowercase();
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_is_lower || next_is_lower {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .into_iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduces an IRI to its local name, then humanizes camelCase into
/// space-separated words, per the §4.3 contract ("IRIs reduced to local
/// names and camelCase split into space-separated words when the split
/// differs from the lowercased form").
#[must_use]
pub fn humanize_iri(iri: &str) -> String {
    let name = local_name(iri);
    let split = split_camel_case(name);
    if split == name.to_lowercase() {
        name.to_lowercase()
    } else {
        split
    }
}

fn humanize_list(iris: &[String]) -> String {
    iris.iter()
        .map(|i| humanize_iri(i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn append_labels(out: &mut String, labels: &[String]) {
    for label in labels {
        out.push_str(label);
        out.push('\n');
    }
}

fn append_related_sections(
    out: &mut String,
    broader: &[String],
    narrower: &[String],
    related: &[String],
) {
    if !broader.is_empty() {
        out.push_str("Broader: ");
        out.push_str(&broader.join(" | "));
        out.push('\n');
    }
    if !narrower.is_empty() {
        out.push_str("Narrower: ");
        out.push_str(&narrower.join(" | "));
        out.push('\n');
    }
    if !related.is_empty() {
        out.push_str("Related: ");
        out.push_str(&related.join(" | "));
        out.push('\n');
    }
}

/// Projects a class into its retrieval document form (spec §4.3).
#[must_use]
pub fn class_document_form(class: &ClassDefinition) -> String {
    let mut out = String::new();

    let primary_label = class
        .pref_labels
        .first()
        .cloned()
        .unwrap_or_else(|| class.label.clone());
    out.push_str(&primary_label);
    out.push('\n');

    append_labels(&mut out, &class.pref_labels);
    append_labels(&mut out, &class.alt_labels);
    append_labels(&mut out, &class.hidden_labels);

    let definition = class.definition.as_deref().unwrap_or(&class.comment);
    if !definition.is_empty() {
        out.push_str(definition);
        out.push('\n');
    }
    if let Some(note) = &class.scope_note {
        out.push_str(note);
        out.push('\n');
    }
    if let Some(example) = &class.example {
        out.push_str(example);
        out.push('\n');
    }

    if !class.properties.is_empty() {
        out.push_str("Properties: ");
        out.push_str(&humanize_list(&class.properties));
        out.push('\n');
    }

    append_related_sections(&mut out, &class.broader, &class.narrower, &class.related);

    out
}

/// Projects a property into its retrieval document form (spec §4.3).
#[must_use]
pub fn property_document_form(prop: &PropertyDefinition) -> String {
    let mut out = String::new();

    let primary_label = prop
        .pref_labels
        .first()
        .cloned()
        .unwrap_or_else(|| prop.label.clone());
    out.push_str(&primary_label);
    out.push('\n');

    append_labels(&mut out, &prop.pref_labels);
    append_labels(&mut out, &prop.alt_labels);
    append_labels(&mut out, &prop.hidden_labels);

    let definition = prop.definition.as_deref().unwrap_or(&prop.comment);
    if !definition.is_empty() {
        out.push_str(definition);
        out.push('\n');
    }
    if let Some(note) = &prop.scope_note {
        out.push_str(note);
        out.push('\n');
    }
    if let Some(example) = &prop.example {
        out.push_str(example);
        out.push('\n');
    }

    if !prop.domain.is_empty() {
        out.push_str("Domain: ");
        out.push_str(&humanize_list(&prop.domain));
        out.push('\n');
    }
    if !prop.range.is_empty() {
        out.push_str("Range: ");
        out.push_str(&humanize_list(&prop.range));
        out.push('\n');
    }

    append_related_sections(&mut out, &prop.broader, &prop.narrower, &prop.related);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RangeType;

    #[test]
    fn camel_case_split() {
        assert_eq!(split_camel_case("hasLegs"), "has legs");
        assert_eq!(split_camel_case("Person"), "person");
        assert_eq!(split_camel_case("birthDate"), "birth date");
        assert_eq!(split_camel_case("URL"), "url");
    }

    #[test]
    fn humanize_iri_reduces_and_splits() {
        assert_eq!(humanize_iri("http://ex.org/hasLegs"), "has legs");
        assert_eq!(humanize_iri("http://ex.org/Animal"), "animal");
    }

    #[test]
    fn class_document_form_contains_sections() {
        let mut class = ClassDefinition::new("http://ex.org/Dog", "Dog");
        class.pref_labels = vec!["Dog".to_string()];
        class.alt_labels = vec!["Canine".to_string()];
        class.definition = Some("A domesticated carnivore.".to_string());
        class.properties = vec!["http://ex.org/hasLegs".to_string()];
        class.broader = vec!["http://ex.org/Animal".to_string()];

        let doc = class_document_form(&class);
        assert!(doc.starts_with("Dog\n"));
        assert!(doc.contains("Canine"));
        assert!(doc.contains("A domesticated carnivore."));
        assert!(doc.contains("Properties: has legs"));
        assert!(doc.contains("Broader: http://ex.org/Animal"));
    }

    #[test]
    fn property_document_form_contains_domain_range() {
        let mut prop =
            PropertyDefinition::new("http://ex.org/hasLegs", "has legs", RangeType::Datatype);
        prop.domain = vec!["http://ex.org/Animal".to_string()];
        prop.range = vec!["http://www.w3.org/2001/XMLSchema#integer".to_string()];

        let doc = property_document_form(&prop);
        assert!(doc.contains("Domain: animal"));
        assert!(doc.contains("Range: integer"));
    }
}
