//! Entity references embedded in harvested works

use std::collections::BTreeSet;

use rimline_core::ids::short_id;
use rimline_store::{Document, get_path};
use serde_json::Value;

use crate::entity::Entity;

/// Work fields to project when scanning for `entity` references.
pub fn projection(entity: Entity) -> &'static [&'static str] {
    match entity {
        Entity::Works => &[],
        Entity::Authors | Entity::Institutions => &["authorships"],
        Entity::Sources => &["primary_location", "locations"],
        Entity::Publishers => &["primary_location", "locations"],
        Entity::Topics => &["primary_topic", "topics"],
        Entity::Funders => &["grants", "funders"],
    }
}

fn array<'a>(doc: &'a Document, path: &str) -> impl Iterator<Item = &'a Value> {
    get_path(doc, path)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_at<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

/// Source objects of the primary location and every location.
fn location_sources(work: &Document) -> impl Iterator<Item = &Value> {
    get_path(work, "primary_location.source")
        .into_iter()
        .chain(array(work, "locations").filter_map(|loc| loc.get("source")))
        .filter(|s| !s.is_null())
}

/// Add the references to `entity` found in `work` to `out` (full ID URLs).
pub fn collect_refs(entity: Entity, work: &Document, out: &mut BTreeSet<String>) {
    let mut push = |id: &str| {
        if !id.is_empty() {
            out.insert(id.to_string());
        }
    };
    match entity {
        Entity::Works => {}
        Entity::Authors => {
            for a in array(work, "authorships") {
                if let Some(id) = str_at(a, "author.id") {
                    push(id);
                }
            }
        }
        Entity::Institutions => {
            for a in array(work, "authorships") {
                let institutions = a.get("institutions").and_then(Value::as_array);
                for inst in institutions.into_iter().flatten() {
                    if let Some(id) = str_at(inst, "id") {
                        push(id);
                    }
                }
            }
        }
        Entity::Sources => {
            for source in location_sources(work) {
                if let Some(id) = str_at(source, "id") {
                    push(id);
                }
            }
        }
        Entity::Publishers => {
            let is_publisher = |id: &str| short_id(id).starts_with(Entity::Publishers.id_prefix());
            for source in location_sources(work) {
                let host = source.get("host_organization").and_then(Value::as_str);
                let lineage = source
                    .get("host_organization_lineage")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str);
                for id in host.into_iter().chain(lineage) {
                    if is_publisher(id) {
                        push(id);
                    }
                }
            }
        }
        Entity::Topics => {
            if let Some(id) = get_path(work, "primary_topic.id").and_then(Value::as_str) {
                push(id);
            }
            for t in array(work, "topics") {
                if let Some(id) = str_at(t, "id") {
                    push(id);
                }
            }
        }
        Entity::Funders => {
            for g in array(work, "grants") {
                if let Some(id) = str_at(g, "funder") {
                    push(id);
                }
            }
            for f in array(work, "funders") {
                if let Some(id) = str_at(f, "id") {
                    push(id);
                }
            }
        }
    }
}

/// Deduplicated references to `entity` across `works`, in sorted order.
pub fn derive_ids<'a>(entity: Entity, works: impl IntoIterator<Item = &'a Document>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for work in works {
        collect_refs(entity, work, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work() -> Document {
        let v = json!({
            "id": "https://openalex.org/W1",
            "authorships": [
                {
                    "author": {"id": "https://openalex.org/A1"},
                    "institutions": [{"id": "https://openalex.org/I1"}, {"id": "https://openalex.org/I2"}]
                },
                {
                    "author": {"id": "https://openalex.org/A2"},
                    "institutions": [{"id": "https://openalex.org/I1"}]
                },
                {"author": {"id": null}, "institutions": []}
            ],
            "primary_location": {
                "source": {
                    "id": "https://openalex.org/S1",
                    "host_organization": "https://openalex.org/P1",
                    "host_organization_lineage": ["https://openalex.org/P1", "https://openalex.org/P9"]
                }
            },
            "locations": [
                {"source": {"id": "https://openalex.org/S1"}},
                {"source": {"id": "https://openalex.org/S2", "host_organization": "https://openalex.org/I7"}},
                {"source": null}
            ],
            "primary_topic": {"id": "https://openalex.org/T1"},
            "topics": [{"id": "https://openalex.org/T1"}, {"id": "https://openalex.org/T2"}],
            "grants": [{"funder": "https://openalex.org/F1", "award_id": "x"}],
            "funders": [{"id": "https://openalex.org/F2"}]
        });
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn ids(entity: Entity) -> Vec<String> {
        let w = work();
        derive_ids(entity, [&w])
            .into_iter()
            .map(|id| short_id(&id).to_string())
            .collect()
    }

    #[test]
    fn authors_and_institutions() {
        assert_eq!(ids(Entity::Authors), vec!["A1", "A2"]);
        assert_eq!(ids(Entity::Institutions), vec!["I1", "I2"]);
    }

    #[test]
    fn sources_from_all_locations() {
        assert_eq!(ids(Entity::Sources), vec!["S1", "S2"]);
    }

    #[test]
    fn publishers_only_p_prefixed() {
        assert_eq!(ids(Entity::Publishers), vec!["P1", "P9"]);
    }

    #[test]
    fn topics_and_funders() {
        assert_eq!(ids(Entity::Topics), vec!["T1", "T2"]);
        assert_eq!(ids(Entity::Funders), vec!["F1", "F2"]);
    }

    #[test]
    fn deduplicated_across_works() {
        let a = work();
        let b = work();
        assert_eq!(derive_ids(Entity::Authors, [&a, &b]).len(), 2);
    }

    #[test]
    fn projection_keeps_needed_fields() {
        let w = work();
        let projected = rimline_store::document::project(&w, projection(Entity::Funders));
        assert_eq!(derive_ids(Entity::Funders, [&projected]).len(), 2);
        assert!(projected.get("authorships").is_none());
    }
}
