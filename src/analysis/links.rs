//! Connections between entities of one investigation.
//!
//! Identifiers are mined from each entity's findings (emails, org and
//! registrar names, ISP names, country codes) and from the entity values
//! themselves (phone area codes, corporate email domains). Two entities
//! sharing an identifier are linked.

use crate::models::{Entity, EntityType, Finding};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Free mail providers; sharing one says nothing about two people.
const WEBMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "proton.me",
    "protonmail.com",
];

/// Shared identifiers reported per entity pair.
const MAX_SHARED_PER_PAIR: usize = 3;

/// Two entities sharing an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub left: Uuid,
    pub right: Uuid,
    /// e.g. `email`, `org`, `isp`, `areacode`, `country`, `domain`
    pub kind: String,
    pub value: String,
}

/// Find links between entities, in entity order, capped at `max_links`.
pub fn find_links(entities: &[Entity], findings: &[Finding], max_links: usize) -> Vec<Link> {
    let mut identifiers: HashMap<Uuid, BTreeSet<(String, String)>> = entities
        .iter()
        .map(|e| (e.id, entity_identifiers(e)))
        .collect();

    for finding in findings {
        if let Some(set) = identifiers.get_mut(&finding.entity_id) {
            extract_identifiers(&finding.raw_data, set);
        }
    }

    let mut links = Vec::new();
    for (i, a) in entities.iter().enumerate() {
        for b in &entities[i + 1..] {
            let shared = identifiers[&a.id].intersection(&identifiers[&b.id]);
            for (kind, value) in shared.take(MAX_SHARED_PER_PAIR) {
                if links.len() == max_links {
                    return links;
                }
                links.push(Link {
                    left: a.id,
                    right: b.id,
                    kind: kind.clone(),
                    value: value.clone(),
                });
            }
        }
    }
    links
}

/// Render links as prompt lines. Empty when there are none.
pub fn render_links(entities: &[Entity], links: &[Link]) -> String {
    if links.is_empty() {
        return String::new();
    }

    let describe = |id: &Uuid| {
        entities
            .iter()
            .find(|e| e.id == *id)
            .map(Entity::describe)
            .unwrap_or_else(|| id.to_string())
    };

    let mut out = format!(
        "Found {} connection(s) between targets in this investigation:\n",
        links.len()
    );
    for link in links {
        out.push_str(&format!(
            "  - [{}] <-> [{}] share {} '{}'\n",
            describe(&link.left),
            describe(&link.right),
            link.kind,
            link.value
        ));
    }
    out
}

fn entity_identifiers(entity: &Entity) -> BTreeSet<(String, String)> {
    let mut set = BTreeSet::new();

    match entity.entity_type {
        EntityType::Phone => {
            let digits: String = entity.value.chars().filter(char::is_ascii_digit).collect();
            if digits.len() >= 10 {
                let area = match digits.strip_prefix('1') {
                    Some(rest) => &rest[..3],
                    None => &digits[..3],
                };
                set.insert(("areacode".to_string(), area.to_string()));
            }
        }
        EntityType::Email => {
            if let Some((_, domain)) = entity.value.split_once('@') {
                let domain = domain.trim().to_lowercase();
                if !domain.is_empty() && !WEBMAIL_DOMAINS.contains(&domain.as_str()) {
                    set.insert(("domain".to_string(), domain));
                }
            }
        }
        _ => {}
    }

    set
}

fn extract_identifiers(raw: &Value, set: &mut BTreeSet<(String, String)>) {
    for key in ["emails", "email"] {
        match raw.get(key) {
            Some(Value::String(s)) => insert_email(s, set),
            Some(Value::Array(items)) => {
                for item in items.iter().filter_map(Value::as_str) {
                    insert_email(item, set);
                }
            }
            _ => {}
        }
    }

    for (kind, keys) in [("org", &["org", "name", "registrar"][..]), ("isp", &["isp", "asname"][..])] {
        for key in keys {
            if let Some(s) = raw.get(*key).and_then(Value::as_str) {
                let s = s.trim();
                if (4..80).contains(&s.chars().count()) {
                    set.insert((kind.to_string(), s.to_lowercase()));
                }
            }
        }
    }

    // `countryCode` is ip-api's spelling
    for key in ["country_code", "countryCode"] {
        if let Some(cc) = raw.get(key).and_then(Value::as_str) {
            if cc.len() == 2 {
                set.insert(("country".to_string(), cc.to_lowercase()));
            }
        }
    }
}

fn insert_email(s: &str, set: &mut BTreeSet<(String, String)>) {
    let s = s.trim();
    if s.contains('@') && s.len() < 255 {
        set.insert(("email".to_string(), s.to_lowercase()));
    }
}
