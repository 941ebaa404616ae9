//! Duplicate candidate matcher.
//!
//! # Responsibility
//! - Group contacts that probably describe the same person or business.
//! - Tag each group with the evidence and a confidence level.
//!
//! # Invariants
//! - Advisory only: never mutates contacts or identities.
//! - Email is not a match key; the store already keeps emails unique.
//! - Contacts sharing a phone with clearly different names are `Unclear`
//!   and never end up together in a `High` group.
//! - Output is deterministic for the same input set regardless of order.

use crate::model::contact::{Contact, ContactId};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

static NAME_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9\s]").expect("valid punctuation regex"));

const BUSINESS_SUFFIXES: &[&str] = &["llc", "inc", "corp", "foundation", "ltd"];
const MIN_PHONE_DIGITS: usize = 10;
const DEFAULT_DIVERGENT_SIMILARITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchConfidence {
    High,
    Medium,
    Unclear,
}

impl MatchConfidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Unclear => "UNCLEAR",
        }
    }
}

impl Display for MatchConfidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence behind a candidate group, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MatchKeyType {
    PhoneAndName,
    PhoneAndAddress,
    Phone,
    Name,
}

impl MatchKeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PhoneAndName => "phone+name",
            Self::PhoneAndAddress => "phone+address",
            Self::Phone => "phone",
            Self::Name => "name",
        }
    }
}

impl Display for MatchKeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCandidateGroup {
    /// Stable within one matcher run: `G0001`, `G0002`, ...
    pub group_id: String,
    /// Sorted ascending.
    pub contact_ids: Vec<ContactId>,
    pub match_key_type: MatchKeyType,
    pub confidence: MatchConfidence,
}

/// Digits-only phone key; `None` below ten digits. A leading US country
/// code is dropped from eleven-digit numbers.
pub fn normalize_phone(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    let digits = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

/// Lowercased, punctuation-free name key without trailing business
/// suffixes. `None` when nothing remains.
pub fn normalize_name(value: &str) -> Option<String> {
    let lowered = value.to_lowercase();
    let stripped = NAME_PUNCT_RE.replace_all(&lowered, "");
    let mut tokens: Vec<&str> = stripped.split_whitespace().collect();
    while tokens.len() > 1 && tokens.last().is_some_and(|last| BUSINESS_SUFFIXES.contains(last)) {
        tokens.pop();
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// Finds merge candidates; never merges.
#[derive(Debug, Clone)]
pub struct DuplicateMatcher {
    divergent_similarity: f64,
}

impl Default for DuplicateMatcher {
    fn default() -> Self {
        Self {
            divergent_similarity: DEFAULT_DIVERGENT_SIMILARITY,
        }
    }
}

struct MatchKeys<'a> {
    contact: &'a Contact,
    phones: BTreeSet<String>,
    name: Option<String>,
    addresses: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    confidence: MatchConfidence,
    key_type: MatchKeyType,
}

impl DuplicateMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the normalized Levenshtein similarity below which names
    /// that also differ in their first letter count as divergent.
    pub fn with_divergent_similarity(mut self, threshold: f64) -> Self {
        self.divergent_similarity = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn find_candidates(&self, contacts: &[Contact]) -> Vec<DuplicateCandidateGroup> {
        let mut ordered: Vec<&Contact> = contacts.iter().collect();
        ordered.sort_by_key(|contact| contact.id);
        ordered.dedup_by_key(|contact| contact.id);

        let keys: Vec<MatchKeys<'_>> = ordered.into_iter().map(match_keys).collect();
        let mut edges = self.collect_edges(&keys);

        let mut groups = Vec::new();
        let mut covered: Vec<Partition> = Vec::new();
        for confidence in [
            MatchConfidence::High,
            MatchConfidence::Medium,
            MatchConfidence::Unclear,
        ] {
            let mut partition = Partition::new(keys.len());
            let pairs: Vec<(usize, usize)> = edges
                .iter()
                .filter(|(_, edge)| edge.confidence == confidence)
                .map(|(&pair, _)| pair)
                .collect();
            for (left, right) in pairs {
                if covered.iter().any(|higher| higher.same(left, right)) {
                    continue;
                }
                if confidence == MatchConfidence::High
                    && unclear_between(&edges, &partition, left, right)
                {
                    // Kept out of the high group, reported one level down.
                    if let Some(edge) = edges.get_mut(&(left, right)) {
                        edge.confidence = MatchConfidence::Medium;
                    }
                    continue;
                }
                partition.union(left, right);
            }

            for members in partition.components() {
                let key_type = edges
                    .iter()
                    .filter(|((left, right), edge)| {
                        edge.confidence == confidence
                            && members.contains(left)
                            && members.contains(right)
                    })
                    .map(|(_, edge)| edge.key_type)
                    .min()
                    .unwrap_or(MatchKeyType::Phone);
                groups.push((
                    confidence,
                    key_type,
                    members
                        .iter()
                        .map(|&index| keys[index].contact.id)
                        .collect::<Vec<_>>(),
                ));
            }
            covered.push(partition);
        }

        groups.sort_by(|left, right| (left.0, &left.2).cmp(&(right.0, &right.2)));
        let groups: Vec<DuplicateCandidateGroup> = groups
            .into_iter()
            .enumerate()
            .map(|(index, (confidence, match_key_type, contact_ids))| DuplicateCandidateGroup {
                group_id: format!("G{:04}", index + 1),
                contact_ids,
                match_key_type,
                confidence,
            })
            .collect();

        info!(
            "event=dedup_scan module=dedup status=ok contacts={} groups={}",
            keys.len(),
            groups.len()
        );
        groups
    }

    fn collect_edges(&self, keys: &[MatchKeys<'_>]) -> BTreeMap<(usize, usize), Edge> {
        let mut edges: BTreeMap<(usize, usize), Edge> = BTreeMap::new();

        let mut phone_buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, entry) in keys.iter().enumerate() {
            for phone in &entry.phones {
                phone_buckets.entry(phone.as_str()).or_default().push(index);
            }
        }
        for members in phone_buckets.values() {
            for_each_pair(members, |left, right| {
                let edge = self.classify_phone_pair(&keys[left], &keys[right]);
                edges.entry((left, right)).or_insert(edge);
            });
        }

        let mut name_buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, entry) in keys.iter().enumerate() {
            if let Some(name) = entry.name.as_deref() {
                name_buckets.entry(name).or_default().push(index);
            }
        }
        for members in name_buckets.values() {
            for_each_pair(members, |left, right| {
                edges.entry((left, right)).or_insert(Edge {
                    confidence: MatchConfidence::Medium,
                    key_type: MatchKeyType::Name,
                });
            });
        }

        edges
    }

    fn classify_phone_pair(&self, left: &MatchKeys<'_>, right: &MatchKeys<'_>) -> Edge {
        if let (Some(a), Some(b)) = (left.name.as_deref(), right.name.as_deref()) {
            if names_compatible(a, b) {
                return Edge {
                    confidence: MatchConfidence::High,
                    key_type: MatchKeyType::PhoneAndName,
                };
            }
            if self.names_divergent(a, b) {
                return Edge {
                    confidence: MatchConfidence::Unclear,
                    key_type: MatchKeyType::Phone,
                };
            }
        }
        if !left.addresses.is_disjoint(&right.addresses) {
            return Edge {
                confidence: MatchConfidence::High,
                key_type: MatchKeyType::PhoneAndAddress,
            };
        }
        Edge {
            confidence: MatchConfidence::Medium,
            key_type: MatchKeyType::Phone,
        }
    }

    fn names_divergent(&self, left: &str, right: &str) -> bool {
        left.chars().next() != right.chars().next()
            && strsim::normalized_levenshtein(left, right) < self.divergent_similarity
    }
}

/// Same name, or one name extends the other keeping first and last token
/// ("rita fox" / "rita rivera fox").
fn names_compatible(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    let a: Vec<&str> = left.split_whitespace().collect();
    let b: Vec<&str> = right.split_whitespace().collect();
    if a.len() < 2 || b.len() < 2 {
        return false;
    }
    if a.first() == b.first() && a.last() == b.last() {
        return true;
    }
    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    shorter.iter().all(|token| longer.contains(token))
}

fn match_keys(contact: &Contact) -> MatchKeys<'_> {
    MatchKeys {
        contact,
        phones: contact
            .phones
            .iter()
            .filter_map(|phone| normalize_phone(&phone.number))
            .collect(),
        name: contact.full_name.as_deref().and_then(normalize_name),
        addresses: contact
            .addresses
            .iter()
            .map(|record| record.address.key())
            .collect(),
    }
}

fn for_each_pair(members: &[usize], mut visit: impl FnMut(usize, usize)) {
    for (offset, &left) in members.iter().enumerate() {
        for &right in &members[offset + 1..] {
            if left != right {
                visit(left.min(right), left.max(right));
            }
        }
    }
}

fn unclear_between(
    edges: &BTreeMap<(usize, usize), Edge>,
    partition: &Partition,
    left: usize,
    right: usize,
) -> bool {
    let left_members = partition.members_of(left);
    let right_members = partition.members_of(right);
    edges.iter().any(|(&(a, b), edge)| {
        edge.confidence == MatchConfidence::Unclear
            && ((left_members.contains(&a) && right_members.contains(&b))
                || (left_members.contains(&b) && right_members.contains(&a)))
    })
}

/// Small union-find over contact indexes.
struct Partition {
    parent: Vec<usize>,
}

impl Partition {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&self, mut index: usize) -> usize {
        while self.parent[index] != index {
            index = self.parent[index];
        }
        index
    }

    fn same(&self, left: usize, right: usize) -> bool {
        self.find(left) == self.find(right)
    }

    fn union(&mut self, left: usize, right: usize) {
        let (a, b) = (self.find(left), self.find(right));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }

    fn members_of(&self, index: usize) -> BTreeSet<usize> {
        let root = self.find(index);
        (0..self.parent.len())
            .filter(|&candidate| self.find(candidate) == root)
            .collect()
    }

    /// Components with at least two members, each sorted ascending.
    fn components(&self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..self.parent.len() {
            by_root.entry(self.find(index)).or_default().push(index);
        }
        by_root
            .into_values()
            .filter(|members| members.len() > 1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{names_compatible, normalize_name, normalize_phone};

    #[test]
    fn phone_key_requires_ten_digits() {
        assert_eq!(normalize_phone("(555) 201-3344").as_deref(), Some("5552013344"));
        assert_eq!(normalize_phone("+1 555 201 3344").as_deref(), Some("5552013344"));
        assert_eq!(normalize_phone("201-3344"), None);
    }

    #[test]
    fn name_key_strips_punctuation_and_suffixes() {
        assert_eq!(normalize_name("  Acme, Inc. ").as_deref(), Some("acme"));
        assert_eq!(
            normalize_name("Bright Futures Foundation").as_deref(),
            Some("bright futures")
        );
        assert_eq!(normalize_name("O'Neil   Ltd").as_deref(), Some("oneil"));
        assert_eq!(normalize_name("..."), None);
    }

    #[test]
    fn middle_names_are_compatible() {
        assert!(names_compatible("rita fox", "rita rivera fox"));
        assert!(!names_compatible("emily bamford", "marianne shiple"));
        assert!(!names_compatible("rita", "rita fox"));
    }
}
