//! C8 — entity extractor. Rule-based, closed-vocabulary matching over chunk text; no NLP model.
//!
//! Per-kind seed vocabularies matched case-insensitively at word boundaries, confidence fixed
//! at 1.0 for an exact match. Downstream deduplication by `(tenant_id, name, kind)` happens in
//! the graph store.

use common::storage::types::graph_entity::{EntityKind, ExtractedEntity};

struct VocabEntry {
    kind: EntityKind,
    terms: &'static [&'static str],
}

const VOCABULARY: &[VocabEntry] = &[
    VocabEntry {
        kind: EntityKind::AnatomicalStructure,
        terms: &[
            "knee", "shoulder", "spine", "lumbar spine", "cervical spine", "hip", "ankle", "wrist",
            "elbow", "patella", "femur", "tibia", "fibula", "humerus", "rotator cuff", "meniscus",
            "acl", "mcl", "achilles tendon", "lower back", "vertebra", "muscle",
        ],
    },
    VocabEntry {
        kind: EntityKind::Condition,
        terms: &[
            "osteoarthritis", "tendinitis", "tendonitis", "bursitis", "sciatica", "herniated disc",
            "fracture", "sprain", "strain", "muscle spasm", "muscle spasms", "back pain", "chronic pain",
            "inflammation", "scoliosis", "carpal tunnel syndrome", "rotator cuff tear",
        ],
    },
    VocabEntry {
        kind: EntityKind::Treatment,
        terms: &[
            "physical therapy", "physiotherapy", "surgery", "arthroscopy", "corticosteroid injection",
            "ibuprofen", "acetaminophen", "rest", "ice therapy", "heat therapy", "stretching",
            "strengthening exercises", "manual therapy", "massage therapy", "chiropractic adjustment",
        ],
    },
    VocabEntry {
        kind: EntityKind::Device,
        terms: &[
            "brace", "knee brace", "splint", "crutches", "walker", "cane", "orthotic", "sling",
            "compression sleeve", "tens unit", "wheelchair",
        ],
    },
];

fn is_word_boundary(c: Option<char>) -> bool {
    !c.is_some_and(|c| c.is_alphanumeric())
}

/// Finds every case-insensitive, word-boundary-delimited occurrence of `term` in `text`,
/// returning `(start, end)` byte ranges into `text`.
fn find_occurrences(text: &str, text_lower: &str, term_lower: &str) -> Vec<(usize, usize)> {
    let mut hits = Vec::new();
    let mut search_from = 0usize;
    while let Some(rel) = text_lower[search_from..].find(term_lower) {
        let start = search_from + rel;
        let end = start + term_lower.len();

        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if is_word_boundary(before) && is_word_boundary(after) {
            hits.push((start, end));
        }
        search_from = start + term_lower.chars().next().map_or(1, char::len_utf8);
    }
    hits
}

/// Extracts every vocabulary hit from one chunk's text.
pub fn extract_entities(chunk_content: &str, source_chunk_id: &str) -> Vec<ExtractedEntity> {
    let text_lower = chunk_content.to_lowercase();
    let mut entities = Vec::new();

    for entry in VOCABULARY {
        for term in entry.terms {
            let term_lower = term.to_lowercase();
            for (start, end) in find_occurrences(chunk_content, &text_lower, &term_lower) {
                entities.push(ExtractedEntity {
                    name: chunk_content[start..end].to_string(),
                    kind: entry.kind,
                    confidence: 1.0,
                    source_chunk_id: source_chunk_id.to_string(),
                    start,
                    end,
                });
            }
        }
    }

    entities.sort_by_key(|e| e.start);
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_are_case_insensitive_and_word_bounded() {
        let entities = extract_entities("The Knee brace helped with the knees.", "chunk-1");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Knee"));
        assert!(names.contains(&"brace"));
        assert!(!names.iter().any(|n| n.eq_ignore_ascii_case("knees")));
    }

    #[test]
    fn assigns_correct_kind_per_vocabulary_entry() {
        let entities = extract_entities("Patient underwent physical therapy for tendinitis.", "chunk-2");
        let treatment = entities.iter().find(|e| e.name.eq_ignore_ascii_case("physical therapy")).unwrap();
        assert_eq!(treatment.kind, EntityKind::Treatment);
        let condition = entities.iter().find(|e| e.name.eq_ignore_ascii_case("tendinitis")).unwrap();
        assert_eq!(condition.kind, EntityKind::Condition);
    }

    #[test]
    fn empty_text_yields_no_entities() {
        assert!(extract_entities("", "chunk-3").is_empty());
    }

    #[test]
    fn confidence_is_always_one_for_exact_matches() {
        let entities = extract_entities("The rotator cuff tear required surgery.", "chunk-4");
        assert!(entities.iter().all(|e| e.confidence == 1.0));
    }

    #[test]
    fn results_are_sorted_by_position() {
        let entities = extract_entities("Ice therapy and then a knee brace were recommended.", "chunk-5");
        let starts: Vec<usize> = entities.iter().map(|e| e.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }
}
