//! Property-based tests for the round-trip guarantees of the three codecs.
//!
//! Documents are generated from small name pools that mix registry short
//! keys with their full forms, so key expansion and its collision handling
//! in the human view are exercised on every run.

use dx_serializer::{
    human, llm, machine, Column, ContextMap, Document, Error, KeyRegistry, LayoutOptions,
    Section, TypeHint, Value,
};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::sample::{select, subsequence};

const NAMES: &[&str] = &[
    "nm",
    "name",
    "repo",
    "repository",
    "v",
    "version",
    "ct",
    "count",
    "port",
    "a.b",
    "_x",
    "dash-y",
];

const SECTION_IDS: &[&str] = &["f", "forge", "stk", "stack", "deps", "s1"];

const STORED_HINTS: &[TypeHint] = &[
    TypeHint::String,
    TypeHint::Int,
    TypeHint::Float,
    TypeHint::Bool,
    TypeHint::Base62,
];

fn text() -> impl Strategy<Value = String> {
    let awkward = select(vec![
        "",
        "true",
        "42",
        "-7",
        "1.5",
        "  padded  ",
        "two  gaps",
        "*star",
        "#hash",
        "[bracket]",
        "[]",
        "a|b;c,d",
        "line\nbreak",
        "tab\there",
        "quote\"d",
        "back\\slash",
        "café",
    ])
    .prop_map(str::to_string);

    prop_oneof![
        3 => "[a-z]{1,10}",
        3 => "[ -~]{0,24}",
        2 => awkward,
        1 => "[a-zA-Z0-9]{15,40}",
    ]
}

fn float() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e15f64..1.0e15, Just(0.0), Just(1.0e-7), Just(2.5e20)]
}

fn scalar(hint: TypeHint) -> BoxedStrategy<Value> {
    match hint {
        TypeHint::String | TypeHint::AutoId => text().prop_map(Value::String).boxed(),
        TypeHint::Int => any::<i64>().prop_map(Value::Integer).boxed(),
        TypeHint::Float => float().prop_map(Value::Float).boxed(),
        TypeHint::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        TypeHint::Base62 => (0..=i64::MAX).prop_map(Value::Integer).boxed(),
    }
}

fn cell(hint: TypeHint) -> BoxedStrategy<Value> {
    prop_oneof![
        4 => scalar(hint),
        1 => vec(scalar(hint), 0..4).prop_map(Value::Array),
    ]
    .boxed()
}

fn context_value() -> impl Strategy<Value = Value> {
    let scalar = prop_oneof![
        text().prop_map(Value::String),
        any::<i64>().prop_map(Value::Integer),
        float().prop_map(Value::Float),
        any::<bool>().prop_map(Value::Bool),
    ];
    prop_oneof![
        4 => scalar.clone(),
        1 => vec(scalar, 0..4).prop_map(Value::Array),
    ]
}

fn context() -> impl Strategy<Value = ContextMap> {
    subsequence(NAMES.to_vec(), 0..5).prop_flat_map(|keys| {
        let len = keys.len();
        vec(context_value(), len).prop_map(move |values| {
            keys.iter()
                .map(|key| key.to_string())
                .zip(values)
                .collect::<ContextMap>()
        })
    })
}

fn section(id: &'static str) -> BoxedStrategy<Section> {
    (
        subsequence(NAMES.to_vec(), 1..5),
        vec(select(STORED_HINTS.to_vec()), 5),
        any::<bool>(),
    )
        .prop_flat_map(move |(names, hints, with_auto_id)| {
            let mut columns: Vec<Column> = names
                .iter()
                .zip(&hints)
                .map(|(name, hint)| Column::new(*name, *hint))
                .collect();
            if with_auto_id {
                columns.insert(0, Column::new("id", TypeHint::AutoId));
            }
            let row: Vec<BoxedStrategy<Value>> = columns
                .iter()
                .filter(|c| c.type_hint.is_stored())
                .map(|c| cell(c.type_hint))
                .collect();
            vec(row, 0..4).prop_map(move |rows| Section {
                id: id.to_string(),
                columns: columns.clone(),
                rows,
            })
        })
        .boxed()
}

fn document() -> impl Strategy<Value = Document> {
    let sections = subsequence(SECTION_IDS.to_vec(), 0..3)
        .prop_flat_map(|ids| ids.into_iter().map(section).collect::<Vec<_>>());
    (context(), sections).prop_map(|(context, sections)| Document { context, sections })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_generated_documents_are_valid(doc in document()) {
        prop_assert_eq!(doc.validate(), Vec::new());
    }

    #[test]
    fn prop_llm_roundtrip(doc in document()) {
        let text = llm::encode(&doc).unwrap();
        prop_assert_eq!(llm::decode(&text).unwrap(), doc);
    }

    #[test]
    fn prop_llm_encoding_is_a_fixed_point(doc in document()) {
        let once = llm::encode(&doc).unwrap();
        let twice = llm::encode(&llm::decode(&once).unwrap()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_human_roundtrip(doc in document()) {
        let registry = KeyRegistry::standard();
        let text = human::encode(&doc, &registry).unwrap();
        prop_assert_eq!(human::decode(&text, &registry).unwrap(), doc);
    }

    #[test]
    fn prop_human_roundtrip_when_wrapped(doc in document(), width in 8usize..60) {
        let registry = KeyRegistry::standard();
        let options = LayoutOptions::new().with_max_line_width(width);
        let text = human::encode_with_options(&doc, &registry, &options).unwrap();
        prop_assert_eq!(human::decode(&text, &registry).unwrap(), doc);
    }

    #[test]
    fn prop_human_roundtrip_without_registry(doc in document()) {
        let registry = KeyRegistry::new();
        let text = human::encode(&doc, &registry).unwrap();
        prop_assert!(!text.contains("# expanded:"));
        prop_assert_eq!(human::decode(&text, &registry).unwrap(), doc);
    }

    #[test]
    fn prop_machine_roundtrip(doc in document()) {
        let bytes = machine::encode(&doc).unwrap();
        let view = machine::decode(&bytes).unwrap();
        prop_assert_eq!(view.section_count(), doc.sections.len());
        for (i, section) in doc.sections.iter().enumerate() {
            let section_view = view.section(i).unwrap();
            prop_assert_eq!(section_view.id(), section.id.as_str());
            for r in 0..section.rows.len() {
                let expected = section.expanded_row(r).unwrap();
                for (c, value) in expected.iter().enumerate() {
                    prop_assert_eq!(&section_view.cell(r, c).unwrap().to_value(), value);
                }
            }
        }
        prop_assert_eq!(view.materialize().unwrap(), doc);
    }

    #[test]
    fn prop_cross_format_equivalence(doc in document()) {
        let registry = KeyRegistry::standard();
        let via_human = human::decode(&human::encode(&doc, &registry).unwrap(), &registry).unwrap();
        let via_llm = llm::decode(&llm::encode(&doc).unwrap()).unwrap();
        prop_assert_eq!(via_human, via_llm);
    }

    #[test]
    fn prop_machine_corruption_detected(
        doc in document(),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut bytes = machine::encode(&doc).unwrap();
        let at = position.index(bytes.len());
        bytes[at] ^= flip;
        prop_assert!(matches!(machine::decode(&bytes), Err(Error::Integrity { .. })), "expected Error::Integrity");
    }

    #[test]
    fn prop_registry_override_keeps_bijection(
        short in "[a-z]{1,4}",
        full in "[a-z]{5,10}",
    ) {
        let registry = KeyRegistry::standard().with_entry(short.as_str(), full.as_str());
        prop_assert_eq!(registry.expand(&short), full.as_str());
        for (s, f) in registry.entries() {
            prop_assert_eq!(registry.expand(registry.collapse(f)), f);
            prop_assert_eq!(registry.collapse(registry.expand(s)), s);
        }
    }
}

#[test]
fn test_standard_registry_is_inverse() {
    let registry = KeyRegistry::standard();
    assert!(!registry.is_empty());
    for (short, full) in registry.entries() {
        assert_eq!(registry.expand(registry.collapse(full)), full);
        assert_eq!(registry.collapse(registry.expand(short)), short);
    }
}
