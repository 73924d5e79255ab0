use dx_serializer::{
    human, llm, machine, CacheOptions, CacheOrchestrator, Column, Document, Error, KeyRegistry,
    LayoutOptions, Section, TypeHint, Value,
};
use std::fs;

fn forge_source() -> &'static str {
    "#forge(name|repository|container|ci_cd)\nforge|https://example.org/org/dx|none|none\n"
}

#[test]
fn test_context_example_renders_config_block() {
    let doc = llm::decode("#c:name|dx;version|0.0.1").unwrap();
    assert_eq!(doc.context.len(), 2);
    assert_eq!(doc.context.get("name"), Some(&Value::from("dx")));
    assert_eq!(doc.context.get("version"), Some(&Value::from("0.0.1")));

    let text = human::encode(&doc, &KeyRegistry::standard()).unwrap();
    assert_eq!(text, "[config]\nname    = dx\nversion = 0.0.1\n");
}

#[test]
fn test_section_example_survives_machine_roundtrip() {
    let doc = llm::decode(forge_source()).unwrap();
    assert_eq!(doc.sections.len(), 1);

    let forge = doc.section("forge").unwrap();
    assert_eq!(forge.columns.len(), 4);
    assert_eq!(forge.rows.len(), 1);
    assert_eq!(forge.rows[0][1], Value::from("https://example.org/org/dx"));

    let bytes = machine::encode(&doc).unwrap();
    let view = machine::decode(&bytes).unwrap();
    assert_eq!(view.materialize().unwrap(), doc);
}

#[test]
fn test_wide_table_wraps_and_reads_back() {
    let columns: Vec<Column> = (0..8)
        .map(|i| Column::new(format!("column_{i}"), TypeHint::String))
        .collect();
    let row: Vec<Value> = (0..8)
        .map(|i| Value::from(format!("value-number-{i}-with-some-length")))
        .collect();
    let doc = Document::new().with_section(Section::new("wide", columns).with_row(row));

    let options = LayoutOptions::new().with_max_line_width(80);
    let text = human::encode_with_options(&doc, &KeyRegistry::standard(), &options).unwrap();

    let headers = text.lines().filter(|l| l.starts_with("column_")).count();
    assert!(headers >= 2, "expected wrapped groups:\n{text}");
    assert!(text.lines().all(|l| l.chars().count() <= 80));
    assert_eq!(human::decode(&text, &KeyRegistry::standard()).unwrap(), doc);
}

#[test]
fn test_auto_id_is_stable_across_cycles() {
    let mut doc = llm::decode("#deps(id%#|name)\nserde\nrayon\ntracing\n").unwrap();
    let registry = KeyRegistry::standard();

    for _ in 0..3 {
        doc = llm::decode(&llm::encode(&doc).unwrap()).unwrap();
        doc = human::decode(&human::encode(&doc, &registry).unwrap(), &registry).unwrap();
        doc = machine::decode(&machine::encode(&doc).unwrap())
            .unwrap()
            .materialize()
            .unwrap();
    }

    let deps = doc.section("deps").unwrap();
    assert_eq!(deps.rows.len(), 3);
    assert!(deps.rows.iter().all(|row| row.len() == 1));
    let ids: Vec<Value> = (0..3)
        .map(|i| deps.expanded_row(i).unwrap()[0].clone())
        .collect();
    assert_eq!(ids, vec![Value::from(1), Value::from(2), Value::from(3)]);
}

#[test]
fn test_cache_mirrors_source_path() {
    let root = tempfile::tempdir().unwrap();
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());
    let doc = llm::decode(forge_source()).unwrap();

    cache.apply(&doc, "config/app.dx").unwrap();

    let llm_path = root.path().join(".dx/cache/config/app.llm");
    let machine_path = root.path().join(".dx/cache/config/app.machine");
    assert!(root.path().join("config/app.dx").is_file());
    assert_eq!(llm::decode(&fs::read_to_string(llm_path).unwrap()).unwrap(), doc);
    let bytes = fs::read(machine_path).unwrap();
    assert_eq!(machine::decode(&bytes).unwrap().materialize().unwrap(), doc);
}

#[test]
fn test_machine_payload_corruption_is_refused() {
    let doc = llm::decode("#c:name|dx\n").unwrap().with_section(
        llm::decode(forge_source()).unwrap().sections.remove(0),
    );
    let bytes = machine::encode(&doc).unwrap();

    for at in (0..bytes.len()).step_by(7) {
        let mut corrupted = bytes.clone();
        corrupted[at] = corrupted[at].wrapping_add(1);
        assert!(
            matches!(machine::decode(&corrupted), Err(Error::Integrity { .. })),
            "byte {at} accepted"
        );
    }
}

#[test]
fn test_cross_format_agreement_on_typed_sections() {
    let source = "#c:nm|dx;ct|3;tags|*cli,serde\n\
                  #stk(id%#|nm|stars%x|ratio%f|en%b|tags)\n\
                  tokio|1B2|0.75|+|*async,net\n\
                  rayon|Zz|1.0|-|*\n";
    let doc = llm::decode(source).unwrap();
    let registry = KeyRegistry::standard();

    let human_text = human::encode(&doc, &registry).unwrap();
    assert!(human_text.contains("[stack]"));
    assert!(human_text.contains("stars (base62)"));
    assert!(human_text.contains("enabled (bool)"));

    let via_human = human::decode(&human_text, &registry).unwrap();
    let via_llm = llm::decode(&llm::encode(&doc).unwrap()).unwrap();
    let via_machine = machine::decode(&machine::encode(&doc).unwrap())
        .unwrap()
        .materialize()
        .unwrap();
    assert_eq!(via_human, doc);
    assert_eq!(via_llm, doc);
    assert_eq!(via_machine, doc);
}

#[test]
fn test_parse_errors_abort_the_whole_decode() {
    let err = llm::decode("#forge(a|b)\nx|y\nz\n").unwrap_err();
    assert!(matches!(err, Error::Parse { line: 3, .. }));

    let err = llm::decode("#c:a|1\n#forge(a\n").unwrap_err();
    assert_eq!(err.line(), Some(2));

    let err = human::decode("stray\n[config]\n", &KeyRegistry::standard()).unwrap_err();
    assert_eq!(err.line(), Some(1));
}

#[test]
fn test_invalid_documents_are_refused_by_every_encoder() {
    let doc = Document::new().with_section(
        Section::new("s", vec![Column::new("n", TypeHint::Base62)]).with_row(vec![Value::from(-1)]),
    );
    let registry = KeyRegistry::standard();

    assert!(matches!(llm::encode(&doc), Err(Error::Encoding { .. })));
    assert!(matches!(human::encode(&doc, &registry), Err(Error::Encoding { .. })));
    assert!(matches!(machine::encode(&doc), Err(Error::Encoding { .. })));
}

#[test]
fn test_conflict_leaves_source_and_cache_untouched() {
    let root = tempfile::tempdir().unwrap();
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());
    cache.apply(&llm::decode("#c:name|one").unwrap(), "app.dx").unwrap();

    let paths = cache.cache_paths("app.dx").unwrap();
    let cached_before = fs::read(&paths.machine).unwrap();
    fs::write(root.path().join("app.dx"), "#c:name|external\n").unwrap();

    let err = cache
        .apply(&llm::decode("#c:name|two").unwrap(), "app.dx")
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(fs::read(&paths.machine).unwrap(), cached_before);
    assert_eq!(
        fs::read_to_string(root.path().join("app.dx")).unwrap(),
        "#c:name|external\n"
    );
}

#[test]
fn test_manifest_survives_reopen() {
    let root = tempfile::tempdir().unwrap();
    {
        let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());
        cache.apply(&llm::decode("#c:name|one").unwrap(), "app.dx").unwrap();
    }
    fs::write(root.path().join("app.dx"), "#c:name|external\n").unwrap();

    let mut reopened = CacheOrchestrator::open(root.path(), CacheOptions::new());
    let err = reopened
        .apply(&llm::decode("#c:name|two").unwrap(), "app.dx")
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
}

#[test]
fn test_custom_cache_dir() {
    let root = tempfile::tempdir().unwrap();
    let options = CacheOptions::new()
        .with_cache_dir("build/dx")
        .with_manifest_dir("state");
    let mut cache = CacheOrchestrator::open(root.path(), options);
    cache.apply(&llm::decode("#c:name|dx").unwrap(), "app.dx").unwrap();

    assert!(root.path().join("build/dx/app.llm").is_file());
    assert!(root.path().join("build/dx/app.machine").is_file());
    assert!(root.path().join("build/dx/state/app.dx.json").is_file());
    assert!(!root.path().join(".dx").exists());
}

#[test]
fn test_document_serializes_with_serde_json() {
    let doc = llm::decode(forge_source()).unwrap();
    let json = serde_json::to_string(&doc).unwrap();
    let back: Document = serde_json::from_str(&json).unwrap();
    assert_eq!(back, doc);
}

#[test]
fn test_context_order_survives_every_format() {
    let doc = llm::decode("#c:version|0.0.1;name|dx;ct|3").unwrap();
    let reordered = llm::decode("#c:name|dx;version|0.0.1;ct|3").unwrap();
    assert_ne!(doc, reordered);

    let registry = KeyRegistry::standard();
    let via_human = human::decode(&human::encode(&doc, &registry).unwrap(), &registry).unwrap();
    let via_machine = machine::decode(&machine::encode(&doc).unwrap())
        .unwrap()
        .materialize()
        .unwrap();
    for back in [via_human, via_machine] {
        let keys: Vec<&str> = back.context.keys().map(String::as_str).collect();
        assert_eq!(keys, ["version", "name", "ct"]);
        assert_eq!(back, doc);
    }
}
