use dx_serializer::{
    commit_edit, llm, machine, render_for_editing, ArtifactFormat, CacheOptions,
    CacheOrchestrator, Error, Fingerprint, KeyRegistry,
};
use std::fs;
use std::path::PathBuf;

fn write_sources(root: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let relative = PathBuf::from(format!("pkg{}/file{i}.dx", i % 3));
            let path = root.join(&relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(
                &path,
                format!("#c:name|file{i}\n#deps(id%#|name|weight%i)\nserde|{i}\n"),
            )
            .unwrap();
            relative
        })
        .collect()
}

#[test]
fn test_regenerate_many_sources_in_parallel() {
    let root = tempfile::tempdir().unwrap();
    let sources = write_sources(root.path(), 24);
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());

    let outcomes = cache.regenerate(&sources);
    assert_eq!(outcomes.len(), sources.len());
    assert!(outcomes.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(cache.manifest().len(), sources.len());

    for source in &sources {
        let paths = cache.cache_paths(source).unwrap();
        let text = fs::read_to_string(root.path().join(source)).unwrap();
        let doc = llm::decode(&text).unwrap();
        let bytes = fs::read(paths.get(ArtifactFormat::Machine)).unwrap();
        assert_eq!(machine::decode(&bytes).unwrap().materialize().unwrap(), doc);
    }

    let report = cache.verify().unwrap();
    assert_eq!(report.fresh.len(), sources.len() * 2);
    assert!(report.stale.is_empty());
    assert!(report.untracked.is_empty());
}

#[test]
fn test_regenerate_records_on_disk_fingerprint() {
    let root = tempfile::tempdir().unwrap();
    // Not canonical: the blank line is dropped when the artifact is written.
    fs::write(root.path().join("app.dx"), "#c:name|dx\n\n#:base|shared.dx\n").unwrap();
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());

    let outcomes = cache.regenerate(&["app.dx"]);
    let report = outcomes[0].outcome.as_ref().unwrap();
    let on_disk = fs::read(root.path().join("app.dx")).unwrap();
    assert_eq!(report.fingerprint, Fingerprint::of(&on_disk));

    let llm_artifact = fs::read_to_string(cache.cache_paths("app.dx").unwrap().llm).unwrap();
    assert_eq!(llm_artifact, "#c:name|dx\n#:base|shared.dx\n");
}

#[test]
fn test_apply_after_regenerate_is_not_a_conflict() {
    let root = tempfile::tempdir().unwrap();
    let sources = write_sources(root.path(), 2);
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new());
    cache.regenerate(&sources);

    let doc = llm::decode("#c:name|edited\n").unwrap();
    let report = cache.apply(&doc, &sources[0]).unwrap();
    assert_eq!(report.artifacts.len(), 2);
    assert!(cache.verify().unwrap().is_consistent());
}

#[test]
fn test_unwritable_artifact_is_reported_stale() {
    let root = tempfile::tempdir().unwrap();
    let mut cache = CacheOrchestrator::open(root.path(), CacheOptions::new().with_write_attempts(2));

    // A directory where the machine artifact should go makes its rename fail.
    let paths = cache.cache_paths("app.dx").unwrap();
    fs::create_dir_all(&paths.machine).unwrap();
    fs::write(paths.machine.join("blocker"), b"x").unwrap();

    let err = cache
        .apply(&llm::decode("#c:name|dx").unwrap(), "app.dx")
        .unwrap_err();
    match err {
        Error::StaleCache { stale, .. } => assert_eq!(stale, vec![paths.machine.clone()]),
        other => panic!("expected stale cache, got {other}"),
    }

    assert!(root.path().join("app.dx").is_file());
    assert!(paths.llm.is_file());
    let report = cache.verify().unwrap();
    assert_eq!(report.stale, vec![paths.machine]);
}

#[test]
fn test_orchestrators_sharing_a_root_keep_each_others_records() {
    let root = tempfile::tempdir().unwrap();
    let mut first = CacheOrchestrator::open(root.path(), CacheOptions::new());
    let mut second = CacheOrchestrator::open(root.path(), CacheOptions::new());

    first.apply(&llm::decode("#c:name|a").unwrap(), "a.dx").unwrap();
    second.apply(&llm::decode("#c:name|b").unwrap(), "b.dx").unwrap();

    let fresh = CacheOrchestrator::open(root.path(), CacheOptions::new());
    assert!(fresh.record("a.dx").unwrap().is_some());
    assert!(fresh.record("b.dx").unwrap().is_some());
    assert!(fresh.verify().unwrap().is_consistent());

    fs::write(root.path().join("a.dx"), "#c:name|external\n").unwrap();
    let mut fresh = CacheOrchestrator::open(root.path(), CacheOptions::new());
    let err = fresh
        .apply(&llm::decode("#c:name|mine").unwrap(), "a.dx")
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(
        fs::read_to_string(root.path().join("a.dx")).unwrap(),
        "#c:name|external\n"
    );
}

#[test]
fn test_concurrent_edits_of_different_sources_keep_conflict_detection() {
    let root = tempfile::tempdir().unwrap();
    let registry = KeyRegistry::standard();
    let sources: Vec<String> = (0..8).map(|i| format!("pkg/file{i}.dx")).collect();

    std::thread::scope(|scope| {
        for (i, source) in sources.iter().enumerate() {
            let registry = &registry;
            let root = root.path();
            scope.spawn(move || {
                let view = render_for_editing(format!("#c:name|v{i}").as_bytes(), registry).unwrap();
                commit_edit(&view, root, source, registry).unwrap();
            });
        }
    });

    for source in &sources {
        fs::write(root.path().join(source), "#c:name|external\n").unwrap();
        let view = render_for_editing(b"#c:name|mine", &registry).unwrap();
        let err = commit_edit(&view, root.path(), source, &registry).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }), "{source}");
    }
}
