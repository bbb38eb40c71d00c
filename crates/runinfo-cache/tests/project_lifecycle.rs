use std::fs;

use runinfo_cache::{ContentRoot, ProjectAnnotations, StoreChange};
use runinfo_config::RuninfoConfig;
use runinfo_core::{DEFAULT_STORE_FILE_NAME, MarkKind};
use runinfo_store::fixtures::{FixtureStore, exception, mark};
use tempfile::tempdir;

#[test]
fn store_lifecycle_drives_cache_invalidation() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    fs::create_dir_all(workspace.join("tests"))?;
    let test_file = workspace.join("tests/test_calc.py");
    fs::write(&test_file, "def test_add():\n    assert 1 + 2 == 4\n")?;

    let project = ProjectAnnotations::open(
        &[ContentRoot::new("main", workspace)],
        &RuninfoConfig::default(),
    );
    assert!(project.registry().stores().is_empty());
    assert!(project.marks(&test_file, MarkKind::Suffix).is_empty());

    let store_path = workspace.join(DEFAULT_STORE_FILE_NAME);
    let store = FixtureStore::create(&store_path)?;
    let exception_id = store.insert_exception(
        "tests/test_calc.py::test_add",
        &exception("tests/test_calc.py", 1, "AssertionError: assert 3 == 4", 1),
    )?;
    let mut suffix = mark(
        MarkKind::Suffix,
        "tests/test_calc.py",
        1,
        "assert 1 + 2 == 4",
        "AssertionError: assert 3 == 4",
    );
    suffix.exception_id = Some(exception_id);
    store.insert_mark(&suffix)?;

    let change = project
        .on_store_created(&store_path)
        .expect("store creation is reported");
    assert!(matches!(change, StoreChange::Added(_)));

    let marks = project.marks(&test_file, MarkKind::Suffix);
    assert_eq!(marks.len(), 1);
    let loaded = &marks[0];
    assert_eq!(loaded.mark.check_content, "assert 1 + 2 == 4");
    assert_eq!(loaded.store.module, "main");
    let exception = project
        .exception(&loaded.exception_key().expect("exception key"))
        .expect("exception is resolvable");
    assert_eq!(
        exception.description,
        "tests/test_calc.py::test_add: AssertionError: assert 3 == 4"
    );

    let calls_before = project.stats().source_calls;
    project.marks(&test_file, MarkKind::Suffix);
    assert_eq!(project.stats().source_calls, calls_before);

    let mut second = mark(
        MarkKind::Suffix,
        "tests/test_calc.py",
        0,
        "def test_add():",
        "second failure",
    );
    second.exception_id = Some(exception_id);
    store.insert_mark(&second)?;

    assert_eq!(project.marks(&test_file, MarkKind::Suffix).len(), 1);
    assert!(matches!(
        project.on_store_content_changed(&store_path),
        Some(StoreChange::ContentChanged(_))
    ));
    assert_eq!(project.marks(&test_file, MarkKind::Suffix).len(), 2);

    drop(store);
    fs::remove_file(&store_path)?;
    assert!(matches!(
        project.on_store_removed(&store_path),
        Some(StoreChange::Removed(_))
    ));
    assert!(project.marks(&test_file, MarkKind::Suffix).is_empty());
    assert_eq!(project.on_store_removed(&store_path), None);

    Ok(())
}

#[test]
fn modules_only_see_their_own_stores() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();

    for module in ["billing", "shipping"] {
        let store = FixtureStore::create(workspace.join(module).join(DEFAULT_STORE_FILE_NAME))?;
        store.insert_mark(&mark(
            MarkKind::RedUnderline,
            "test_x.py",
            0,
            "assert ok()",
            &format!("{module} failure"),
        ))?;
    }

    let project = ProjectAnnotations::open(
        &[
            ContentRoot::new("billing", workspace.join("billing")),
            ContentRoot::new("shipping", workspace.join("shipping")),
        ],
        &RuninfoConfig::default(),
    );
    assert_eq!(project.registry().stores().len(), 2);

    let billing = project.marks(&workspace.join("billing/test_x.py"), MarkKind::RedUnderline);
    assert_eq!(billing.len(), 1);
    assert_eq!(billing[0].mark.display_text, "billing failure");

    let elsewhere = project.marks(&workspace.join("test_x.py"), MarkKind::RedUnderline);
    assert!(elsewhere.is_empty());

    Ok(())
}

#[test]
fn late_content_root_is_scanned_and_invalidates() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let store = FixtureStore::create(workspace.join("late").join(DEFAULT_STORE_FILE_NAME))?;
    store.insert_mark(&mark(MarkKind::Suffix, "t.py", 0, "boom()", "late failure"))?;

    let project = ProjectAnnotations::open(
        &[ContentRoot::new("main", workspace.join("main"))],
        &RuninfoConfig::default(),
    );
    let file = workspace.join("late/t.py");
    assert!(project.marks(&file, MarkKind::Suffix).is_empty());

    let change = project
        .add_content_root(ContentRoot::new("late", workspace.join("late")))
        .expect("late root adds a store");
    assert!(matches!(change, StoreChange::Added(ref added) if added[0].module == "late"));
    assert_eq!(project.marks(&file, MarkKind::Suffix).len(), 1);

    Ok(())
}

#[test]
fn recreated_store_replaces_cached_marks() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let store_path = workspace.join(DEFAULT_STORE_FILE_NAME);
    let file = workspace.join("test_calc.py");

    let store = FixtureStore::create(&store_path)?;
    store.insert_mark(&mark(MarkKind::Suffix, "test_calc.py", 0, "check()", "old run"))?;

    let project = ProjectAnnotations::open(
        &[ContentRoot::new("main", workspace)],
        &RuninfoConfig::default(),
    );
    assert_eq!(project.marks(&file, MarkKind::Suffix)[0].mark.display_text, "old run");

    drop(store);
    fs::remove_file(&store_path)?;
    let store = FixtureStore::create(&store_path)?;
    store.insert_mark(&mark(MarkKind::Suffix, "test_calc.py", 0, "check()", "new run"))?;

    assert!(matches!(
        project.on_store_created(&store_path),
        Some(StoreChange::ContentChanged(_))
    ));
    let texts: Vec<String> = project
        .marks(&file, MarkKind::Suffix)
        .iter()
        .map(|loaded| loaded.mark.display_text.clone())
        .collect();
    assert_eq!(texts, vec!["new run".to_owned()]);

    Ok(())
}
