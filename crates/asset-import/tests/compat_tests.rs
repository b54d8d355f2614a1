//! Integration tests for the legacy find/load entry points

mod common;

use asset_import::compat::{find_module, load_module, PATHNAME_PREFIX};
use asset_import::{ImportError, LoaderKind};
use common::{elf_with_needed, Fixture, TestContext};

fn setup() -> (Fixture, TestContext) {
    let fixture = Fixture::new();
    let ext = elf_with_needed(&[]);
    fixture.archive(
        "app.zip",
        &[
            ("plain.py", b"set x 1"),
            ("pkg/__init__.py", b""),
            ("pkg/inner.py", b"set y 2"),
            ("ext.so", ext.as_slice()),
        ],
    );
    let tc = fixture.context(fixture.config());
    tc.ctx.push_path("/usr/lib/python");
    tc.ctx.push_path(fixture.entry("app.zip"));
    (fixture, tc)
}

#[test]
fn test_find_module_on_search_path() {
    let (fixture, tc) = setup();

    let info = find_module(&tc.ctx, "plain", None).unwrap().unwrap();
    assert_eq!(
        info.pathname,
        format!("{}{}", PATHNAME_PREFIX, fixture.entry("app.zip").join("plain").display())
    );
    assert!(!info.is_package);
    assert_eq!(info.kind, LoaderKind::Source);

    let info = find_module(&tc.ctx, "pkg", None).unwrap().unwrap();
    assert!(info.is_package);

    let info = find_module(&tc.ctx, "ext", None).unwrap().unwrap();
    assert_eq!(info.kind, LoaderKind::Native);

    // Not ours: the caller falls back to its own search.
    assert!(find_module(&tc.ctx, "absent", None).unwrap().is_none());
}

#[test]
fn test_find_and_load_inside_package() {
    let (fixture, tc) = setup();
    let pkg_path = vec![fixture.entry("app.zip").join("pkg")];

    let info = find_module(&tc.ctx, "inner", Some(&pkg_path)).unwrap().unwrap();
    let module = load_module(&tc.ctx, "pkg.inner", &info.pathname)
        .unwrap()
        .unwrap();
    assert_eq!(module.name(), "pkg.inner");
    assert_eq!(module.get("y").as_deref(), Some("2"));
}

#[test]
fn test_load_under_new_name() {
    let (_fixture, tc) = setup();

    let info = find_module(&tc.ctx, "plain", None).unwrap().unwrap();
    let module = load_module(&tc.ctx, "renamed", &info.pathname)
        .unwrap()
        .unwrap();
    assert_eq!(module.name(), "renamed");
    assert!(tc.ctx.registry().contains("renamed"));

    let info = find_module(&tc.ctx, "ext", None).unwrap().unwrap();
    assert!(matches!(
        load_module(&tc.ctx, "renamed_ext", &info.pathname),
        Err(ImportError::UnsupportedRename { .. })
    ));
    let module = load_module(&tc.ctx, "ext", &info.pathname).unwrap().unwrap();
    assert!(module.library().is_some());
}

#[test]
fn test_foreign_pathname_falls_back() {
    let (_fixture, tc) = setup();
    assert!(load_module(&tc.ctx, "os", "/usr/lib/python/os.py")
        .unwrap()
        .is_none());
}
