//! Published Catalog Snapshot
//!
//! `tools/list` is a public contract: clients build their argument forms from
//! it. Any change to names, descriptions or schemas shows up here first.

use subpulse::catalog;

#[test]
fn test_published_catalog() {
    insta::assert_json_snapshot!("published_catalog", catalog().to_json());
}

#[test]
fn test_catalog_names_are_unique_and_resolvable() {
    let names: Vec<&str> = catalog().iter().map(|d| d.name()).collect();
    let mut deduped = names.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), names.len());

    for name in names {
        assert_eq!(catalog().lookup(name).unwrap().name(), name);
    }
}
