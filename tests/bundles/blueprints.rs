//! Blueprint validation, flattening and registry lookups

use crate::common::*;
use nirva::{Error, STANDARD_BUNDLE_TYPES};
use proptest::prelude::*;

#[test]
fn standard_blueprints_registered_on_startup() {
    let rt = runtime();
    for name in STANDARD_BUNDLE_TYPES {
        assert!(rt.blueprints().get(name).is_some(), "missing {}", name);
    }
}

#[test]
fn registry_finds_blueprint_by_fingerprint() {
    let rt = runtime();
    let bp = rt.blueprints().register("NODE", &node_bundledef()).unwrap();
    let found = rt.blueprints().by_fingerprint(bp.fingerprint()).unwrap();
    assert_eq!(found.bundle_type(), "NODE");
    assert_eq!(bp.mandatory().count(), 1);
    assert_eq!(bp.optional().count(), 4);
}

#[test]
fn conflicting_redeclaration_fails_whole_blueprint() {
    let rt = runtime();
    let mut def = node_bundledef();
    def.extend(&Bundledef::new(["dSTRAND_NODE_WEIGHT", "0 1.0"]));
    assert!(matches!(
        rt.blueprints().register("BROKEN", &def),
        Err(Error::Schema(_))
    ));
    assert!(rt.blueprints().get("BROKEN").is_none());
}

#[test]
fn flattened_form_survives_unflatten() {
    let def = node_bundledef();
    let back = Bundledef::unflatten(&def.flatten()).unwrap();
    assert_eq!(back.items(), def.items());
    assert_eq!(back.fingerprint(), def.fingerprint());
    assert!(Bundledef::unflatten(&def.flatten()[..3]).is_err());
}

fn declaration() -> impl Strategy<Value = (String, String)> {
    (
        prop::sample::select(vec!["i", "d", "b", "s", "I", "?i", "?s"]),
        "[A-Z]{1,8}",
    )
        .prop_map(|(t, name)| {
            let default = match t.trim_start_matches('?') {
                "d" => "0 1.5",
                "b" => "0 1",
                "s" => "0 text",
                _ => "0 7",
            };
            (format!("{}STRAND_PROP_{}", t, name), default.to_string())
        })
}

proptest! {
    #[test]
    fn fingerprint_tracks_content(decls in prop::collection::vec(declaration(), 1..8)) {
        let items: Vec<String> = decls.iter().flat_map(|(a, b)| [a.clone(), b.clone()]).collect();
        let def = Bundledef::new(items.clone());
        let back = Bundledef::unflatten(&def.flatten()).unwrap();
        prop_assert_eq!(back.fingerprint(), def.fingerprint());
        let mut longer = items;
        longer.push("# trailing comment".into());
        prop_assert_ne!(Bundledef::new(longer).fingerprint(), def.fingerprint());
    }
}
