mod common;

use common::{compile_texts, file, test_builder, test_config};
use storegen::{compile, DocumentSource};

#[test]
fn prefix_is_applied_to_the_exported_binding() {
    let config = test_builder().prefix("yop___").build().expect("config");
    let output = compile_texts(&config, &["query TestQuery { version }"]).expect("compile");
    let store = file(&output, "stores/TestQuery.js");
    assert!(store.contains("export const yop___TestQuery = new TestQueryStore()"), "{store}");
    assert!(store.contains("export default yop___TestQuery"));
}

#[test]
fn empty_prefix_keeps_the_document_name() {
    let config = test_config();
    let output = compile_texts(&config, &["query TestQuery { version }"]).expect("compile");
    let store = file(&output, "stores/TestQuery.js");
    assert!(store.contains("export const TestQuery = new TestQueryStore()"), "{store}");
}

#[test]
fn three_subscriptions_produce_three_stores() {
    let config = test_config();
    let output = compile_texts(
        &config,
        &[
            "subscription NewUser { newUser { name } }",
            "subscription UserUpdated($id: ID!) { userUpdated(id: $id) { name } }",
            "subscription GhostSighted { ghostSighted { aka } }",
        ],
    )
    .expect("compile");
    let stores: Vec<_> = output
        .files
        .iter()
        .filter(|file| file.path.starts_with("stores/"))
        .collect();
    assert_eq!(stores.len(), 3);
    for name in ["NewUser", "UserUpdated", "GhostSighted"] {
        let store = file(&output, &format!("stores/{name}.js"));
        assert!(store.contains("import { SubscriptionStore } from '$storegen/runtime/stores'"));
        assert!(store.contains(&format!("import artifact from '../artifacts/{name}.json'")));
        assert!(store.contains(&format!("export const {name} = new {name}Store()")));
    }
}

#[test]
fn each_kind_binds_its_own_constructor() {
    let config = test_config();
    let output = compile_texts(
        &config,
        &[
            "query Viewer { viewer { name } }",
            "mutation Rename($id: ID!, $name: String!) { updateUser(id: $id, name: $name) { name } }",
            "fragment UserName on User { name }",
        ],
    )
    .expect("compile");
    assert!(file(&output, "stores/Viewer.js").contains("extends QueryStore"));
    assert!(file(&output, "stores/Rename.js").contains("extends MutationStore"));
    assert!(file(&output, "stores/UserName.js").contains("extends FragmentStore"));
}

#[test]
fn documents_can_opt_out_of_stores() {
    let config = test_config();
    let output = compile(
        &config,
        vec![
            DocumentSource::new("query Kept { version }"),
            DocumentSource::new("query ArtifactOnly { version }").without_store(),
        ],
    )
    .expect("compile");
    let paths: Vec<_> = output.files.iter().map(|file| file.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "artifacts/ArtifactOnly.json",
            "artifacts/Kept.json",
            "stores/Kept.js"
        ]
    );
}

#[test]
fn reserved_binding_names_are_emission_errors() {
    let config = test_config();
    let errors = compile_texts(&config, &["query default { version }"]).unwrap_err();
    let error = errors.iter().next().expect("error");
    assert_eq!(error.kind, storegen::ErrorKind::Emission);
    assert_eq!(error.document.as_deref(), Some("default"));
}

#[test]
fn artifacts_are_pretty_json_with_the_compiled_shape() {
    let config = test_config();
    let output = compile_texts(&config, &["query Viewer { viewer { name birthday } }"]).expect("compile");
    let text = file(&output, "artifacts/Viewer.json");
    assert!(text.ends_with("}\n"));
    let artifact: serde_json::Value = serde_json::from_str(text).expect("artifact json");
    assert_eq!(artifact["name"], "Viewer");
    assert_eq!(artifact["kind"], "query");
    assert_eq!(artifact["rootType"], "Query");
    assert_eq!(artifact["policy"], "CacheOrNetwork");
    let viewer = &artifact["selection"]["fields"]["viewer"];
    assert_eq!(viewer["keyRaw"], "viewer");
    assert_eq!(viewer["selection"]["fields"]["birthday"]["marshal"], "DateTime");
    assert_eq!(artifact["keys"]["User"], serde_json::json!(["id"]));
}
