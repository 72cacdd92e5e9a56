mod common;

use common::{compile_texts, test_config};

const DOCUMENTS: [&str; 5] = [
    "query Feed($count: Int = 10) { users(first: $count) @paginate { edges { node { ...Profile } } } }",
    "fragment Profile on User { name birthday ...Friends @mask_disable }",
    "fragment Friends on User { friends(first: 3) @paginate { edges { node { name } } } }",
    "query Everything { entities { ... on Ghost { aka } ... on Cat { owner { name } } } }",
    "mutation Rename($id: ID!, $name: String!) { updateUser(id: $id, name: $name) { ...Profile } }",
];

#[test]
fn identical_runs_produce_identical_bytes() {
    let config = test_config();
    let first = compile_texts(&config, &DOCUMENTS).expect("first run");
    let second = compile_texts(&config, &DOCUMENTS).expect("second run");
    assert_eq!(first.files, second.files);
    assert_eq!(first.artifacts, second.artifacts);
}

#[test]
fn output_order_does_not_depend_on_source_order() {
    let config = test_config();
    let mut reversed = DOCUMENTS;
    reversed.reverse();
    let forward = compile_texts(&config, &DOCUMENTS).expect("forward");
    let backward = compile_texts(&config, &reversed).expect("backward");
    assert_eq!(forward.files, backward.files);
}

#[test]
fn hashes_track_the_source_text_only() {
    let config = test_config();
    let output = compile_texts(&config, &DOCUMENTS).expect("compile");
    let feed = output
        .artifacts
        .iter()
        .find(|artifact| artifact.name == "Feed")
        .expect("feed");
    assert_eq!(feed.hash, storegen::artifact::sha256_hex(DOCUMENTS[0].as_bytes()));
}
