mod common;

use common::Project;
use std::fs;

const CONFIG: &str = r#"{
    "schemaPath": "schema.graphql",
    "scalars": { "DateTime": { "type": "Date", "codec": "epoch_millis" } },
    "types": { "Ghost": { "keys": ["name", "aka"] } },
    "stores": { "prefix": "GQL_" }
}"#;

#[test]
fn compile_writes_artifacts_and_stores() {
    let project = Project::new(CONFIG);
    project
        .document("viewer.graphql", "query Viewer { viewer { name birthday } }")
        .document("ghosts/ghost.gql", "query Ghost { ghost { aka } }");
    let out = project.out();
    let output = project.run("compile", &["--out", out.to_str().expect("utf-8 path")]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    for path in [
        "artifacts/Viewer.json",
        "artifacts/Ghost.json",
        "stores/Viewer.js",
        "stores/Ghost.js",
    ] {
        assert!(out.join(path).is_file(), "missing {path}");
    }
    let store = fs::read_to_string(out.join("stores/Ghost.js")).expect("read store");
    assert!(store.contains("export const GQL_Ghost = new GhostStore()"));
    let leftovers: Vec<_> = fs::read_dir(&out)
        .expect("read out")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn failed_compile_writes_nothing() {
    let project = Project::new(CONFIG);
    project
        .document("good.graphql", "query Good { viewer { name } }")
        .document("bad.graphql", "query Bad { viewer { shoeSize } }");
    let out = project.out();
    let output = project.run("compile", &["--out", out.to_str().expect("utf-8 path")]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("shoeSize"), "{stderr}");
    assert!(!out.join("artifacts/Good.json").exists());
}

#[test]
fn check_reports_json_without_writing() {
    let project = Project::new(CONFIG);
    project.document("viewer.graphql", "query Viewer { viewer { name } }");
    let output = project.run("check", &["--json"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["succeeded"], true);
    assert_eq!(report["documents"], serde_json::json!(["Viewer"]));
    assert_eq!(
        report["files"],
        serde_json::json!(["artifacts/Viewer.json", "stores/Viewer.js"])
    );
    assert!(!project.out().exists());
}

#[test]
fn check_json_lists_every_error() {
    let project = Project::new(CONFIG);
    project
        .document("a.graphql", "query A { viewer { nope } }")
        .document("b.graphql", "query B { version @bogus }");
    let output = project.run("check", &["--json"]);
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["succeeded"], false);
    let errors = report["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["document"], "A");
    assert_eq!(errors[1]["document"], "B");
}

#[test]
fn missing_config_is_reported() {
    let project = Project::new(CONFIG);
    fs::remove_file(project.root().join("storegen.json")).expect("remove config");
    let output = project.run("check", &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("read config"));
}
