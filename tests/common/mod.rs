//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use storegen::config::ConfigBuilder;
use storegen::scalars::ScalarSpec;
use storegen::schema::Schema;
use storegen::{compile, CollectedDocument, CompileOutput, Config, DocumentSource, ErrorSet};
use tempfile::TempDir;

/// Reference schema shared by the integration suites.
pub const TEST_SCHEMA: &str = r#"
    scalar DateTime

    interface Node { id: ID! }

    type PageInfo {
        hasNextPage: Boolean!
        hasPreviousPage: Boolean!
        startCursor: String
        endCursor: String
    }

    type User implements Node {
        id: ID!
        name: String!
        birthday: DateTime
        friends(first: Int, after: String, last: Int, before: String): UserConnection!
        believers(limit: Int, offset: Int): [User!]!
    }

    type UserEdge { cursor: String node: User }
    type UserConnection { edges: [UserEdge!]! pageInfo: PageInfo! }

    type Ghost { name: String! aka: String! believers: [User!]! }
    type Cat implements Node { id: ID! name: String! owner: User }
    union Entity = User | Ghost | Cat

    input UserFilter { name: String bornAfter: DateTime }

    type Query {
        node(id: ID!): Node
        user(id: ID!): User
        viewer: User
        ghost: Ghost!
        entities: [Entity!]!
        users(first: Int, after: String, filter: UserFilter): UserConnection!
        version: Int!
    }

    type Mutation {
        updateUser(id: ID!, name: String!): User
        addFriend(id: ID!): User
    }

    type Subscription {
        newUser: User!
        userUpdated(id: ID!): User
        ghostSighted: Ghost!
    }
"#;

pub fn test_builder() -> ConfigBuilder {
    Config::builder(Schema::parse(TEST_SCHEMA).expect("parse test schema"))
        .scalar("DateTime", ScalarSpec::epoch_millis())
        .keys("Ghost", ["name", "aka"])
}

pub fn test_config() -> Config {
    test_builder().build().expect("build test config")
}

pub fn sources(texts: &[&str]) -> Vec<DocumentSource> {
    texts.iter().map(|text| DocumentSource::new(*text)).collect()
}

/// Collect and run the standard pipeline over `texts`.
pub fn pipeline_test(config: &Config, texts: &[&str]) -> Result<Vec<CollectedDocument>, ErrorSet> {
    let collected = storegen::collector::collect(sources(texts));
    let documents = collected.into_result()?;
    storegen::pipeline::run_pipeline(config, documents)
}

pub fn compile_texts(config: &Config, texts: &[&str]) -> Result<CompileOutput, ErrorSet> {
    compile(config, sources(texts))
}

/// Content of the generated file at `path`.
pub fn file<'a>(output: &'a CompileOutput, path: &str) -> &'a str {
    output
        .files
        .iter()
        .find(|file| file.path == path)
        .map(|file| file.content.as_str())
        .unwrap_or_else(|| panic!("no output file {path}"))
}

/// A project directory with a config file and a documents directory.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new(config_json: &str) -> Self {
        let dir = tempfile::tempdir().expect("create project dir");
        fs::write(dir.path().join("schema.graphql"), TEST_SCHEMA).expect("write schema");
        fs::write(dir.path().join("storegen.json"), config_json).expect("write config");
        fs::create_dir_all(dir.path().join("src")).expect("create documents dir");
        Self { dir }
    }

    pub fn document(&self, rel_path: &str, text: &str) -> &Self {
        let path = self.dir.path().join("src").join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create document parent");
        }
        fs::write(path, text).expect("write document");
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn out(&self) -> PathBuf {
        self.dir.path().join("generated")
    }

    /// Run the binary with `--config` and `--documents` pointing into the project.
    pub fn run(&self, command: &str, extra: &[&str]) -> Output {
        let root = self.root();
        Command::new(env!("CARGO_BIN_EXE_storegen"))
            .arg(command)
            .arg("--config")
            .arg(root.join("storegen.json"))
            .arg("--documents")
            .arg(root.join("src"))
            .args(extra)
            .env_remove("RUST_LOG")
            .output()
            .expect("run storegen")
    }
}
