use std::sync::Arc;

use latchkey::authz::hierarchy::ResourceTree;
use latchkey::authz::loader::{builtin_policy, compile_policies};
use latchkey::authz::policy::parse_kdl_document;
use latchkey::authz::AuthzState;

/// Builder for compiled policy state, always on top of the built-in policy
pub struct PolicyBuilder {
    sources: Vec<String>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Append one KDL policy document
    pub fn with_kdl(mut self, source: &str) -> Self {
        self.sources.push(source.to_string());
        self
    }

    pub fn build(self) -> Arc<AuthzState> {
        let mut parsed = vec![builtin_policy().expect("Built-in policy must parse")];
        for source in &self.sources {
            parsed.push(parse_kdl_document(source).expect("Failed to parse test policy"));
        }
        Arc::new(compile_policies(parsed).expect("Failed to compile test policy"))
    }
}

/// Builder for resource trees from slash-separated paths like `/a/b`
pub struct TreeBuilder {
    paths: Vec<String>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self { paths: Vec::new() }
    }

    /// Add a resource; its ancestors are created as needed
    pub fn with_path(mut self, path: &str) -> Self {
        self.paths.push(path.to_string());
        self
    }

    pub fn build(self) -> ResourceTree {
        let mut tree = ResourceTree::new();
        for path in &self.paths {
            let mut parent: Option<String> = None;
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                if !tree.contains(&current.as_str().into()) {
                    tree.insert(current.as_str(), parent.clone().map(Into::into))
                        .expect("Failed to insert test resource");
                }
                parent = Some(current.clone());
            }
        }
        tree
    }
}
