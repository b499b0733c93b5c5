use std::path::PathBuf;

use serde::Serialize;

/// A remote host reachable over ssh. Built once from the `nodes` section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    pub address: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

impl Node {
    pub fn new(name: impl Into<String>, address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            user: user.into(),
            key_file: None,
        }
    }

    /// `user@address`, with `as_user` overriding the node's own identity.
    pub fn destination(&self, as_user: Option<&str>) -> String {
        format!("{}@{}", as_user.unwrap_or(&self.user), self.address)
    }
}
