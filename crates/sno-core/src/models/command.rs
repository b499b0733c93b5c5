use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Completion {
    Pending,
    Ok,
    Failed,
}

/// Outcome of one command on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub address: String,
    /// `None` while running, or when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Transport-level failure (could not spawn, could not be waited on).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// Terminated on request rather than exiting on its own.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub killed: bool,
}

impl NodeResult {
    pub fn exited(address: &str, exit_code: Option<i32>, stderr: String) -> Self {
        Self {
            address: address.to_string(),
            exit_code,
            error: None,
            stderr,
            killed: false,
        }
    }

    pub fn errored(address: &str, error: impl Into<String>) -> Self {
        Self {
            address: address.to_string(),
            exit_code: None,
            error: Some(error.into()),
            stderr: String::new(),
            killed: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && (self.killed || self.exit_code == Some(0))
    }

    fn describe(&self) -> String {
        match (&self.error, self.exit_code) {
            (Some(e), _) => format!("{}: {e}", self.address),
            (None, Some(code)) if self.stderr.is_empty() => {
                format!("{}: exit {code}", self.address)
            }
            (None, Some(code)) => format!("{}: exit {code}: {}", self.address, self.stderr),
            (None, None) => format!("{}: terminated by signal", self.address),
        }
    }
}

/// Aggregate status of a command fanned out over a set of nodes.
/// Failed as soon as one node failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
    pub completion: Completion,
    pub nodes: Vec<NodeResult>,
}

impl CommandStatus {
    pub fn ok() -> Self {
        Self {
            completion: Completion::Ok,
            nodes: Vec::new(),
        }
    }

    pub fn pending() -> Self {
        Self {
            completion: Completion::Pending,
            nodes: Vec::new(),
        }
    }

    pub fn failed(address: &str, error: impl Into<String>) -> Self {
        Self::from_nodes(vec![NodeResult::errored(address, error)])
    }

    pub fn from_nodes(nodes: Vec<NodeResult>) -> Self {
        let completion = if nodes.iter().all(NodeResult::succeeded) {
            Completion::Ok
        } else {
            Completion::Failed
        };
        Self { completion, nodes }
    }

    pub fn is_ok(&self) -> bool {
        self.completion == Completion::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.completion == Completion::Failed
    }

    /// Combine two statuses: failed beats pending beats ok.
    pub fn merge(mut self, other: CommandStatus) -> Self {
        self.completion = match (self.completion, other.completion) {
            (Completion::Failed, _) | (_, Completion::Failed) => Completion::Failed,
            (Completion::Pending, _) | (_, Completion::Pending) => Completion::Pending,
            _ => Completion::Ok,
        };
        self.nodes.extend(other.nodes);
        self
    }

    pub fn failure_summary(&self) -> String {
        self.nodes
            .iter()
            .filter(|n| !n.succeeded())
            .map(NodeResult::describe)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
