use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::models::Node;

/// Builds the local processes that reach a node. The remote client spawns
/// and supervises them; a transport never runs anything itself.
pub trait Transport: Send + Sync {
    /// Run `command` through a shell on `node`.
    fn exec(&self, node: &Node, as_user: Option<&str>, command: &str) -> Command;

    /// Copy local files into `remote_directory` on `node`.
    fn push(
        &self,
        node: &Node,
        as_user: Option<&str>,
        local_paths: &[PathBuf],
        remote_directory: &str,
    ) -> Command;

    /// Copy remote files from `node` into `local_directory`.
    fn pull(
        &self,
        node: &Node,
        as_user: Option<&str>,
        remote_paths: &[String],
        local_directory: &Path,
    ) -> Command;
}

/// `ssh`/`scp` with key authentication and no interactive prompts.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub connect_timeout_secs: u32,
    /// Allocate a pty so remote processes get SIGHUP when their session ends.
    pub force_tty: bool,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            force_tty: true,
        }
    }
}

impl SshTransport {
    fn common_options(&self, node: &Node) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        let key_file = node.key_file.clone().or_else(default_key_file);
        if let Some(key) = key_file {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().to_string());
        }
        args
    }
}

impl Transport for SshTransport {
    fn exec(&self, node: &Node, as_user: Option<&str>, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        if self.force_tty {
            cmd.arg("-tt");
        }
        cmd.args(self.common_options(node));
        cmd.arg(node.destination(as_user));
        cmd.arg(command);
        cmd
    }

    fn push(
        &self,
        node: &Node,
        as_user: Option<&str>,
        local_paths: &[PathBuf],
        remote_directory: &str,
    ) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-r");
        cmd.args(self.common_options(node));
        cmd.args(local_paths);
        cmd.arg(format!("{}:{remote_directory}", node.destination(as_user)));
        cmd
    }

    fn pull(
        &self,
        node: &Node,
        as_user: Option<&str>,
        remote_paths: &[String],
        local_directory: &Path,
    ) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-r");
        cmd.args(self.common_options(node));
        let destination = node.destination(as_user);
        for path in remote_paths {
            cmd.arg(format!("{destination}:{path}"));
        }
        cmd.arg(local_directory);
        cmd
    }
}

fn default_key_file() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("id_rsa"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn node() -> Node {
        let mut node = Node::new("n1", "10.0.0.1", "bench");
        node.key_file = Some(PathBuf::from("/keys/id"));
        node
    }

    #[test]
    fn exec_targets_user_at_address_with_key() {
        let cmd = SshTransport::default().exec(&node(), None, "docker ps -a");
        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args(&cmd);
        assert_eq!(args.first().map(String::as_str), Some("-tt"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id"));
        assert_eq!(&args[args.len() - 2..], ["bench@10.0.0.1", "docker ps -a"]);
    }

    #[test]
    fn exec_honours_identity_override() {
        let transport = SshTransport {
            force_tty: false,
            ..SshTransport::default()
        };
        let cmd = transport.exec(&node(), Some("root"), "true");
        let args = args(&cmd);
        assert!(!args.contains(&"-tt".to_string()));
        assert!(args.contains(&"root@10.0.0.1".to_string()));
    }

    #[test]
    fn push_ends_with_remote_directory() {
        let cmd = SshTransport::default().push(
            &node(),
            None,
            &[PathBuf::from("/tmp/a.yaml"), PathBuf::from("/tmp/b.yaml")],
            "/tmp/SocialNetworkAKKA/",
        );
        assert_eq!(cmd.as_std().get_program(), "scp");
        let args = args(&cmd);
        assert_eq!(
            &args[args.len() - 3..],
            ["/tmp/a.yaml", "/tmp/b.yaml", "bench@10.0.0.1:/tmp/SocialNetworkAKKA/"]
        );
    }

    #[test]
    fn pull_prefixes_every_remote_path() {
        let cmd = SshTransport::default().pull(
            &node(),
            None,
            &["/tmp/docker_names".to_string()],
            Path::new("/out/10.0.0.1"),
        );
        let args = args(&cmd);
        assert_eq!(
            &args[args.len() - 2..],
            ["bench@10.0.0.1:/tmp/docker_names", "/out/10.0.0.1"]
        );
    }
}
