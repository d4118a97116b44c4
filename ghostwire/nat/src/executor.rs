use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::process::Command;

/// Address family of a packet-filter invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn binary(self) -> &'static str {
        match self {
            IpFamily::V4 => "iptables",
            IpFamily::V6 => "ip6tables",
        }
    }

    pub fn is_v6(self) -> bool {
        matches!(self, IpFamily::V6)
    }
}

/// Capability seam over the packet-filter administration tools.
///
/// Production binds this to subprocess invocation; tests bind it to a
/// recording double that returns canned results for specific argument
/// tuples.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs the family's administration tool with the given arguments.
    async fn run(&self, family: IpFamily, args: &[&str]) -> Result<(), CommandError>;

    /// Runs a chain or rule probe. Exit 0 maps to `true`, exit 1 to
    /// `false`, and anything else is an error, per the tool's documented
    /// exit codes.
    async fn probe(&self, family: IpFamily, args: &[&str]) -> Result<bool, CommandError>;
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{binary} {} exited with {}: {}", .args.join(" "), describe_exit(.code), .output.trim())]
    Failed {
        binary: &'static str,
        args: Vec<String>,
        code: Option<i32>,
        output: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

/// Invokes `iptables`/`ip6tables` on the host.
#[derive(Copy, Clone, Debug, Default)]
pub struct CommandExecutor(());

impl CommandExecutor {
    pub fn new() -> Self {
        Self(())
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn run(&self, family: IpFamily, args: &[&str]) -> Result<(), CommandError> {
        let output = Command::new(family.binary())
            .args(args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                binary: family.binary(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(failed(family, args, output.status.code(), &output))
    }

    async fn probe(&self, family: IpFamily, args: &[&str]) -> Result<bool, CommandError> {
        let output = Command::new(family.binary())
            .args(args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                binary: family.binary(),
                source,
            })?;

        if output.status.success() {
            return Ok(true);
        }
        if output.status.code() == Some(1) {
            return Ok(false);
        }
        Err(failed(family, args, output.status.code(), &output))
    }
}

fn failed(
    family: IpFamily,
    args: &[&str],
    code: Option<i32>,
    output: &std::process::Output,
) -> CommandError {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    CommandError::Failed {
        binary: family.binary(),
        args: args.iter().map(|a| a.to_string()).collect(),
        code,
        output: text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_binaries() {
        assert_eq!(IpFamily::V4.binary(), "iptables");
        assert_eq!(IpFamily::V6.binary(), "ip6tables");
        assert!(IpFamily::V6.is_v6());
        assert!(!IpFamily::V4.is_v6());
    }

    #[test]
    fn failed_error_includes_command_line_and_output() {
        let error = CommandError::Failed {
            binary: "iptables",
            args: vec!["-t".to_string(), "nat".to_string(), "-N".to_string()],
            code: Some(2),
            output: "chain already exists\n".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("iptables -t nat -N"), "{text}");
        assert!(text.contains("code 2"), "{text}");
        assert!(text.contains("chain already exists"), "{text}");
    }
}
