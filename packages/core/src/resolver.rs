//! Display-name lookup for a connection host.
//!
//! Resolution is optional: when it fails or times out the caller falls back to
//! the host string.

use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::executor;

/// Placeholder in resolver arguments replaced by the connection host.
pub const HOST_PLACEHOLDER: &str = "{host}";

/// Turns a connection host into a human-readable device name.
pub trait NameResolver {
    fn resolve(&self, host: &str) -> Option<String>;
}

/// Never resolves; the host becomes the display name.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFallback;

impl NameResolver for HostFallback {
    fn resolve(&self, _host: &str) -> Option<String> {
        None
    }
}

/// Asks an external program for the name.
///
/// The first non-empty line the program prints on success is the name.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    /// Builds a resolver from an argv; `None` when `command` is empty.
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn args_for(&self, host: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(HOST_PLACEHOLDER, host))
            .collect()
    }
}

impl NameResolver for CommandResolver {
    fn resolve(&self, host: &str) -> Option<String> {
        let output = match executor::run_bounded(&self.program, &self.args_for(host), self.timeout)
        {
            Ok(output) => output,
            Err(e) => {
                debug!(host, error = %e, "name resolver failed");
                return None;
            }
        };

        if !output.status.success() {
            debug!(host, status = %output.status, "name resolver exited unsuccessfully");
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// The resolver described by the configuration.
pub fn from_config(config: &Config) -> Box<dyn NameResolver> {
    match CommandResolver::new(&config.resolver.command, config.timeouts.resolve()) {
        Some(resolver) => Box::new(resolver),
        None => Box::new(HostFallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        ["sh", "-c", script, "resolver", HOST_PLACEHOLDER]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_command_resolver_substitutes_host() {
        let script = "printf '\\n  Phone of %s  \\nmore\\n' \"$1\"";
        let resolver = CommandResolver::new(&sh(script), Duration::from_secs(5)).unwrap();
        assert_eq!(
            resolver.resolve("10.0.0.5"),
            Some("Phone of 10.0.0.5".to_string())
        );
    }

    #[test]
    fn test_command_resolver_failure_modes() {
        let failing = CommandResolver::new(&sh("echo name; exit 1"), Duration::from_secs(5)).unwrap();
        assert_eq!(failing.resolve("h"), None);

        let silent = CommandResolver::new(&sh("true"), Duration::from_secs(5)).unwrap();
        assert_eq!(silent.resolve("h"), None);

        let slow =
            CommandResolver::new(&sh("sleep 10; echo late"), Duration::from_millis(100)).unwrap();
        assert_eq!(slow.resolve("h"), None);
    }

    #[test]
    fn test_from_config_defaults_to_host_fallback() {
        let config = Config::default();
        assert_eq!(from_config(&config).resolve("10.0.0.5"), None);
        assert!(CommandResolver::new(&[], Duration::from_secs(1)).is_none());
    }
}
