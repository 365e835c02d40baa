//! Best-effort desktop notifications.
//!
//! Notifications never influence the lifecycle: failures are logged at debug
//! level and otherwise ignored.

use tracing::debug;

use crate::config::Config;
use crate::executor;

/// Fire-and-forget sink for user-facing messages.
pub trait Notifier {
    fn notify(&self, summary: &str, body: &str);
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Notifier for Silent {
    fn notify(&self, _summary: &str, _body: &str) {}
}

/// Spawns a program such as `notify-send` with summary and body appended.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, summary: &str, body: &str) {
        let mut args = self.args.clone();
        args.push(summary.to_string());
        args.push(body.to_string());
        if let Err(e) = executor::spawn_detached(&self.program, &args) {
            debug!(error = %e, "notification not delivered");
        }
    }
}

/// The notifier described by the configuration.
pub fn from_config(config: &Config) -> Box<dyn Notifier> {
    if !config.notifications.enabled {
        return Box::new(Silent);
    }
    match CommandNotifier::new(&config.notifications.command) {
        Some(notifier) => Box::new(notifier),
        None => Box::new(Silent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    #[test]
    fn test_command_notifier_passes_summary_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = format!("printf '%s|%s' \"$1\" \"$2\" > '{}'", out.display());
        let notifier = CommandNotifier::new(&[
            "sh".to_string(),
            "-c".to_string(),
            script,
            "notify".to_string(),
        ])
        .unwrap();

        notifier.notify("Connected", "MyPhone is available");

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(contents) = fs::read_to_string(&out)
                && !contents.is_empty()
            {
                assert_eq!(contents, "Connected|MyPhone is available");
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("notification command did not run");
    }

    #[test]
    fn test_missing_program_is_ignored() {
        let notifier =
            CommandNotifier::new(&["definitely-not-a-real-program-xyz".to_string()]).unwrap();
        notifier.notify("a", "b");
    }
}
