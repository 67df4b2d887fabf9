use std::process::{Command, Output};

use tracing::trace;

/// A Linux network namespace reached via `ip netns exec`.
///
/// The namespace belongs to whoever built the emulated network; this handle
/// only runs commands inside it and never creates or deletes it.
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    /// Refers to an existing namespace by name.
    pub fn attach(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output, std::io::Error> {
        trace!("{}: {} {:?}", self.name, cmd, args);
        Command::new("sudo")
            .args(["ip", "netns", "exec", &self.name, cmd])
            .args(args)
            .output()
    }

    /// Runs `cmd` inside the namespace and returns its stdout, failing on a
    /// non-zero exit status.
    pub fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<String, std::io::Error> {
        let output = self.exec(cmd, args)?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{}: `{} {}` exited with {}: {}",
                self.name,
                cmd,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
