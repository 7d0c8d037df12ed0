//! Per-format copy/rename policy: a plain byte copy by default, or a
//! command template that can rewrite references embedded in the file.
//!
//! Grounded on `Mover`/`SpecialisedMover`/`Movers` in
//! `examples/original_source/src/Mover.{h,cpp}`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{instrument, warn};

use crate::shell::{self, Substitutions};

/// A copy/rename policy for one format.
#[derive(Clone, Debug, Default)]
pub struct Mover {
    /// `None` means "plain byte copy"; `Some(template)` substitutes
    /// `$$i`/`$$o`/`$$l`/`$$s` and runs the result through the shell.
    command_template: Option<String>,
}

impl Mover {
    pub fn plain() -> Self {
        Self {
            command_template: None,
        }
    }

    pub fn specialised(command_template: impl Into<String>) -> Self {
        Self {
            command_template: Some(command_template.into()),
        }
    }

    /// Copy `src` to `dst`. If this mover carries a command template, run
    /// it with `$$i=src, $$o=dst, $$l=latex_name, $$s=support_dir`;
    /// otherwise do a byte copy.
    #[instrument(skip(self), fields(src = %shell::path(src), dst = %shell::path(dst)))]
    pub fn copy(&self, src: &Path, dst: &Path, latex_name: &str, support_dir: &Path) -> bool {
        match &self.command_template {
            Some(template) => {
                let subs = Substitutions {
                    input: Some(src.to_string_lossy()),
                    output: Some(dst.to_string_lossy()),
                    latex_name: Some(latex_name.into()),
                    support_dir: Some(support_dir.to_string_lossy()),
                    ..Default::default()
                };

                let command = shell::substitute(template, &subs);
                run_shell(&command)
            }
            None => fs::copy(src, dst).is_ok(),
        }
    }

    /// `copy` then delete the source, even when no rewrite is needed, so
    /// that a rename has the same failure modes as a copy.
    #[instrument(skip(self), fields(src = %shell::path(src), dst = %shell::path(dst)))]
    pub fn rename(&self, src: &Path, dst: &Path, latex_name: &str, support_dir: &Path) -> bool {
        if !self.copy(src, dst, latex_name, support_dir) {
            return false;
        }

        if let Err(error) = fs::remove_file(src) {
            warn!(%error, src = %shell::path(src), "failed to remove source after rename-copy");
            return false;
        }

        true
    }
}

fn run_shell(command: &str) -> bool {
    shell_command(command)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Registry of per-format movers, with a default plain mover for formats
/// that have no specialised entry.
#[derive(Debug, Default)]
pub struct Movers {
    by_format: HashMap<String, Mover>,
}

impl Movers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a specialised mover, parsed from a `\copier` command
    /// template, for `format`.
    pub fn set(&mut self, format: impl Into<String>, command_template: impl Into<String>) {
        self.by_format
            .insert(format.into(), Mover::specialised(command_template));
    }

    /// Returns the registered mover for `format`, or a default plain mover.
    pub fn get(&self, format: &str) -> Mover {
        self.by_format.get(format).cloned().unwrap_or_default()
    }
}
