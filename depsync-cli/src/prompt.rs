//! Interactive overwrite prompt.

use console::Term;
use depsync::manifest::WorkingFile;
use depsync::TamperResolver;
use dialoguer::Confirm;

/// Number of file names listed before the rest are summarized.
const MAX_LISTED: usize = 20;

/// Asks on the terminal whether modified files may be overwritten.
///
/// Answers no without asking when stderr is not a terminal.
pub struct ConsoleResolver {
    term: Term,
}

impl ConsoleResolver {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl Default for ConsoleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TamperResolver for ConsoleResolver {
    fn resolve(&self, tampered: &[WorkingFile]) -> bool {
        if !self.term.is_term() {
            return false;
        }

        let _ = self
            .term
            .write_line("The following files have been modified locally:");
        for file in tampered.iter().take(MAX_LISTED) {
            let _ = self.term.write_line(&format!("  {}", file.name));
        }
        if tampered.len() > MAX_LISTED {
            let _ = self
                .term
                .write_line(&format!("  ... and {} more", tampered.len() - MAX_LISTED));
        }

        Confirm::new()
            .with_prompt("Overwrite them with the expected versions?")
            .default(false)
            .interact_on(&self.term)
            .unwrap_or(false)
    }
}
