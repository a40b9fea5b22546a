//! Review input assembly: prompt template + MR header + concatenated diffs.
//!
//! Output is a pure function of its inputs so artifacts are reproducible.

use std::path::Path;

use tracing::{debug, warn};

use crate::git_providers::{Change, MergeRequest};

/// Used when no prompt template file is available.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Review the following code changes:\n\n";

/// Reads the prompt template once at startup.
///
/// Falls back to [`DEFAULT_PROMPT_TEMPLATE`] (with a warning) when no path is
/// configured or the file cannot be read.
pub fn load_prompt_template(path: Option<&Path>) -> String {
    let Some(path) = path else {
        warn!("No prompt file configured. Using default.");
        return DEFAULT_PROMPT_TEMPLATE.to_string();
    };

    match std::fs::read_to_string(path) {
        Ok(s) => {
            debug!(path = %path.display(), len = s.len(), "prompt template loaded");
            s
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "Prompt file not readable. Using default.");
            DEFAULT_PROMPT_TEMPLATE.to_string()
        }
    }
}

/// Builds the document every agent receives.
///
/// Changes appear in the order the provider returned them, each as a
/// `File: <path>` line, its diff and a blank separator line.
pub fn assemble_review_input(template: &str, mr: &MergeRequest, changes: &[Change]) -> String {
    let mut full_diff = String::new();
    for change in changes {
        full_diff.push_str("File: ");
        full_diff.push_str(&change.new_path);
        full_diff.push('\n');
        full_diff.push_str(&change.diff);
        full_diff.push_str("\n\n");
    }

    let mut s = String::with_capacity(template.len() + full_diff.len() + 128);
    s.push_str(template);
    s.push_str("\n\n");
    s.push_str(&format!("# Merge Request: {}\n", mr.title));
    s.push_str("## Description\n");
    s.push_str(mr.description.as_deref().unwrap_or_default());
    s.push_str("\n\n");
    s.push_str("## Changes\n```diff\n");
    s.push_str(&full_diff);
    s.push_str("\n```");
    s
}
