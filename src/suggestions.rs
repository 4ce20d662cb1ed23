//! # Error Suggestions
//!
//! Helpers that build CLI errors with hints. Errors should say what went
//! wrong and how to fix it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repo_fleet::suggestions;
//!
//! // Instead of:
//! anyhow::bail!("unknown strategy: {}", value);
//!
//! // Use:
//! return Err(suggestions::unknown_strategy(value));
//! ```

use std::path::Path;

use crate::config::Strategy;
use crate::provider::ProviderKind;

const STRATEGIES: [&str; 6] = ["rebase", "reset", "clone", "skip", "pull", "fetch"];
const PROVIDERS: [&str; 3] = ["github", "gitlab", "gitea"];

/// Error for a `--strategy` value that is not a known strategy.
pub fn unknown_strategy(value: &str) -> anyhow::Error {
    unknown_value("strategy", value, &STRATEGIES)
}

/// Error for a `--provider` value that is not a known provider.
pub fn unknown_provider(value: &str) -> anyhow::Error {
    unknown_value("provider", value, &PROVIDERS)
}

fn unknown_value(what: &str, value: &str, valid: &[&str]) -> anyhow::Error {
    let did_you_mean = find_similar(&value.to_lowercase(), valid)
        .map(|s| format!("\nhint: Did you mean '{s}'?"))
        .unwrap_or_default();
    anyhow::anyhow!(
        "Unknown {what}: {value}{did_you_mean}\n\n\
         Valid values are: {list}",
        list = valid.join(", ")
    )
}

/// Error for `sync` without a listing to read the organization from.
pub fn listing_required(provider: ProviderKind) -> anyhow::Error {
    anyhow::anyhow!(
        "No repository listing for {provider}\n\n\
         hint: Use --listing <FILE> to point at a YAML listing of the organization\n\
         hint: Set REPO_FLEET_LISTING environment variable"
    )
}

/// Error for a root or target path that does not exist.
pub fn path_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Directory not found: {path}\n\n\
         hint: Check the path, or run from the directory that holds your clones",
        path = path.display()
    )
}

/// Error returned when some repositories failed, so the exit code is
/// non-zero.
pub fn repositories_failed(failed: usize, total: usize) -> anyhow::Error {
    anyhow::anyhow!(
        "{failed} of {total} repositories failed\n\n\
         hint: Re-run with --log-level debug for the git output of each failure"
    )
}

/// Error returned when a sync left work behind that `--resume` can finish.
pub fn sync_incomplete(failed: usize, strategy: Strategy) -> anyhow::Error {
    anyhow::anyhow!(
        "{failed} repositories did not sync\n\n\
         hint: Fix the problems above and re-run with --resume --strategy {strategy}\n\
         hint: Run `repo-fleet state show` to inspect the saved session"
    )
}

/// Find a similar string from a list of candidates using edit distance.
///
/// Returns Some(candidate) if a close match is found (edit distance <= 2).
fn find_similar<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|&candidate| {
            let distance = edit_distance(input, candidate);
            if distance <= 2 && distance < input.len() {
                Some((candidate, distance))
            } else {
                None
            }
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Calculate the Levenshtein edit distance between two strings.
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (a_len, b_len) = (a_chars.len(), b_chars.len());

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0usize; b_len + 1];
    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}
