//! Deterministic names derived from an issue: branch, commit message, compare URL.

use crate::core::types::Issue;

/// Branch that holds the work for `issue`. At most one exists per issue.
pub fn branch_name(issue_number: u64) -> String {
    format!("fix-issue-{issue_number}")
}

/// Commit subject for the fix, e.g. `Fix #7: Fix off-by-one`.
pub fn commit_message(issue: &Issue) -> String {
    format!("Fix #{}: {}", issue.number, issue.title.trim())
}

/// Web URL that opens a pull-request form for `branch` against `base`.
///
/// A trailing `.git` or `/` on the repository URL is dropped.
pub fn compare_url(repo_url: &str, base: &str, branch: &str) -> String {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let web = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    format!("{web}/compare/{base}...{branch}?expand=1")
}

/// Split `https://host/<owner>/<repo>(.git)` into `(owner, repo)`.
pub fn owner_and_repo(repo_url: &str) -> Option<(String, String)> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next()?.trim();
    let owner = parts.next()?.trim();
    if repo.is_empty() || owner.is_empty() || owner.contains(':') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_is_stable_per_issue() {
        assert_eq!(branch_name(7), "fix-issue-7");
    }

    #[test]
    fn commit_message_references_issue() {
        let issue = Issue::new(7, "Fix off-by-one ", "body");
        assert_eq!(commit_message(&issue), "Fix #7: Fix off-by-one");
    }

    #[test]
    fn compare_url_strips_git_suffix() {
        assert_eq!(
            compare_url("https://github.com/acme/calc.git", "main", "fix-issue-7"),
            "https://github.com/acme/calc/compare/main...fix-issue-7?expand=1"
        );
        assert_eq!(
            compare_url("https://github.com/acme/calc/", "main", "fix-issue-7"),
            "https://github.com/acme/calc/compare/main...fix-issue-7?expand=1"
        );
    }

    #[test]
    fn owner_and_repo_from_url() {
        assert_eq!(
            owner_and_repo("https://github.com/acme/calc.git"),
            Some(("acme".to_string(), "calc".to_string()))
        );
        assert_eq!(owner_and_repo("https://github.com"), None);
        assert_eq!(owner_and_repo("calc"), None);
    }
}
