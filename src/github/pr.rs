use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::client::{gh_command, ApiRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u32,
    pub title: String,
    pub head: Branch,
    pub base: Branch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChangedFile {
    filename: String,
    /// 巨大なファイルでは省略される
    #[serde(default)]
    patch: Option<String>,
}

pub async fn fetch_pr(repo: &str, pr_number: u32) -> Result<PullRequest> {
    let json = ApiRequest::get(format!("repos/{}/pulls/{}", repo, pr_number))
        .send()
        .await?;
    serde_json::from_value(json).context("Failed to parse PR response")
}

/// Unified patch of one changed file.
///
/// GitHub omits the patch for large files; those are cut out of the full
/// `gh pr diff` output instead.
pub async fn fetch_file_patch(repo: &str, pr_number: u32, filename: &str) -> Result<String> {
    let json = ApiRequest::get(format!("repos/{}/pulls/{}/files?per_page=100", repo, pr_number))
        .paginate()
        .send()
        .await?;
    let files: Vec<ChangedFile> =
        serde_json::from_value(json).context("Failed to parse changed files response")?;
    let file = files
        .into_iter()
        .find(|f| f.filename == filename)
        .with_context(|| format!("{} is not changed in PR #{}", filename, pr_number))?;

    if let Some(patch) = file.patch {
        return Ok(patch);
    }

    let diff = gh_command(&[
        "pr".to_string(),
        "diff".to_string(),
        pr_number.to_string(),
        "-R".to_string(),
        repo.to_string(),
    ])
    .await?;
    extract_file_patch(&diff, filename)
        .with_context(|| format!("No patch for {} in the PR diff", filename))
}

/// Cuts one file's hunks out of a multi-file unified diff
fn extract_file_patch(diff: &str, filename: &str) -> Option<String> {
    let header = format!("diff --git a/{} b/{}", filename, filename);
    let mut lines = diff.lines().skip_while(|line| *line != header).skip(1);

    let mut hunks = Vec::new();
    for line in lines.by_ref() {
        if line.starts_with("diff --git ") {
            break;
        }
        if line.starts_with("@@") || !hunks.is_empty() {
            hunks.push(line);
        }
    }

    if hunks.is_empty() {
        None
    } else {
        Some(hunks.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/a.py b/a.py\nindex 1..2 100644\n--- a/a.py\n+++ b/a.py\n@@ -1 +1 @@\n-x\n+y\ndiff --git a/b.py b/b.py\n--- a/b.py\n+++ b/b.py\n@@ -3,0 +4,1 @@\n+z";

    #[test]
    fn test_extract_file_patch_stops_at_next_file() {
        assert_eq!(extract_file_patch(DIFF, "a.py").as_deref(), Some("@@ -1 +1 @@\n-x\n+y"));
        assert_eq!(extract_file_patch(DIFF, "b.py").as_deref(), Some("@@ -3,0 +4,1 @@\n+z"));
    }

    #[test]
    fn test_extract_file_patch_missing_file() {
        assert!(extract_file_patch(DIFF, "c.py").is_none());
    }

    #[test]
    fn test_pull_request_ignores_extra_fields() {
        let pr: PullRequest = serde_json::from_value(serde_json::json!({
            "number": 4,
            "title": "Fix",
            "state": "open",
            "head": {"ref": "topic", "sha": "abc"},
            "base": {"ref": "main", "sha": "def"}
        }))
        .unwrap();
        assert_eq!(pr.head.sha, "abc");
        assert_eq!(pr.base.ref_name, "main");
    }
}
