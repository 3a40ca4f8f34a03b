use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Runs `gh` and returns its stdout
pub async fn gh_command(args: &[String]) -> Result<String> {
    debug!(?args, "running gh");
    let output = Command::new("gh")
        .args(args)
        .output()
        .await
        .context("Failed to execute gh CLI - is it installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("gh command failed: {}", stderr.trim());
    }

    String::from_utf8(output.stdout).context("gh output contains invalid UTF-8")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// `-f`: sent as a string
    Text,
    /// `-F`: numbers and booleans keep their JSON type
    Typed,
}

/// A `gh api` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: &'static str,
    endpoint: String,
    fields: Vec<(FieldKind, String, String)>,
    paginate: bool,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: "GET",
            endpoint: endpoint.into(),
            fields: Vec::new(),
            paginate: false,
        }
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            method: "POST",
            ..Self::get(endpoint)
        }
    }

    /// Follow every page; the pages are merged into one array
    pub fn paginate(mut self) -> Self {
        self.paginate = true;
        self
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((FieldKind::Text, key.to_string(), value.to_string()));
        self
    }

    pub fn typed_field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.push((FieldKind::Typed, key.to_string(), value.to_string()));
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["api".to_string()];
        if self.method != "GET" {
            args.push("--method".to_string());
            args.push(self.method.to_string());
        }
        if self.paginate {
            args.push("--paginate".to_string());
        }
        args.push(self.endpoint.clone());
        for (kind, key, value) in &self.fields {
            args.push(match kind {
                FieldKind::Text => "-f".to_string(),
                FieldKind::Typed => "-F".to_string(),
            });
            args.push(format!("{}={}", key, value));
        }
        args
    }

    pub async fn send(&self) -> Result<serde_json::Value> {
        let output = gh_command(&self.args()).await?;
        if self.paginate {
            merge_pages(&output)
        } else {
            serde_json::from_str(&output).context("Failed to parse gh api response as JSON")
        }
    }
}

/// `gh api --paginate` の出力（ページごとの JSON 配列の連結）を 1 つの配列にまとめる
fn merge_pages(output: &str) -> Result<serde_json::Value> {
    let mut items = Vec::new();
    for page in serde_json::Deserializer::from_str(output).into_iter::<serde_json::Value>() {
        match page.context("Failed to parse gh api page as JSON")? {
            serde_json::Value::Array(values) => items.extend(values),
            other => items.push(other),
        }
    }
    Ok(serde_json::Value::Array(items))
}
