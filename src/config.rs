use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use xdg::BaseDirectories;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub view: ViewConfig,
    pub display: DisplayConfig,
}

/// diff ビューの種類
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// 1 ペインの行ベース diff（view zone + overlay でスレッドを固定）
    #[default]
    Plain,
    /// hunk ごとのチャンク表示（チャンクの下にスレッドを並べる）
    Chunked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewConfig {
    pub mode: ViewMode,
    /// Viewport width in columns (markdown wrapping)
    pub width: u16,
    /// Viewport height in rows (plain view only)
    pub height: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_avatars: bool,
    pub show_absolute_time: bool,
    pub reply_indent: u16,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: ViewMode::Plain,
            width: 100,
            height: 40,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_avatars: true,
            show_absolute_time: true,
            reply_indent: 2,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// 設定ファイルパス: ~/.config/prthreads/config.toml
    pub fn config_path() -> PathBuf {
        BaseDirectories::with_prefix("prthreads")
            .map(|dirs| dirs.get_config_home())
            .unwrap_or_else(|_| PathBuf::from(".config/prthreads"))
            .join("config.toml")
    }
}
