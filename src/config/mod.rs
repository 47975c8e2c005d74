//! 런처 설정 — `launcher.toml` (또는 `$STRATOS_CONFIG`)
//!
//! 모든 필드는 선택 사항. 파일이 없으면 고정 부트스트랩과 동일하게 동작:
//! `venv/`, `requirements.txt`, `api.main:app` → `0.0.0.0:8000`, 자동 리로드.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "STRATOS_CONFIG";
pub const PORT_ENV: &str = "STRATOS_PORT";
const DEFAULT_CONFIG_FILE: &str = "launcher.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    /// 가상환경 디렉토리 (존재 여부 = 부트스트랩 마커)
    pub venv_dir: PathBuf,
    /// `pip install -r`에 넘길 의존성 매니페스트
    pub requirements: PathBuf,
    /// uvicorn에 넘길 ASGI 앱 import 문자열
    pub app: String,
    pub host: String,
    pub port: u16,
    pub reload: bool,
    /// venv 생성에 쓸 인터프리터. `None`이면 시스템 탐지
    pub base_python: Option<String>,
    /// 포트 해제 후 바인드 가능해질 때까지 대기 시간
    pub free_port_timeout_ms: u64,
    /// 서버가 연결을 받을 때까지 readiness 감시 대기 시간
    pub readiness_timeout_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            venv_dir: PathBuf::from("venv"),
            requirements: PathBuf::from("requirements.txt"),
            app: "api.main:app".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            reload: true,
            base_python: None,
            free_port_timeout_ms: 2_000,
            readiness_timeout_ms: 30_000,
        }
    }
}

impl LauncherConfig {
    /// `$STRATOS_CONFIG` 또는 `./launcher.toml` 로드 후 `$STRATOS_PORT` 적용.
    /// 파일이 없으면 기본값.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut cfg = Self::from_file(&path)?;
        if let Ok(raw) = std::env::var(PORT_ENV) {
            cfg.apply_port_override(&raw)?;
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("설정 파일 없음 ({}), 기본값 사용", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let cfg = Self::from_toml(&s)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::info!("런처 설정 로드: {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        if cfg.app.trim().is_empty() {
            anyhow::bail!("`app` must not be empty");
        }
        Ok(cfg)
    }

    fn apply_port_override(&mut self, raw: &str) -> Result<()> {
        let port: u16 = raw
            .trim()
            .parse()
            .with_context(|| format!("{} is not a valid port: '{}'", PORT_ENV, raw))?;
        tracing::debug!("{} overrides port {} -> {}", PORT_ENV, self.port, port);
        self.port = port;
        Ok(())
    }
}
