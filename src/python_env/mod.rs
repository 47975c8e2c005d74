//! Python 가상환경 — 부트스트랩, 활성화, 의존성 설치
//!
//! ## 흐름
//! 1. `ensure_environment()` — venv 디렉토리 존재 여부가 부트스트랩 마커.
//!    있으면 아무것도 건드리지 않음. 없으면 `<base python> -m venv <dir>`.
//! 2. `activate()` — venv 인터프리터 경로와 activate 스크립트가 내보낼
//!    환경변수를 [`ActivatedEnv`] 값으로 해석. 런처 자신의 환경은 변경하지
//!    않고, 모든 자식 명령에 명시적으로 적용합니다.
//! 3. `install_requirements()` — `<venv python> -m pip install -r <manifest>`,
//!    stdio 상속으로 pip 출력이 터미널에 그대로 표시됨.
//!
//! ## 레이아웃
//! ```text
//! <venv_dir>/
//!   bin/python            (Linux/macOS)
//!   Scripts/python.exe    (Windows)
//! ```

use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::launcher::LaunchError;
use crate::utils::{apply_creation_flags, render_command};

/// 시스템 Python 사용 시 최소 요구 버전
const MIN_PYTHON_VERSION: (u32, u32) = (3, 8);

#[cfg(target_os = "windows")]
const SYSTEM_PYTHON_CANDIDATES: &[&str] = &["python", "py", "python3"];
#[cfg(not(target_os = "windows"))]
const SYSTEM_PYTHON_CANDIDATES: &[&str] = &["python3", "python"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

/// 활성화된 가상환경 (명시적 값)
#[derive(Debug, Clone)]
pub struct ActivatedEnv {
    /// venv 절대 경로 (`VIRTUAL_ENV`)
    pub root: PathBuf,
    /// `bin/` 또는 `Scripts\` — `PATH` 맨 앞에 추가
    pub bin_dir: PathBuf,
    /// venv 내부 인터프리터
    pub python: PathBuf,
    path_var: OsString,
}

impl ActivatedEnv {
    /// activate 스크립트가 설정하는 환경변수
    pub fn vars(&self) -> Vec<(&'static str, OsString)> {
        vec![
            ("VIRTUAL_ENV", self.root.clone().into_os_string()),
            ("PATH", self.path_var.clone()),
        ]
    }

    /// 자식 명령에 활성화 환경 적용
    pub fn apply<'a>(&self, cmd: &'a mut Command) -> &'a mut Command {
        for (key, value) in self.vars() {
            cmd.env(key, value);
        }
        cmd.env_remove("PYTHONHOME")
    }

    /// 활성화된 환경이 적용된 venv 인터프리터 명령.
    /// 포그라운드 실행용이므로 콘솔을 숨기지 않습니다 (Ctrl+C 전달).
    pub fn python_command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        self.apply(&mut cmd);
        cmd
    }
}

// ═══════════════════════════════════════════════════════════════
//  Public API
// ═══════════════════════════════════════════════════════════════

/// `venv_dir`이 없을 때만 venv를 생성합니다.
///
/// 기존 디렉토리는 그대로 신뢰합니다: 검증, 복구, 존재 확인 외의
/// 파일시스템 접근 모두 없음.
pub async fn ensure_environment(
    venv_dir: &Path,
    base_python: Option<&str>,
) -> Result<EnsureOutcome, LaunchError> {
    if venv_dir.is_dir() {
        tracing::info!("가상환경이 이미 존재합니다: {}", venv_dir.display());
        return Ok(EnsureOutcome::AlreadyPresent);
    }

    let create_err = |reason: String| LaunchError::EnvCreate {
        path: venv_dir.to_path_buf(),
        reason,
    };

    let base = match base_python {
        Some(p) => p.to_string(),
        None => detect_system_python().await.map_err(|e| create_err(e.to_string()))?,
    };

    let args = [OsString::from("-m"), OsString::from("venv"), venv_dir.as_os_str().to_owned()];
    tracing::info!("가상환경 생성 중: {}", render_command(&base, &args));

    let mut cmd = Command::new(&base);
    cmd.args(&args).stdin(Stdio::null());
    apply_creation_flags(&mut cmd);

    let output = cmd
        .output()
        .await
        .map_err(|e| create_err(format!("cannot run '{}': {}", base, e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(create_err(stderr.trim().to_string()));
    }

    tracing::info!("가상환경 생성 완료: {}", venv_dir.display());
    Ok(EnsureOutcome::Created)
}

/// venv 실행 파일 경로를 [`ActivatedEnv`]로 해석합니다.
pub fn activate(venv_dir: &Path) -> Result<ActivatedEnv, LaunchError> {
    let activate_err = |reason: String| LaunchError::EnvActivate {
        path: venv_dir.to_path_buf(),
        reason,
    };

    let root = std::fs::canonicalize(venv_dir).map_err(|e| activate_err(e.to_string()))?;
    let bin_dir = venv_bin_dir(&root);
    let python = venv_python_exe(&root);
    if !python.is_file() {
        return Err(activate_err(format!(
            "no interpreter at {}",
            python.display()
        )));
    }

    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let path_var = prepend_path(&bin_dir, &inherited).map_err(|e| activate_err(e.to_string()))?;

    tracing::info!("가상환경 활성화: {}", python.display());
    Ok(ActivatedEnv {
        root,
        bin_dir,
        python,
        path_var,
    })
}

/// `manifest`에 나열된 패키지를 활성화된 환경에 설치합니다.
pub async fn install_requirements(env: &ActivatedEnv, manifest: &Path) -> Result<(), LaunchError> {
    if !manifest.is_file() {
        return Err(LaunchError::ManifestMissing(manifest.to_path_buf()));
    }

    let args = [
        OsString::from("-m"),
        OsString::from("pip"),
        OsString::from("install"),
        OsString::from("-r"),
        manifest.as_os_str().to_owned(),
    ];
    tracing::info!("의존성 설치 중: {}", render_command(&env.python, &args));

    let mut cmd = env.python_command();
    cmd.args(&args).stdin(Stdio::null());

    let status = cmd
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run pip: {}", e))?;
    if !status.success() {
        return Err(LaunchError::Install { code: status.code() });
    }

    tracing::info!("의존성 설치 완료: {}", manifest.display());
    Ok(())
}

/// `PATH`에서 Python ≥ 3.8 을 탐지합니다.
pub async fn detect_system_python() -> Result<String> {
    for cmd_name in SYSTEM_PYTHON_CANDIDATES {
        let mut cmd = Command::new(cmd_name);
        cmd.arg("--version").stdin(Stdio::null());
        apply_creation_flags(&mut cmd);

        let Ok(output) = cmd.output().await else {
            continue;
        };
        if !output.status.success() {
            continue;
        }
        // Python 2는 버전을 stderr로 출력
        let mut ver = String::from_utf8_lossy(&output.stdout).into_owned();
        if ver.trim().is_empty() {
            ver = String::from_utf8_lossy(&output.stderr).into_owned();
        }
        match parse_python_version(&ver) {
            Some(v) if v >= MIN_PYTHON_VERSION => {
                tracing::debug!("시스템 Python 발견: {} → {}", cmd_name, ver.trim());
                return Ok(cmd_name.to_string());
            }
            Some((major, minor)) => {
                tracing::debug!(
                    "{} → {}.{} (최소 {}.{} 필요, 건너뜀)",
                    cmd_name,
                    major,
                    minor,
                    MIN_PYTHON_VERSION.0,
                    MIN_PYTHON_VERSION.1
                );
            }
            None => {}
        }
    }
    Err(anyhow::anyhow!(
        "no Python >= {}.{} found on PATH",
        MIN_PYTHON_VERSION.0,
        MIN_PYTHON_VERSION.1
    ))
}

/// 진단 정보를 JSON으로 반환합니다.
pub async fn status(venv_dir: &Path) -> serde_json::Value {
    let python_exe = venv_python_exe(venv_dir);
    let mut info = serde_json::json!({
        "venv_dir": venv_dir.to_string_lossy(),
        "exists": venv_dir.is_dir(),
        "venv_python": python_exe.to_string_lossy(),
        "interpreter_present": python_exe.is_file(),
    });

    if python_exe.is_file() {
        if let Ok(ver) = get_version(&python_exe).await {
            info["python_version"] = serde_json::json!(ver);
        }
    }

    info["system_python"] = match detect_system_python().await {
        Ok(cmd) => serde_json::json!(cmd),
        Err(_) => serde_json::Value::Null,
    };

    info
}

// ═══════════════════════════════════════════════════════════════
//  Internal
// ═══════════════════════════════════════════════════════════════

/// venv 실행 파일 디렉토리
pub fn venv_bin_dir(venv_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_dir.join("Scripts")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_dir.join("bin")
    }
}

/// venv 내 Python 실행 파일 경로
pub fn venv_python_exe(venv_dir: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_bin_dir(venv_dir).join("python.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_bin_dir(venv_dir).join("python")
    }
}

fn prepend_path(dir: &Path, inherited: &std::ffi::OsStr) -> Result<OsString> {
    let paths = std::iter::once(dir.to_path_buf())
        .chain(
            std::env::split_paths(inherited)
                .filter(|p| !p.as_os_str().is_empty() && p != dir),
        );
    Ok(std::env::join_paths(paths)?)
}

async fn get_version(exe: &Path) -> Result<String> {
    let mut cmd = Command::new(exe);
    cmd.arg("--version").stdin(Stdio::null());
    apply_creation_flags(&mut cmd);
    let output = cmd.output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// "Python 3.12.8" → (3, 12)
pub fn parse_python_version(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let ver_part = s
        .strip_prefix("Python ")
        .or_else(|| s.strip_prefix("python "))
        .unwrap_or(s);
    let mut parts = ver_part.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}
