use super::cache_executor::{CLUSTER_FILE, REPOS_FILE};
use super::{AgentSettings, CommandExecutor, ExecOutcome, ExecutorFuture};
use crate::error::{AppError, Result};
use crate::protocol::{ClusterInfo, CommandRequest, CommandType, RepoInfo};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Pinned JDK tarball for one CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JdkPackage {
    pub arch: &'static str,
    pub file_name: &'static str,
    pub sha256: &'static str,
}

const JDK_PACKAGES: [JdkPackage; 2] = [
    JdkPackage {
        arch: "x86_64",
        file_name: "jdk-8u431-linux-x64.tar.gz",
        sha256: "b396978a716b7d23ccccabfe5c47c3b75d2434d7f8f7af690bc648172382720d",
    },
    JdkPackage {
        arch: "aarch64",
        file_name: "jdk-8u431-linux-aarch64.tar.gz",
        sha256: "e68d3e31ffcf7f05a4de65d04974843073bdff238bb6524adb272de9e616be7c",
    },
];

/// Installs the pinned JDK under `<root_dir>/tools/jdk`.
pub struct SetupJdkExecutor;

impl CommandExecutor for SetupJdkExecutor {
    fn command_type(&self) -> CommandType {
        CommandType::SetupJdk
    }

    fn do_execute<'a>(&'a self, settings: &'a AgentSettings, request: &'a CommandRequest) -> ExecutorFuture<'a> {
        Box::pin(async move {
            let cluster: ClusterInfo = read_cache_file(&settings.cache_dir, CLUSTER_FILE)?;
            let repos: Vec<RepoInfo> = read_cache_file(&settings.cache_dir, REPOS_FILE)?;
            let jdk_home = jdk_home(&cluster);

            if jdk_home.join("bin").join("java").is_file() {
                return Ok(ExecOutcome::success(format!(
                    "JDK already installed at {}",
                    jdk_home.display()
                )));
            }

            let arch = normalize_arch(std::env::consts::ARCH)?;
            let package = package_for(arch)?;
            let repo = tools_repo(&repos, arch)?;
            let url = format!("{}/{}", repo.base_url.trim_end_matches('/'), package.file_name);

            tracing::info!("Fetching JDK for task {} from {}", request.task_id, url);
            let bytes = fetch_bytes(&url, package.file_name).await?;
            verify_checksum(&bytes, package.sha256)?;
            extract_tarball(&bytes, &jdk_home).await?;

            Ok(ExecOutcome::success(format!(
                "JDK installed at {} on {}",
                jdk_home.display(),
                request.hostname
            )))
        })
    }
}

fn read_cache_file<T: serde::de::DeserializeOwned>(cache_dir: &Path, name: &str) -> Result<T> {
    let path = cache_dir.join(name);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        AppError::Execution(format!("Failed to read cache file {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn jdk_home(cluster: &ClusterInfo) -> PathBuf {
    Path::new(&cluster.root_dir).join("tools").join("jdk")
}

fn normalize_arch(arch: &str) -> Result<&'static str> {
    match arch {
        "x86_64" | "amd64" => Ok("x86_64"),
        "aarch64" | "arm64" => Ok("aarch64"),
        other => Err(AppError::Execution(format!("Unsupported architecture: {}", other))),
    }
}

fn package_for(arch: &str) -> Result<JdkPackage> {
    JDK_PACKAGES
        .iter()
        .find(|package| package.arch == arch)
        .copied()
        .ok_or_else(|| AppError::Execution(format!("No JDK package for {}", arch)))
}

fn tools_repo<'a>(repos: &'a [RepoInfo], arch: &str) -> Result<&'a RepoInfo> {
    repos
        .iter()
        .filter(|repo| repo.repo_type == RepoInfo::TOOLS_REPO_TYPE)
        .find(|repo| normalize_arch(&repo.arch).is_ok_and(|repo_arch| repo_arch == arch))
        .ok_or_else(|| AppError::Execution(format!("No tools repo found for {}", arch)))
}

fn verify_checksum(bytes: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(AppError::Execution(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, actual
        )));
    }
    Ok(())
}

async fn extract_tarball(bytes: &[u8], jdk_home: &Path) -> Result<()> {
    std::fs::create_dir_all(jdk_home)?;
    let staging_dir = jdk_home.parent().unwrap_or(jdk_home);
    let mut archive = tempfile::NamedTempFile::new_in(staging_dir)?;
    archive.write_all(bytes)?;
    archive.flush()?;

    let output = tokio::process::Command::new("tar")
        .arg("-xzf")
        .arg(archive.path())
        .arg("-C")
        .arg(jdk_home)
        .arg("--strip-components=1")
        .output()
        .await?;
    if !output.status.success() {
        return Err(AppError::Execution(format!(
            "Failed to extract JDK: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn fetch_bytes(url: &str, label: &str) -> Result<Vec<u8>> {
    if let Some(path) = resolve_local_path(url) {
        let bytes = std::fs::read(&path).map_err(|e| {
            AppError::Execution(format!(
                "Failed to read local {} {}: {}",
                label,
                path.display(),
                e
            ))
        })?;
        return Ok(bytes);
    }

    let response = reqwest::get(url)
        .await
        .map_err(|e| AppError::Execution(format!("Failed to download {}: {}", label, e)))?;
    let response = response
        .error_for_status()
        .map_err(|e| AppError::Execution(format!("Failed to download {}: {}", label, e)))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Execution(format!("Failed to read {} bytes: {}", label, e)))?;

    Ok(bytes.to_vec())
}

fn resolve_local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        let path = path.strip_prefix("localhost").unwrap_or(path);
        return Some(PathBuf::from(path));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return None;
    }

    Some(PathBuf::from(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(arch: &str, repo_type: i32) -> RepoInfo {
        RepoInfo {
            name: format!("repo-{arch}-{repo_type}"),
            arch: arch.to_string(),
            base_url: format!("http://mirror/{arch}"),
            repo_type,
        }
    }

    #[test]
    fn picks_tools_repo_matching_arch() {
        let repos = vec![repo("x86_64", 1), repo("arm64", 2), repo("amd64", 2)];
        assert_eq!(tools_repo(&repos, "x86_64").unwrap().arch, "amd64");
        assert_eq!(tools_repo(&repos, "aarch64").unwrap().arch, "arm64");
        assert!(tools_repo(&repos[..1], "x86_64").is_err());
    }

    #[test]
    fn packages_are_pinned_per_arch() {
        assert_eq!(package_for("x86_64").unwrap().file_name, "jdk-8u431-linux-x64.tar.gz");
        assert_eq!(package_for("aarch64").unwrap().file_name, "jdk-8u431-linux-aarch64.tar.gz");
        assert!(normalize_arch("riscv64").is_err());
    }

    #[test]
    fn checksum_is_verified() {
        let digest = hex::encode(Sha256::digest(b"jdk"));
        assert!(verify_checksum(b"jdk", &digest).is_ok());
        assert!(verify_checksum(b"tampered", &digest).is_err());
    }

    #[test]
    fn file_urls_are_read_locally() {
        assert_eq!(
            resolve_local_path("file:///srv/tools/jdk.tar.gz"),
            Some(PathBuf::from("/srv/tools/jdk.tar.gz"))
        );
        assert_eq!(
            resolve_local_path("file://localhost/srv/jdk.tar.gz"),
            Some(PathBuf::from("/srv/jdk.tar.gz"))
        );
        assert_eq!(resolve_local_path("https://mirror/jdk.tar.gz"), None);
    }

    #[tokio::test]
    async fn existing_java_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("opt");
        let java = root.join("tools").join("jdk").join("bin").join("java");
        std::fs::create_dir_all(java.parent().unwrap()).unwrap();
        std::fs::write(&java, "").unwrap();

        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        let cluster = ClusterInfo {
            root_dir: root.display().to_string(),
            ..ClusterInfo::default()
        };
        std::fs::write(cache_dir.join(CLUSTER_FILE), serde_json::to_string(&cluster).unwrap()).unwrap();
        std::fs::write(cache_dir.join(REPOS_FILE), "[]").unwrap();

        let settings = AgentSettings {
            cache_dir,
            stack_cache_dir: dir.path().join("stack_cache"),
            stacks_dir: dir.path().join("stacks"),
            logs_dir: dir.path().join("logs"),
            dev_mode: false,
        };
        let request = CommandRequest {
            command_type: CommandType::SetupJdk,
            hostname: "h1".to_string(),
            payload: "{}".to_string(),
            task_id: 3,
            stage_id: 2,
            job_id: 1,
        };
        let outcome = SetupJdkExecutor.do_execute(&settings, &request).await.unwrap();
        assert!(outcome.result.starts_with("JDK already installed"));
    }
}
