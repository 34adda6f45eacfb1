use crate::image::{ImageRef, ReferenceError};
use crate::params::{
    AccessMode, CommandType, ContainerParams, LogStream, ParamsError, DEFAULT_STOP_TIMEOUT_SECS,
};
use crate::ports::Protocol;
use crate::types::ContainerName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_AWAIT_TIMEOUT_SECS: u64 = 60;
/// One day.
pub const MAX_AWAIT_TIMEOUT_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("container.image: {0}")]
    Image(#[from] ReferenceError),
    #[error("container: {0}")]
    Params(#[from] ParamsError),
    #[error("{section}: command must not be empty")]
    EmptyCommand { section: &'static str },
    #[error("post_start await-log pattern must not be empty")]
    EmptyPattern,
    #[error("post_start await-log timeout_secs {secs} exceeds the maximum of {max}")]
    AwaitTimeoutTooLong { secs: u64, max: u64 },
    #[error("{section}: remote path '{path}' must be absolute")]
    RelativeRemotePath { section: &'static str, path: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestV1 {
    pub manifest_version: u32,
    pub container: ContainerSection,
    #[serde(default)]
    pub pre_start: Vec<PreStartAction>,
    #[serde(default)]
    pub post_start: Vec<PostStartAction>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub command_type: CommandType,
    #[serde(default)]
    pub disable_auto_remove: bool,
    #[serde(default)]
    pub stop_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tmpfs: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortEntry {
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub host: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MountEntry {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Work done on a created container before it starts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PreStartAction {
    Copy { local: PathBuf, remote: String },
}

/// Work done on a running container, in declaration order.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PostStartAction {
    AwaitLog {
        pattern: String,
        #[serde(default)]
        stream: LogStream,
        #[serde(default = "default_await_timeout")]
        timeout_secs: u64,
    },
    Exec {
        command: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    CopyOut {
        remote: String,
        local: PathBuf,
    },
}

fn default_await_timeout() -> u64 {
    DEFAULT_AWAIT_TIMEOUT_SECS
}

/// A validated manifest with host paths resolved against the manifest's directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub params: ContainerParams,
    pub pre_start: Vec<PreStartAction>,
    pub post_start: Vec<PostStartAction>,
}

impl ManifestV1 {
    /// Validate every section and resolve relative host paths against `base_dir`.
    pub fn resolve(&self, base_dir: &Path) -> Result<ResolvedManifest, ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }

        let section = &self.container;
        let mut builder = ContainerParams::builder(ImageRef::parse(&section.image)?)
            .command(section.command_type, section.command.iter().cloned())
            .disable_auto_remove(section.disable_auto_remove)
            .stop_timeout_secs(
                section
                    .stop_timeout_secs
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
            );
        if let Some(name) = section.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                builder = builder.name(ContainerName::new(name));
            }
        }
        for port in &section.ports {
            builder = match port.host {
                Some(host) => builder.publish(port.container, port.protocol, host),
                None => builder.expose(port.container, port.protocol),
            };
        }
        for (key, value) in &section.env {
            builder = builder.env(key, value);
        }
        for (key, value) in &section.labels {
            builder = builder.label(key, value);
        }
        for mount in &section.mounts {
            let mode = if mount.read_only {
                AccessMode::ReadOnly
            } else {
                AccessMode::ReadWrite
            };
            builder = builder.bind(
                resolve_path(base_dir, &mount.host),
                mount.container.clone(),
                mode,
            );
        }
        for path in &section.tmpfs {
            builder = builder.tmpfs(path.clone());
        }
        let params = builder.build();
        params.validate()?;

        let pre_start = self
            .pre_start
            .iter()
            .map(|action| match action {
                PreStartAction::Copy { local, remote } => {
                    require_absolute("pre_start copy", remote)?;
                    Ok(PreStartAction::Copy {
                        local: resolve_path(base_dir, local),
                        remote: remote.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        let post_start = self
            .post_start
            .iter()
            .map(|action| match action {
                PostStartAction::AwaitLog {
                    pattern,
                    timeout_secs,
                    ..
                } => {
                    if pattern.is_empty() {
                        return Err(ManifestError::EmptyPattern);
                    }
                    if *timeout_secs > MAX_AWAIT_TIMEOUT_SECS {
                        return Err(ManifestError::AwaitTimeoutTooLong {
                            secs: *timeout_secs,
                            max: MAX_AWAIT_TIMEOUT_SECS,
                        });
                    }
                    Ok(action.clone())
                }
                PostStartAction::Exec { command, .. } => {
                    if command.is_empty() {
                        return Err(ManifestError::EmptyCommand {
                            section: "post_start exec",
                        });
                    }
                    Ok(action.clone())
                }
                PostStartAction::CopyOut { remote, local } => {
                    require_absolute("post_start copy-out", remote)?;
                    Ok(PostStartAction::CopyOut {
                        remote: remote.clone(),
                        local: resolve_path(base_dir, local),
                    })
                }
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        Ok(ResolvedManifest {
            params,
            pre_start,
            post_start,
        })
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn require_absolute(section: &'static str, path: &str) -> Result<(), ManifestError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ManifestError::RelativeRemotePath {
            section,
            path: path.to_owned(),
        })
    }
}

pub fn parse_manifest_str(input: &str) -> Result<ManifestV1, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ManifestV1, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Parse a manifest file and resolve it relative to the directory containing it.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<ResolvedManifest, ManifestError> {
    let path = path.as_ref();
    let manifest = parse_manifest_file(path)?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    manifest.resolve(base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
manifest_version = 1

[container]
image = "redis:7"
name = "cache"
command = ["redis-server", "--appendonly", "no"]
command_type = "blocking"
disable_auto_remove = true
stop_timeout_secs = 3
tmpfs = ["/data"]

[container.env]
REDIS_ARGS = "--save ''"

[container.labels]
suite = "integration"

[[container.ports]]
container = 6379
host = 0

[[container.ports]]
container = 6380
protocol = "udp"

[[container.mounts]]
host = "fixtures"
container = "/fixtures"
read_only = true

[[pre_start]]
action = "copy"
local = "redis.conf"
remote = "/usr/local/etc/redis/redis.conf"

[[post_start]]
action = "await-log"
pattern = "Ready to accept connections"
timeout_secs = 30

[[post_start]]
action = "exec"
command = ["redis-cli", "ping"]

[[post_start]]
action = "copy-out"
remote = "/data/dump.rdb"
local = "out/dump.rdb"
"#;

    #[test]
    fn parses_full_manifest() {
        let manifest = parse_manifest_str(FULL).expect("should parse");
        assert_eq!(manifest.manifest_version, 1);
        assert_eq!(manifest.container.image, "redis:7");
        assert_eq!(manifest.container.ports.len(), 2);
        assert_eq!(manifest.container.ports[1].protocol, Protocol::Udp);
        assert_eq!(manifest.pre_start.len(), 1);
        assert_eq!(manifest.post_start.len(), 3);
        assert!(matches!(
            manifest.post_start[0],
            PostStartAction::AwaitLog {
                stream: LogStream::Stdout,
                timeout_secs: 30,
                ..
            }
        ));
    }

    #[test]
    fn resolve_builds_params_and_resolves_paths() {
        let manifest = parse_manifest_str(FULL).unwrap();
        let resolved = manifest.resolve(Path::new("/work/project")).unwrap();

        let params = &resolved.params;
        assert_eq!(params.image.to_string(), "redis:7");
        assert_eq!(params.name.as_ref().unwrap(), "cache");
        assert!(!params.auto_remove());
        assert_eq!(params.stop_timeout_secs, 3);
        assert_eq!(params.ports[0].host_port, Some(0));
        assert_eq!(params.ports[1].host_port, None);
        assert_eq!(
            params.bind_mounts[0].host_dir,
            PathBuf::from("/work/project/fixtures")
        );
        assert_eq!(params.bind_mounts[0].mode, AccessMode::ReadOnly);

        assert_eq!(
            resolved.pre_start[0],
            PreStartAction::Copy {
                local: PathBuf::from("/work/project/redis.conf"),
                remote: "/usr/local/etc/redis/redis.conf".to_owned(),
            }
        );
        assert!(matches!(
            &resolved.post_start[2],
            PostStartAction::CopyOut { local, .. } if local == Path::new("/work/project/out/dump.rdb")
        ));
    }

    #[test]
    fn parses_minimal_manifest() {
        let input = r#"
manifest_version = 1

[container]
image = "busybox"
"#;
        let manifest = parse_manifest_str(input).expect("should parse");
        let resolved = manifest.resolve(Path::new(".")).unwrap();
        assert_eq!(resolved.params.command_type, CommandType::Blocking);
        assert!(resolved.params.auto_remove());
        assert_eq!(resolved.params.stop_timeout_secs, DEFAULT_STOP_TIMEOUT_SECS);
        assert!(resolved.pre_start.is_empty());
        assert!(resolved.post_start.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
manifest_version = 1

[container]
image = "busybox"
unknown_field = true
"#;
        assert!(parse_manifest_str(input).is_err());
    }

    #[test]
    fn rejects_missing_container() {
        let input = r"
manifest_version = 1
";
        assert!(parse_manifest_str(input).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let input = r#"
manifest_version = 2

[container]
image = "busybox"
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.resolve(Path::new(".")),
            Err(ManifestError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_invalid_image() {
        let input = r#"
manifest_version = 1

[container]
image = "Not A Valid Image"
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.resolve(Path::new(".")),
            Err(ManifestError::Image(_))
        ));
    }

    #[test]
    fn rejects_invalid_actions() {
        let input = r#"
manifest_version = 1

[container]
image = "busybox"

[[post_start]]
action = "exec"
command = []
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.resolve(Path::new(".")),
            Err(ManifestError::EmptyCommand { .. })
        ));

        let input = r#"
manifest_version = 1

[container]
image = "busybox"

[[pre_start]]
action = "copy"
local = "a.txt"
remote = "relative/a.txt"
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.resolve(Path::new(".")),
            Err(ManifestError::RelativeRemotePath { .. })
        ));
    }

    #[test]
    fn rejects_await_timeouts_beyond_a_day() {
        let input = r#"
manifest_version = 1

[container]
image = "redis:7"

[[post_start]]
action = "await-log"
pattern = "Ready"
timeout_secs = 9223372036854775807
"#;
        let manifest = parse_manifest_str(input).unwrap();
        assert!(matches!(
            manifest.resolve(Path::new(".")),
            Err(ManifestError::AwaitTimeoutTooLong {
                secs: 9_223_372_036_854_775_807,
                max: MAX_AWAIT_TIMEOUT_SECS,
            })
        ));

        let at_limit = input.replace("9223372036854775807", "86400");
        let manifest = parse_manifest_str(&at_limit).unwrap();
        assert!(manifest.resolve(Path::new(".")).is_ok());
    }

    #[test]
    fn load_manifest_resolves_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.toml");
        std::fs::write(
            &path,
            r#"
manifest_version = 1

[container]
image = "busybox"

[[pre_start]]
action = "copy"
local = "seed.sql"
remote = "/seed.sql"
"#,
        )
        .unwrap();

        let resolved = load_manifest(&path).unwrap();
        assert_eq!(
            resolved.pre_start[0],
            PreStartAction::Copy {
                local: dir.path().join("seed.sql"),
                remote: "/seed.sql".to_owned(),
            }
        );
    }
}
