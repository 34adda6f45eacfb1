//! Container image references: `[registry/][repository/]name[:tag]` or
//! `[registry/][repository/]name@algorithm:hex`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Repository substituted when a registry is given without one.
pub const DEFAULT_REPOSITORY: &str = "library";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("image reference must not be empty")]
    Empty,
    #[error("image reference '{0}' has an empty path component")]
    EmptyComponent(String),
    #[error("invalid image name '{0}': expected [a-z0-9._-]")]
    InvalidName(String),
    #[error("invalid repository '{0}': expected [a-z0-9._-/]")]
    InvalidRepository(String),
    #[error("invalid tag '{0}': expected 1-128 of [A-Za-z0-9_.-]")]
    InvalidTag(String),
    #[error("invalid digest '{0}': expected <algorithm>:<hex>")]
    InvalidDigest(String),
}

/// What follows the name: a mutable tag or an immutable content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageVersion {
    Tag(String),
    Digest { algorithm: String, hex: String },
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageVersion::Tag(tag) => write!(f, ":{tag}"),
            ImageVersion::Digest { algorithm, hex } => write!(f, "@{algorithm}:{hex}"),
        }
    }
}

/// A parsed image reference.
///
/// Only constructible through [`ImageRef::parse`] (or `FromStr`/serde), which
/// keeps `parse(x.to_string()) == x` for every value that exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: Option<String>,
    repository: Option<String>,
    name: String,
    version: Option<ImageVersion>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (path, version) = split_version(input)?;

        let parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ReferenceError::EmptyComponent(input.to_owned()));
        }

        let (registry, rest) = if parts.len() > 1 && looks_like_registry(parts[0]) {
            (Some(parts[0].to_owned()), &parts[1..])
        } else {
            (None, &parts[..])
        };

        let Some((name, repo_parts)) = rest.split_last() else {
            return Err(ReferenceError::EmptyComponent(input.to_owned()));
        };

        if !is_valid_component(name) {
            return Err(ReferenceError::InvalidName((*name).to_owned()));
        }

        let repository = if repo_parts.is_empty() {
            registry.as_ref().map(|_| DEFAULT_REPOSITORY.to_owned())
        } else {
            let repo = repo_parts.join("/");
            if !repo_parts.iter().all(|p| is_valid_component(p)) {
                return Err(ReferenceError::InvalidRepository(repo));
            }
            Some(repo)
        };

        Ok(Self {
            registry,
            repository,
            name: (*name).to_owned(),
            version,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&ImageVersion> {
        self.version.as_ref()
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.version {
            Some(ImageVersion::Tag(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Replace the tag (or digest) with `tag`.
    pub fn with_tag(mut self, tag: &str) -> Result<Self, ReferenceError> {
        if !is_valid_tag(tag) {
            return Err(ReferenceError::InvalidTag(tag.to_owned()));
        }
        self.version = Some(ImageVersion::Tag(tag.to_owned()));
        Ok(self)
    }
}

fn split_version(input: &str) -> Result<(&str, Option<ImageVersion>), ReferenceError> {
    if let Some((path, digest)) = input.split_once('@') {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| ReferenceError::InvalidDigest(digest.to_owned()))?;
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"+._-".contains(&b));
        let hex_ok = !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit());
        if !algorithm_ok || !hex_ok {
            return Err(ReferenceError::InvalidDigest(digest.to_owned()));
        }
        return Ok((
            path,
            Some(ImageVersion::Digest {
                algorithm: algorithm.to_owned(),
                hex: hex.to_owned(),
            }),
        ));
    }

    // A colon after the last slash starts the tag; earlier ones belong to a registry port.
    let last_slash = input.rfind('/');
    match input.rfind(':') {
        Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
            let tag = &input[colon + 1..];
            if !is_valid_tag(tag) {
                return Err(ReferenceError::InvalidTag(tag.to_owned()));
            }
            Ok((&input[..colon], Some(ImageVersion::Tag(tag.to_owned()))))
        }
        _ => Ok((input, None)),
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b))
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_.-".contains(&b))
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        if let Some(repository) = &self.repository {
            write!(f, "{repository}/")?;
        }
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, "{version}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}
