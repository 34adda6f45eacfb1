//! Value types and manifest parsing for berth.
//!
//! This crate defines the data layer shared by the engine and the runtime:
//! engine identifiers (`ContainerId`), image references (`ImageRef`), port
//! bindings and the engine's port-listing format (`parse_port_list`),
//! container parameters (`ContainerParams`), and the `berth.toml` manifest
//! (`ManifestV1`) that resolves into them.

pub mod image;
pub mod manifest;
pub mod params;
pub mod ports;
pub mod types;

pub use image::{ImageRef, ImageVersion, ReferenceError, DEFAULT_REPOSITORY};
pub use manifest::{
    load_manifest, parse_manifest_file, parse_manifest_str, ContainerSection, ManifestError,
    ManifestV1, MountEntry, PortEntry, PostStartAction, PreStartAction, ResolvedManifest,
};
pub use params::{
    AccessMode, BindMount, CommandType, ContainerParams, ContainerParamsBuilder, LogStream,
    ParamsError, PortSpec,
};
pub use ports::{parse_port_list, HostAddress, PortBinding, PortParseError, Protocol};
pub use types::{ContainerId, ContainerName};
