//! Registry clients for package manager releases
//!
//! Lists versions and tags from npm-style registries, git remotes and
//! generic URL+JSON documents.

mod api;
mod client;
mod transport;

pub use api::{json_path, Packument, NPM_ABBREVIATED_ACCEPT};
pub use client::{is_under, RegistryClient, RegistryError, RegistrySpec, UrlFields, DEFAULT_NPM_REGISTRY};
pub use transport::{parse_ls_remote, Auth, FetchRequest, HttpTransport, Transport};
