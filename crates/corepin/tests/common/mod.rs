//! Shared fixtures for integration tests
#![allow(dead_code)]

use corepin::{FetchRequest, RegistryError, Transport};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub const YARN_PACKUMENT: &str = "https://registry.npmjs.org/yarn";
pub const YARN_TAGS: &str = "https://repo.yarnpkg.com/tags";
pub const PNPM_PACKUMENT: &str = "https://registry.npmjs.org/pnpm";
pub const NPM_KEYS: &str = "https://registry.npmjs.org/-/npm/v1/keys";
pub const TEST_KEYID: &str = "SHA256:corepin-test";

/// Classic yarn tarball URL
pub fn yarn_tarball_url(version: &str) -> String {
    format!("https://registry.yarnpkg.com/yarn/-/yarn-{}.tgz", version)
}

/// Scripted transport serving canned bodies and counting requests
#[derive(Default)]
pub struct MockTransport {
    bodies: HashMap<String, Vec<u8>>,
    tags: HashMap<String, Vec<String>>,
    hits: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.bodies.insert(url.into(), body);
        self
    }

    pub fn with_json(self, url: impl Into<String>, value: serde_json::Value) -> Self {
        self.with_body(url, serde_json::to_vec(&value).unwrap())
    }

    pub fn with_tags(mut self, repository: impl Into<String>, refs: &[&str]) -> Self {
        self.tags
            .insert(repository.into(), refs.iter().map(|r| r.to_string()).collect());
        self
    }

    /// Slow every fetch down so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().values().sum()
    }

    fn record(&self, key: &str) {
        *self.hits.lock().entry(key.to_string()).or_default() += 1;
    }
}

impl Transport for MockTransport {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError> {
        self.record(&request.url);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.bodies
            .get(&request.url)
            .cloned()
            .ok_or_else(|| RegistryError::HttpStatus {
                status: 404,
                url: request.url.clone(),
            })
    }

    fn list_remote_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        self.record(repository);
        self.tags
            .get(repository)
            .cloned()
            .ok_or_else(|| RegistryError::Git(format!("unknown repository {}", repository)))
    }
}

/// Forwards to a shared transport so a test can keep inspecting it
pub struct Shared<'a>(pub &'a MockTransport);

impl Transport for Shared<'_> {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError> {
        self.0.fetch(request)
    }

    fn list_remote_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        self.0.list_remote_tags(repository)
    }
}

/// Build a `.tgz` with every file under a `package/` root
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("package/{}", path), body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A fake package manager whose entry script, run by `sh`, writes its
/// version into the file named by its first argument
pub fn fake_package_manager(entry: &str, version: &str) -> Vec<u8> {
    let script = format!("printf '%s' '{}' > \"$1\"\n", version);
    let manifest = format!(r#"{{"name": "fake", "version": "{}"}}"#, version);
    tarball(&[("package.json", manifest.as_str()), (entry, script.as_str())])
}

/// Abbreviated npm document listing `versions`
pub fn packument(name: &str, versions: &[&str], latest: &str) -> serde_json::Value {
    let versions: serde_json::Map<String, serde_json::Value> = versions
        .iter()
        .map(|v| (v.to_string(), serde_json::json!({})))
        .collect();
    serde_json::json!({
        "name": name,
        "dist-tags": { "latest": latest },
        "versions": versions,
    })
}

/// `{"latest": {...}, "tags": [...]}` document served by the yarn tags URL
pub fn yarn_tags(latest: &[(&str, &str)], tags: &[&str]) -> serde_json::Value {
    let latest: serde_json::Map<String, serde_json::Value> = latest
        .iter()
        .map(|(tag, v)| (tag.to_string(), serde_json::json!(v)))
        .collect();
    serde_json::json!({ "latest": latest, "tags": tags })
}

/// Hex sha1 of `bytes`
pub fn sha1_hex(bytes: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    hex::encode(Sha1::digest(bytes))
}

/// Key the fixtures sign registry artifacts with
fn test_signer() -> p256::ecdsa::SigningKey {
    p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap()
}

/// `/-/npm/v1/keys` document trusting the fixture key under `keyid`
pub fn signing_keys(keyid: &str) -> serde_json::Value {
    use base64::Engine;
    use p256::pkcs8::EncodePublicKey;

    let der = test_signer().verifying_key().to_public_key_der().unwrap();
    serde_json::json!({
        "keys": [{
            "expires": null,
            "keyid": keyid,
            "keytype": "ecdsa-sha2-nistp256",
            "scheme": "ecdsa-sha2-nistp256",
            "key": base64::engine::general_purpose::STANDARD.encode(der.as_bytes()),
        }]
    })
}

/// Abbreviated npm document whose `version` carries a signed dist for
/// `artifact`
pub fn signed_packument(name: &str, version: &str, artifact: &[u8]) -> serde_json::Value {
    use base64::Engine;
    use p256::ecdsa::signature::Signer;
    use sha2::{Digest, Sha512};

    let engine = base64::engine::general_purpose::STANDARD;
    let integrity = format!("sha512-{}", engine.encode(Sha512::digest(artifact)));
    let message = format!("{}@{}:{}", name, version, integrity);
    let sig: p256::ecdsa::Signature = test_signer().sign(message.as_bytes());

    serde_json::json!({
        "name": name,
        "dist-tags": { "latest": version },
        "versions": {
            version: {
                "dist": {
                    "integrity": integrity,
                    "signatures": [{
                        "keyid": TEST_KEYID,
                        "sig": engine.encode(sig.to_der().as_bytes()),
                    }],
                },
            },
        },
    })
}
