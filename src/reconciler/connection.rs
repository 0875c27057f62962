//! Connection Resolver
//!
//! Turns a NamespaceStore parameter block plus its credentials into a
//! normalized [`ConnectionDescriptor`], and finds an already registered
//! connection with the same identity so it can be reused.

use crate::crd::{AwsS3Spec, S3CompatibleSpec, StoreBackend};
use crate::domain::ports::{
    AuthMethod, ConnectionDescriptor, EndpointType, ExternalConnectionInfo,
    NamespaceResourceInfo, SystemInfo,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use url::Url;

/// Endpoint used by S3-compatible stores that do not declare one
pub const DEFAULT_S3_ENDPOINT: &str = "https://127.0.0.1:6443";

/// Azure blob service endpoint
pub const AZURE_BLOB_ENDPOINT: &str = "https://blob.core.windows.net";

const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const ALTERNATE_ACCESS_KEY_NAMES: [&str; 2] = ["aws_access_key_id", "AccessKey"];
const ALTERNATE_SECRET_KEY_NAMES: [&str; 2] = ["aws_secret_access_key", "SecretKey"];

const IBM_COS_ACCESS_KEY_ID: &str = "IBM_COS_ACCESS_KEY_ID";
const IBM_COS_SECRET_ACCESS_KEY: &str = "IBM_COS_SECRET_ACCESS_KEY";

const AZURE_ACCOUNT_NAME: &str = "AccountName";
const AZURE_ACCOUNT_KEY: &str = "AccountKey";

// =============================================================================
// Credentials
// =============================================================================

/// Canonical identity/secret pair read from a secret
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub identity: String,
    pub secret: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl CredentialBundle {
    /// Read the pair from the given fields, empty when absent
    pub fn from_secret(data: &BTreeMap<String, String>, identity_key: &str, secret_key: &str) -> Self {
        Self {
            identity: data.get(identity_key).cloned().unwrap_or_default(),
            secret: data.get(secret_key).cloned().unwrap_or_default(),
        }
    }

    /// Both members must be printable text
    pub fn is_printable(&self) -> bool {
        is_graphic_or_space(&self.identity) && is_graphic_or_space(&self.secret)
    }
}

/// Copy alternate AWS key names onto the canonical ones when those are empty
pub fn normalize_aws_keys(data: &mut BTreeMap<String, String>) {
    fill_from_alternates(data, AWS_ACCESS_KEY_ID, &ALTERNATE_ACCESS_KEY_NAMES);
    fill_from_alternates(data, AWS_SECRET_ACCESS_KEY, &ALTERNATE_SECRET_KEY_NAMES);
}

fn fill_from_alternates(data: &mut BTreeMap<String, String>, canonical: &str, alternates: &[&str]) {
    if data.get(canonical).is_some_and(|v| !v.is_empty()) {
        return;
    }
    let found = alternates
        .iter()
        .filter_map(|key| data.get(*key))
        .find(|v| !v.is_empty())
        .cloned();
    if let Some(value) = found {
        data.insert(canonical.to_string(), value);
    }
}

/// True when every char is graphic or whitespace
pub fn is_graphic_or_space(s: &str) -> bool {
    s.chars().all(|c| c.is_whitespace() || !c.is_control())
}

// =============================================================================
// Descriptor Building
// =============================================================================

/// Build the desired connection for a store.
///
/// Returns `None` for local filesystem stores, which have no connection.
pub fn build_descriptor(
    name: &str,
    backend: &StoreBackend,
    secret_name: &str,
    secret_data: &BTreeMap<String, String>,
) -> Result<Option<ConnectionDescriptor>> {
    let mut data = secret_data.clone();
    normalize_aws_keys(&mut data);

    let (endpoint_type, endpoint, credentials, auth_method) = match backend {
        StoreBackend::AwsS3 { aws_s3 } => (
            EndpointType::Aws,
            aws_endpoint(aws_s3),
            CredentialBundle::from_secret(&data, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY),
            None,
        ),
        StoreBackend::S3Compatible { s3_compatible } => (
            EndpointType::S3Compatible,
            normalize_endpoint(s3_compatible.endpoint.as_deref())?,
            CredentialBundle::from_secret(&data, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY),
            auth_method(name, s3_compatible)?,
        ),
        StoreBackend::IbmCos { ibm_cos } => (
            EndpointType::IbmCos,
            normalize_endpoint(ibm_cos.endpoint.as_deref())?,
            CredentialBundle::from_secret(&data, IBM_COS_ACCESS_KEY_ID, IBM_COS_SECRET_ACCESS_KEY),
            auth_method(name, ibm_cos)?,
        ),
        StoreBackend::AzureBlob { .. } => (
            EndpointType::Azure,
            AZURE_BLOB_ENDPOINT.to_string(),
            CredentialBundle::from_secret(&data, AZURE_ACCOUNT_NAME, AZURE_ACCOUNT_KEY),
            None,
        ),
        StoreBackend::Nsfs { .. } => return Ok(None),
        StoreBackend::Unsupported => {
            return Err(Error::persistent(
                "InvalidType",
                format!("Invalid namespace store type for {name:?}"),
            ))
        }
    };

    if !credentials.is_printable() {
        return Err(Error::persistent(
            "InvalidSecret",
            format!(
                "Invalid secret containing non graphic characters (perhaps not base64 encoded?) {secret_name:?}"
            ),
        ));
    }

    Ok(Some(ConnectionDescriptor {
        name: name.to_string(),
        endpoint_type,
        endpoint,
        identity: credentials.identity,
        secret: credentials.secret,
        auth_method,
    }))
}

fn aws_endpoint(spec: &AwsS3Spec) -> String {
    let scheme = if spec.ssl_disabled { "http" } else { "https" };
    match spec.region.as_deref().filter(|r| !r.is_empty()) {
        Some(region) => format!("{scheme}://s3.{region}.amazonaws.com"),
        None => format!("{scheme}://s3.amazonaws.com"),
    }
}

fn auth_method(name: &str, spec: &S3CompatibleSpec) -> Result<Option<AuthMethod>> {
    match spec.signature_version.as_deref() {
        None | Some("") => Ok(None),
        Some("v4") => Ok(Some(AuthMethod::AwsV4)),
        Some("v2") => Ok(Some(AuthMethod::AwsV2)),
        Some(other) => Err(Error::persistent(
            "InvalidSignatureVersion",
            format!("Invalid s3 signature version {other:?} for namespace store {name:?}"),
        )),
    }
}

/// Normalize a user supplied endpoint. The scheme defaults to https.
///
/// The endpoint is validated as a URL but returned as written, apart from
/// the scheme which is lowercased. Host case and explicit default ports are
/// kept so the dedup triple matches connections registered with the same
/// spelling.
pub fn normalize_endpoint(raw: Option<&str>) -> Result<String> {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(DEFAULT_S3_ENDPOINT.to_string()),
    };

    let candidate = if has_scheme_prefix(raw) {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&candidate).map_err(|e| {
        Error::persistent("InvalidEndpoint", format!("Invalid endpoint url {raw:?}: {e}"))
    })?;
    if !url.has_host() {
        return Err(Error::persistent(
            "InvalidEndpoint",
            format!("Invalid endpoint url {raw:?}: missing host"),
        ));
    }

    let rendered = match candidate.split_once("://") {
        Some((scheme, rest)) => format!("{}://{rest}", scheme.to_ascii_lowercase()),
        None => candidate,
    };
    Ok(rendered)
}

/// Matches `^\w+://`
fn has_scheme_prefix(s: &str) -> bool {
    match s.find("://") {
        Some(0) | None => false,
        Some(idx) => s[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
    }
}

// =============================================================================
// Dedup
// =============================================================================

/// First registered connection with the same identity triple
pub fn find_matching_connection<'a>(
    system: &'a SystemInfo,
    desired: &ConnectionDescriptor,
) -> Option<&'a ExternalConnectionInfo> {
    system.connections().find(|c| desired.matches(c))
}

/// Whether an existing namespace resource was registered against a
/// different connection than the desired one
pub fn has_connection_drift(resource: &NamespaceResourceInfo, desired: &ConnectionDescriptor) -> bool {
    resource.endpoint_type != desired.endpoint_type.as_str()
        || resource.endpoint != desired.endpoint
        || resource.identity != desired.identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AzureBlobSpec, NsfsSpec};
    use crate::domain::ports::{AccountInfo, ExternalConnections};
    use assert_matches::assert_matches;

    fn aws_secret() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), "AKIAEXAMPLE".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "wJalrXUtnFEMI".to_string()),
        ])
    }

    fn s3_compatible(endpoint: Option<&str>, signature: Option<&str>) -> StoreBackend {
        StoreBackend::S3Compatible {
            s3_compatible: S3CompatibleSpec {
                endpoint: endpoint.map(String::from),
                signature_version: signature.map(String::from),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_aws_endpoint_variants() {
        let backend = StoreBackend::AwsS3 {
            aws_s3: AwsS3Spec::default(),
        };
        let conn = build_descriptor("ns", &backend, "creds", &aws_secret()).unwrap().unwrap();
        assert_eq!(conn.endpoint, "https://s3.amazonaws.com");
        assert_eq!(conn.endpoint_type, EndpointType::Aws);
        assert_eq!(conn.identity, "AKIAEXAMPLE");

        let backend = StoreBackend::AwsS3 {
            aws_s3: AwsS3Spec {
                region: Some("eu-west-1".into()),
                ssl_disabled: true,
                ..Default::default()
            },
        };
        let conn = build_descriptor("ns", &backend, "creds", &aws_secret()).unwrap().unwrap();
        assert_eq!(conn.endpoint, "http://s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint(None).unwrap(), DEFAULT_S3_ENDPOINT);
        assert_eq!(normalize_endpoint(Some("")).unwrap(), DEFAULT_S3_ENDPOINT);
        assert_eq!(
            normalize_endpoint(Some("minio.local:9000")).unwrap(),
            "https://minio.local:9000"
        );
        assert_eq!(
            normalize_endpoint(Some("http://minio.local:9000")).unwrap(),
            "http://minio.local:9000"
        );
        assert_eq!(
            normalize_endpoint(Some("https://s3.example.com/prefix")).unwrap(),
            "https://s3.example.com/prefix"
        );
    }

    #[test]
    fn test_normalize_endpoint_keeps_authority_spelling() {
        assert_eq!(
            normalize_endpoint(Some("https://MinIO.Local:443")).unwrap(),
            "https://MinIO.Local:443"
        );
        assert_eq!(
            normalize_endpoint(Some("HTTP://minio.local:80/")).unwrap(),
            "http://minio.local:80/"
        );
        assert_eq!(
            normalize_endpoint(Some("  minio.local:443 ")).unwrap(),
            "https://minio.local:443"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_persistent() {
        let err = build_descriptor(
            "ns",
            &s3_compatible(Some("not a valid host:::"), None),
            "creds",
            &aws_secret(),
        )
        .unwrap_err();
        assert!(err.is_persistent());
        assert_eq!(err.reason(), Some("InvalidEndpoint"));
    }

    #[test]
    fn test_signature_versions() {
        let conn = build_descriptor("ns", &s3_compatible(None, Some("v2")), "creds", &aws_secret())
            .unwrap()
            .unwrap();
        assert_eq!(conn.auth_method, Some(AuthMethod::AwsV2));

        let err = build_descriptor("ns", &s3_compatible(None, Some("v3")), "creds", &aws_secret())
            .unwrap_err();
        assert_eq!(err.reason(), Some("InvalidSignatureVersion"));
    }

    #[test]
    fn test_alternate_key_names() {
        let data = BTreeMap::from([
            ("AccessKey".to_string(), "alt-id".to_string()),
            ("aws_secret_access_key".to_string(), "alt-secret".to_string()),
        ]);
        let conn = build_descriptor("ns", &s3_compatible(None, None), "creds", &data)
            .unwrap()
            .unwrap();
        assert_eq!(conn.identity, "alt-id");
        assert_eq!(conn.secret, "alt-secret");
    }

    #[test]
    fn test_canonical_key_wins_over_alternate() {
        let mut data = aws_secret();
        data.insert("aws_access_key_id".into(), "other".into());
        normalize_aws_keys(&mut data);
        assert_eq!(data["AWS_ACCESS_KEY_ID"], "AKIAEXAMPLE");
    }

    #[test]
    fn test_non_graphic_secret_rejected() {
        let data = BTreeMap::from([
            ("AccountName".to_string(), "acct".to_string()),
            ("AccountKey".to_string(), "bad\u{0001}key".to_string()),
        ]);
        let backend = StoreBackend::AzureBlob {
            azure_blob: AzureBlobSpec::default(),
        };
        let err = build_descriptor("ns", &backend, "azure-creds", &data).unwrap_err();
        assert_eq!(err.reason(), Some("InvalidSecret"));
    }

    #[test]
    fn test_nsfs_and_unsupported() {
        let nsfs = StoreBackend::Nsfs {
            nsfs: NsfsSpec {
                fs_root_path: "/exports".into(),
                fs_backend: None,
            },
        };
        assert!(build_descriptor("ns", &nsfs, "", &BTreeMap::new()).unwrap().is_none());

        let err = build_descriptor("ns", &StoreBackend::Unsupported, "", &BTreeMap::new())
            .unwrap_err();
        assert_matches!(err, Error::Persistent { ref reason, .. } if reason == "InvalidType");
    }

    #[test]
    fn test_find_matching_connection_by_triple_not_name() {
        let desired = build_descriptor("ns-b", &s3_compatible(Some("minio:9000"), None), "c", &aws_secret())
            .unwrap()
            .unwrap();

        let connection = |name: &str, identity: &str| ExternalConnectionInfo {
            name: name.into(),
            endpoint_type: "S3_COMPATIBLE".into(),
            endpoint: "https://minio:9000".into(),
            identity: identity.into(),
            auth_method: None,
        };
        let system = SystemInfo {
            accounts: vec![AccountInfo {
                email: "admin@noobaa.io".into(),
                external_connections: ExternalConnections {
                    connections: vec![
                        connection("other-identity", "SOMEONE"),
                        connection("ns-a", "AKIAEXAMPLE"),
                        connection("ns-a-dup", "AKIAEXAMPLE"),
                    ],
                },
                ..Default::default()
            }],
            ..Default::default()
        };

        let found = find_matching_connection(&system, &desired).unwrap();
        assert_eq!(found.name, "ns-a");
    }

    #[test]
    fn test_connection_drift() {
        let desired = build_descriptor("ns", &s3_compatible(Some("minio:9000"), None), "c", &aws_secret())
            .unwrap()
            .unwrap();
        let mut resource = NamespaceResourceInfo {
            name: "ns".into(),
            endpoint_type: "S3_COMPATIBLE".into(),
            endpoint: "https://minio:9000".into(),
            identity: "AKIAEXAMPLE".into(),
            ..Default::default()
        };
        assert!(!has_connection_drift(&resource, &desired));

        resource.identity = String::new();
        assert!(has_connection_drift(&resource, &desired));
    }

    #[test]
    fn test_graphic_check() {
        assert!(is_graphic_or_space("abc DEF/+="));
        assert!(is_graphic_or_space("tab\tok"));
        assert!(!is_graphic_or_space("nul\0"));
    }
}
