//! Integration tests for the registry client against a mock registry.

use bytes::Bytes;
use futures_util::{stream, TryStreamExt};
use onmetal_oci::{media_type, BlobStream, Descriptor, Digest, Reference};
use onmetal_registry::{Credential, CredentialStore, Registry, RegistryClient, RegistryConfig, RegistryError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANIFEST: &str = r#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{"mediaType":"application/vnd.onmetal.image.config.v1alpha1+json","digest":"sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a","size":2},"layers":[]}"#;

fn reference(server: &MockServer, suffix: &str) -> Reference {
    Reference::parse(&format!("{}/onmetal/image{suffix}", server.address())).unwrap()
}

fn client(credentials: CredentialStore) -> RegistryClient {
    RegistryClient::new(RegistryConfig {
        credentials,
        ..Default::default()
    })
    .unwrap()
}

fn manifest_descriptor() -> Descriptor {
    Descriptor::for_content(media_type::OCI_MANIFEST, MANIFEST.as_bytes())
}

async fn mount_manifest(server: &MockServer, target: &str) {
    let desc = manifest_descriptor();
    let url = format!("/v2/onmetal/image/manifests/{target}");

    Mock::given(method("HEAD"))
        .and(path(url.as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", desc.digest.to_string().as_str())
                .insert_header("Content-Type", media_type::OCI_MANIFEST)
                .insert_header("Content-Length", desc.size.to_string().as_str()),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(url.as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", media_type::OCI_MANIFEST)
                .set_body_string(MANIFEST),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_resolve_and_fetch_manifest() {
    let server = MockServer::start().await;
    let desc = manifest_descriptor();
    mount_manifest(&server, "v1").await;
    mount_manifest(&server, &desc.digest.to_string()).await;

    let client = client(CredentialStore::anonymous());
    let resolved = client.resolve(&reference(&server, ":v1")).await.unwrap();
    assert_eq!(resolved.digest, desc.digest);
    assert_eq!(resolved.size, desc.size);
    assert_eq!(resolved.media_type, media_type::OCI_MANIFEST);

    let body = client
        .fetch_manifest(&reference(&server, ":v1"), &resolved)
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(MANIFEST.as_bytes()));
}

#[tokio::test]
async fn test_fetch_manifest_rejects_wrong_digest() {
    let server = MockServer::start().await;
    let claimed = Descriptor::for_content(media_type::OCI_MANIFEST, b"{\"schemaVersion\":2}");

    Mock::given(method("GET"))
        .and(path(format!("/v2/onmetal/image/manifests/{}", claimed.digest).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
        .mount(&server)
        .await;

    let err = client(CredentialStore::anonymous())
        .fetch_manifest(&reference(&server, ""), &claimed)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DigestMismatch { .. }));
}

#[tokio::test]
async fn test_bearer_token_flow_with_basic_credentials() {
    let server = MockServer::start().await;
    let realm = format!("{}/token", server.uri());

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", "repository:onmetal/image:pull"))
        .and(query_param("service", "mock-registry"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "t0k"})))
        .expect(1)
        .mount(&server)
        .await;

    let layer = Bytes::from_static(b"vmlinuz");
    let digest = Digest::sha256(&layer);
    let blob_path = format!("/v2/onmetal/image/blobs/{digest}");

    Mock::given(method("GET"))
        .and(path(blob_path.as_str()))
        .and(header("Authorization", "Bearer t0k"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(layer.to_vec()))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(blob_path.as_str()))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(r#"Bearer realm="{realm}",service="mock-registry",scope="repository:onmetal/image:pull""#).as_str(),
        ))
        .mount(&server)
        .await;

    let mut credentials = CredentialStore::anonymous();
    credentials.insert(
        &server.address().to_string(),
        Credential::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        },
    );
    let client = client(credentials);
    let reference = reference(&server, ":v1");
    let desc = Descriptor::new(media_type::KERNEL_LAYER, digest, layer.len() as u64);

    for _ in 0..2 {
        let chunks: Vec<Bytes> = client
            .fetch_blob(&reference, &desc)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), layer.to_vec());
    }
}

#[tokio::test]
async fn test_unanswerable_challenge_is_auth_required() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="mock""#))
        .mount(&server)
        .await;

    let err = client(CredentialStore::anonymous())
        .resolve(&reference(&server, ":v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AuthRequired(_)));
}

#[tokio::test]
async fn test_blob_exists() {
    let server = MockServer::start().await;
    let present = Digest::sha256(b"present");

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/onmetal/image/blobs/{present}").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(CredentialStore::anonymous());
    let reference = reference(&server, "");
    assert!(client.blob_exists(&reference, &present).await.unwrap());
    assert!(!client
        .blob_exists(&reference, &Digest::sha256(b"absent"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_push_blob_monolithic_upload() {
    let server = MockServer::start().await;
    let data = Bytes::from_static(b"rootfs contents");
    let desc = Descriptor::new(media_type::ROOTFS_LAYER, Digest::sha256(&data), data.len() as u64);

    Mock::given(method("POST"))
        .and(path("/v2/onmetal/image/blobs/uploads/"))
        .respond_with(
            ResponseTemplate::new(202).insert_header("Location", "/v2/onmetal/image/blobs/uploads/session-1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v2/onmetal/image/blobs/uploads/session-1"))
        .and(query_param("digest", desc.digest.to_string().as_str()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"rootfs ")),
        Ok(Bytes::from_static(b"contents")),
    ];
    let content: BlobStream = Box::pin(stream::iter(chunks));
    client(CredentialStore::anonymous())
        .push_blob(&reference(&server, ""), &desc, content)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    assert_eq!(put.body, data.to_vec());
}

#[tokio::test]
async fn test_push_manifest_sets_media_type() {
    let server = MockServer::start().await;
    let desc = manifest_descriptor();

    Mock::given(method("PUT"))
        .and(path("/v2/onmetal/image/manifests/v1"))
        .and(header("Content-Type", media_type::OCI_MANIFEST))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(CredentialStore::anonymous())
        .push_manifest(
            &reference(&server, ":v1"),
            "v1",
            &desc,
            Bytes::from_static(MANIFEST.as_bytes()),
        )
        .await
        .unwrap();
}
