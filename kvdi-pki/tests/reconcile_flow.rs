use async_trait::async_trait;
use kvdi_pki::codec::{self, BundleMap, CA_CERT_KEY, TLS_KEY_KEY};
use kvdi_pki::outcome::{APP_CERT_REQUEUE_AFTER, CA_REQUEUE_AFTER};
use kvdi_pki::{
    CertMetadata, MemoryStore, ObjectKey, PkiConfig, PkiError, PkiManager, Reconciled, Secret,
    SecretStore, Session, StoreOp, VdiCluster, sha256_fingerprint, verify_client_cert,
    verify_server_cert,
};
use std::net::IpAddr;
use std::sync::Arc;

fn test_config() -> PkiConfig {
    PkiConfig::default()
        .with_key_size(2048)
        .with_cluster_suffix("cluster.local")
}

fn manager(cluster: VdiCluster) -> (Arc<MemoryStore>, PkiManager<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pki = PkiManager::new(store.clone(), cluster, test_config());
    (store, pki)
}

fn ca_key(cluster: &VdiCluster) -> ObjectKey {
    ObjectKey::new(cluster.ca_name(), cluster.core_namespace())
}

fn server_key(cluster: &VdiCluster) -> ObjectKey {
    ObjectKey::new(cluster.app_server_tls_secret_name(), cluster.core_namespace())
}

fn client_key(cluster: &VdiCluster) -> ObjectKey {
    ObjectKey::new(cluster.app_client_tls_secret_name(), cluster.core_namespace())
}

async fn load_bundle(store: &MemoryStore, key: &ObjectKey) -> codec::DecodedBundle {
    let secret = store
        .get(key)
        .await
        .expect("store read failed")
        .expect("secret is missing");
    codec::decode_bundle(&secret.data).expect("bundle does not decode")
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());

    // 1. Empty store: CA, server and client are created in that order
    let outcome = pki.reconcile().await.expect("first pass failed");
    assert_eq!(outcome, Reconciled::Ready(()));
    assert_eq!(
        store.journal(),
        vec![
            StoreOp::Update(ca_key(&cluster)),
            StoreOp::Create(server_key(&cluster)),
            StoreOp::Create(client_key(&cluster)),
        ]
    );

    // 2. Second pass is a pure read
    store.clear_journal();
    let outcome = pki.reconcile().await.expect("second pass failed");
    assert!(outcome.is_ready());
    assert!(store.journal().is_empty(), "second pass wrote {:?}", store.journal());

    // 3. Only the deleted client is recreated, under the same CA
    let ca_before = load_bundle(&store, &ca_key(&cluster)).await.cert_der;
    store.remove_raw(&client_key(&cluster));
    let outcome = pki.reconcile().await.expect("third pass failed");
    assert!(outcome.is_ready());
    assert_eq!(store.journal(), vec![StoreOp::Create(client_key(&cluster))]);

    let client = load_bundle(&store, &client_key(&cluster)).await;
    assert_eq!(client.ca_der, ca_before);
    verify_client_cert(&client.cert_der, &ca_before, "demo-app").expect("client does not verify");
}

#[tokio::test]
async fn test_chain_validity() {
    let cluster = VdiCluster::new("demo").with_app_namespace("kvdi");
    let (store, pki) = manager(cluster.clone());
    pki.reconcile().await.expect("reconcile failed");

    let ca = load_bundle(&store, &ca_key(&cluster)).await;
    assert_eq!(ca.ca_der, ca.cert_der);
    let ca_meta = CertMetadata::from_der(&ca.ca_der).unwrap();
    assert!(ca_meta.is_ca);
    assert_eq!(ca_meta.serial_number, "1");
    assert_eq!(
        ca_meta.common_name.as_deref(),
        Some("demo-mtls-root-ca.kvdi.svc")
    );
    assert_eq!(ca_meta.fingerprint_sha256, sha256_fingerprint(&ca.ca_der));
    assert_eq!(ca_meta.fingerprint_sha256.len(), 64);

    let server = load_bundle(&store, &server_key(&cluster)).await;
    assert_eq!(server.ca_der, ca.ca_der);
    for name in ["demo-app", "demo-app.kvdi.svc", "demo-app.kvdi.svc.cluster.local"] {
        verify_server_cert(&server.cert_der, &ca.ca_der, name)
            .unwrap_or_else(|e| panic!("server cert rejected for {name}: {e}"));
    }
    let server_meta = CertMetadata::from_der(&server.cert_der).unwrap();
    assert!(server_meta.server_auth && server_meta.client_auth);
    assert_eq!(server_meta.ip_addresses, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);

    let client = load_bundle(&store, &client_key(&cluster)).await;
    verify_client_cert(&client.cert_der, &ca.ca_der, "demo-app").expect("client rejected");
    let client_meta = CertMetadata::from_der(&client.cert_der).unwrap();
    assert!(client_meta.client_auth && !client_meta.server_auth);
    assert_ne!(client_meta.serial_number, server_meta.serial_number);
}

#[tokio::test]
async fn test_corrupted_ca_is_wiped_and_recreated() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    pki.reconcile().await.expect("reconcile failed");

    // Drop the CA private key behind the manager's back
    let mut secret = store.get(&ca_key(&cluster)).await.unwrap().unwrap();
    let old_ca = codec::decode_bundle(&secret.data).unwrap().ca_der;
    secret.data.remove(TLS_KEY_KEY);
    store.insert_raw(secret);
    store.clear_journal();

    let outcome = pki.reconcile().await.expect("reconcile failed");
    let Reconciled::Requeue(requeue) = &outcome else {
        panic!("expected a requeue, got {outcome:?}");
    };
    assert_eq!(requeue.after, CA_REQUEUE_AFTER);
    assert!(requeue.reason.contains("tls.key"), "reason: {}", requeue.reason);
    assert!(!store.contains(&ca_key(&cluster)));
    // The CA step short-circuits the app certificates
    assert_eq!(store.journal(), vec![StoreOp::Update(ca_key(&cluster))]);

    let ca = pki
        .reconcile_ca()
        .await
        .expect("reconcile_ca failed")
        .ready()
        .expect("CA was not recreated");
    assert_ne!(ca.cert_der(), old_ca.as_slice());
}

#[tokio::test]
async fn test_garbled_ca_certificate_is_wiped() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    pki.reconcile_ca().await.unwrap();

    let mut secret = store.get(&ca_key(&cluster)).await.unwrap().unwrap();
    secret
        .data
        .insert(CA_CERT_KEY.to_string(), b"-----BEGIN CERTIFICATE-----\nAAAA\n".to_vec());
    store.insert_raw(secret);

    let outcome = pki.reconcile_ca().await.unwrap();
    assert_eq!(outcome.requeue_after(), Some(CA_REQUEUE_AFTER));
    assert!(!store.contains(&ca_key(&cluster)));
}

#[tokio::test]
async fn test_ca_with_unusable_key_is_wiped() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    let original = pki.reconcile_ca().await.unwrap().ready().unwrap();

    // Well-formed PKCS#1, but too short for the signer to load
    let weak = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let data = codec::encode_bundle(original.cert_der(), original.cert_der(), &weak).unwrap();
    assert!(codec::decode_bundle(&data).is_ok());
    store.insert_raw(Secret::new(ca_key(&cluster), data));
    store.clear_journal();

    let outcome = pki.reconcile_ca().await.expect("unusable key must not be a hard error");
    let Reconciled::Requeue(requeue) = &outcome else {
        panic!("expected a requeue, got a loaded CA");
    };
    assert_eq!(requeue.after, CA_REQUEUE_AFTER);
    assert!(requeue.reason.starts_with("Pre-existing CA was corrupted"));
    assert!(!store.contains(&ca_key(&cluster)));
    assert_eq!(store.journal(), vec![StoreOp::Update(ca_key(&cluster))]);

    assert!(pki.reconcile().await.unwrap().is_ready());
    let recreated = load_bundle(&store, &ca_key(&cluster)).await;
    assert_ne!(recreated.ca_der, original.cert_der());
}

#[tokio::test]
async fn test_unsupported_key_size_is_an_error() {
    let cluster = VdiCluster::new("demo");
    let store = Arc::new(MemoryStore::new());
    let pki = PkiManager::new(store.clone(), cluster, test_config().with_key_size(1024));

    let err = pki.reconcile().await.unwrap_err();
    assert!(matches!(err, PkiError::UnsupportedKeySize(1024)));
    assert!(store.is_empty());
}

/// A store whose backend cannot be reached.
struct UnreachableStore;

fn unreachable() -> PkiError {
    PkiError::Store("connection refused".to_string())
}

#[async_trait]
impl SecretStore for UnreachableStore {
    async fn get(&self, _key: &ObjectKey) -> kvdi_pki::Result<Option<Secret>> {
        Err(unreachable())
    }

    async fn create(&self, _secret: Secret) -> kvdi_pki::Result<()> {
        Err(unreachable())
    }

    async fn update(&self, _key: &ObjectKey, _data: BundleMap) -> kvdi_pki::Result<()> {
        Err(unreachable())
    }

    async fn delete(&self, _key: &ObjectKey) -> kvdi_pki::Result<()> {
        Err(unreachable())
    }
}

/// Serves reads from a memory store and rejects every write.
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl SecretStore for ReadOnlyStore {
    async fn get(&self, key: &ObjectKey) -> kvdi_pki::Result<Option<Secret>> {
        self.0.get(key).await
    }

    async fn create(&self, _secret: Secret) -> kvdi_pki::Result<()> {
        Err(PkiError::Store("read-only".to_string()))
    }

    async fn update(&self, _key: &ObjectKey, _data: BundleMap) -> kvdi_pki::Result<()> {
        Err(PkiError::Store("read-only".to_string()))
    }

    async fn delete(&self, _key: &ObjectKey) -> kvdi_pki::Result<()> {
        Err(PkiError::Store("read-only".to_string()))
    }
}

#[tokio::test]
async fn test_store_failures_are_errors_not_requeues() {
    let cluster = VdiCluster::new("demo");
    let session = Session::new("s1", "team-a", "alice");

    // Unreachable backend: every entry point fails on the first read
    let pki = PkiManager::new(Arc::new(UnreachableStore), cluster.clone(), test_config());
    assert!(matches!(pki.reconcile_ca().await, Err(PkiError::Store(_))));
    assert!(matches!(pki.reconcile().await, Err(PkiError::Store(_))));
    assert!(matches!(
        pki.reconcile_session(&session, "10.0.0.5").await,
        Err(PkiError::Store(_))
    ));

    // Writes fail: generating, wiping and deleting all surface the error
    let readonly = |store: MemoryStore| {
        PkiManager::new(Arc::new(ReadOnlyStore(store)), cluster.clone(), test_config())
    };
    let pki = readonly(MemoryStore::new());
    assert!(matches!(pki.reconcile_ca().await, Err(PkiError::Store(_))));

    let (seeded, writable) = manager(cluster.clone());
    writable.reconcile().await.unwrap();

    let mut corrupted = seeded.get(&ca_key(&cluster)).await.unwrap().unwrap();
    corrupted.data.remove(TLS_KEY_KEY);
    let store = MemoryStore::new();
    store.insert_raw(corrupted);
    assert!(matches!(readonly(store).reconcile().await, Err(PkiError::Store(_))));

    let store = MemoryStore::new();
    store.insert_raw(seeded.get(&ca_key(&cluster)).await.unwrap().unwrap());
    let mut stale = seeded.get(&server_key(&cluster)).await.unwrap().unwrap();
    stale.data.clear();
    store.insert_raw(stale);
    let pki = readonly(store);
    assert!(matches!(pki.reconcile().await, Err(PkiError::Store(_))));
    assert!(matches!(
        pki.reconcile_session(&session, "10.0.0.5").await,
        Err(PkiError::Store(_))
    ));
}

#[tokio::test]
async fn test_ca_mismatch_recreates_app_certificates() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    pki.reconcile().await.expect("reconcile failed");

    // A new CA replaces the old one; both app bundles are now stale
    store.remove_raw(&ca_key(&cluster));
    let new_ca = pki.reconcile_ca().await.unwrap().ready().unwrap();
    store.clear_journal();

    let outcome = pki.reconcile().await.unwrap();
    let Reconciled::Requeue(requeue) = &outcome else {
        panic!("expected a requeue, got {outcome:?}");
    };
    assert_eq!(requeue.after, APP_CERT_REQUEUE_AFTER);
    assert!(requeue.reason.starts_with("Need to recreate app certificate:"));
    assert!(requeue.reason.contains("does not match"));
    assert_eq!(store.journal(), vec![StoreOp::Delete(server_key(&cluster))]);

    // Server is recreated, then the client is found stale in turn
    let outcome = pki.reconcile().await.unwrap();
    assert_eq!(outcome.requeue_after(), Some(APP_CERT_REQUEUE_AFTER));
    let outcome = pki.reconcile().await.unwrap();
    assert!(outcome.is_ready());

    for key in [server_key(&cluster), client_key(&cluster)] {
        let bundle = load_bundle(&store, &key).await;
        assert_eq!(bundle.ca_der, new_ca.cert_der());
    }
}

#[tokio::test]
async fn test_empty_app_bundle_is_deleted() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    pki.reconcile().await.unwrap();

    let mut secret = store.get(&client_key(&cluster)).await.unwrap().unwrap();
    secret.data.clear();
    store.insert_raw(secret);

    let outcome = pki.reconcile().await.unwrap();
    let Reconciled::Requeue(requeue) = &outcome else {
        panic!("expected a requeue, got {outcome:?}");
    };
    assert_eq!(
        requeue.reason,
        "Need to recreate app certificate: secret data is empty"
    );
    assert!(!store.contains(&client_key(&cluster)));
}

#[tokio::test]
async fn test_external_server_tls_is_skipped() {
    let cluster = VdiCluster::new("demo").with_external_server_tls("my-tls");
    let (store, pki) = manager(cluster.clone());

    assert!(pki.reconcile().await.unwrap().is_ready());
    assert_eq!(
        store.journal(),
        vec![
            StoreOp::Update(ca_key(&cluster)),
            StoreOp::Create(client_key(&cluster)),
        ]
    );
    assert!(!store.contains(&ObjectKey::new("my-tls", "default")));
}

#[tokio::test]
async fn test_session_certificate() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    let session = Session::new("s1", "team-a", "alice");

    let outcome = pki.reconcile_session(&session, "10.0.0.5").await.unwrap();
    assert!(outcome.is_ready());
    // CA is created on first use
    assert!(store.contains(&ca_key(&cluster)));

    let key = ObjectKey::new("s1", "team-a");
    let secret = store.get(&key).await.unwrap().unwrap();
    assert_eq!(secret.meta.labels["desktopUser"], "alice");
    assert_eq!(secret.meta.labels["vdiCluster"], "demo");
    assert_eq!(secret.meta.labels["vdiComponent"], "desktop");
    assert_eq!(secret.meta.labels["desktopName"], "s1");
    assert!(secret.meta.is_owned_by(&session.metadata.uid));

    let bundle = codec::decode_bundle(&secret.data).unwrap();
    let meta = CertMetadata::from_der(&bundle.cert_der).unwrap();
    let ip: IpAddr = "10.0.0.5".parse().unwrap();
    assert_eq!(meta.common_name.as_deref(), Some("10.0.0.5"));
    assert_eq!(meta.ip_addresses, vec![ip]);
    assert!(meta.dns_names.contains(&"10.0.0.5".to_string()));
    assert!(meta.dns_names.contains(&"s1.s1.team-a.svc.cluster.local".to_string()));
    assert!(meta.not_after - meta.not_before >= time::Duration::days(365));
    verify_server_cert(&bundle.cert_der, &bundle.ca_der, "10.0.0.5").expect("IP rejected");

    // Existing session bundles are left alone
    store.clear_journal();
    let outcome = pki.reconcile_session(&session, "10.0.0.9").await.unwrap();
    assert!(outcome.is_ready());
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn test_cascade_deletion() {
    let cluster = VdiCluster::new("demo");
    let (store, pki) = manager(cluster.clone());
    let session = Session::new("s1", "default", "alice");

    pki.reconcile().await.unwrap();
    pki.reconcile_session(&session, "10.0.0.5").await.unwrap();
    assert_eq!(store.len(), 4);

    assert_eq!(store.delete_owned_by(&session.metadata.uid), 1);
    assert_eq!(store.delete_owned_by(&cluster.metadata.uid), 2);
    // The CA is not owned by the cluster resource
    assert_eq!(store.len(), 1);
    assert!(store.contains(&ca_key(&cluster)));
}
