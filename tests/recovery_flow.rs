//! end-to-end flows: device enrollment and envelopes, guardian threshold
//! recovery, and vault items under a recovered master key

use std::sync::Arc;

use futures::future::BoxFuture;
use keyquorum::{
    crypto, AlgorithmRegistry, CoreConfig, CryptoProvider, DeviceEnvelopeManager,
    EntropyAggregator, EntropySource, Error, Guardian, MasterKey, OsEntropySource, Role,
    ThresholdPolicy, ThresholdRecoveryManager,
};
use keyquorum::backend::{KEM_MLKEM768, KEM_X25519};
use keyquorum::entropy::{SourceReading, StaticEntropySource};

struct Core {
    provider: Arc<CryptoProvider>,
    devices: DeviceEnvelopeManager,
    recovery: ThresholdRecoveryManager,
}

fn build_core() -> Core {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let config = CoreConfig::default();
    config.validate().unwrap();

    let registry = Arc::new(AlgorithmRegistry::detect(&config.registry).unwrap());
    let mut aggregator = EntropyAggregator::new(config.entropy.clone());
    aggregator.add_source(Arc::new(OsEntropySource));
    aggregator.add_source(Arc::new(StaticEntropySource::new(
        "beacon",
        (0u8..32).collect(),
        0.9,
    )));
    let entropy = Arc::new(aggregator);

    let provider = Arc::new(CryptoProvider::new(registry, Arc::clone(&entropy)));
    let devices = DeviceEnvelopeManager::new(Arc::clone(&provider));
    let recovery = ThresholdRecoveryManager::new(Arc::clone(&provider), entropy);

    Core {
        provider,
        devices,
        recovery,
    }
}

async fn make_guardians(
    core: &Core,
    count: usize,
    implementation_id: &str,
) -> (Vec<Guardian>, Vec<keyquorum::KeyPair>) {
    let mut guardians = Vec::new();
    let mut key_pairs = Vec::new();
    for i in 0..count {
        let key_pair = core
            .provider
            .generate_key_pair(Role::Kem, Some(implementation_id))
            .await
            .unwrap();
        guardians.push(Guardian {
            guardian_id: format!("guardian-{i}"),
            kem_public_key: key_pair.public_key.clone(),
            implementation_id: implementation_id.to_string(),
        });
        key_pairs.push(key_pair);
    }
    (guardians, key_pairs)
}

#[tokio::test]
async fn full_lifecycle_enroll_split_recover_decrypt() {
    let core = build_core();
    let master_key = MasterKey::new(crypto::random_bytes::<32>());

    // a device enrolls and receives the wrapped master key
    let device_keys = core
        .provider
        .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
        .await
        .unwrap();
    let record = core
        .devices
        .register_device(&device_keys.public_key, KEM_MLKEM768)
        .unwrap();
    core.devices
        .issue_wrapped_master_key(&record.device_id, &master_key)
        .unwrap();

    let unwrapped = core
        .devices
        .unwrap(&record.device_id, device_keys.secret_key.as_bytes())
        .unwrap();
    assert_eq!(unwrapped.as_bytes(), master_key.as_bytes());

    // the device writes a vault item under the master key
    let envelope = keyquorum::encrypt_item("login:example.org", b"hunter2", &unwrapped).unwrap();

    // guardians are set up at n = 3, k = 2
    let (guardians, guardian_keys) = make_guardians(&core, 3, KEM_MLKEM768).await;
    let rows = core
        .recovery
        .split(
            "account-1",
            &master_key,
            ThresholdPolicy { n: 3, k: 2 },
            &guardians,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    // all devices are lost; guardians 1 and 3 recover the key
    let opened = vec![
        core.recovery
            .open_share(&rows[0], guardian_keys[0].secret_key.as_bytes())
            .unwrap(),
        core.recovery
            .open_share(&rows[2], guardian_keys[2].secret_key.as_bytes())
            .unwrap(),
    ];
    let recovered = core.recovery.reconstruct("account-1", &opened).unwrap();
    assert_eq!(recovered.as_bytes(), master_key.as_bytes());

    // the recovered key still opens the vault item
    let plaintext = keyquorum::decrypt_item(&envelope, &recovered).unwrap();
    assert_eq!(plaintext.as_bytes(), b"hunter2");
}

#[tokio::test]
async fn scenario_a_two_of_three_guardians() {
    let core = build_core();
    let master_key = MasterKey::new(crypto::random_bytes::<32>());
    let (guardians, guardian_keys) = make_guardians(&core, 3, KEM_X25519).await;

    let rows = core
        .recovery
        .split(
            "account-a",
            &master_key,
            ThresholdPolicy { n: 3, k: 2 },
            &guardians,
        )
        .await
        .unwrap();

    // shares #1 and #3 reconstruct
    let opened = vec![
        core.recovery
            .open_share(&rows[0], guardian_keys[0].secret_key.as_bytes())
            .unwrap(),
        core.recovery
            .open_share(&rows[2], guardian_keys[2].secret_key.as_bytes())
            .unwrap(),
    ];
    let recovered = core.recovery.reconstruct("account-a", &opened).unwrap();
    assert_eq!(recovered.as_bytes(), master_key.as_bytes());

    // share #1 alone reports the threshold shortfall
    let one = vec![core
        .recovery
        .open_share(&rows[0], guardian_keys[0].secret_key.as_bytes())
        .unwrap()];
    match core.recovery.reconstruct("account-a", &one) {
        Err(Error::ThresholdNotMet { valid, required }) => {
            assert_eq!(valid, 1);
            assert_eq!(required, 2);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// source that never answers
struct StalledSource;

impl EntropySource for StalledSource {
    fn id(&self) -> &str {
        "stalled"
    }

    fn fetch(&self, _len: usize) -> BoxFuture<'_, Result<SourceReading, Error>> {
        Box::pin(futures::future::pending())
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_b_collection_survives_source_timeout() {
    let config = CoreConfig::default();
    let mut aggregator = EntropyAggregator::new(config.entropy.clone());
    aggregator.add_source(Arc::new(StaticEntropySource::new(
        "beacon-1",
        (0u8..32).collect(),
        0.9,
    )));
    aggregator.add_source(Arc::new(StaticEntropySource::new(
        "beacon-2",
        (64u8..96).collect(),
        0.9,
    )));
    aggregator.add_source(Arc::new(StalledSource));

    let samples = aggregator
        .collect_with(2, std::time::Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.source_id != "stalled"));

    let seed = aggregator.seed(&samples).unwrap();
    let mut provenance = seed.provenance().to_vec();
    provenance.sort();
    assert_eq!(provenance, ["beacon-1", "beacon-2"]);
}

#[tokio::test]
async fn scenario_c_revocation_is_per_device() {
    let core = build_core();
    let master_key = MasterKey::new(crypto::random_bytes::<32>());

    let keys_a = core
        .provider
        .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
        .await
        .unwrap();
    let keys_b = core
        .provider
        .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
        .await
        .unwrap();

    let record_a = core
        .devices
        .register_device(&keys_a.public_key, KEM_MLKEM768)
        .unwrap();
    let record_b = core
        .devices
        .register_device(&keys_b.public_key, KEM_MLKEM768)
        .unwrap();

    core.devices
        .issue_wrapped_master_key(&record_a.device_id, &master_key)
        .unwrap();
    core.devices
        .issue_wrapped_master_key(&record_b.device_id, &master_key)
        .unwrap();

    core.devices.revoke_device(&record_a.device_id).unwrap();

    let err = core
        .devices
        .unwrap(&record_a.device_id, keys_a.secret_key.as_bytes())
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound { .. }));

    let recovered = core
        .devices
        .unwrap(&record_b.device_id, keys_b.secret_key.as_bytes())
        .unwrap();
    assert_eq!(recovered.as_bytes(), master_key.as_bytes());
}

#[tokio::test]
async fn guardian_shares_cross_implementation_pinning() {
    // shares wrapped for an x25519 guardian and an ml-kem guardian coexist;
    // each opens only under its own implementation and secret key
    let core = build_core();
    let master_key = MasterKey::new(crypto::random_bytes::<32>());

    let kp_pq = core
        .provider
        .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
        .await
        .unwrap();
    let kp_dh = core
        .provider
        .generate_key_pair(Role::Kem, Some(KEM_X25519))
        .await
        .unwrap();

    let guardians = vec![
        Guardian {
            guardian_id: "guardian-pq".into(),
            kem_public_key: kp_pq.public_key.clone(),
            implementation_id: KEM_MLKEM768.to_string(),
        },
        Guardian {
            guardian_id: "guardian-dh".into(),
            kem_public_key: kp_dh.public_key.clone(),
            implementation_id: KEM_X25519.to_string(),
        },
    ];

    let rows = core
        .recovery
        .split(
            "account-mixed",
            &master_key,
            ThresholdPolicy { n: 2, k: 2 },
            &guardians,
        )
        .await
        .unwrap();

    assert_eq!(rows[0].kem_ciphertext.implementation_id, KEM_MLKEM768);
    assert_eq!(rows[1].kem_ciphertext.implementation_id, KEM_X25519);

    // the dh guardian's key cannot open the pq share
    assert!(core
        .recovery
        .open_share(&rows[0], kp_dh.secret_key.as_bytes())
        .is_err());

    let opened = vec![
        core.recovery
            .open_share(&rows[0], kp_pq.secret_key.as_bytes())
            .unwrap(),
        core.recovery
            .open_share(&rows[1], kp_dh.secret_key.as_bytes())
            .unwrap(),
    ];
    let recovered = core.recovery.reconstruct("account-mixed", &opened).unwrap();
    assert_eq!(recovered.as_bytes(), master_key.as_bytes());
}
