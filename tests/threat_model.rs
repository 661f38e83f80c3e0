mod support;

use std::sync::Arc;

use recordvault::{
    Algorithm, CryptoService, KeyOptions, RecordVaultError, Resource, Tags,
};
use support::{Device, FakeKeyApi, USER_ID};

#[test]
fn test_server_cannot_read_tags() {
    // Threat Model: the server stores encrypted tags and sees search queries.
    // Goal: no tag or annotation plaintext, in any encoding, appears in a token.

    let api = Arc::new(FakeKeyApi::new());
    let device = Device::new(api.clone());
    device.rotate(&api);

    let mut tags = Tags::new();
    tags.insert("diagnosis".into(), "hypertension".into());
    let record = device
        .service
        .new_record(Resource::Data(vec![1]), tags, vec!["cardiology".into()], None)
        .unwrap();
    let encrypted = device.service.encrypt_record(&record).unwrap();

    for token in &encrypted.encrypted_tags {
        assert!(!token.contains("diagnosis"));
        assert!(!token.contains("hypertension"));
        assert!(!token.contains("cardiology"));
    }
}

#[test]
fn test_equal_tags_are_linkable_across_records() {
    // Threat Model: accepted leakage of deterministic tag encryption.
    // Goal: document that two records sharing a tag share its token, and
    // that the bodies of those records stay unlinkable.

    let api = Arc::new(FakeKeyApi::new());
    let device = Device::new(api.clone());
    device.rotate(&api);

    let make = || {
        let record = device
            .service
            .new_record(Resource::Data(b"same body".to_vec()), Tags::new(), vec![], None)
            .unwrap();
        device.service.encrypt_record(&record).unwrap()
    };
    let first = make();
    let second = make();

    assert_eq!(first.encrypted_tags, second.encrypted_tags);
    assert_ne!(first.encrypted_body, second.encrypted_body);
    assert_ne!(first.encrypted_data_key, second.encrypted_data_key);
}

#[test]
fn test_swapped_data_key_fails() {
    // Threat Model: the server swaps wrapped data keys between records.
    // Goal: the body does not decrypt under another record's data key.

    let api = Arc::new(FakeKeyApi::new());
    let device = Device::new(api.clone());
    device.rotate(&api);

    let encrypt = |body: &[u8]| {
        let record = device
            .service
            .new_record(Resource::Data(body.to_vec()), Tags::new(), vec![], None)
            .unwrap();
        device.service.encrypt_record(&record).unwrap()
    };
    let mut victim = encrypt(b"victim");
    let attacker = encrypt(b"attacker");
    victim.encrypted_data_key = attacker.encrypted_data_key;

    assert!(matches!(
        device.service.decrypt_record(&victim, USER_ID),
        Err(RecordVaultError::DecryptionFailed)
    ));
}

#[test]
fn test_forged_common_key_rejected() {
    // Threat Model: the key-exchange API substitutes a different common key
    // under an existing id.
    // Goal: records written under the real key do not decrypt.

    let api = Arc::new(FakeKeyApi::new());
    let writer = Device::new(api.clone());
    let id = writer.rotate(&api);
    let record = writer
        .service
        .new_record(Resource::Data(vec![9]), Tags::new(), vec![], None)
        .unwrap();
    let encrypted = writer.service.encrypt_record(&record).unwrap();

    // Re-publish a different key under the same id.
    let forged = CryptoService::new()
        .generate_sym_key(Algorithm::data_key(), KeyOptions::new(256))
        .unwrap();
    api.publish(&id, &forged);

    let reader = Device::new(api.clone());
    writer.share_tag_key_with(&reader);
    assert!(matches!(
        reader.service.decrypt_record(&encrypted, USER_ID),
        Err(RecordVaultError::DecryptionFailed)
    ));
    assert!(reader.service.common_keys().has_common_key(&id));
}

#[test]
fn test_truncated_tag_token_fails() {
    // Threat Model: the server truncates an encrypted tag.
    // Goal: the edit is detected as a decryption failure, not silently dropped.

    let api = Arc::new(FakeKeyApi::new());
    let device = Device::new(api.clone());
    device.rotate(&api);
    let record = device
        .service
        .new_record(Resource::Data(vec![3]), Tags::new(), vec![], None)
        .unwrap();
    let mut encrypted = device.service.encrypt_record(&record).unwrap();
    let truncated = encrypted.encrypted_tags[0][..4].to_string();
    encrypted.encrypted_tags[0] = truncated;

    assert!(matches!(
        device.service.decrypt_record(&encrypted, USER_ID),
        Err(RecordVaultError::DecryptionFailed)
    ));
}
