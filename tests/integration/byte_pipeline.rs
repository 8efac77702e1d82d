#![allow(missing_docs)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stratum::backend::{ByteHandlerPipeline, ChaChaEncryptor, SnappyCompressor};
use stratum::{
    HandlerConfig, NodeKey, ResourceConfig, Revisioning, Session, StratumError,
};
use tempfile::tempdir;

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn pipeline() -> ByteHandlerPipeline {
    ByteHandlerPipeline::new()
        .with(SnappyCompressor)
        .with(ChaChaEncryptor::from_hex(KEY_HEX).unwrap())
}

#[test]
fn ten_thousand_payloads_round_trip() {
    let pipeline = pipeline();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    for i in 0..10_000usize {
        let len = match i % 10 {
            0 => 0,
            1 => rng.gen_range(4096..16_384),
            _ => rng.gen_range(1..512),
        };
        let mut payload = vec![0u8; len];
        if i % 3 == 0 {
            // compressible
            payload.iter_mut().enumerate().for_each(|(j, b)| *b = (j % 7) as u8);
        } else {
            rng.fill(&mut payload[..]);
        }
        let encoded = pipeline.serialize(payload.clone()).unwrap();
        assert_eq!(pipeline.deserialize(encoded).unwrap(), payload, "payload {i}");
    }
}

#[test]
fn flipped_ciphertext_is_a_byte_handling_error() {
    let pipeline = pipeline();
    let mut encoded = pipeline.serialize(b"some page bytes".to_vec()).unwrap();
    let last = encoded.len() - 1;
    encoded[last] ^= 0x40;
    assert!(matches!(
        pipeline.deserialize(encoded),
        Err(StratumError::ByteHandling(_))
    ));

    let truncated = pipeline.serialize(vec![7u8; 64]).unwrap()[..6].to_vec();
    assert!(matches!(
        pipeline.deserialize(truncated),
        Err(StratumError::ByteHandling(_))
    ));
}

#[test]
fn encrypted_resource_needs_its_key() {
    let dir = tempdir().unwrap();
    let config = ResourceConfig::file(dir.path())
        .with_revisioning(Revisioning::Incremental, 4)
        .with_handler(HandlerConfig::Snappy)
        .with_handler(HandlerConfig::Chacha20 {
            key_hex: KEY_HEX.into(),
        });
    let session = Session::create(config.clone()).unwrap();
    let mut tx = session.begin_write().unwrap();
    tx.set(NodeKey(17), vec![42u8; 300]).unwrap();
    tx.commit().unwrap();
    drop(tx);
    session.close().unwrap();

    let session = Session::open(dir.path()).unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(17)).unwrap().as_deref(), Some(&[42u8; 300][..]));
    drop(read);
    session.close().unwrap();

    let wrong = ResourceConfig {
        pipeline: vec![
            HandlerConfig::Snappy,
            HandlerConfig::Chacha20 {
                key_hex: "ff".repeat(32),
            },
        ],
        ..config
    };
    let store = wrong.open_store().unwrap();
    assert!(matches!(
        Session::open_with_store(wrong, store),
        Err(StratumError::ByteHandling(_))
    ));
}
