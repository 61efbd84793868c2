//! Deterministic encryption and key rotation with `fieldcrypt`.
//!
//! Run with `cargo run --example deterministic_encryption`.

use fieldcrypt::prelude::*;

const OLD_KEY: &str = "hex:000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const NEW_KEY: &str = "01234567890123456789012345678901";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Deterministic Encryption Example ===\n");

    let old = FieldCrypt::new(StaticKeyProvider::new(OLD_KEY).with_key_id("v1"), EngineOptions::default())?;

    let email = b"alice@example.com";
    let first = old.encrypt(email, Mode::Deterministic)?;
    let second = old.encrypt(email, Mode::Deterministic)?;
    println!("1. Same plaintext, same envelope:");
    println!("   {first}");
    println!("   {second}");
    assert_eq!(first, second);

    let other = old.encrypt(b"bob@example.com", Mode::Deterministic)?;
    println!("\n2. Different plaintext, different envelope:");
    println!("   {other}");
    assert_ne!(first, other);

    // Rotate: v2 becomes current, v1 stays available for reading
    let current = FieldCrypt::new(
        StaticKeyProvider::new(NEW_KEY).with_key_id("v2").with_rotated_key("v1", OLD_KEY),
        EngineOptions::default(),
    )?;
    println!("\n3. After rotation the key ids are {:?}", current.all_key_ids());

    let read_back = current.decrypt(&first)?;
    println!("   v1 envelope still decrypts: {}", String::from_utf8_lossy(&read_back));

    if current.needs_reencryption(&first, Mode::Deterministic)? {
        let rotated = current.reencrypt(&first, Mode::Deterministic)?;
        println!("   re-encrypted under {:?}: {rotated}", current.key_id_of(&rotated)?);
        assert_eq!(rotated, current.encrypt(email, Mode::Deterministic)?);
    }

    println!("\n=== Security Notes ===");
    println!("• Deterministic envelopes reveal which rows hold equal values");
    println!("• Use Mode::Randomized for fields that are never searched");
    println!("• Prefer blind indexes when only equality lookups are needed");

    Ok(())
}
