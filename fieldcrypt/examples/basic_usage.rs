//! Basic usage example for `fieldcrypt`.

use fieldcrypt::key::{generate, KeyEncoding};
use fieldcrypt::prelude::*;
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("fieldcrypt Basic Usage Example");
    println!("==============================\n");

    // A fresh key, encoded the way it would sit in an environment variable
    let encoded = KeyEncoding::Base64.encode(&generate());
    let provider = StaticKeyProvider::new(encoded).with_key_id("v1");
    let engine = FieldCrypt::new(provider, EngineOptions::default())?;
    println!("✓ Engine created (current key id: v1)\n");

    let plaintext = b"alice@example.com";
    println!("Plaintext: {}", String::from_utf8_lossy(plaintext));

    let envelope = engine.encrypt(plaintext, Mode::Randomized)?;
    println!("✓ Encrypted: {envelope}");

    let decrypted = engine.decrypt(&envelope)?;
    println!("✓ Decrypted: {}", String::from_utf8_lossy(&decrypted));
    assert_eq!(plaintext, &decrypted[..]);

    let again = engine.encrypt(plaintext, Mode::Randomized)?;
    assert_ne!(envelope, again);
    println!("✓ Second encryption differs: {again}\n");

    // Blind index for equality search over the encrypted column
    let index = engine.blind_index(&normalize("  Alice@Example.com ", true), "User.email", None)?;
    println!("Blind index (64 bits): {index}\n");

    // Sealing whole records through a field mapping
    let map = FieldMap::new("User").with_field(
        FieldSpec::new("email").with_blind_index(BlindIndexSpec::new("email_bidx")),
    );
    let records = RecordCipher::new(&engine, &map)?;

    let mut row = json!({"id": 1, "email": "alice@example.com"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    records.seal(&mut row)?;
    println!("Sealed row: {}", serde_json::Value::Object(row.clone()));
    assert_eq!(row["email_bidx"], index.as_str());

    records.open(&mut row)?;
    println!("Opened row: {}", serde_json::Value::Object(row));

    println!("\n✓ All operations completed successfully!");
    Ok(())
}
