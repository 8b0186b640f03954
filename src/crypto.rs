// =====================================================
// PASSWORD HASHING (BCrypt)
// =====================================================

use crate::error::{GatewayError, Result};

/// Salted one-way hashing used for encrypt-listed columns and credential
/// verification. Kept behind a trait so repositories never depend on the
/// concrete algorithm.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String>;
    fn verify(&self, plain: &str, hashed: &str) -> bool;
}

/// BCrypt hashes carry a recognizable `$2` prefix; values that already look
/// hashed must not be re-hashed.
pub fn is_bcrypt_hash(value: &str) -> bool {
    value.starts_with("$2")
}

#[derive(Clone, Debug)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Cost must stay in BCrypt's supported 4..=31 range; 10-15 is the
    /// practical band.
    pub fn new(cost: u32) -> Result<BcryptHasher> {
        if !(4..=31).contains(&cost) {
            return Err(GatewayError::input(format!(
                "bcrypt cost must be between 4 and 31, got {}",
                cost
            )));
        }
        Ok(BcryptHasher { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        BcryptHasher { cost: crate::settings::DEFAULT_BCRYPT_COST }
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, plain: &str) -> Result<String> {
        if plain.trim().is_empty() {
            return Err(GatewayError::input("value to hash cannot be empty"));
        }
        bcrypt::hash(plain, self.cost)
            .map_err(|e| GatewayError::execution("failed to hash value", e))
    }

    fn verify(&self, plain: &str, hashed: &str) -> bool {
        if plain.trim().is_empty() || hashed.trim().is_empty() {
            return false;
        }
        bcrypt::verify(plain, hashed).unwrap_or(false)
    }
}

/// Replaces the values of encrypt-listed columns with salted hashes.
/// Matching is case-insensitive; empty values and values already carrying
/// the hash prefix are left untouched.
pub fn apply_encrypt_fields(
    data: &crate::db_types::Row,
    encrypt_fields: &[String],
    hasher: &dyn PasswordHasher,
) -> Result<crate::db_types::Row> {
    if encrypt_fields.is_empty() {
        return Ok(data.clone());
    }
    let encrypt: Vec<String> = encrypt_fields
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    let mut out = crate::db_types::Row::new();
    for (column, value) in data {
        let value = match value {
            serde_json::Value::String(s)
                if encrypt.contains(&column.to_lowercase())
                    && !s.is_empty()
                    && !is_bcrypt_hash(s) =>
            {
                serde_json::Value::String(hasher.hash(s)?)
            }
            other => other.clone(),
        };
        out.insert(column.clone(), value);
    }
    Ok(out)
}

/// Whether a stored hash should be regenerated at a higher work factor.
pub fn needs_rehash(hashed: &str, desired_cost: u32) -> bool {
    if hashed.trim().is_empty() || !is_bcrypt_hash(hashed) {
        return true;
    }
    match hashed.get(4..6).and_then(|c| c.parse::<u32>().ok()) {
        Some(current) => current < desired_cost,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        // low cost keeps the test fast
        let hasher = BcryptHasher::new(4).unwrap();
        let hashed = hasher.hash("secret123").unwrap();
        assert!(is_bcrypt_hash(&hashed));
        assert!(hasher.verify("secret123", &hashed));
        assert!(!hasher.verify("wrong", &hashed));
    }

    #[test]
    fn empty_values_are_rejected() {
        let hasher = BcryptHasher::new(4).unwrap();
        assert!(hasher.hash("").is_err());
        assert!(hasher.hash("   ").is_err());
        assert!(!hasher.verify("", "$2b$04$abc"));
        assert!(!hasher.verify("x", ""));
    }

    #[test]
    fn cost_bounds_are_enforced() {
        assert!(BcryptHasher::new(3).is_err());
        assert!(BcryptHasher::new(32).is_err());
        assert!(BcryptHasher::new(12).is_ok());
    }

    #[test]
    fn hash_prefix_detection() {
        assert!(is_bcrypt_hash("$2b$12$R9h/cIPz0gi.URNNX3kh2O"));
        assert!(!is_bcrypt_hash("secret123"));
    }

    #[test]
    fn encrypt_fields_are_hashed_and_verifiable() {
        let hasher = BcryptHasher::new(4).unwrap();
        let mut data = crate::db_types::Row::new();
        data.insert("email".into(), serde_json::json!("a@b.com"));
        data.insert("clave".into(), serde_json::json!("secret123"));

        let out = apply_encrypt_fields(&data, &["clave".to_string()], &hasher).unwrap();
        assert_eq!(out["email"], serde_json::json!("a@b.com"));
        let stored = out["clave"].as_str().unwrap();
        assert!(is_bcrypt_hash(stored));
        assert!(hasher.verify("secret123", stored));
    }

    #[test]
    fn encrypt_field_matching_is_case_insensitive() {
        let hasher = BcryptHasher::new(4).unwrap();
        let mut data = crate::db_types::Row::new();
        data.insert("Clave".into(), serde_json::json!("secret123"));
        let out = apply_encrypt_fields(&data, &["CLAVE".to_string()], &hasher).unwrap();
        assert!(is_bcrypt_hash(out["Clave"].as_str().unwrap()));
    }

    #[test]
    fn already_hashed_values_are_not_rehashed() {
        let hasher = BcryptHasher::new(4).unwrap();
        let existing = hasher.hash("secret123").unwrap();
        let mut data = crate::db_types::Row::new();
        data.insert("clave".into(), serde_json::json!(existing.clone()));
        let out = apply_encrypt_fields(&data, &["clave".to_string()], &hasher).unwrap();
        assert_eq!(out["clave"].as_str().unwrap(), existing);
    }

    #[test]
    fn rehash_detection() {
        assert!(needs_rehash("", 12));
        assert!(needs_rehash("plaintext", 12));
        assert!(needs_rehash("$2b$10$abcdefghijklmnopqrstuv", 12));
        assert!(!needs_rehash("$2b$12$abcdefghijklmnopqrstuv", 12));
    }
}
