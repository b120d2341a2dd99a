use serde::Deserialize;
use sha2::{Digest, Sha256};

/// How the gateway derives a callback signature from the shared secret and
/// the `billcode`, `order_id` and `status` fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// `hex(sha256(secret + billcode + order_id + status))`
    Sha256SecretFirst,
    /// `hex(sha256(billcode + order_id + status + secret))`
    Sha256SecretLast,
}

#[derive(Clone)]
pub struct CallbackSigner {
    scheme: SignatureScheme,
    secret: String,
}

impl CallbackSigner {
    pub fn new(scheme: SignatureScheme, secret: impl Into<String>) -> Self {
        Self {
            scheme,
            secret: secret.into(),
        }
    }

    pub fn sign(&self, bill_code: &str, order_number: &str, status: &str) -> String {
        let mut hasher = Sha256::new();
        match self.scheme {
            SignatureScheme::Sha256SecretFirst => {
                hasher.update(self.secret.as_bytes());
                hasher.update(bill_code.as_bytes());
                hasher.update(order_number.as_bytes());
                hasher.update(status.as_bytes());
            }
            SignatureScheme::Sha256SecretLast => {
                hasher.update(bill_code.as_bytes());
                hasher.update(order_number.as_bytes());
                hasher.update(status.as_bytes());
                hasher.update(self.secret.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self, bill_code: &str, order_number: &str, status: &str, signature: &str) -> bool {
        let expected = self.sign(bill_code, order_number, status);
        constant_time_eq(&expected, &signature.trim().to_ascii_lowercase())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
