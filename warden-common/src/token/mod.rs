pub mod auth_token;

use base64::engine::general_purpose::URL_SAFE as b64_urlsafe;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub enum TokenError {
    TokenInvalid,
    TokenExpired,
    TokenMissing,
    WrongTokenType,
}

impl std::error::Error for TokenError {}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::TokenInvalid => write!(f, "TokenInvalid"),
            TokenError::TokenExpired => write!(f, "TokenExpired"),
            TokenError::TokenMissing => write!(f, "TokenMissing"),
            TokenError::WrongTokenType => write!(f, "WrongTokenType"),
        }
    }
}

pub trait Expiring {
    fn expiration(&self) -> u64;
}

pub trait TokenSignatureVerifier {
    fn verify(json: &str, signature: &[u8], key: &[u8]) -> bool;
}

pub struct DecodedToken<C, V>
where
    C: Expiring + DeserializeOwned,
    V: TokenSignatureVerifier,
{
    pub json: String,
    pub signature: Vec<u8>,
    pub claims: C,
    phantom: PhantomData<V>,
}

impl<C, V> DecodedToken<C, V>
where
    C: Expiring + DeserializeOwned,
    V: TokenSignatureVerifier,
{
    pub fn verify(&self, key: &[u8]) -> Result<&C, TokenError> {
        if !V::verify(&self.json, &self.signature, key) {
            return Err(TokenError::TokenInvalid);
        }

        let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return Err(TokenError::TokenInvalid);
        };

        if self.claims.expiration() <= now.as_secs() {
            return Err(TokenError::TokenExpired);
        }

        Ok(&self.claims)
    }
}

pub trait Token {
    type Claims: Expiring + DeserializeOwned;
    type Verifier: TokenSignatureVerifier;

    fn token_name() -> &'static str;

    fn decode(token: &str) -> Result<DecodedToken<Self::Claims, Self::Verifier>, TokenError> {
        let decoded_token = b64_urlsafe
            .decode(token)
            .map_err(|_| TokenError::TokenInvalid)?;

        let Ok(token_str) = std::str::from_utf8(&decoded_token) else {
            return Err(TokenError::TokenInvalid);
        };

        let Some((claims_json, signature)) = token_str.rsplit_once('|') else {
            return Err(TokenError::TokenInvalid);
        };

        let signature = hex::decode(signature).map_err(|_| TokenError::TokenInvalid)?;
        let claims = serde_json::from_str::<Self::Claims>(claims_json)
            .map_err(|_| TokenError::TokenInvalid)?;

        Ok(DecodedToken {
            json: String::from(claims_json),
            signature,
            claims,
            phantom: PhantomData,
        })
    }
}

pub struct HmacSha256Verifier {}

impl TokenSignatureVerifier for HmacSha256Verifier {
    fn verify(json: &str, signature: &[u8], key: &[u8]) -> bool {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
            return false;
        };
        mac.update(json.as_bytes());

        let correct_hash = mac.finalize().into_bytes();

        let mut hashes_dont_match = 0u8;

        if correct_hash.len() != signature.len() || signature.is_empty() {
            return false;
        }

        // Do bitwise comparison to prevent timing attacks
        for (i, correct_hash_byte) in correct_hash.iter().enumerate() {
            unsafe {
                hashes_dont_match |= correct_hash_byte ^ signature.get_unchecked(i);
            }
        }

        hashes_dont_match == 0
    }
}

pub(crate) fn sign_claims_json(mut json_of_claims: Vec<u8>, signing_key: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(signing_key)
        .expect("HMAC accepts keys of any length");
    mac.update(&json_of_claims);
    let hash = hex::encode(mac.finalize().into_bytes());

    json_of_claims.push(b'|');
    json_of_claims.extend_from_slice(hash.as_bytes());

    b64_urlsafe.encode(json_of_claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Clone, Copy, Serialize, Deserialize)]
    struct TestClaims {
        id: Uuid,
        exp: u64,
    }

    impl Expiring for TestClaims {
        fn expiration(&self) -> u64 {
            self.exp
        }
    }

    struct TestToken {}

    impl Token for TestToken {
        type Claims = TestClaims;
        type Verifier = HmacSha256Verifier;

        fn token_name() -> &'static str {
            "TestToken"
        }
    }

    impl TestToken {
        pub fn sign_new(claims: TestClaims, signing_key: &[u8; 64]) -> String {
            let json_of_claims =
                serde_json::to_vec(&claims).expect("Failed to transform claims into JSON");
            sign_claims_json(json_of_claims, signing_key)
        }
    }

    fn make_signature_invalid(signature: &mut String) {
        let mut decoded = b64_urlsafe.decode(&signature).unwrap();

        if decoded.last().unwrap() == &b'a' {
            decoded.pop();
            decoded.push(b'b');
        } else {
            decoded.pop();
            decoded.push(b'a');
        }

        *signature = b64_urlsafe.encode(decoded);
    }

    #[test]
    fn test_decode() {
        let id = Uuid::now_v7();
        let exp = (SystemTime::now() + Duration::from_secs(10))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let token = TestToken::sign_new(TestClaims { id, exp }, &[10; 64]);
        let t = TestToken::decode(&token).unwrap();

        assert_eq!(t.claims.id, id);
        assert_eq!(t.claims.exp, exp);

        let claims = t.verify(&[10; 64]).unwrap();

        assert_eq!(claims.id, id);
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn test_verify() {
        let id = Uuid::now_v7();
        let exp = (SystemTime::now() + Duration::from_secs(10))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let key = [2; 64];

        let mut token = TestToken::sign_new(TestClaims { id, exp }, &key);
        let t = TestToken::decode(&token).unwrap();
        let claims = t.verify(&key).unwrap();

        assert_eq!(claims.id, id);
        assert_eq!(claims.exp, exp);

        assert!(TestToken::decode(&token)
            .unwrap()
            .verify(&[3; 64])
            .is_err());

        make_signature_invalid(&mut token);
        assert!(TestToken::decode(&token).unwrap().verify(&key).is_err());

        let exp = (SystemTime::now() - Duration::from_secs(10))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let token = TestToken::sign_new(TestClaims { id, exp }, &key);
        assert!(TestToken::decode(&token).unwrap().verify(&key).is_err());
    }
}
