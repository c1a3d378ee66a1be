use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `message` under `secret`, as the gateway computes it.
pub fn sign_hex(message: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify(message: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    // verify_slice compares in constant time
    mac.verify_slice(&expected).is_ok()
}

/// Checks the signature the checkout widget hands back to the browser:
/// HMAC-SHA256 over `"{order_id}|{payment_id}"` with the API key secret.
pub fn client_signature_valid(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> bool {
    let message = format!("{}|{}", gateway_order_id, gateway_payment_id);
    let valid = verify(message.as_bytes(), signature, key_secret);
    if !valid {
        warn!(
            gateway_order_id,
            gateway_payment_id, "Client payment signature mismatch, potential tampering"
        );
    }
    valid
}

/// Checks a webhook delivery: HMAC-SHA256 over the raw body with the
/// webhook secret. The body must be the exact bytes received.
pub fn webhook_signature_valid(body: &[u8], signature: &str, webhook_secret: &str) -> bool {
    let valid = verify(body, signature, webhook_secret);
    if !valid {
        warn!(
            body_len = body.len(),
            "Webhook signature mismatch, potential tampering"
        );
    }
    valid
}
