//! Verification of signed VK mini-app launch parameters.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_PARAM_PREFIX: &str = "vk_";

/// Characters left as-is when re-encoding the signed parameters. Spaces become
/// `%20`, never `+`, so the message matches what the VK platform signed.
const SIGNED_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Launch parameters carry no sign")]
    MissingSign,
    #[error("Launch parameters carry no vk_user_id")]
    MissingUserId,
    #[error("Sign does not match launch parameters")]
    InvalidSignature,
    #[error("Malformed launch parameters: {0}")]
    Malformed(String),
}

/// Maps an opaque signed credential to a stable user identifier.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, signed_payload: &str, secret: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VkSignVerifier;

impl CredentialVerifier for VkSignVerifier {
    fn verify(&self, signed_payload: &str, secret: &str) -> Result<String, AuthError> {
        let mut sign = None;
        let mut user_id = None;
        for (key, value) in url::form_urlencoded::parse(signed_payload.as_bytes()) {
            match key.as_ref() {
                "sign" => sign = Some(value.into_owned()),
                "vk_user_id" => user_id = Some(value.into_owned()),
                _ => {}
            }
        }

        let sign = sign.ok_or(AuthError::MissingSign)?;
        let expected = URL_SAFE_NO_PAD
            .decode(sign.trim_end_matches('='))
            .map_err(|e| AuthError::Malformed(format!("sign is not base64url: {e}")))?;

        keyed_mac(signed_payload, secret)?
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidSignature)?;

        match user_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(AuthError::MissingUserId),
        }
    }
}

/// The `vk_*` parameters sorted by key and re-encoded; this is the signed message.
fn canonical_query(query: &str) -> String {
    let mut params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key.starts_with(SIGNED_PARAM_PREFIX))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();

    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, SIGNED_VALUE_SET),
                utf8_percent_encode(value, SIGNED_VALUE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn keyed_mac(query: &str, secret: &str) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    mac.update(canonical_query(query).as_bytes());
    Ok(mac)
}

/// Computes the sign for a launch-parameter query string.
pub fn sign_launch_params(query: &str, secret: &str) -> Result<String, AuthError> {
    let mac = keyed_mac(query, secret)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "wvl68m4dR1UpLrVRli";
    const PARAMS: &str = "vk_user_id=494075&vk_app_id=6736218&vk_is_app_user=1&vk_language=ru&vk_access_token_settings=friends,photos&vk_platform=mobile_android";

    fn signed(params: &str) -> String {
        format!("{params}&sign={}", sign_launch_params(params, SECRET).unwrap())
    }

    #[test]
    fn test_verify_valid_sign() {
        let verifier = VkSignVerifier;
        assert_eq!(verifier.verify(&signed(PARAMS), SECRET), Ok("494075".to_string()));
    }

    #[test]
    fn test_parameter_order_does_not_matter() {
        let sign = sign_launch_params(PARAMS, SECRET).unwrap();
        let reordered = format!(
            "vk_platform=mobile_android&vk_language=ru&vk_app_id=6736218&vk_access_token_settings=friends,photos&vk_user_id=494075&vk_is_app_user=1&sign={sign}"
        );
        assert_eq!(VkSignVerifier.verify(&reordered, SECRET), Ok("494075".to_string()));
    }

    #[test]
    fn test_non_vk_params_are_not_signed() {
        let payload = format!("{}&utm_source=catalog", signed(PARAMS));
        assert!(VkSignVerifier.verify(&payload, SECRET).is_ok());
    }

    #[test]
    fn test_tampered_user_id_is_rejected() {
        let payload = signed(PARAMS).replace("vk_user_id=494075", "vk_user_id=1");
        assert_eq!(
            VkSignVerifier.verify(&payload, SECRET),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        assert_eq!(
            VkSignVerifier.verify(&signed(PARAMS), "another-secret"),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_missing_sign() {
        assert_eq!(VkSignVerifier.verify(PARAMS, SECRET), Err(AuthError::MissingSign));
    }

    #[test]
    fn test_missing_user_id() {
        let params = "vk_app_id=6736218&vk_platform=mobile_web";
        assert_eq!(
            VkSignVerifier.verify(&signed(params), SECRET),
            Err(AuthError::MissingUserId)
        );
    }

    #[test]
    fn test_canonical_query_encoding() {
        assert_eq!(
            canonical_query(PARAMS),
            "vk_access_token_settings=friends%2Cphotos&vk_app_id=6736218&vk_is_app_user=1&vk_language=ru&vk_platform=mobile_android&vk_user_id=494075"
        );
        assert_eq!(
            canonical_query("vk_ref=a+b&vk_x=!'()~*,&vk_user_id=1"),
            "vk_ref=a%20b&vk_user_id=1&vk_x=!'()~*%2C"
        );
    }

    #[test]
    fn test_space_in_value_signs_as_percent_20() {
        let expected = "dOzIq3nV616_MXC6R7F7G6hEZonC9HoaXGlkXxbiiDU";
        assert_eq!(sign_launch_params("vk_ref=a%20b&vk_user_id=1", "app-secret").unwrap(), expected);
        // Either spelling of the space in the query verifies against the same sign.
        for query in ["vk_ref=a%20b&vk_user_id=1", "vk_ref=a+b&vk_user_id=1"] {
            let payload = format!("{query}&sign={expected}");
            assert_eq!(VkSignVerifier.verify(&payload, "app-secret"), Ok("1".to_string()));
        }
    }

    #[test]
    fn test_known_sign_for_reference_params() {
        assert_eq!(
            sign_launch_params(PARAMS, SECRET).unwrap(),
            "V8fkAbz67muAAO9gBnud8AmIYrweBrN6DgJ1wRoqkgs"
        );
    }

    #[test]
    fn test_garbage_sign_is_malformed() {
        let payload = format!("{PARAMS}&sign=%%%not-base64%%%");
        assert!(matches!(
            VkSignVerifier.verify(&payload, SECRET),
            Err(AuthError::Malformed(_))
        ));
    }
}
