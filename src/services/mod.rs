pub mod sign_service;

pub use sign_service::{AuthError, CredentialVerifier, VkSignVerifier};
