//! Issuance and verification for approval, delegation, and say tokens.
//!
//! Record shapes and key-free predicates (`is_expired`, `covers_scope`,
//! `matches_call`) live in `gait-core::token`; this module owns the signing
//! and verification calls that require a key.

use chrono::{DateTime, Utc};
use gait_core::{ApprovalToken, DelegationToken, SayToken};
use gait_error::{ErrorCode, GaitError};
use gait_sign::{SigningKey, VerifyingKey};

/// Options governing token verification beyond the bare signature check.
#[derive(Debug, Clone, Default)]
pub struct TokenVerifyOptions {
    /// When set, the token must not be expired as of this instant.
    pub now: Option<DateTime<Utc>>,
    /// When non-empty, the token's scope must cover every entry here.
    pub required_scope: Vec<String>,
}

fn check_expiry(expired: bool, options: &TokenVerifyOptions) -> Result<(), GaitError> {
    if options.now.is_some() && expired {
        return Err(GaitError::new(ErrorCode::TokenExpired, "token has expired"));
    }
    Ok(())
}

fn check_scope(covers: bool, options: &TokenVerifyOptions) -> Result<(), GaitError> {
    if !options.required_scope.is_empty() && !covers {
        return Err(GaitError::new(
            ErrorCode::TokenScopeInsufficient,
            "token scope does not cover the requested operation",
        ));
    }
    Ok(())
}

/// Options governing say-token verification's call/turn binding check, kept
/// separate from [`TokenVerifyOptions`] since say tokens carry no scope list.
#[derive(Debug, Clone)]
pub struct SayTokenCallBinding {
    /// The call id the evaluation context expects this token to be bound to.
    pub expected_call_id: String,
    /// The turn index the evaluation context expects this token to be bound to.
    pub expected_turn_index: u64,
}

fn check_call_binding(token: &SayToken, binding: &SayTokenCallBinding) -> Result<(), GaitError> {
    if !token.matches_call(&binding.expected_call_id, binding.expected_turn_index) {
        return Err(GaitError::new(
            ErrorCode::SayTokenCallMismatch,
            format!(
                "say token is bound to call {} turn {}, expected call {} turn {}",
                token.call_id, token.turn_index, binding.expected_call_id, binding.expected_turn_index
            ),
        ));
    }
    Ok(())
}

/// Sign and return `token`, leaving every field but `signature` untouched.
pub fn issue_approval_token(
    signing_key: &SigningKey,
    key_id: &str,
    mut token: ApprovalToken,
) -> Result<ApprovalToken, GaitError> {
    token.signature = None;
    let signature = gait_sign::sign_canonical_excluding(signing_key, key_id, &token, "signature")?;
    token.signature = Some(signature);
    Ok(token)
}

/// Verify `token`'s signature, expiry (if `options.now` is set), and scope
/// coverage (if `options.required_scope` is non-empty).
pub fn verify_approval_token(
    verifying_key: &VerifyingKey,
    token: &ApprovalToken,
    options: &TokenVerifyOptions,
) -> Result<(), GaitError> {
    let signature = token
        .signature
        .as_ref()
        .ok_or_else(|| GaitError::new(ErrorCode::SignatureInvalid, "approval token carries no signature"))?;
    gait_sign::verify_canonical_excluding(verifying_key, token, "signature", signature)?;
    if let Some(now) = options.now {
        check_expiry(token.is_expired(now), options)?;
    }
    check_scope(token.covers_scope(&options.required_scope), options)
}

/// Sign and return `token`, leaving every field but `signature` untouched.
pub fn issue_delegation_token(
    signing_key: &SigningKey,
    key_id: &str,
    mut token: DelegationToken,
) -> Result<DelegationToken, GaitError> {
    token.signature = None;
    let signature = gait_sign::sign_canonical_excluding(signing_key, key_id, &token, "signature")?;
    token.signature = Some(signature);
    Ok(token)
}

/// Verify `token`'s signature, expiry (if `options.now` is set), and scope
/// coverage (if `options.required_scope` is non-empty).
pub fn verify_delegation_token(
    verifying_key: &VerifyingKey,
    token: &DelegationToken,
    options: &TokenVerifyOptions,
) -> Result<(), GaitError> {
    let signature = token
        .signature
        .as_ref()
        .ok_or_else(|| GaitError::new(ErrorCode::SignatureInvalid, "delegation token carries no signature"))?;
    gait_sign::verify_canonical_excluding(verifying_key, token, "signature", signature)?;
    if let Some(now) = options.now {
        check_expiry(token.is_expired(now), options)?;
    }
    check_scope(token.covers_scope(&options.required_scope), options)
}

/// Sign and return `token`, leaving every field but `signature` untouched.
pub fn issue_say_token(
    signing_key: &SigningKey,
    key_id: &str,
    mut token: SayToken,
) -> Result<SayToken, GaitError> {
    token.signature = None;
    let signature = gait_sign::sign_canonical_excluding(signing_key, key_id, &token, "signature")?;
    token.signature = Some(signature);
    Ok(token)
}

/// Verify `token`'s signature, expiry (if `options.now` is set), and that it
/// is bound to `binding`'s call id and turn index. Say tokens carry no scope
/// list separate from their bound call, so `options.required_scope` is
/// ignored.
pub fn verify_say_token(
    verifying_key: &VerifyingKey,
    token: &SayToken,
    options: &TokenVerifyOptions,
    binding: &SayTokenCallBinding,
) -> Result<(), GaitError> {
    let signature = token
        .signature
        .as_ref()
        .ok_or_else(|| GaitError::new(ErrorCode::SignatureInvalid, "say token carries no signature"))?;
    gait_sign::verify_canonical_excluding(verifying_key, token, "signature", signature)?;
    if let Some(now) = options.now {
        check_expiry(token.is_expired(now), options)?;
    }
    check_call_binding(token, binding)
}
