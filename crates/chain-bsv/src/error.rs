use thiserror::Error;

/// BSV protocol operation errors.
#[derive(Debug, Error)]
pub enum BsvError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("unsupported locking script: {0}")]
    UnsupportedScript(String),

    #[error("input index {index} out of range (transaction has {inputs} inputs)")]
    InputOutOfRange { index: usize, inputs: usize },

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("script verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("invalid fee rate: {0}")]
    InvalidFeeRate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_address() {
        let err = BsvError::InvalidAddress("bad checksum".into());
        assert_eq!(err.to_string(), "invalid address: bad checksum");
    }

    #[test]
    fn display_input_out_of_range() {
        let err = BsvError::InputOutOfRange { index: 3, inputs: 2 };
        assert_eq!(
            err.to_string(),
            "input index 3 out of range (transaction has 2 inputs)"
        );
    }

    #[test]
    fn display_verification_failed() {
        let err = BsvError::VerificationFailed("pubkey hash mismatch".into());
        assert_eq!(
            err.to_string(),
            "script verification failed: pubkey hash mismatch"
        );
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> =
            Box::new(BsvError::UnsupportedScript("OP_RETURN".into()));
        assert!(err.to_string().contains("OP_RETURN"));
    }
}
