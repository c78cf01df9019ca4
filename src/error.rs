/// Coarse classification of an [`Error`], used by the host to decide how to
/// report a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-bounds request, rejected before any state read.
    Validation,
    /// Unknown delegation, finality provider or header.
    NotFound,
    /// Replay of an already-applied staking tx, signature or proof.
    Duplicate,
    /// Cryptographic verification failure.
    Signature,
    /// Operation illegal for the current derived status or chain position.
    StateConflict,
    /// Internal-consistency violation left behind by an earlier transition.
    /// The host must abort instead of reporting this as a user error.
    Fault,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    BitcoinEncode(#[from] bitcoin::consensus::encode::Error),
    #[error(transparent)]
    BitcoinHash(#[from] bitcoin::hashes::Error),
    #[error(transparent)]
    BitcoinHex(#[from] bitcoin::hashes::hex::Error),
    #[error(transparent)]
    Address(#[from] bitcoin::util::address::Error),
    #[error(transparent)]
    Sighash(#[from] bitcoin::util::sighash::Error),
    #[error(transparent)]
    Taproot(#[from] bitcoin::util::taproot::TaprootBuilderError),
    #[error(transparent)]
    Secp(#[from] bitcoin::secp256k1::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Bech32(#[from] bech32::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Invalid staking transaction: {0}")]
    InvalidStakingTx(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Expected {expected} signatures, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("Commission rate {0} is out of range")]
    CommissionOutOfRange(String),
    #[error("Out of gas: {0}")]
    OutOfGas(String),

    #[error("BTC delegation {0} not found")]
    DelegationNotFound(String),
    #[error("Finality provider {0} not found")]
    FinalityProviderNotFound(String),
    #[error("Bitcoin header {0} is unknown to the light client")]
    HeaderUnknown(String),

    #[error("Staking transaction {0} has already been used")]
    DuplicateStakingTx(String),
    #[error("Covenant member {0} has already signed")]
    DuplicateCovenantSig(String),
    #[error("Finality provider {0} is already registered")]
    DuplicateFinalityProvider(String),
    #[error("BTC delegation {0} already has an inclusion proof")]
    InclusionProofExists(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("Invalid adaptor signature: {0}")]
    AdaptorSignatureInvalid(String),
    #[error("Invalid proof of possession: {0}")]
    InvalidProofOfPossession(String),
    #[error("Public key {0} is not a covenant member")]
    InvalidCovenantPk(String),

    #[error("{0}")]
    StatusConflict(String),
    #[error("Finality provider {0} has been slashed")]
    FinalityProviderSlashed(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Invalid inclusion proof: {0}")]
    ProofInvalid(String),
    #[error("Bitcoin header {0} is not on the best chain")]
    NotOnBestChain(String),
    #[error("Staking transaction is not k-deep: k={k}, depth={depth}")]
    NotDeepEnough { k: u64, depth: u64 },
    #[error("Staking timelock has no more than w={0} blocks left")]
    TimelockTooShort(u64),

    #[error("Internal fault: {0}")]
    Fault(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            BitcoinEncode(_) | BitcoinHash(_) | BitcoinHex(_) | Address(_) | Sighash(_)
            | Taproot(_) | Secp(_) | Hex(_) | Bech32(_) | Toml(_) | InvalidMessage(_)
            | InvalidStakingTx(_) | InvalidParams(_) | CountMismatch { .. }
            | CommissionOutOfRange(_) | OutOfGas(_) => ErrorKind::Validation,
            DelegationNotFound(_) | FinalityProviderNotFound(_) | HeaderUnknown(_) => {
                ErrorKind::NotFound
            }
            DuplicateStakingTx(_)
            | DuplicateCovenantSig(_)
            | DuplicateFinalityProvider(_)
            | InclusionProofExists(_) => ErrorKind::Duplicate,
            SignatureInvalid(_)
            | AdaptorSignatureInvalid(_)
            | InvalidProofOfPossession(_)
            | InvalidCovenantPk(_) => ErrorKind::Signature,
            StatusConflict(_)
            | FinalityProviderSlashed(_)
            | Unauthorized(_)
            | ProofInvalid(_)
            | NotOnBestChain(_)
            | NotDeepEnough { .. }
            | TimelockTooShort(_) => ErrorKind::StateConflict,
            Fault(_) => ErrorKind::Fault,
        }
    }

    pub fn is_fault(&self) -> bool {
        self.kind() == ErrorKind::Fault
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            Error::CountMismatch {
                expected: 2,
                actual: 1
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::DuplicateStakingTx("ab".into()).kind(),
            ErrorKind::Duplicate
        );
        assert_eq!(
            Error::StatusConflict("pending".into()).kind(),
            ErrorKind::StateConflict
        );
        assert!(Error::Fault("missing params".into()).is_fault());
        assert!(!Error::DelegationNotFound("ab".into()).is_fault());
    }
}
