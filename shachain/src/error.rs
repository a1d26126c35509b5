use thiserror::Error;

use crate::element::Index;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ShachainError {
    /// Indexes are not prefixes of each other, so no sequence of bit flips
    /// leads from one hash to the other.
    #[error("element {to:?} is not derivable from {from:?}")]
    NotDerivable { from: Index, to: Index },

    /// The requested height was never disclosed, or fell outside the
    /// window the store can still re-derive.
    #[error("no secret stored or derivable for height {height}")]
    UnknownSecret { height: u64 },

    /// A newly inserted secret does not reproduce the previously stored
    /// ones, i.e. the counterparty's chain is inconsistent.
    #[error("secret for height {height} does not extend the stored chain")]
    InconsistentSecret { height: u64 },

    /// Heights are confined to the 48-bit index domain.
    #[error("height {0} is outside the derivable range")]
    HeightOutOfRange(u64),
}
