#![forbid(unsafe_code)]

//! Shachain PRF: from a single 32-byte seed a party derives a nearly
//! unbounded, strictly ordered sequence of revocation secrets, while the
//! counterparty stores every disclosed secret in O(log n) space. The
//! construct is described in
//! <https://github.com/rustyrussell/ccan/blob/master/ccan/crypto/shachain/design.txt>.

mod element;
mod error;
mod producer;
mod store;

pub use self::element::{Element, Index, MAX_HEIGHT, ROOT_INDEX, START_INDEX};
pub use self::error::ShachainError;
pub use self::producer::RevocationProducer;
pub use self::store::RevocationStore;
