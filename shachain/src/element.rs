use bitcoin_hashes::{sha256, Hash};

use crate::error::ShachainError;

/// Number of index bits, which bounds both the derivable height range and
/// the bucket count a store needs to hold all previous hashes.
pub const MAX_HEIGHT: u8 = 48;

/// Index of the root element, from which every other element derives.
pub const ROOT_INDEX: Index = Index(0);

/// Index of the first element produced by the chain. Successive secrets
/// count downwards from here; height h maps to `START_INDEX - h`.
pub const START_INDEX: Index = Index((1 << MAX_HEIGHT) - 1);

/// Position of a hash within the derivation tree. Comparing two indexes
/// tells which bit flips turn one hash into another.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Index(pub u64);

impl Index {
    /// Maps a commitment height onto the downward-counting index domain.
    pub fn from_height(height: u64) -> Result<Self, ShachainError> {
        if height > START_INDEX.0 {
            return Err(ShachainError::HeightOutOfRange(height));
        }
        Ok(Index(START_INDEX.0 - height))
    }

    pub fn height(&self) -> u64 {
        START_INDEX.0 - self.0
    }

    fn bit(&self, position: u8) -> bool {
        (self.0 >> position) & 1 == 1
    }

    fn trailing_zeros(&self) -> u8 {
        (0..MAX_HEIGHT).find(|&n| self.bit(n)).unwrap_or(MAX_HEIGHT)
    }

    /// Checks that `to` is derivable from `self` (their indexes share a
    /// prefix and `self` has only zeros below it) and returns the bit
    /// positions to flip, highest first.
    fn derivation_path(&self, to: Index) -> Result<Vec<u8>, ShachainError> {
        if self.0 == to.0 {
            return Ok(Vec::new());
        }

        let zeros = self.trailing_zeros();
        let prefix_mask = !((1u64 << zeros) - 1);
        if self.0 != to.0 & prefix_mask {
            return Err(ShachainError::NotDerivable {
                from: *self,
                to,
            });
        }

        Ok((0..zeros)
            .rev()
            .filter(|&position| to.bit(position))
            .collect())
    }
}

/// A hash together with the index it sits at. The output of the shachain
/// PRF; deriving mutates the hash by a series of bit flips and rehashes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Element {
    pub index: Index,
    pub hash: [u8; 32],
}

impl Element {
    pub fn derive(&self, to: Index) -> Result<Element, ShachainError> {
        let path = self.index.derivation_path(to)?;

        let mut hash = self.hash;
        for position in path {
            hash[(position / 8) as usize] ^= 1 << (position % 8);
            hash = sha256::Hash::hash(&hash).into_inner();
        }

        Ok(Element { index: to, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::{Element, Index, ROOT_INDEX};

    struct TestData<'a> {
        name: &'a str,
        seed: &'a str,
        index: Index,
        output: &'a str,
    }

    // Test vectors from BOLT-03, Appendix D, Generation Tests.
    const DERIVE_ELEMENT_TESTS: [TestData; 5] = [
        TestData {
            name: "generate_from_seed 0 final node",
            seed: "0000000000000000000000000000000000000000000000000000000000000000",
            index: Index(0xffffffffffff),
            output: "02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148",
        },
        TestData {
            name: "generate_from_seed FF final node",
            seed: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            index: Index(0xffffffffffff),
            output: "7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc",
        },
        TestData {
            name: "generate_from_seed FF alternate bits 1",
            seed: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            index: Index(0xaaaaaaaaaaa),
            output: "56f4008fb007ca9acf0e15b054d5c9fd12ee06cea347914ddbaed70d1c13a528",
        },
        TestData {
            name: "generate_from_seed FF alternate bits 2",
            seed: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
            index: Index(0x555555555555),
            output: "9015daaeb06dba4ccc05b91b2f73bd54405f2be9f217fbacd3c5ac2e62327d31",
        },
        TestData {
            name: "generate_from_seed 01 last nontrivial node",
            seed: "0101010101010101010101010101010101010101010101010101010101010101",
            index: Index(1),
            output: "915c75942a26bb3a433a8ce2cb0427c29ec6c1775cfc78328b57f6ba7bfeaa9c",
        },
    ];

    fn hash32(s: &str) -> [u8; 32] {
        let mut hash = [0; 32];
        hash.copy_from_slice(&hex::decode(s).unwrap());
        hash
    }

    #[test]
    fn specification_derivation_vectors() {
        for test in &DERIVE_ELEMENT_TESTS {
            let root = Element {
                index: ROOT_INDEX,
                hash: hash32(test.seed),
            };
            let derived = root.derive(test.index).unwrap();
            assert_eq!(derived.hash, hash32(test.output), "{}", test.name);
        }
    }

    #[test]
    fn derivation_requires_matching_prefix() {
        let from = Element {
            index: Index(0b101),
            hash: [0; 32],
        };
        // 0b101 has no trailing zeros, only itself is reachable
        assert!(from.derive(Index(0b101)).is_ok());
        assert!(from.derive(Index(0b110)).is_err());
        assert!(from.derive(Index(0b100)).is_err());
    }

    #[test]
    fn height_round_trip() {
        let index = Index::from_height(42).unwrap();
        assert_eq!(index.height(), 42);
        assert!(Index::from_height(1 << 48).is_err());
    }
}
