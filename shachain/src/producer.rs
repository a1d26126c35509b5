use crate::element::{Element, Index, ROOT_INDEX};
use crate::error::ShachainError;

/// Produces the local side's revocation secrets. Starting from a single
/// seed element the producer can re-derive the secret for any commitment
/// height, so nothing but the seed (and the next unused height) needs to
/// be persisted.
pub struct RevocationProducer {
    root: Element,
    next_height: u64,
}

impl RevocationProducer {
    pub fn new(seed: [u8; 32]) -> Self {
        RevocationProducer {
            root: Element {
                index: ROOT_INDEX,
                hash: seed,
            },
            next_height: 0,
        }
    }

    /// Re-derives the secret for any height, past or future.
    pub fn secret_for_height(&self, height: u64) -> Result<[u8; 32], ShachainError> {
        let index = Index::from_height(height)?;
        let element = self.root.derive(index)?;
        Ok(element.hash)
    }

    /// Yields the secret for the next unused commitment height and
    /// advances the cursor.
    pub fn next_secret(&mut self) -> Result<([u8; 32], u64), ShachainError> {
        let height = self.next_height;
        let secret = self.secret_for_height(height)?;
        self.next_height += 1;
        Ok((secret, height))
    }

    pub fn next_height(&self) -> u64 {
        self.next_height
    }
}

#[cfg(test)]
mod tests {
    use super::RevocationProducer;

    #[test]
    fn next_secret_matches_direct_derivation() {
        let mut producer = RevocationProducer::new([7; 32]);

        for expected_height in 0..5 {
            let (secret, height) = producer.next_secret().unwrap();
            assert_eq!(height, expected_height);
            assert_eq!(secret, producer.secret_for_height(height).unwrap());
        }
        assert_eq!(producer.next_height(), 5);
    }

    #[test]
    fn secrets_differ_between_heights() {
        let producer = RevocationProducer::new([1; 32]);
        let a = producer.secret_for_height(0).unwrap();
        let b = producer.secret_for_height(1).unwrap();
        assert_ne!(a, b);
    }
}
