use crate::element::{Element, Index, MAX_HEIGHT, START_INDEX};
use crate::error::ShachainError;

/// Stores the counterparty's disclosed secrets in O(log n) space. Each
/// bucket keeps the most recent element with a given number of trailing
/// zero bits in its index; every older secret is re-derivable from one of
/// them. Described in BOLT-03, "Efficient per-commitment secret storage".
pub struct RevocationStore {
    buckets: [Element; MAX_HEIGHT as usize],
    used_buckets: u8,
    next_index: Index,
}

impl Default for RevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationStore {
    pub fn new() -> Self {
        RevocationStore {
            buckets: [Element::default(); MAX_HEIGHT as usize],
            used_buckets: 0,
            next_index: START_INDEX,
        }
    }

    /// Height the next inserted secret must correspond to. Secrets MUST be
    /// inserted in the order the counterparty's producer yields them.
    pub fn next_height(&self) -> u64 {
        self.next_index.height()
    }

    /// Inserts the next disclosed secret, after checking that every bucket
    /// it supersedes is re-derivable from it. A secret failing that check
    /// proves the counterparty's chain inconsistent and is rejected.
    pub fn add_next_entry(&mut self, secret: [u8; 32]) -> Result<(), ShachainError> {
        let new_element = Element {
            index: self.next_index,
            hash: secret,
        };

        let bucket = new_element.index.0.trailing_zeros().min(MAX_HEIGHT as u32 - 1) as u8;
        for i in 0..bucket.min(self.used_buckets) {
            let prior = self.buckets[i as usize];
            let derived = new_element
                .derive(prior.index)
                .map_err(|_| ShachainError::InconsistentSecret {
                    height: new_element.index.height(),
                })?;
            if derived != prior {
                return Err(ShachainError::InconsistentSecret {
                    height: new_element.index.height(),
                });
            }
        }

        self.buckets[bucket as usize] = new_element;
        if bucket + 1 > self.used_buckets {
            self.used_buckets = bucket + 1;
        }
        self.next_index = Index(self.next_index.0 - 1);
        Ok(())
    }

    /// Re-derives a previously disclosed secret by commitment height.
    /// Fails for heights never inserted or already outside the window.
    pub fn secret_for_height(&self, height: u64) -> Result<[u8; 32], ShachainError> {
        let index = Index::from_height(height)?;
        if index.0 <= self.next_index.0 {
            // not disclosed yet
            return Err(ShachainError::UnknownSecret { height });
        }

        for i in 0..self.used_buckets as usize {
            if let Ok(element) = self.buckets[i].derive(index) {
                return Ok(element.hash);
            }
        }
        Err(ShachainError::UnknownSecret { height })
    }
}
