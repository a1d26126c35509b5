use secp256k1::PublicKey as Secp256k1PublicKey;
use secp256k1::Signature as Secp256k1Signature;

use std::fmt;

pub const PUBLIC_KEY_SIZE: usize = secp256k1::constants::PUBLIC_KEY_SIZE;
pub const SIGNATURE_SIZE: usize = secp256k1::constants::COMPACT_SIGNATURE_SIZE;

/// Compressed secp256k1 public key, 33 bytes on the wire. Deserialization
/// rejects byte strings that are not a curve point, so a decoded key is
/// always well-formed.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PublicKey {
    raw: Secp256k1PublicKey,
}

impl PublicKey {
    pub fn serialize(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.raw.serialize()
    }
}

impl AsRef<Secp256k1PublicKey> for PublicKey {
    fn as_ref(&self) -> &Secp256k1PublicKey {
        &self.raw
    }
}

impl From<Secp256k1PublicKey> for PublicKey {
    fn from(raw: Secp256k1PublicKey) -> Self {
        PublicKey { raw }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.raw.serialize()[..]))
    }
}

/// ECDSA signature in the 64-byte compact encoding.
#[derive(Copy, Clone)]
pub struct Signature {
    raw: Secp256k1Signature,
}

impl Signature {
    pub fn serialize_compact(&self) -> [u8; SIGNATURE_SIZE] {
        self.raw.serialize_compact()
    }
}

impl AsRef<Secp256k1Signature> for Signature {
    fn as_ref(&self) -> &Secp256k1Signature {
        &self.raw
    }
}

impl From<Secp256k1Signature> for Signature {
    fn from(raw: Secp256k1Signature) -> Self {
        Signature { raw }
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.serialize_compact()[..] == other.serialize_compact()[..]
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.serialize_compact()[..]))
    }
}

mod serde_m {
    use super::{PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
    use super::{Secp256k1PublicKey, Secp256k1Signature};

    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use std::fmt;

    impl Serialize for PublicKey {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            use serde::ser::SerializeTuple;

            let mut tuple = serializer.serialize_tuple(PUBLIC_KEY_SIZE)?;
            let data = self.raw.serialize();
            for byte in data.iter() {
                tuple.serialize_element(byte)?;
            }
            tuple.end()
        }
    }

    impl<'de> Deserialize<'de> for PublicKey {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            struct V;

            impl<'de> Visitor<'de> for V {
                type Value = PublicKey;

                fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                    write!(formatter, "{} bytes of a compressed public key", PUBLIC_KEY_SIZE)
                }

                fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
                where
                    A: SeqAccess<'de>,
                {
                    let mut seq = seq;
                    let mut data = [0u8; PUBLIC_KEY_SIZE];
                    for byte in data.iter_mut() {
                        *byte = seq
                            .next_element()?
                            .ok_or(<A::Error as Error>::custom("unexpected end"))?;
                    }

                    Secp256k1PublicKey::from_slice(&data)
                        .map(Into::into)
                        .map_err(A::Error::custom)
                }
            }

            deserializer.deserialize_tuple(PUBLIC_KEY_SIZE, V)
        }
    }

    impl Serialize for Signature {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            use serde::ser::SerializeTuple;

            let mut tuple = serializer.serialize_tuple(SIGNATURE_SIZE)?;
            let data = self.raw.serialize_compact();
            for byte in data.iter() {
                tuple.serialize_element(byte)?;
            }
            tuple.end()
        }
    }

    impl<'de> Deserialize<'de> for Signature {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            struct V;

            impl<'de> Visitor<'de> for V {
                type Value = Signature;

                fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                    write!(formatter, "{} bytes of a compact signature", SIGNATURE_SIZE)
                }

                fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
                where
                    A: SeqAccess<'de>,
                {
                    let mut seq = seq;
                    let mut data = [0u8; SIGNATURE_SIZE];
                    for byte in data.iter_mut() {
                        *byte = seq
                            .next_element()?
                            .ok_or(<A::Error as Error>::custom("unexpected end"))?;
                    }

                    Secp256k1Signature::from_compact(&data)
                        .map(Into::into)
                        .map_err(A::Error::custom)
                }
            }

            deserializer.deserialize_tuple(SIGNATURE_SIZE, V)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PublicKey;
    use binformat::BinarySD;
    use secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn public_key_round_trip() {
        let ctx = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let pk: PublicKey = secp256k1::PublicKey::from_secret_key(&ctx, &sk).into();

        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, &pk).unwrap();
        assert_eq!(bytes.len(), 33);

        let restored: PublicKey = BinarySD::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(restored, pk);
    }

    #[test]
    fn garbage_public_key_is_rejected() {
        let bytes = [0xffu8; 33];
        let restored: Result<PublicKey, _> = BinarySD::deserialize(&bytes[..]);
        assert!(restored.is_err());
    }
}
