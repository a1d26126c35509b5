use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound on the element count accepted while decoding a `SerdeVec`.
/// The count field is read before any allocation happens, and a frame
/// claiming more elements than this is rejected rather than trusted.
pub const MAX_SEQUENCE_LENGTH: usize = 0x1000;

/// Sequence wrapper that writes a 16-bit element count rather than the
/// 64-bit length a plain `Vec` would get from the codec.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct SerdeVec<T>(pub Vec<T>);

impl<T> Serialize for SerdeVec<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeTuple;

        let &SerdeVec(ref data) = self;
        let mut tuple = serializer.serialize_tuple(1 + data.len())?;
        tuple.serialize_element(&(data.len() as u16))?;
        for item in data {
            tuple.serialize_element(item)?;
        }

        tuple.end()
    }
}

impl<'de, T> Deserialize<'de> for SerdeVec<T>
where
    T: de::DeserializeOwned,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use std::fmt;
        use std::marker::PhantomData;

        struct Visitor<T>(PhantomData<T>);

        impl<'de, T> de::Visitor<'de> for Visitor<T>
        where
            T: de::DeserializeOwned,
        {
            type Value = SerdeVec<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "16-bit element count followed by the elements")
            }

            fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut seq = seq;

                let count: u16 = seq
                    .next_element()?
                    .ok_or(de::Error::custom("cannot read element count"))?;
                let count = count as usize;
                if count > MAX_SEQUENCE_LENGTH {
                    return Err(de::Error::custom(format!(
                        "sequence length {} exceeds the limit {}",
                        count, MAX_SEQUENCE_LENGTH
                    )));
                }

                let mut data = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = seq
                        .next_element()?
                        .ok_or(de::Error::custom("unexpected end of sequence"))?;
                    data.push(item);
                }
                Ok(SerdeVec(data))
            }
        }

        // the arity only bounds how many elements the visitor may pull,
        // the actual count is the leading u16
        deserializer.deserialize_tuple(1 + MAX_SEQUENCE_LENGTH, Visitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::super::BinarySD;
    use super::SerdeVec;

    #[test]
    fn count_is_16_bit() {
        let v = SerdeVec(vec![0xaau8, 0xbb, 0xcc]);
        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, &v).unwrap();
        assert_eq!(bytes, vec![0x00, 0x03, 0xaa, 0xbb, 0xcc]);

        let restored: SerdeVec<u8> = BinarySD::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(restored, v);
    }

    #[test]
    fn empty_sequence() {
        let v: SerdeVec<u16> = SerdeVec(vec![]);
        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, &v).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00]);

        let restored: SerdeVec<u16> = BinarySD::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(restored.0, Vec::<u16>::new());
    }

    #[test]
    fn overlong_count_is_rejected_before_allocation() {
        // count claims 0xffff elements but carries none
        let bytes = vec![0xffu8, 0xff];
        let restored: Result<SerdeVec<u8>, _> = BinarySD::deserialize(bytes.as_slice());
        assert!(restored.is_err());
    }
}
