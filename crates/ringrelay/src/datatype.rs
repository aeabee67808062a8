//! Element types that can travel through the fabric.
//!
//! Payloads are carried as little-endian byte strings so that a receive can
//! decode into any buffer of the same element type.

/// A fixed-size numeric or character element of a transfer buffer.
pub trait Element: Copy + Send + 'static {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Appends the little-endian encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decodes one element from exactly `Self::SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Encodes a buffer into a boxed payload.
pub(crate) fn encode_slice<T: Element>(data: &[T]) -> Box<[u8]> {
    let mut out = Vec::with_capacity(data.len() * T::SIZE);
    for item in data {
        item.encode(&mut out);
    }
    out.into_boxed_slice()
}

/// Number of `T` elements carried by `payload`, or `None` when the payload
/// is not a whole number of them.
#[inline]
pub(crate) fn element_count<T: Element>(payload: &[u8]) -> Option<usize> {
    (payload.len() % T::SIZE == 0).then(|| payload.len() / T::SIZE)
}

/// Decodes `payload` into the front of `out`. Caller checks capacity first.
pub(crate) fn decode_into<T: Element>(payload: &[u8], out: &mut [T]) -> usize {
    let mut count = 0;
    for (chunk, slot) in payload.chunks_exact(T::SIZE).zip(out.iter_mut()) {
        *slot = T::decode(chunk);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_payload_decodes_in_order() {
        let payload = encode_slice(&[1.5f64, -2.0, 3.25]);
        assert_eq!(payload.len(), 24);
        assert_eq!(element_count::<f64>(&payload), Some(3));
        assert_eq!(element_count::<u32>(&payload[..6]), None);

        let mut out = [0.0f64; 4];
        assert_eq!(decode_into(&payload, &mut out), 3);
        assert_eq!(out, [1.5, -2.0, 3.25, 0.0]);
    }

    #[test]
    fn test_bytes_are_identity_encoded() {
        let payload = encode_slice(b"hello there\0".as_slice());
        assert_eq!(&payload[..], b"hello there\0");
    }
}
