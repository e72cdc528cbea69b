// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::enc::write::Writer;

/// Hard cap on a single encoded value. Anything larger than a full block
/// plus headroom is either corrupt or hostile.
pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn encode<W: Writer, T: bincode::Encode>(
    writer: W,
    val: &T,
) -> Result<(), bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_into_writer(val, writer, config)
}

pub fn decode<T: bincode::Decode>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .skip_fixed_array_length()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}

#[inline]
pub fn decode_fixed_u32<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u32, bincode::error::DecodeError> {
    let v: [u8; 4] = bincode::Decode::decode(decoder)?;
    Ok(u32::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u32<E: bincode::enc::Encoder>(
    v: u32,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[inline]
pub fn decode_fixed_u64<D: bincode::de::Decoder>(
    decoder: &mut D,
) -> Result<u64, bincode::error::DecodeError> {
    let v: [u8; 8] = bincode::Decode::decode(decoder)?;
    Ok(u64::from_le_bytes(v))
}

#[inline]
pub fn encode_fixed_u64<E: bincode::enc::Encoder>(
    v: u64,
    encoder: &mut E,
) -> Result<(), bincode::error::EncodeError> {
    bincode::Encode::encode(&v.to_le_bytes(), encoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{Decode, Encode};

    #[derive(Encode, Decode)]
    enum TestEnum {
        A(u32),
        B(u32),
    }

    struct Wrapper(u64);

    impl Encode for Wrapper {
        fn encode<E: bincode::enc::Encoder>(
            &self,
            encoder: &mut E,
        ) -> core::result::Result<(), bincode::error::EncodeError> {
            encode_fixed_u64(self.0, encoder)
        }
    }

    impl Decode for Wrapper {
        fn decode<D: bincode::de::Decoder>(
            decoder: &mut D,
        ) -> core::result::Result<Self, bincode::error::DecodeError> {
            Ok(Self(decode_fixed_u64(decoder)?))
        }
    }

    #[test]
    fn test_single_byte_enum_variant() {
        let encoded = encode_to_vec(&TestEnum::B(0)).unwrap();
        assert_eq!(encoded.as_slice(), &[1, 0]);
    }

    #[test]
    fn test_single_byte_u8() {
        let byte: u8 = 0xff;
        let encoded = encode_to_vec(&byte).unwrap();
        assert_eq!(encoded.as_slice(), &[0xff]);
    }

    #[test]
    fn test_single_byte_vec_u8() {
        let input: Vec<u8> = vec![0xff, 0xff];
        let encoded = encode_to_vec(&input).unwrap();
        assert_eq!(encoded.as_slice(), &[0x02, 0xff, 0xff]);
    }

    #[test]
    fn test_fixed_array_skips_length() {
        let input: [u8; 4] = [1, 2, 3, 4];
        let encoded = encode_to_vec(&input).unwrap();
        assert_eq!(encoded.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn encode_decode_fixed_u64() {
        let encoded = encode_to_vec(&Wrapper(0x0102_0304_0506_0708)).unwrap();
        assert_eq!(
            encoded.as_slice(),
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
        let decoded: Wrapper = decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded.0, 0x0102_0304_0506_0708);
    }
}
