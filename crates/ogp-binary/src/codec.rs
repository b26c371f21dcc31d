//! Byte codecs: the one place where byte order is decided.
//!
//! Every algorithm in this workspace is generic over a [`ByteCodec`] chosen
//! once per session. [`Direct`] keeps native order; [`Reversed`] swaps every
//! multi-byte primitive on both read and write, header fields included.
//! Single-byte values pass through unchanged in both.

use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// Byte-order capability all encoders and decoders are parameterized over.
pub trait ByteCodec: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// The runtime tag of this codec.
    const ORDER: ByteOrder;

    /// Arrange the native-order bytes of a primitive into wire order (and
    /// back: the operation is an involution).
    fn arrange<const N: usize>(bytes: [u8; N]) -> [u8; N];
}

/// Native byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Direct;

/// Byte-swapped order, for data written on a machine of the other endianness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Reversed;

impl ByteCodec for Direct {
    const ORDER: ByteOrder = ByteOrder::Direct;

    #[inline]
    fn arrange<const N: usize>(bytes: [u8; N]) -> [u8; N] {
        bytes
    }
}

impl ByteCodec for Reversed {
    const ORDER: ByteOrder = ByteOrder::Reversed;

    #[inline]
    fn arrange<const N: usize>(mut bytes: [u8; N]) -> [u8; N] {
        bytes.reverse();
        bytes
    }
}

/// Runtime selector for a codec, as found in configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Direct,
    Reversed,
}

impl ByteOrder {
    /// The order needed to read data written in little (or big) endian.
    pub fn for_data(little_endian: bool) -> Self {
        if little_endian == cfg!(target_endian = "little") {
            Self::Direct
        } else {
            Self::Reversed
        }
    }

    pub fn is_reversed(&self) -> bool {
        matches!(self, Self::Reversed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Reversed => "reversed",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-width value that can be read from and written to wire bytes.
pub trait Primitive: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const LENGTH: usize;

    /// Decode from the first `LENGTH` bytes of `bytes`.
    ///
    /// Callers guarantee the slice is long enough; every public accessor
    /// bounds-checks before delegating here.
    fn decode<C: ByteCodec>(bytes: &[u8]) -> Self;

    /// Encode into the first `LENGTH` bytes of `out`.
    fn encode<C: ByteCodec>(self, out: &mut [u8]);
}

macro_rules! numeric_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Primitive for $t {
                const LENGTH: usize = size_of::<$t>();

                #[inline]
                fn decode<C: ByteCodec>(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::LENGTH]);
                    <$t>::from_ne_bytes(C::arrange(raw))
                }

                #[inline]
                fn encode<C: ByteCodec>(self, out: &mut [u8]) {
                    out[..Self::LENGTH].copy_from_slice(&C::arrange(self.to_ne_bytes()));
                }
            }
        )*
    };
}

numeric_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Primitive for bool {
    const LENGTH: usize = 1;

    #[inline]
    fn decode<C: ByteCodec>(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn encode<C: ByteCodec>(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip<C: ByteCodec, T: Primitive>(value: T) -> T {
        let mut buf = [0u8; 8];
        value.encode::<C>(&mut buf);
        T::decode::<C>(&buf)
    }

    #[test]
    fn direct_is_native_order() {
        let mut buf = [0u8; 4];
        0x0102_0304u32.encode::<Direct>(&mut buf);
        assert_eq!(buf, 0x0102_0304u32.to_ne_bytes());
    }

    #[test]
    fn reversed_swaps_multi_byte_values() {
        let mut buf = [0u8; 4];
        0x0102_0304u32.encode::<Reversed>(&mut buf);
        assert_eq!(buf, 0x0102_0304u32.swap_bytes().to_ne_bytes());
    }

    #[test]
    fn single_bytes_pass_through() {
        let mut buf = [0u8; 1];
        0x7fu8.encode::<Reversed>(&mut buf);
        assert_eq!(buf, [0x7f]);
        true.encode::<Reversed>(&mut buf);
        assert_eq!(buf, [1]);
        assert!(bool::decode::<Reversed>(&[9]));
    }

    #[test]
    fn byte_order_selection() {
        let native_little = cfg!(target_endian = "little");
        assert_eq!(ByteOrder::for_data(native_little), ByteOrder::Direct);
        assert_eq!(ByteOrder::for_data(!native_little), ByteOrder::Reversed);
        assert_eq!(Direct::ORDER, ByteOrder::Direct);
        assert!(Reversed::ORDER.is_reversed());
    }

    #[test]
    fn nan_payloads_survive_both_orders() {
        let quiet = f64::from_bits(0x7ff8_0000_0000_0001);
        let signalling = f32::from_bits(0x7f80_0001);
        assert_eq!(roundtrip::<Reversed, f64>(quiet).to_bits(), quiet.to_bits());
        assert_eq!(roundtrip::<Direct, f64>(quiet).to_bits(), quiet.to_bits());
        assert_eq!(roundtrip::<Reversed, f32>(signalling).to_bits(), signalling.to_bits());
    }

    macro_rules! roundtrips_in_both_orders {
        ($($name:ident: $t:ty),* $(,)?) => {
            proptest! {
                $(
                    #[test]
                    fn $name(v in any::<$t>()) {
                        prop_assert_eq!(roundtrip::<Reversed, $t>(v), v);
                        prop_assert_eq!(roundtrip::<Direct, $t>(v), v);
                    }
                )*
            }
        };
    }

    roundtrips_in_both_orders!(
        roundtrip_bool: bool,
        roundtrip_u8: u8,
        roundtrip_i8: i8,
        roundtrip_u16: u16,
        roundtrip_i16: i16,
        roundtrip_u32: u32,
        roundtrip_i32: i32,
        roundtrip_u64: u64,
        roundtrip_i64: i64,
    );

    macro_rules! reversed_swaps_bytes {
        ($($name:ident: $t:ty),* $(,)?) => {
            proptest! {
                $(
                    #[test]
                    fn $name(v in any::<$t>()) {
                        let mut reversed = [0u8; size_of::<$t>()];
                        v.encode::<Reversed>(&mut reversed);
                        prop_assert_eq!(reversed, v.swap_bytes().to_ne_bytes());
                    }
                )*
            }
        };
    }

    reversed_swaps_bytes!(
        reversed_swaps_i8: i8,
        reversed_swaps_u16: u16,
        reversed_swaps_i16: i16,
        reversed_swaps_i32: i32,
        reversed_swaps_i64: i64,
    );

    proptest! {

        #[test]
        fn reversed_roundtrip_f64_bits(bits in any::<u64>()) {
            let v = f64::from_bits(bits);
            prop_assert_eq!(roundtrip::<Reversed, f64>(v).to_bits(), bits);
        }

        #[test]
        fn reversed_roundtrip_f32_bits(bits in any::<u32>()) {
            let v = f32::from_bits(bits);
            prop_assert_eq!(roundtrip::<Reversed, f32>(v).to_bits(), bits);
        }

        #[test]
        fn reversed_is_swap_of_direct(v in any::<u32>()) {
            let mut direct = [0u8; 4];
            let mut reversed = [0u8; 4];
            v.encode::<Direct>(&mut direct);
            v.encode::<Reversed>(&mut reversed);
            direct.reverse();
            prop_assert_eq!(direct, reversed);
        }
    }
}
