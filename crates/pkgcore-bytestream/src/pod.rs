//! Typed little-endian read/write support for POD integers.

/// A plain-old-data integer type that can be read/written little-endian
/// over a [`crate::ByteStream`]. Implemented for the primitive integer and
/// float types spec §4.2 calls out as "typed `read<T>`/`write<T>`".
pub trait Pod: Sized + Copy {
    const SIZE: usize;
    fn from_le_bytes(bytes: &[u8]) -> Self;
    fn to_le_bytes_vec(self) -> Vec<u8>;
}

macro_rules! impl_pod_int {
    ($ty:ty) => {
        impl Pod for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn from_le_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(buf)
            }

            fn to_le_bytes_vec(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
        }
    };
}

impl_pod_int!(u8);
impl_pod_int!(u16);
impl_pod_int!(u32);
impl_pod_int!(u64);
impl_pod_int!(i8);
impl_pod_int!(i16);
impl_pod_int!(i32);
impl_pod_int!(i64);
impl_pod_int!(f32);
impl_pod_int!(f64);
