//! Scalar element types the executor can move through a fabric

use std::fmt::Debug;

use num_traits::{NumCast, ToPrimitive};
use tilefabric_core::{DType, Scalar};

/// A host scalar type matching one [`DType`]
pub trait Element: Copy + Debug + Default + PartialEq + PartialOrd + Send + Sync + NumCast + ToPrimitive + 'static {
    const DTYPE: DType;

    /// Convert a declared constant, `None` when it does not fit.
    fn from_scalar(value: Scalar) -> Option<Self> {
        match value {
            Scalar::Int(v) => <Self as NumCast>::from(v),
            Scalar::Float(v) => <Self as NumCast>::from(v),
        }
    }

    fn to_scalar(self) -> Scalar {
        if Self::DTYPE.is_float() {
            Scalar::Float(self.to_f64().unwrap_or(f64::NAN))
        } else {
            Scalar::Int(self.to_i64().unwrap_or_default())
        }
    }
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),+ $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )+
    };
}

impl_element! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    f32 => F32,
}
