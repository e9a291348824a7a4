//! Key field table.
//!
//! Every stage key is declared once through [`stage_key!`], which generates
//! the typed struct together with a static [`KeyField`] table. Encoding,
//! decoding and key diffs are all driven by that table, so the packed
//! layout and the typed view cannot drift apart.

use crate::state::{CompareFunc, TessPrimitive};

use super::KEY_WORDS;

/// Location of one field inside the packed key words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub name: &'static str,
    pub word: u8,
    pub shift: u8,
    pub bits: u8,
}

impl KeyField {
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> u32 {
        if self.bits >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bits) - 1
        }
    }

    #[inline]
    #[must_use]
    pub fn read(&self, words: &[u32; KEY_WORDS]) -> u32 {
        (words[self.word as usize] >> self.shift) & self.mask()
    }

    #[inline]
    pub fn write(&self, words: &mut [u32; KEY_WORDS], value: u32) {
        debug_assert!(
            value & !self.mask() == 0,
            "key field {} does not fit {} bits (value {value})",
            self.name,
            self.bits
        );
        let word = &mut words[self.word as usize];
        *word = (*word & !(self.mask() << self.shift)) | ((value & self.mask()) << self.shift);
    }
}

/// Conversion between typed key fields and their packed bits.
pub trait KeyValue: Copy {
    fn to_bits(self) -> u32;
    fn from_bits(bits: u32) -> Self;
}

impl KeyValue for bool {
    #[inline]
    fn to_bits(self) -> u32 {
        u32::from(self)
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits != 0
    }
}

impl KeyValue for u8 {
    #[inline]
    fn to_bits(self) -> u32 {
        u32::from(self)
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits as u8
    }
}

impl KeyValue for u16 {
    #[inline]
    fn to_bits(self) -> u32 {
        u32::from(self)
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits as u16
    }
}

impl KeyValue for u32 {
    #[inline]
    fn to_bits(self) -> u32 {
        self
    }
    #[inline]
    fn from_bits(bits: u32) -> Self {
        bits
    }
}

impl KeyValue for CompareFunc {
    fn to_bits(self) -> u32 {
        self as u32
    }
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Self::Never,
            1 => Self::Less,
            2 => Self::Equal,
            3 => Self::LessEqual,
            4 => Self::Greater,
            5 => Self::NotEqual,
            6 => Self::GreaterEqual,
            _ => Self::Always,
        }
    }
}

impl KeyValue for TessPrimitive {
    fn to_bits(self) -> u32 {
        self as u32
    }
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Quads,
            2 => Self::Isolines,
            _ => Self::Triangles,
        }
    }
}

/// Declares a stage key struct and its field table.
///
/// Each field is `name: Type = [word, shift, bits]`.
macro_rules! stage_key {
    (
        $(#[$meta:meta])*
        struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty = [$word:literal, $shift:literal, $bits:literal]
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            pub const FIELDS: &'static [$crate::key::fields::KeyField] = &[
                $(
                    $crate::key::fields::KeyField {
                        name: stringify!($field),
                        word: $word,
                        shift: $shift,
                        bits: $bits,
                    },
                )*
            ];

            #[allow(unused_assignments, unused_mut, unused_variables)]
            pub(crate) fn encode(&self, words: &mut [u32; $crate::key::KEY_WORDS]) {
                let mut i = 0;
                $(
                    Self::FIELDS[i].write(
                        words,
                        $crate::key::fields::KeyValue::to_bits(self.$field),
                    );
                    i += 1;
                )*
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            pub(crate) fn decode(words: &[u32; $crate::key::KEY_WORDS]) -> Self {
                let mut i = 0;
                Self {
                    $(
                        $field: {
                            let bits = Self::FIELDS[i].read(words);
                            i += 1;
                            <$ty as $crate::key::fields::KeyValue>::from_bits(bits)
                        },
                    )*
                }
            }
        }
    };
}

pub(crate) use stage_key;
