//! Method shorty signatures and guest calling conventions.
//!
//! A shorty is the compact signature used by the runtime: the first character
//! is the return type, the rest are argument types.
//!
//! | char | type      |
//! |------|-----------|
//! | `V`  | void (return only) |
//! | `Z`  | boolean   |
//! | `B`  | byte      |
//! | `C`  | char      |
//! | `S`  | short     |
//! | `I`  | int       |
//! | `J`  | long      |
//! | `F`  | float     |
//! | `D`  | double    |
//! | `L`  | reference |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::core::transport::Bitness;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortyError {
    #[error("empty shorty")]
    Empty,

    #[error("invalid shorty character `{ch}` at position {pos}")]
    InvalidChar { ch: char, pos: usize },

    #[error("`V` is only valid as a return type (position {0})")]
    VoidArgument(usize),
}

/// Argument or return values disagreeing with a shorty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("expected {expected} arguments, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("argument {index}: expected `{expected}`, got `{found}`")]
    ArgumentType {
        index: usize,
        expected: ShortyType,
        found: ShortyType,
    },

    #[error("return value: expected `{expected}`, got `{found}`")]
    ReturnType {
        expected: ShortyType,
        found: ShortyType,
    },

    #[error("expected {expected} guest words, got {found}")]
    WordCount { expected: usize, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortyType {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ShortyType {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'V' => ShortyType::Void,
            'Z' => ShortyType::Boolean,
            'B' => ShortyType::Byte,
            'C' => ShortyType::Char,
            'S' => ShortyType::Short,
            'I' => ShortyType::Int,
            'J' => ShortyType::Long,
            'F' => ShortyType::Float,
            'D' => ShortyType::Double,
            'L' => ShortyType::Reference,
            _ => return None,
        })
    }

    pub fn as_char(&self) -> char {
        match self {
            ShortyType::Void => 'V',
            ShortyType::Boolean => 'Z',
            ShortyType::Byte => 'B',
            ShortyType::Char => 'C',
            ShortyType::Short => 'S',
            ShortyType::Int => 'I',
            ShortyType::Long => 'J',
            ShortyType::Float => 'F',
            ShortyType::Double => 'D',
            ShortyType::Reference => 'L',
        }
    }

    /// 64-bit values, which take two words on 32-bit guests.
    pub fn is_wide(&self) -> bool {
        matches!(self, ShortyType::Long | ShortyType::Double)
    }
}

impl fmt::Display for ShortyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A parsed shorty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shorty {
    ret: ShortyType,
    args: Vec<ShortyType>,
}

impl Shorty {
    pub fn parse(s: &str) -> Result<Self, ShortyError> {
        let mut chars = s.chars().enumerate();
        let (_, first) = chars.next().ok_or(ShortyError::Empty)?;
        let ret = ShortyType::from_char(first).ok_or(ShortyError::InvalidChar { ch: first, pos: 0 })?;

        let mut args = Vec::new();
        for (pos, ch) in chars {
            match ShortyType::from_char(ch) {
                Some(ShortyType::Void) => return Err(ShortyError::VoidArgument(pos)),
                Some(ty) => args.push(ty),
                None => return Err(ShortyError::InvalidChar { ch, pos }),
            }
        }
        Ok(Shorty { ret, args })
    }

    /// A signature taking no arguments.
    pub fn nullary(ret: ShortyType) -> Self {
        Shorty {
            ret,
            args: Vec::new(),
        }
    }

    pub fn ret(&self) -> ShortyType {
        self.ret
    }

    pub fn args(&self) -> &[ShortyType] {
        &self.args
    }
}

impl FromStr for Shorty {
    type Err = ShortyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Shorty::parse(s)
    }
}

impl fmt::Display for Shorty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ret)?;
        for arg in &self.args {
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// A typed argument or return value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Opaque reference (pointer-sized handle).
    Reference(u64),
}

impl Value {
    pub fn kind(&self) -> ShortyType {
        match self {
            Value::Void => ShortyType::Void,
            Value::Boolean(_) => ShortyType::Boolean,
            Value::Byte(_) => ShortyType::Byte,
            Value::Char(_) => ShortyType::Char,
            Value::Short(_) => ShortyType::Short,
            Value::Int(_) => ShortyType::Int,
            Value::Long(_) => ShortyType::Long,
            Value::Float(_) => ShortyType::Float,
            Value::Double(_) => ShortyType::Double,
            Value::Reference(_) => ShortyType::Reference,
        }
    }

    /// Raw 64-bit pattern; narrow integers are sign or zero extended.
    fn to_bits(self) -> u64 {
        match self {
            Value::Void => 0,
            Value::Boolean(b) => b as u64,
            Value::Byte(v) => v as i64 as u64,
            Value::Char(v) => v as u64,
            Value::Short(v) => v as i64 as u64,
            Value::Int(v) => v as i64 as u64,
            Value::Long(v) => v as u64,
            Value::Float(v) => v.to_bits() as u64,
            Value::Double(v) => v.to_bits(),
            Value::Reference(v) => v,
        }
    }

    /// Value of type `ty` held in the raw bit pattern `bits`.
    pub fn from_bits(ty: ShortyType, bits: u64) -> Value {
        match ty {
            ShortyType::Void => Value::Void,
            ShortyType::Boolean => Value::Boolean(bits & 0xff != 0),
            ShortyType::Byte => Value::Byte(bits as u8 as i8),
            ShortyType::Char => Value::Char(bits as u16),
            ShortyType::Short => Value::Short(bits as u16 as i16),
            ShortyType::Int => Value::Int(bits as u32 as i32),
            ShortyType::Long => Value::Long(bits as i64),
            ShortyType::Float => Value::Float(f32::from_bits(bits as u32)),
            ShortyType::Double => Value::Double(f64::from_bits(bits)),
            ShortyType::Reference => Value::Reference(bits),
        }
    }
}

/// Instruction set of the guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestAbi {
    Arm,
    Arm64,
    X86,
    X86_64,
    Riscv64,
}

impl GuestAbi {
    pub fn bitness(&self) -> Bitness {
        match self {
            GuestAbi::Arm | GuestAbi::X86 => Bitness::B32,
            GuestAbi::Arm64 | GuestAbi::X86_64 | GuestAbi::Riscv64 => Bitness::B64,
        }
    }

    /// AAPCS places 64-bit arguments at an even word index.
    pub fn aligns_wide_args(&self) -> bool {
        matches!(self, GuestAbi::Arm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestAbi::Arm => "arm",
            GuestAbi::Arm64 => "arm64",
            GuestAbi::X86 => "x86",
            GuestAbi::X86_64 => "x86_64",
            GuestAbi::Riscv64 => "riscv64",
        }
    }

    /// Argument words for `shorty` under this ABI.
    pub fn marshal_args(&self, shorty: &Shorty, args: &[Value]) -> Result<Vec<u64>, MarshalError> {
        check_args(shorty, args)?;

        let mut words = Vec::with_capacity(args.len() * 2);
        for arg in args {
            let bits = arg.to_bits();
            match self.bitness() {
                Bitness::B64 => words.push(bits),
                Bitness::B32 if arg.kind().is_wide() => {
                    if self.aligns_wide_args() && words.len() % 2 == 1 {
                        words.push(0);
                    }
                    words.push(bits & 0xffff_ffff);
                    words.push(bits >> 32);
                }
                Bitness::B32 => words.push(bits & 0xffff_ffff),
            }
        }
        Ok(words)
    }

    /// Inverse of [`GuestAbi::marshal_args`].
    pub fn unmarshal_args(&self, shorty: &Shorty, words: &[u64]) -> Result<Vec<Value>, MarshalError> {
        let expected = self.arg_words(shorty);
        if words.len() != expected {
            return Err(MarshalError::WordCount {
                expected,
                found: words.len(),
            });
        }

        let mut values = Vec::with_capacity(shorty.args().len());
        let mut i = 0;
        for ty in shorty.args() {
            let bits = match self.bitness() {
                Bitness::B64 => {
                    i += 1;
                    words[i - 1]
                }
                Bitness::B32 if ty.is_wide() => {
                    if self.aligns_wide_args() && i % 2 == 1 {
                        i += 1;
                    }
                    i += 2;
                    (words[i - 2] & 0xffff_ffff) | (words[i - 1] << 32)
                }
                Bitness::B32 => {
                    i += 1;
                    words[i - 1] & 0xffff_ffff
                }
            };
            values.push(Value::from_bits(*ty, bits));
        }
        Ok(values)
    }

    /// Number of argument words `shorty` takes under this ABI.
    pub fn arg_words(&self, shorty: &Shorty) -> usize {
        let mut n = 0;
        for ty in shorty.args() {
            match self.bitness() {
                Bitness::B64 => n += 1,
                Bitness::B32 if ty.is_wide() => {
                    if self.aligns_wide_args() && n % 2 == 1 {
                        n += 1;
                    }
                    n += 2;
                }
                Bitness::B32 => n += 1,
            }
        }
        n
    }

    /// Return registers for `value`: empty for void, two words for wide values on 32-bit guests.
    pub fn encode_return(&self, value: Value) -> Vec<u64> {
        let bits = value.to_bits();
        match (value.kind(), self.bitness()) {
            (ShortyType::Void, _) => Vec::new(),
            (ty, Bitness::B32) if ty.is_wide() => vec![bits & 0xffff_ffff, bits >> 32],
            (_, Bitness::B32) => vec![bits & 0xffff_ffff],
            (_, Bitness::B64) => vec![bits],
        }
    }

    pub fn decode_return(&self, ty: ShortyType, words: &[u64]) -> Result<Value, MarshalError> {
        let expected = match (ty, self.bitness()) {
            (ShortyType::Void, _) => 0,
            (t, Bitness::B32) if t.is_wide() => 2,
            _ => 1,
        };
        if words.len() != expected {
            return Err(MarshalError::WordCount {
                expected,
                found: words.len(),
            });
        }
        let bits = match expected {
            0 => 0,
            1 => words[0],
            _ => (words[0] & 0xffff_ffff) | (words[1] << 32),
        };
        Ok(Value::from_bits(ty, bits))
    }
}

impl fmt::Display for GuestAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuestAbi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm" | "armeabi-v7a" => Ok(GuestAbi::Arm),
            "arm64" | "arm64-v8a" => Ok(GuestAbi::Arm64),
            "x86" => Ok(GuestAbi::X86),
            "x86_64" => Ok(GuestAbi::X86_64),
            "riscv64" => Ok(GuestAbi::Riscv64),
            _ => Err(format!("unknown instruction set `{}`", s)),
        }
    }
}

/// Check `args` against the argument list of `shorty`.
pub(crate) fn check_args(shorty: &Shorty, args: &[Value]) -> Result<(), MarshalError> {
    if args.len() != shorty.args().len() {
        return Err(MarshalError::Arity {
            expected: shorty.args().len(),
            found: args.len(),
        });
    }
    for (index, (arg, expected)) in args.iter().zip(shorty.args()).enumerate() {
        if arg.kind() != *expected {
            return Err(MarshalError::ArgumentType {
                index,
                expected: *expected,
                found: arg.kind(),
            });
        }
    }
    Ok(())
}
