//! Function signatures packed four bits per parameter
//!
//! An argument-format string has one character per parameter. The packed
//! form holds up to sixteen parameters, first parameter in the highest
//! occupied nibble.

use crate::error::{Error, Result};
use crate::value::{StrandType, StrandValue};
use smallvec::SmallVec;
use std::fmt;

/// Maximum number of parameters a signature can describe
pub const MAX_PARAMS: usize = 16;

/// Packed function signature
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Funcsig(u64);

fn nibble_for(c: char) -> Option<u8> {
    Some(match c {
        'i' => 0x1,
        'd' => 0x2,
        'b' => 0x3,
        's' => 0x4,
        'I' => 0x5,
        'u' => 0x6,
        'U' => 0x7,
        'F' => 0xC,
        'V' | 'v' => 0xD,
        'B' | 'P' | 'p' => 0xE,
        'C' => 0xF,
        _ => return None,
    })
}

fn type_for(nibble: u8) -> Option<StrandType> {
    Some(match nibble {
        0x1 => StrandType::Int,
        0x2 => StrandType::Double,
        0x3 => StrandType::Boolean,
        0x4 => StrandType::String,
        0x5 => StrandType::Int64,
        0x6 => StrandType::Uint,
        0x7 => StrandType::Uint64,
        0xC => StrandType::FuncPtr,
        0xD => StrandType::VoidPtr,
        0xE => StrandType::BundlePtr,
        0xF => StrandType::ConstBundlePtr,
        _ => return None,
    })
}

fn symbol_for(nibble: u8) -> &'static str {
    match nibble {
        0x1 => "INT",
        0x2 => "DOUBLE",
        0x3 => "BOOL",
        0x4 => "STRING",
        0x5 => "INT64",
        0x6 => "UINT",
        0x7 => "UINT64",
        0xC => "FUNCP",
        0xD => "VOIDP",
        0xE => "BUNDLEP",
        0xF => "CONST_BUNDLEP",
        _ => "?",
    }
}

impl Funcsig {
    /// Signature of a function taking no parameters
    pub const VOID: Funcsig = Funcsig(0);

    /// Parse an argument-format string
    ///
    /// `""` and `"void"` both describe a function without parameters.
    pub fn from_args_fmt(args_fmt: &str) -> Result<Self> {
        if args_fmt.is_empty() || args_fmt == "void" {
            return Ok(Funcsig::VOID);
        }
        let count = args_fmt.chars().count();
        if count > MAX_PARAMS {
            return Err(Error::InvalidFormat(format!(
                "args_fmt '{}' has {} parameters, max is {}",
                args_fmt, count, MAX_PARAMS
            )));
        }
        let mut sig = 0u64;
        for c in args_fmt.chars() {
            let nib = nibble_for(c).ok_or_else(|| {
                Error::InvalidFormat(format!("bad type '{}' in args_fmt '{}'", c, args_fmt))
            })?;
            sig = (sig << 4) | nib as u64;
        }
        Ok(Funcsig(sig))
    }

    /// Raw packed value
    pub fn bits(&self) -> u64 {
        self.0
    }

    fn nibbles(&self) -> SmallVec<[u8; MAX_PARAMS]> {
        (0..MAX_PARAMS)
            .rev()
            .map(|i| ((self.0 >> (i * 4)) & 0xF) as u8)
            .skip_while(|n| *n == 0)
            .collect()
    }

    /// Number of parameters
    pub fn param_count(&self) -> usize {
        self.nibbles().len()
    }

    /// Parameter types in call order
    pub fn param_types(&self) -> Vec<StrandType> {
        self.nibbles().into_iter().filter_map(type_for).collect()
    }

    /// Argument-format string (`"void"` when there are no parameters)
    pub fn to_args_fmt(&self) -> String {
        if self.0 == 0 {
            return "void".to_string();
        }
        self.param_types().iter().map(|t| t.as_char()).collect()
    }

    /// Symbolic form, e.g. `INT_DOUBLE`
    pub fn to_symstring(&self) -> String {
        if self.0 == 0 {
            return "void".to_string();
        }
        self.nibbles()
            .into_iter()
            .map(symbol_for)
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Human-readable parameter list, e.g. `int, double`
    pub fn to_param_string(&self) -> String {
        if self.0 == 0 {
            return "void".to_string();
        }
        self.param_types()
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check supplied argument values against the signature
    pub fn check_args(&self, args: &[StrandValue]) -> Result<()> {
        let types = self.param_types();
        if types.len() != args.len() {
            return Err(Error::InvalidFormat(format!(
                "signature {} expects {} args, got {}",
                self.to_args_fmt(),
                types.len(),
                args.len()
            )));
        }
        for (i, (t, v)) in types.iter().zip(args).enumerate() {
            if *t != v.strand_type() {
                return Err(Error::InvalidFormat(format!(
                    "arg {} should be {}, got {}",
                    i,
                    t,
                    v.strand_type()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Funcsig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Funcsig({:#x} {})", self.0, self.to_args_fmt())
    }
}
