//! Strand values and types
//!
//! This module defines:
//! - StrandType: the closed set of strand types plus the two deferred kinds
//!   (proxied and bundleptr-or-const)
//! - StrandValue: tagged union holding one element of a strand
//! - Strand: a named slot's contents, scalar or array, with type lock-in
//!
//! ## Type Rules
//!
//! - A strand's effective type is fixed by its declaration, or, for proxied
//!   strands, by the first successful write.
//! - No implicit coercions: `Int(1)` is never accepted by a `Uint` strand.
//! - Scalars are one-element arrays internally.
//! - Pointer-like types and strings may hold a null element.

use crate::error::{Error, Result};
use crate::types::BundleId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Type of a strand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrandType {
    /// 32-bit signed integer (`i`)
    Int,
    /// 64-bit float (`d`)
    Double,
    /// Boolean (`b`)
    Boolean,
    /// UTF-8 string (`s`)
    String,
    /// 64-bit signed integer (`I`)
    Int64,
    /// 32-bit unsigned integer (`u`)
    Uint,
    /// 64-bit unsigned integer (`U`)
    Uint64,
    /// Opaque pointer (`V`)
    VoidPtr,
    /// Function reference (`F`)
    FuncPtr,
    /// Owned sub-bundle (`B`)
    BundlePtr,
    /// Non-owning bundle reference (`C`)
    ConstBundlePtr,
    /// Either `B` or `C`, resolved on first write (`O`)
    BundlePtrOptConst,
    /// Type deferred to first write or a sibling `.strand_type` strand (`*`)
    Proxied,
}

impl StrandType {
    /// Parse a type character
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'i' => StrandType::Int,
            'd' => StrandType::Double,
            'b' => StrandType::Boolean,
            's' => StrandType::String,
            'I' => StrandType::Int64,
            'u' => StrandType::Uint,
            'U' => StrandType::Uint64,
            'V' => StrandType::VoidPtr,
            'F' => StrandType::FuncPtr,
            'B' => StrandType::BundlePtr,
            'C' => StrandType::ConstBundlePtr,
            'O' => StrandType::BundlePtrOptConst,
            '*' | 'P' => StrandType::Proxied,
            _ => return None,
        })
    }

    /// Type character used in bundledefs and argument formats
    pub fn as_char(&self) -> char {
        match self {
            StrandType::Int => 'i',
            StrandType::Double => 'd',
            StrandType::Boolean => 'b',
            StrandType::String => 's',
            StrandType::Int64 => 'I',
            StrandType::Uint => 'u',
            StrandType::Uint64 => 'U',
            StrandType::VoidPtr => 'V',
            StrandType::FuncPtr => 'F',
            StrandType::BundlePtr => 'B',
            StrandType::ConstBundlePtr => 'C',
            StrandType::BundlePtrOptConst => 'O',
            StrandType::Proxied => '*',
        }
    }

    /// Lowercase type name
    pub fn name(&self) -> &'static str {
        match self {
            StrandType::Int => "int",
            StrandType::Double => "double",
            StrandType::Boolean => "boolean",
            StrandType::String => "string",
            StrandType::Int64 => "int64",
            StrandType::Uint => "uint",
            StrandType::Uint64 => "uint64",
            StrandType::VoidPtr => "voidptr",
            StrandType::FuncPtr => "funcptr",
            StrandType::BundlePtr => "bundleptr",
            StrandType::ConstBundlePtr => "const_bundleptr",
            StrandType::BundlePtrOptConst => "bundleptr_opt_const",
            StrandType::Proxied => "proxied",
        }
    }

    /// True for the two deferred kinds whose concrete type is chosen later
    pub fn is_deferred(&self) -> bool {
        matches!(self, StrandType::Proxied | StrandType::BundlePtrOptConst)
    }

    /// True for types whose elements may be null
    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            StrandType::String
                | StrandType::VoidPtr
                | StrandType::FuncPtr
                | StrandType::BundlePtr
                | StrandType::ConstBundlePtr
                | StrandType::BundlePtrOptConst
        )
    }

    /// True if a value of concrete type `actual` may be stored in a strand
    /// declared with this type
    pub fn accepts(&self, actual: StrandType) -> bool {
        match self {
            StrandType::Proxied => !actual.is_deferred(),
            StrandType::BundlePtrOptConst => {
                matches!(actual, StrandType::BundlePtr | StrandType::ConstBundlePtr)
            }
            t => *t == actual,
        }
    }
}

impl fmt::Display for StrandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One element of a strand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrandValue {
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Bool(bool),
    /// String, or null
    String(Option<String>),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit unsigned integer
    Uint(u32),
    /// 64-bit unsigned integer
    Uint64(u64),
    /// Opaque pointer-sized handle, or null
    VoidPtr(Option<u64>),
    /// Name of a registered function, or null
    FuncPtr(Option<String>),
    /// Owned sub-bundle, or null
    BundlePtr(Option<BundleId>),
    /// Non-owning bundle reference, or null
    ConstBundlePtr(Option<BundleId>),
}

impl PartialEq for StrandValue {
    fn eq(&self, other: &Self) -> bool {
        use StrandValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            // IEEE-754: NaN != NaN, -0.0 == 0.0
            (Double(a), Double(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Uint64(a), Uint64(b)) => a == b,
            (VoidPtr(a), VoidPtr(b)) => a == b,
            (FuncPtr(a), FuncPtr(b)) => a == b,
            (BundlePtr(a), BundlePtr(b)) => a == b,
            (ConstBundlePtr(a), ConstBundlePtr(b)) => a == b,
            // Different types are never equal
            _ => false,
        }
    }
}

impl StrandValue {
    /// Concrete type of this value
    pub fn strand_type(&self) -> StrandType {
        match self {
            StrandValue::Int(_) => StrandType::Int,
            StrandValue::Double(_) => StrandType::Double,
            StrandValue::Bool(_) => StrandType::Boolean,
            StrandValue::String(_) => StrandType::String,
            StrandValue::Int64(_) => StrandType::Int64,
            StrandValue::Uint(_) => StrandType::Uint,
            StrandValue::Uint64(_) => StrandType::Uint64,
            StrandValue::VoidPtr(_) => StrandType::VoidPtr,
            StrandValue::FuncPtr(_) => StrandType::FuncPtr,
            StrandValue::BundlePtr(_) => StrandType::BundlePtr,
            StrandValue::ConstBundlePtr(_) => StrandType::ConstBundlePtr,
        }
    }

    /// The zero/null value for a concrete type
    pub fn null_of(stype: StrandType) -> Option<Self> {
        Some(match stype {
            StrandType::Int => StrandValue::Int(0),
            StrandType::Double => StrandValue::Double(0.0),
            StrandType::Boolean => StrandValue::Bool(false),
            StrandType::String => StrandValue::String(None),
            StrandType::Int64 => StrandValue::Int64(0),
            StrandType::Uint => StrandValue::Uint(0),
            StrandType::Uint64 => StrandValue::Uint64(0),
            StrandType::VoidPtr => StrandValue::VoidPtr(None),
            StrandType::FuncPtr => StrandValue::FuncPtr(None),
            StrandType::BundlePtr => StrandValue::BundlePtr(None),
            StrandType::ConstBundlePtr => StrandValue::ConstBundlePtr(None),
            StrandType::BundlePtrOptConst | StrandType::Proxied => return None,
        })
    }

    /// Parse default text from a bundledef for the given type
    ///
    /// `NULL` and `((void *)0)` denote a null pointer or string.
    pub fn parse_default(stype: StrandType, text: &str) -> Result<Option<Self>> {
        let text = text.trim();
        let is_null = text == "NULL" || text == "((void *)0)" || text.is_empty();
        let bad = |_| Error::InvalidFormat(format!("bad {} default '{}'", stype, text));
        let v = match stype {
            StrandType::Int => StrandValue::Int(if is_null { 0 } else { text.parse().map_err(bad)? }),
            StrandType::Uint => {
                StrandValue::Uint(if is_null { 0 } else { text.parse().map_err(bad)? })
            }
            StrandType::Int64 => {
                StrandValue::Int64(if is_null { 0 } else { text.parse().map_err(bad)? })
            }
            StrandType::Uint64 => {
                StrandValue::Uint64(if is_null { 0 } else { text.parse().map_err(bad)? })
            }
            StrandType::Boolean => StrandValue::Bool(match text {
                "" | "0" | "NULL" | "FALSE" | "false" => false,
                "1" | "TRUE" | "true" => true,
                other => {
                    return Err(Error::InvalidFormat(format!(
                        "bad boolean default '{}'",
                        other
                    )))
                }
            }),
            StrandType::Double => StrandValue::Double(if is_null {
                0.0
            } else {
                text.parse::<f64>()
                    .map_err(|_| Error::InvalidFormat(format!("bad double default '{}'", text)))?
            }),
            StrandType::String => {
                StrandValue::String(if is_null { None } else { Some(text.to_string()) })
            }
            StrandType::VoidPtr => StrandValue::VoidPtr(None),
            StrandType::FuncPtr => {
                StrandValue::FuncPtr(if is_null { None } else { Some(text.to_string()) })
            }
            StrandType::BundlePtr => StrandValue::BundlePtr(None),
            StrandType::ConstBundlePtr => StrandValue::ConstBundlePtr(None),
            StrandType::BundlePtrOptConst | StrandType::Proxied => return Ok(None),
        };
        Ok(Some(v))
    }

    /// True for null pointers and null strings
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            StrandValue::String(None)
                | StrandValue::VoidPtr(None)
                | StrandValue::FuncPtr(None)
                | StrandValue::BundlePtr(None)
                | StrandValue::ConstBundlePtr(None)
        )
    }

    /// Get as i32 if this is an Int value
    pub fn as_int(&self) -> Option<i32> {
        match self {
            StrandValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int64 value
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            StrandValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as u32 if this is a Uint value
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            StrandValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as u64 if this is a Uint64 value
    pub fn as_uint64(&self) -> Option<u64> {
        match self {
            StrandValue::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as f64 if this is a Double value
    pub fn as_double(&self) -> Option<f64> {
        match self {
            StrandValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StrandValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as &str if this is a non-null String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StrandValue::String(Some(s)) => Some(s),
            _ => None,
        }
    }

    /// Bundle referenced by a BundlePtr or ConstBundlePtr value
    pub fn as_bundle(&self) -> Option<BundleId> {
        match self {
            StrandValue::BundlePtr(b) | StrandValue::ConstBundlePtr(b) => *b,
            _ => None,
        }
    }

    /// Numeric view used by condition comparisons
    pub fn as_f64_lossy(&self) -> Option<f64> {
        match self {
            StrandValue::Int(v) => Some(*v as f64),
            StrandValue::Double(v) => Some(*v),
            StrandValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            StrandValue::Int64(v) => Some(*v as f64),
            StrandValue::Uint(v) => Some(*v as f64),
            StrandValue::Uint64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text form used when writing defaults back into a bundledef
    pub fn default_text(&self) -> String {
        match self {
            StrandValue::Int(v) => v.to_string(),
            StrandValue::Double(v) => format!("{:?}", v),
            StrandValue::Bool(v) => (*v as i32).to_string(),
            StrandValue::String(Some(s)) => s.clone(),
            StrandValue::FuncPtr(Some(s)) => s.clone(),
            StrandValue::Int64(v) => v.to_string(),
            StrandValue::Uint(v) => v.to_string(),
            StrandValue::Uint64(v) => v.to_string(),
            _ => "NULL".to_string(),
        }
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<i32> for StrandValue {
    fn from(v: i32) -> Self {
        StrandValue::Int(v)
    }
}

impl From<i64> for StrandValue {
    fn from(v: i64) -> Self {
        StrandValue::Int64(v)
    }
}

impl From<u32> for StrandValue {
    fn from(v: u32) -> Self {
        StrandValue::Uint(v)
    }
}

impl From<u64> for StrandValue {
    fn from(v: u64) -> Self {
        StrandValue::Uint64(v)
    }
}

impl From<f64> for StrandValue {
    fn from(v: f64) -> Self {
        StrandValue::Double(v)
    }
}

impl From<bool> for StrandValue {
    fn from(v: bool) -> Self {
        StrandValue::Bool(v)
    }
}

impl From<&str> for StrandValue {
    fn from(v: &str) -> Self {
        StrandValue::String(Some(v.to_string()))
    }
}

impl From<String> for StrandValue {
    fn from(v: String) -> Self {
        StrandValue::String(Some(v))
    }
}

/// Contents of a strand: declared type, locked type and elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strand {
    declared: StrandType,
    locked: Option<StrandType>,
    is_array: bool,
    values: SmallVec<[StrandValue; 1]>,
}

impl Strand {
    /// Empty strand of the given declared type
    pub fn new(declared: StrandType, is_array: bool) -> Self {
        Self {
            declared,
            locked: if declared.is_deferred() { None } else { Some(declared) },
            is_array,
            values: SmallVec::new(),
        }
    }

    /// Scalar strand holding one value, locked to its type
    pub fn scalar(value: StrandValue) -> Self {
        let stype = value.strand_type();
        let mut values = SmallVec::new();
        values.push(value);
        Self {
            declared: stype,
            locked: Some(stype),
            is_array: false,
            values,
        }
    }

    /// Declared type
    pub fn declared_type(&self) -> StrandType {
        self.declared
    }

    /// Effective type: the locked type, or the declared type while deferred
    pub fn effective_type(&self) -> StrandType {
        self.locked.unwrap_or(self.declared)
    }

    /// True once a deferred strand has been resolved
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Lock a deferred strand to a concrete type without writing a value
    pub fn lock_type(&mut self, name: &str, stype: StrandType) -> Result<()> {
        match self.locked {
            Some(t) if t == stype => Ok(()),
            Some(t) => Err(Error::WrongType {
                strand: name.to_string(),
                expected: t,
                actual: stype,
            }),
            None if self.declared.accepts(stype) => {
                self.locked = Some(stype);
                Ok(())
            }
            None => Err(Error::WrongType {
                strand: name.to_string(),
                expected: self.declared,
                actual: stype,
            }),
        }
    }

    /// True if declared as an array
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if there are no elements
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All elements
    pub fn values(&self) -> &[StrandValue] {
        &self.values
    }

    /// First element (the scalar view)
    pub fn first(&self) -> Option<&StrandValue> {
        self.values.first()
    }

    /// Element at `idx`
    pub fn get(&self, idx: usize) -> Option<&StrandValue> {
        self.values.get(idx)
    }

    /// Check that every value is accepted without modifying the strand
    pub fn check(&self, name: &str, values: &[StrandValue]) -> Result<Option<StrandType>> {
        let mut lock = self.locked;
        for v in values {
            let actual = v.strand_type();
            match lock {
                Some(t) if t != actual => {
                    return Err(Error::WrongType {
                        strand: name.to_string(),
                        expected: t,
                        actual,
                    })
                }
                Some(_) => {}
                None if self.declared.accepts(actual) => lock = Some(actual),
                None => {
                    return Err(Error::WrongType {
                        strand: name.to_string(),
                        expected: self.declared,
                        actual,
                    })
                }
            }
        }
        Ok(lock)
    }

    /// Replace all elements; locks a deferred strand on first success
    ///
    /// On error the strand is left untouched.
    pub fn set_values(&mut self, name: &str, values: Vec<StrandValue>) -> Result<()> {
        let lock = self.check(name, &values)?;
        self.locked = lock;
        self.values = values.into_iter().collect();
        Ok(())
    }

    /// Append one element
    pub fn push(&mut self, name: &str, value: StrandValue) -> Result<()> {
        let lock = self.check(name, std::slice::from_ref(&value))?;
        self.locked = lock;
        self.values.push(value);
        if self.values.len() > 1 {
            self.is_array = true;
        }
        Ok(())
    }

    /// Remove and return the element at `idx`
    pub fn remove(&mut self, idx: usize) -> Option<StrandValue> {
        if idx < self.values.len() {
            Some(self.values.remove(idx))
        } else {
            None
        }
    }

    /// Remove all elements, keeping the type lock
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
