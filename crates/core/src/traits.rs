//! Bundle-like access
//!
//! Anything that exposes named, typed strands implements [`BundleLike`]:
//! store-backed bundles and attribute groups alike. Code that only needs to
//! read and write strands (conditions, scripts, marshaling) works against the
//! trait rather than a concrete container.

use crate::error::{Error, Result};
use crate::value::{StrandType, StrandValue};

/// Named-strand access with array semantics
///
/// Scalars are one-element arrays: `get_value` returns the first element and
/// `set_value` replaces the contents with one element.
///
/// Thread safety: implementations use interior locking, so every method
/// takes `&self`.
pub trait BundleLike: Send + Sync {
    /// Bundle type name
    fn bundle_type(&self) -> String;

    /// True if the strand exists
    fn has_strand(&self, strand: &str) -> bool;

    /// Names of all strands present
    fn list_strands(&self) -> Vec<String>;

    /// Effective type of a strand
    ///
    /// # Errors
    ///
    /// `NotFound` if the strand is absent.
    fn strand_type(&self, strand: &str) -> Result<StrandType>;

    /// All elements of a strand
    ///
    /// # Errors
    ///
    /// `NotFound` if the strand is absent.
    fn get_array(&self, strand: &str) -> Result<Vec<StrandValue>>;

    /// Replace the contents of a strand
    ///
    /// # Errors
    ///
    /// `WrongType` if any element does not match the strand's type; the
    /// strand is left untouched.
    fn set_array(&self, strand: &str, values: Vec<StrandValue>) -> Result<()>;

    /// Append one element
    fn array_append(&self, strand: &str, value: StrandValue) -> Result<()>;

    /// Remove every element
    fn array_clear(&self, strand: &str) -> Result<()>;

    /// Delete the strand
    fn strand_delete(&self, strand: &str) -> Result<()>;

    /// First element of a strand
    fn get_value(&self, strand: &str) -> Result<StrandValue> {
        self.get_array(strand)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("value of empty strand '{}'", strand)))
    }

    /// Set a scalar value
    fn set_value(&self, strand: &str, value: StrandValue) -> Result<()> {
        self.set_array(strand, vec![value])
    }

    /// Number of elements
    fn array_get_size(&self, strand: &str) -> Result<usize> {
        Ok(self.get_array(strand)?.len())
    }

    /// Scalar as i32
    fn get_int(&self, strand: &str) -> Result<i32> {
        let v = self.get_value(strand)?;
        v.as_int().ok_or_else(|| wrong_type(strand, StrandType::Int, &v))
    }

    /// Scalar as i64
    fn get_int64(&self, strand: &str) -> Result<i64> {
        let v = self.get_value(strand)?;
        v.as_int64()
            .ok_or_else(|| wrong_type(strand, StrandType::Int64, &v))
    }

    /// Scalar as f64
    fn get_double(&self, strand: &str) -> Result<f64> {
        let v = self.get_value(strand)?;
        v.as_double()
            .ok_or_else(|| wrong_type(strand, StrandType::Double, &v))
    }

    /// Scalar as bool
    fn get_bool(&self, strand: &str) -> Result<bool> {
        let v = self.get_value(strand)?;
        v.as_bool()
            .ok_or_else(|| wrong_type(strand, StrandType::Boolean, &v))
    }

    /// Scalar as an owned string; `None` for a null string
    fn get_string(&self, strand: &str) -> Result<Option<String>> {
        match self.get_value(strand)? {
            StrandValue::String(s) => Ok(s),
            v => Err(wrong_type(strand, StrandType::String, &v)),
        }
    }
}

fn wrong_type(strand: &str, expected: StrandType, got: &StrandValue) -> Error {
    Error::WrongType {
        strand: strand.to_string(),
        expected,
        actual: got.strand_type(),
    }
}
