//! Native call marshaling
//!
//! Before a native functional runs, each mapped attribute's value is copied
//! into a [`Blob`] and the blobs are handed to the function as a
//! [`NativeCall`]. Output blobs are written by the function and copied back
//! into their attributes afterwards.
//!
//! Output arrays whose length is not known up front carry an
//! [`ArraySize`] rule: a constant, or a helper functional in the same
//! segment that reports the length either before or after the main call.

use crate::error::{TxError, TxOutcome};
use nirva_core::{MapFlags, Strand, StrandType, StrandValue};
use smallvec::SmallVec;

/// How the length of an output array is found
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArraySize {
    /// Whatever the function writes
    #[default]
    Any,
    /// Exactly this many elements
    Fixed(usize),
    /// Ask the named helper functional
    Helper(String),
}

/// Transient copy of one mapped attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    name: String,
    flags: MapFlags,
    data: Strand,
    expected_len: Option<usize>,
    written: bool,
}

impl Blob {
    /// Blob holding `values` for attribute `name`
    pub fn new(
        name: impl Into<String>,
        flags: MapFlags,
        stype: StrandType,
        values: Vec<StrandValue>,
    ) -> TxOutcome<Self> {
        let name = name.into();
        let mut data = Strand::new(stype, true);
        data.set_values(&name, values)
            .map_err(|e| TxError::Marshal(e.to_string()))?;
        Ok(Self {
            name,
            flags,
            data,
            expected_len: None,
            written: false,
        })
    }

    /// Attribute the blob was taken from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapping flags
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// Element type
    pub fn stype(&self) -> StrandType {
        self.data.effective_type()
    }

    /// Elements
    pub fn values(&self) -> &[StrandValue] {
        self.data.values()
    }

    /// First element
    pub fn first(&self) -> Option<&StrandValue> {
        self.data.first()
    }

    /// Length required of an output array
    pub fn expected_len(&self) -> Option<usize> {
        self.expected_len
    }

    pub(crate) fn set_expected_len(&mut self, n: usize) {
        self.expected_len = Some(n);
    }

    /// True once the function wrote this blob
    pub fn is_written(&self) -> bool {
        self.written
    }

    fn write(&mut self, values: Vec<StrandValue>) -> TxOutcome<()> {
        if let Some(n) = self.expected_len {
            if values.len() != n {
                return Err(TxError::ArraySize(format!(
                    "'{}' expects {} elements, got {}",
                    self.name,
                    n,
                    values.len()
                )));
            }
        }
        self.data
            .set_values(&self.name, values)
            .map_err(|e| TxError::Marshal(e.to_string()))?;
        self.written = true;
        Ok(())
    }

    pub(crate) fn into_values(self) -> Vec<StrandValue> {
        self.data.values().to_vec()
    }
}

/// Parameters of one native invocation
#[derive(Debug, Clone, Default)]
pub struct NativeCall {
    params: SmallVec<[Blob; 4]>,
    ret: Option<StrandValue>,
}

impl NativeCall {
    /// Call with the given parameter blobs
    pub fn new(params: impl IntoIterator<Item = Blob>) -> Self {
        Self {
            params: params.into_iter().collect(),
            ret: None,
        }
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True without parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameter blob by position
    pub fn param(&self, idx: usize) -> TxOutcome<&Blob> {
        self.params
            .get(idx)
            .ok_or_else(|| TxError::Marshal(format!("no parameter {}", idx)))
    }

    /// Parameter blob by attribute name
    pub fn param_named(&self, name: &str) -> TxOutcome<&Blob> {
        self.params
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| TxError::Marshal(format!("no parameter '{}'", name)))
    }

    fn scalar(&self, idx: usize) -> TxOutcome<&StrandValue> {
        let blob = self.param(idx)?;
        blob.first()
            .ok_or_else(|| TxError::Marshal(format!("parameter '{}' has no value", blob.name)))
    }

    fn mismatch(&self, idx: usize, want: StrandType) -> TxError {
        let got = self.params.get(idx).map(|b| b.stype());
        TxError::Marshal(format!(
            "parameter {} is {}, wanted {}",
            idx,
            got.map(|t| t.to_string()).unwrap_or_default(),
            want
        ))
    }

    /// Integer parameter
    pub fn int(&self, idx: usize) -> TxOutcome<i32> {
        self.scalar(idx)?
            .as_int()
            .ok_or_else(|| self.mismatch(idx, StrandType::Int))
    }

    /// 64-bit integer parameter
    pub fn int64(&self, idx: usize) -> TxOutcome<i64> {
        self.scalar(idx)?
            .as_int64()
            .ok_or_else(|| self.mismatch(idx, StrandType::Int64))
    }

    /// Double parameter
    pub fn double(&self, idx: usize) -> TxOutcome<f64> {
        self.scalar(idx)?
            .as_double()
            .ok_or_else(|| self.mismatch(idx, StrandType::Double))
    }

    /// Boolean parameter
    pub fn boolean(&self, idx: usize) -> TxOutcome<bool> {
        self.scalar(idx)?
            .as_bool()
            .ok_or_else(|| self.mismatch(idx, StrandType::Boolean))
    }

    /// String parameter
    pub fn string(&self, idx: usize) -> TxOutcome<Option<String>> {
        match self.scalar(idx)? {
            StrandValue::String(s) => Ok(s.clone()),
            _ => Err(self.mismatch(idx, StrandType::String)),
        }
    }

    /// Write an output parameter
    ///
    /// # Errors
    ///
    /// `Marshal` if the parameter is input-only or the values have the wrong
    /// type; `ArraySize` if the length differs from the required one.
    pub fn set_param(&mut self, idx: usize, values: Vec<StrandValue>) -> TxOutcome<()> {
        let blob = self
            .params
            .get_mut(idx)
            .ok_or_else(|| TxError::Marshal(format!("no parameter {}", idx)))?;
        if !blob.flags.contains(MapFlags::OUT) {
            return Err(TxError::Marshal(format!(
                "parameter '{}' is not an output",
                blob.name
            )));
        }
        blob.write(values)
    }

    /// Set the return value
    pub fn set_return(&mut self, value: impl Into<StrandValue>) {
        self.ret = Some(value.into());
    }

    /// Return value, if set
    pub fn return_value(&self) -> Option<&StrandValue> {
        self.ret.as_ref()
    }

    pub(crate) fn into_parts(self) -> (SmallVec<[Blob; 4]>, Option<StrandValue>) {
        (self.params, self.ret)
    }
}

/// Read an array length from a helper's return value
pub(crate) fn size_from_return(helper: &str, ret: Option<&StrandValue>) -> TxOutcome<usize> {
    let n = match ret {
        Some(StrandValue::Int(n)) => i64::from(*n),
        Some(StrandValue::Int64(n)) => *n,
        Some(StrandValue::Uint(n)) => i64::from(*n),
        Some(StrandValue::Uint64(n)) => i64::try_from(*n).unwrap_or(i64::MAX),
        _ => {
            return Err(TxError::ArraySize(format!(
                "helper '{}' returned no size",
                helper
            )))
        }
    };
    usize::try_from(n)
        .map_err(|_| TxError::ArraySize(format!("helper '{}' returned size {}", helper, n)))
}
