//! Trajectories, segments and functionals
//!
//! A [`Trajectory`] is the execution graph chosen for a transform: an
//! ordered list of [`Segment`]s, optionally walked by a [`Selector`] instead
//! of in order. Each segment runs its [`Functional`]s in array order; a
//! functional is a native call, an in-process standard function or a
//! script, and declares the attributes it touches with [`AttrMap`]s.

use crate::attribute::{AttrDef, AttrGroup};
use crate::error::{TxError, TxOutcome};
use crate::marshal::{ArraySize, NativeCall};
use crate::script::Script;
use nirva_core::{Funcsig, MapFlags, Result, StrandType};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Native function body
pub type NativeFn = Arc<dyn Fn(&mut NativeCall) -> TxOutcome<()> + Send + Sync>;

/// Standard (in-process) function body
pub type StandardFn = Arc<dyn Fn(&AttrGroup) -> TxOutcome<()> + Send + Sync>;

/// Picks the segment after the one that just finished
pub type Selector = Arc<dyn Fn(usize, &AttrGroup) -> NextSegment + Send + Sync>;

/// What a functional is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FunctionalCategory {
    /// Ordinary step of a segment
    #[default]
    TxSegment,
    /// Reports the size of an output array
    Helper,
    /// Chooses the next segment
    Selector,
    /// Evaluates a condition
    Conditional,
    /// Hook callback
    Callback,
}

/// Body of a functional
#[derive(Clone)]
pub enum FunctionalKind {
    /// Called through marshaled blobs
    Native(NativeFn),
    /// Works on the attributes directly
    Standard(StandardFn),
    /// Interpreted assignments
    Script(Script),
}

impl fmt::Debug for FunctionalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionalKind::Native(_) => f.write_str("Native"),
            FunctionalKind::Standard(_) => f.write_str("Standard"),
            FunctionalKind::Script(s) => write!(f, "Script({:?})", s.source()),
        }
    }
}

/// Binding between a functional parameter and an attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttrMap {
    /// Attribute name
    pub name: String,
    /// Direction and options
    pub flags: MapFlags,
    /// Element type
    pub stype: StrandType,
    /// Length rule for output arrays
    pub array_size: ArraySize,
}

impl AttrMap {
    /// Mapping with explicit flags
    pub fn new(name: impl Into<String>, flags: MapFlags, stype: StrandType) -> Self {
        Self {
            name: name.into(),
            flags,
            stype,
            array_size: ArraySize::Any,
        }
    }

    /// Input parameter
    pub fn input(name: impl Into<String>, stype: StrandType) -> Self {
        Self::new(name, MapFlags::IN, stype)
    }

    /// Output parameter
    pub fn output(name: impl Into<String>, stype: StrandType) -> Self {
        Self::new(name, MapFlags::OUT, stype)
    }

    /// Builder: add flags
    pub fn flags(mut self, flags: MapFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder: length rule
    pub fn sized(mut self, size: ArraySize) -> Self {
        self.array_size = size;
        self
    }

    /// True for IN maps
    pub fn is_input(&self) -> bool {
        self.flags.contains(MapFlags::IN)
    }

    /// True for OUT maps
    pub fn is_output(&self) -> bool {
        self.flags.contains(MapFlags::OUT)
    }

    /// True for OPT maps
    pub fn is_optional(&self) -> bool {
        self.flags.contains(MapFlags::OPT)
    }

    /// Check the flag combination for a functional of `category`
    ///
    /// # Errors
    ///
    /// `TrajectoryInvalid` if neither IN nor OUT is set, or OUT, PARAM and
    /// OPT are combined outside a helper.
    pub fn validate(&self, category: FunctionalCategory) -> TxOutcome<()> {
        if !self.flags.intersects(MapFlags::IN | MapFlags::OUT) {
            return Err(TxError::TrajectoryInvalid(format!(
                "map '{}' is neither input nor output",
                self.name
            )));
        }
        if self.flags.contains(MapFlags::OUT | MapFlags::PARAM | MapFlags::OPT)
            && category != FunctionalCategory::Helper
        {
            return Err(TxError::TrajectoryInvalid(format!(
                "map '{}' may only be an optional output parameter of a helper",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn def(&self) -> AttrDef {
        let def = AttrDef::new(self.name.clone(), self.stype);
        if self.array_size == ArraySize::Any {
            def
        } else {
            def.array()
        }
    }
}

/// A single callable unit
#[derive(Debug, Clone)]
pub struct Functional {
    name: String,
    category: FunctionalCategory,
    kind: FunctionalKind,
    maps: Vec<AttrMap>,
    returns: Option<String>,
}

impl Functional {
    fn with_kind(name: impl Into<String>, kind: FunctionalKind) -> Self {
        Self {
            name: name.into(),
            category: FunctionalCategory::TxSegment,
            kind,
            maps: Vec::new(),
            returns: None,
        }
    }

    /// Native functional; parameters come from its maps in order
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut NativeCall) -> TxOutcome<()> + Send + Sync + 'static,
    {
        Self::with_kind(name, FunctionalKind::Native(Arc::new(f)))
    }

    /// Standard functional working on the attributes directly
    pub fn standard<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&AttrGroup) -> TxOutcome<()> + Send + Sync + 'static,
    {
        Self::with_kind(name, FunctionalKind::Standard(Arc::new(f)))
    }

    /// Script functional
    ///
    /// Names the script reads become input maps and names it assigns become
    /// external output maps, both of deferred type.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` if the script does not parse.
    pub fn script(name: impl Into<String>, source: &str) -> Result<Self> {
        let script = Script::parse(source)?;
        let mut maps: Vec<AttrMap> = script
            .inputs()
            .into_iter()
            .map(|n| AttrMap::input(n, StrandType::Proxied))
            .collect();
        maps.extend(script.outputs().into_iter().map(|n| {
            AttrMap::output(n, StrandType::Proxied).flags(MapFlags::EXTERN)
        }));
        let mut f = Self::with_kind(name, FunctionalKind::Script(script));
        f.maps = maps;
        Ok(f)
    }

    /// Builder: add a mapping, replacing one with the same name
    pub fn map(mut self, map: AttrMap) -> Self {
        self.maps.retain(|m| m.name != map.name);
        self.maps.push(map);
        self
    }

    /// Builder: category
    pub fn category(mut self, category: FunctionalCategory) -> Self {
        self.category = category;
        self
    }

    /// Builder: store the return value in this attribute
    pub fn returns(mut self, attr: impl Into<String>) -> Self {
        self.returns = Some(attr.into());
        self
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category
    pub fn get_category(&self) -> FunctionalCategory {
        self.category
    }

    /// Body
    pub fn kind(&self) -> &FunctionalKind {
        &self.kind
    }

    /// Attribute maps in parameter order
    pub fn maps(&self) -> &[AttrMap] {
        &self.maps
    }

    /// Attribute receiving the return value
    pub fn return_attr(&self) -> Option<&str> {
        self.returns.as_deref()
    }

    /// Packed signature of the mapped parameters
    ///
    /// `None` when a parameter type has no signature character (deferred or
    /// bundle types).
    pub fn funcsig(&self) -> Option<Funcsig> {
        let fmt: String = self.maps.iter().map(|m| m.stype.as_char()).collect();
        Funcsig::from_args_fmt(&fmt).ok()
    }

    /// Check every mapping
    pub fn validate(&self) -> TxOutcome<()> {
        self.maps.iter().try_for_each(|m| m.validate(self.category))
    }
}

/// Ordered functionals sharing transient local attributes
#[derive(Debug, Clone, Default)]
pub struct Segment {
    name: String,
    functionals: Vec<Functional>,
    locals: Vec<AttrDef>,
}

impl Segment {
    /// Empty segment
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: append a functional
    pub fn functional(mut self, f: Functional) -> Self {
        self.functionals.push(f);
        self
    }

    /// Builder: declare a local attribute
    ///
    /// Locals exist while the segment runs; those flagged `EXTERN` outlive it.
    pub fn local(mut self, def: AttrDef) -> Self {
        self.locals.push(def);
        self
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Functionals in run order
    pub fn functionals(&self) -> &[Functional] {
        &self.functionals
    }

    /// Local attribute defs
    pub fn locals(&self) -> &[AttrDef] {
        &self.locals
    }

    /// Helper functional by name
    pub fn helper(&self, name: &str) -> Option<&Functional> {
        self.functionals
            .iter()
            .find(|f| f.category == FunctionalCategory::Helper && f.name == name)
    }

    /// Functionals run in the main walk (helpers are called on demand)
    pub fn steps(&self) -> impl Iterator<Item = &Functional> {
        self.functionals
            .iter()
            .filter(|f| f.category != FunctionalCategory::Helper)
    }

    fn validate(&self) -> TxOutcome<()> {
        for f in &self.functionals {
            f.validate()?;
            for m in &f.maps {
                if let ArraySize::Helper(h) = &m.array_size {
                    if self.helper(h).is_none() {
                        return Err(TxError::TrajectoryInvalid(format!(
                            "segment '{}' has no helper '{}' for '{}'",
                            self.name, h, m.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Selector answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSegment {
    /// The following segment, or the end after the last
    Next,
    /// Segment by index
    Index(usize),
    /// Segment by name
    Named(String),
    /// Stop
    End,
    /// No decision
    Unresolved,
}

/// Execution graph of a transform
#[derive(Clone, Default)]
pub struct Trajectory {
    name: String,
    segments: Vec<Segment>,
    selector: Option<Selector>,
    end_reachable: bool,
}

impl fmt::Debug for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trajectory")
            .field("name", &self.name)
            .field("segments", &self.segments)
            .field("selector", &self.selector.is_some())
            .field("end_reachable", &self.end_reachable)
            .finish()
    }
}

impl Trajectory {
    /// Empty trajectory
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: append a segment
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Builder: walk segments with `f` instead of in order
    pub fn selector<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &AttrGroup) -> NextSegment + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(f));
        self
    }

    /// Builder: let an unresolved selector answer end the trajectory
    pub fn end_on_unresolved(mut self, yes: bool) -> Self {
        self.end_reachable = yes;
        self
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Selector, if any
    pub fn get_selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// Check maps and helper references
    pub fn validate(&self) -> TxOutcome<()> {
        if self.segments.is_empty() {
            return Err(TxError::TrajectoryInvalid(format!(
                "trajectory '{}' has no segments",
                self.name
            )));
        }
        self.segments.iter().try_for_each(Segment::validate)
    }

    /// Segment to run after `done`; `None` ends the trajectory
    ///
    /// # Errors
    ///
    /// `TrajectoryInvalid` when the selector gives no usable answer and the
    /// end is not explicitly reachable.
    pub fn next_after(&self, done: usize, attrs: &AttrGroup) -> TxOutcome<Option<usize>> {
        let answer = match &self.selector {
            Some(sel) => sel(done, attrs),
            None => NextSegment::Next,
        };
        let resolved = match &answer {
            NextSegment::Next => return Ok(Some(done + 1).filter(|&i| i < self.segments.len())),
            NextSegment::End => return Ok(None),
            NextSegment::Index(i) => Some(*i).filter(|&i| i < self.segments.len()),
            NextSegment::Named(n) => self.segments.iter().position(|s| &s.name == n),
            NextSegment::Unresolved => None,
        };
        match resolved {
            Some(i) => Ok(Some(i)),
            None if self.end_reachable => {
                debug!(target: "nirva::tx", trajectory = %self.name, answer = ?answer, "unresolved segment, ending");
                Ok(None)
            }
            None => Err(TxError::TrajectoryInvalid(format!(
                "no segment for {:?} after '{}'",
                answer,
                self.segments.get(done).map(|s| s.name.as_str()).unwrap_or_default()
            ))),
        }
    }

    /// Inputs the caller must provide
    ///
    /// Non-optional IN maps of non-helper functionals whose attribute is
    /// not produced earlier in segment order, by an output map or a local.
    pub fn required_inputs(&self) -> Vec<&AttrMap> {
        let mut produced: Vec<&str> = Vec::new();
        let mut out: Vec<&AttrMap> = Vec::new();
        for seg in &self.segments {
            produced.extend(seg.locals.iter().map(|d| d.name.as_str()));
            for f in seg.steps() {
                for m in &f.maps {
                    if m.is_input()
                        && !m.is_optional()
                        && !produced.contains(&m.name.as_str())
                        && !out.iter().any(|o| o.name == m.name)
                    {
                        out.push(m);
                    }
                }
                for m in f.maps.iter().filter(|m| m.is_output()) {
                    produced.push(&m.name);
                }
                if let Some(r) = &f.returns {
                    produced.push(r);
                }
            }
        }
        out
    }

    /// Attributes that are only ever read
    pub fn pure_inputs(&self) -> Vec<&str> {
        let all = || {
            self.segments
                .iter()
                .flat_map(|s| s.functionals.iter())
                .flat_map(|f| f.maps.iter())
        };
        let mut out: Vec<&str> = Vec::new();
        for m in all() {
            let written = all().any(|o| o.name == m.name && o.is_output())
                || self
                    .segments
                    .iter()
                    .flat_map(|s| s.functionals.iter())
                    .any(|f| f.returns.as_deref() == Some(m.name.as_str()));
            if m.flags.is_pure_input() && !written && !out.contains(&m.name.as_str()) {
                out.push(&m.name);
            }
        }
        out
    }
}
