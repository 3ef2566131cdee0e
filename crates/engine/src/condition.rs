//! Conditions and cascades
//!
//! A [`Condition`] is a small typed expression over a transform's
//! attributes, its capacities and its status. Evaluation yields a
//! [`CondResult`] rather than a bool: a missing operand is `Error`, an
//! attribute that exists but holds no value yet is `WaitRetry`.
//!
//! A [`Cascade`] chains conditions into a decision tree whose leaves pick a
//! trajectory.

use nirva_core::{BundleLike, CapSet, CondResult, StrandValue, TxStatus};

/// Something a comparison reads
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A constant
    Value(StrandValue),
    /// First value of the named attribute
    Attr(String),
    /// Transform status code
    Status,
    /// Presence of a capacity, as a bool
    Cap(String),
}

impl Operand {
    /// Attribute operand
    pub fn attr(name: impl Into<String>) -> Self {
        Operand::Attr(name.into())
    }

    /// Constant operand
    pub fn value(v: impl Into<StrandValue>) -> Self {
        Operand::Value(v.into())
    }
}

/// What a condition is evaluated against
#[derive(Clone, Copy)]
pub struct CondContext<'a> {
    /// Attributes, if any
    pub attrs: Option<&'a dyn BundleLike>,
    /// Capacities chosen by the caller
    pub caps: &'a CapSet,
    /// Current transform status
    pub status: TxStatus,
}

impl<'a> CondContext<'a> {
    /// Context with capacities only
    pub fn caps(caps: &'a CapSet) -> Self {
        Self {
            attrs: None,
            caps,
            status: TxStatus::None,
        }
    }

    /// Add attributes
    pub fn with_attrs(mut self, attrs: &'a dyn BundleLike) -> Self {
        self.attrs = Some(attrs);
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: TxStatus) -> Self {
        self.status = status;
        self
    }

    fn resolve(&self, op: &Operand) -> Result<StrandValue, CondResult> {
        match op {
            Operand::Value(v) => Ok(v.clone()),
            Operand::Status => Ok(StrandValue::Int(self.status.code())),
            Operand::Cap(c) => Ok(StrandValue::Bool(self.caps.has(c))),
            Operand::Attr(name) => {
                let attrs = self.attrs.ok_or(CondResult::Error)?;
                if !attrs.has_strand(name) {
                    return Err(CondResult::Error);
                }
                match attrs.get_array(name) {
                    Ok(values) => values.into_iter().next().ok_or(CondResult::WaitRetry),
                    Err(_) => Err(CondResult::Error),
                }
            }
        }
    }
}

/// Condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Fixed result
    Const(CondResult),
    /// Negation; non-boolean results pass through
    Not(Box<Condition>),
    /// All must succeed
    And(Vec<Condition>),
    /// Any must succeed
    Or(Vec<Condition>),
    /// Exactly one of two succeeds
    Xor(Box<Condition>, Box<Condition>),
    /// Operands are equal
    Equals(Operand, Operand),
    /// Left is numerically greater
    Gt(Operand, Operand),
    /// Left is numerically smaller
    Lt(Operand, Operand),
    /// Capacity present
    HasCap(String),
    /// Capacity absent
    LacksCap(String),
    /// Attribute exists
    HasAttr(String),
    /// Attribute does not exist
    LacksAttr(String),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Const(CondResult::Success)
    }
}

impl Condition {
    /// Always true
    pub fn always() -> Self {
        Condition::default()
    }

    /// Negate
    #[allow(clippy::should_implement_trait)]
    pub fn not(c: Condition) -> Self {
        Condition::Not(Box::new(c))
    }

    /// Evaluate
    pub fn evaluate(&self, ctx: &CondContext<'_>) -> CondResult {
        match self {
            Condition::Const(r) => *r,
            Condition::Not(c) => match c.evaluate(ctx) {
                CondResult::Success | CondResult::Force => CondResult::Fail,
                CondResult::Fail => CondResult::Success,
                other => other,
            },
            Condition::And(cs) => {
                let mut forced = false;
                for c in cs {
                    match c.evaluate(ctx) {
                        CondResult::Success => {}
                        CondResult::Force => forced = true,
                        other => return other,
                    }
                }
                if forced {
                    CondResult::Force
                } else {
                    CondResult::Success
                }
            }
            Condition::Or(cs) => {
                let mut pending = None;
                for c in cs {
                    match c.evaluate(ctx) {
                        r if r.is_satisfied() => return r,
                        CondResult::Fail => {}
                        CondResult::Abandon => return CondResult::Abandon,
                        other => {
                            pending.get_or_insert(other);
                        }
                    }
                }
                pending.unwrap_or(CondResult::Fail)
            }
            Condition::Xor(a, b) => match (a.evaluate(ctx), b.evaluate(ctx)) {
                (x, y) if is_bool(x) && is_bool(y) => {
                    CondResult::from_bool(x.is_satisfied() != y.is_satisfied())
                }
                (x, y) if is_bool(x) => y,
                (x, _) => x,
            },
            Condition::Equals(l, r) => compare(ctx, l, r, |o| o == std::cmp::Ordering::Equal, true),
            Condition::Gt(l, r) => compare(ctx, l, r, |o| o == std::cmp::Ordering::Greater, false),
            Condition::Lt(l, r) => compare(ctx, l, r, |o| o == std::cmp::Ordering::Less, false),
            Condition::HasCap(c) => CondResult::from_bool(ctx.caps.has(c)),
            Condition::LacksCap(c) => CondResult::from_bool(!ctx.caps.has(c)),
            Condition::HasAttr(a) => CondResult::from_bool(ctx.attrs.is_some_and(|b| b.has_strand(a))),
            Condition::LacksAttr(a) => {
                CondResult::from_bool(!ctx.attrs.is_some_and(|b| b.has_strand(a)))
            }
        }
    }
}

fn is_bool(r: CondResult) -> bool {
    matches!(r, CondResult::Success | CondResult::Fail | CondResult::Force)
}

fn compare(
    ctx: &CondContext<'_>,
    l: &Operand,
    r: &Operand,
    pass: impl Fn(std::cmp::Ordering) -> bool,
    allow_non_numeric: bool,
) -> CondResult {
    let (lv, rv) = match (ctx.resolve(l), ctx.resolve(r)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    match (lv.as_f64_lossy(), rv.as_f64_lossy()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(o) => CondResult::from_bool(pass(o)),
            None => CondResult::Error,
        },
        _ if allow_non_numeric => CondResult::from_bool(lv == rv),
        _ => CondResult::Error,
    }
}

/// Where a cascade branch leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Evaluate another node
    Node(usize),
    /// Stop with this trajectory index, or no match
    Leaf(Option<usize>),
}

/// One decision in a cascade
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeNode {
    /// Test
    pub condition: Condition,
    /// Taken when the test is satisfied
    pub on_success: Branch,
    /// Taken when the test fails
    pub on_fail: Branch,
}

/// Outcome of a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A leaf named this trajectory
    Matched(usize),
    /// A leaf without a trajectory was reached
    NoMatch,
    /// A node did not evaluate to success or failure
    Failed(CondResult),
}

/// Decision tree evaluated from node 0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cascade {
    nodes: Vec<CascadeNode>,
}

impl Cascade {
    /// Empty cascade; always decides on trajectory 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node; returns its index
    pub fn push(&mut self, condition: Condition, on_success: Branch, on_fail: Branch) -> usize {
        self.nodes.push(CascadeNode {
            condition,
            on_success,
            on_fail,
        });
        self.nodes.len() - 1
    }

    /// Builder form of [`push`](Cascade::push)
    pub fn node(mut self, condition: Condition, on_success: Branch, on_fail: Branch) -> Self {
        self.push(condition, on_success, on_fail);
        self
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if there are no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk the tree
    ///
    /// At most `len()` nodes are visited; revisiting one means the tree has a
    /// cycle and the result is `Failed(Invalid)`.
    pub fn evaluate(&self, ctx: &CondContext<'_>) -> Decision {
        if self.nodes.is_empty() {
            return Decision::Matched(0);
        }
        let mut at = 0usize;
        for _ in 0..self.nodes.len() {
            let Some(node) = self.nodes.get(at) else {
                return Decision::Failed(CondResult::Invalid);
            };
            let branch = match node.condition.evaluate(ctx) {
                r if r.is_satisfied() => node.on_success,
                CondResult::Fail => node.on_fail,
                other => return Decision::Failed(other),
            };
            match branch {
                Branch::Leaf(Some(t)) => return Decision::Matched(t),
                Branch::Leaf(None) => return Decision::NoMatch,
                Branch::Node(n) => at = n,
            }
        }
        Decision::Failed(CondResult::Invalid)
    }
}
