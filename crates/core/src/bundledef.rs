//! Bundledefs and blueprints
//!
//! A bundledef is the textual schema of a bundle type: a sequence of strings
//! in which each strand declaration occupies two consecutive items.
//!
//! ```text
//! "?sSTRAND_GENERIC_NAME"   optional flag, type char, full name
//! "0 NULL"                  array flags (decimal), then default text
//! ```
//!
//! Items starting with `#` are comments. Items starting with `@` open or
//! close a directive block (`@BEGIN make_mandatory` ... `@END make_mandatory`).
//! The recognised directives are `make_mandatory`, `make_readonly` and
//! `template`; any other block is kept verbatim on the blueprint.
//!
//! Validating a bundledef merges duplicate declarations (several bundledefs
//! concatenated together commonly declare the same strand twice) and yields a
//! [`Blueprint`]. Any conflict rejects the whole bundledef.

use crate::error::{Error, Result};
use crate::value::{Strand, StrandType, StrandValue};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Optional-declaration marker
pub const FLAG_OPTIONAL: char = '?';
/// Comment marker
pub const FLAG_COMMENT: char = '#';
/// Directive marker
pub const FLAG_DIRECTIVE: char = '@';

/// Directive promoting declared strands to mandatory
pub const DIRECTIVE_MAKE_MANDATORY: &str = "make_mandatory";
/// Directive marking strands read-only once set
pub const DIRECTIVE_MAKE_READONLY: &str = "make_readonly";
/// Directive declaring the template strand def
pub const DIRECTIVE_TEMPLATE: &str = "template";

const NAME_PREFIXES: [&str; 4] = ["STRAND_", "CONST_", "BUNDLE_", "ATTR_"];

crate::flag_set! {
    /// Array qualifiers carried in the second item of a declaration
    pub struct ArrayFlags: u32 {
        /// Strand holds an array
        const ARRAY_OF = 1 << 0;
        /// Native side is a pointer to a scalar
        const PTR_TO = 1 << 1;
        /// Native side is a pointer to an array
        const PTR_TO_ARRAY = 1 << 2;
    }
}

/// Short strand name for a declared name
///
/// One leading `STRAND_`, `CONST_`, `BUNDLE_` or `ATTR_` is stripped together
/// with the domain segment that follows it; the rest is lowercased and
/// prefixed with `.`. Names already starting with `.` are returned unchanged.
pub fn short_name(name: &str) -> String {
    if name.starts_with('.') {
        return name.to_string();
    }
    let name = name.split(' ').next().unwrap_or_default();
    let mut rest = name;
    for prefix in NAME_PREFIXES {
        if let Some(stripped) = name.strip_prefix(prefix) {
            rest = match stripped.split_once('_') {
                Some((_domain, tail)) if !tail.is_empty() => tail,
                _ => stripped,
            };
            break;
        }
    }
    format!(".{}", rest.to_lowercase())
}

// ============================================================================
// StrandDef
// ============================================================================

/// One strand declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandDef {
    /// Full declared name
    pub name: String,
    /// Short name used as the strand key in bundles
    pub short_name: String,
    /// Declared type
    pub stype: StrandType,
    /// Array qualifiers
    pub array_flags: ArrayFlags,
    /// Default text as written in the bundledef
    pub default_text: String,
    /// Optional strands are not created with the bundle
    pub optional: bool,
    /// Read-only once set
    pub readonly: bool,
}

impl StrandDef {
    /// Mandatory declaration with the null default
    pub fn new(name: impl Into<String>, stype: StrandType) -> Self {
        let name = name.into();
        Self {
            short_name: short_name(&name),
            name,
            stype,
            array_flags: ArrayFlags::empty(),
            default_text: "NULL".to_string(),
            optional: false,
            readonly: false,
        }
    }

    /// Builder: mark optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Builder: mark as an array
    pub fn array(mut self) -> Self {
        self.array_flags.insert(ArrayFlags::ARRAY_OF);
        self
    }

    /// Builder: set the default text
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    /// True if the strand holds an array
    pub fn is_array(&self) -> bool {
        self.array_flags.contains(ArrayFlags::ARRAY_OF)
    }

    /// Parsed default; `None` for deferred types
    pub fn default_value(&self) -> Result<Option<StrandValue>> {
        StrandValue::parse_default(self.stype, &self.default_text)
    }

    /// Fresh strand initialised from the default
    ///
    /// Arrays start empty; scalars hold the default when the type has one.
    pub fn new_strand(&self) -> Result<Strand> {
        let mut strand = Strand::new(self.stype, self.is_array());
        if !self.is_array() {
            if let Some(v) = self.default_value()? {
                strand.set_values(&self.short_name, vec![v])?;
            }
        }
        Ok(strand)
    }

    fn strand0(&self) -> String {
        let mut s = String::new();
        if self.optional {
            s.push(FLAG_OPTIONAL);
        }
        s.push(self.stype.as_char());
        s.push_str(&self.name);
        s
    }

    fn strand1(&self) -> String {
        format!("{} {}", self.array_flags.bits(), self.default_text)
    }

    fn parse_pair(strand0: &str, strand1: &str) -> Result<Self> {
        let mut chars = strand0.chars();
        let mut optional = false;
        let mut tchar = chars
            .next()
            .ok_or_else(|| Error::schema("empty strand declaration"))?;
        if tchar == FLAG_OPTIONAL {
            optional = true;
            tchar = chars
                .next()
                .ok_or_else(|| Error::schema(format!("declaration '{}' has no type", strand0)))?;
        }
        let stype = StrandType::from_char(tchar).ok_or_else(|| {
            Error::InvalidFormat(format!("unknown strand type '{}' in '{}'", tchar, strand0))
        })?;
        let name: String = chars.collect();

        let (flags_text, default_text) = strand1.split_once(' ').unwrap_or((strand1, ""));
        let bits: u32 = flags_text.trim().parse().map_err(|_| {
            Error::InvalidFormat(format!("bad array flags '{}' for '{}'", flags_text, name))
        })?;

        let def = StrandDef {
            short_name: short_name(&name),
            name,
            stype,
            array_flags: ArrayFlags::from_bits(bits),
            default_text: default_text.to_string(),
            optional,
            readonly: false,
        };
        def.default_value()?;
        Ok(def)
    }
}

/// A directive block kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// Directive name
    pub name: String,
    /// Items between `@BEGIN` and `@END`
    pub lines: Vec<String>,
}

/// One tokenised bundledef item
#[derive(Debug, Clone, PartialEq)]
pub enum BundledefItem {
    /// Strand declaration
    Decl(StrandDef),
    /// Comment, without the leading marker
    Comment(String),
    /// Directive block
    Directive(Directive),
}

// ============================================================================
// Bundledef
// ============================================================================

/// Raw bundledef: an ordered list of strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundledef {
    items: Vec<String>,
}

impl Bundledef {
    /// Wrap a list of items
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// One item per non-blank line
    pub fn from_lines(text: &str) -> Self {
        Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty()))
    }

    /// Items in order
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Append the items of another bundledef
    pub fn extend(&mut self, other: &Bundledef) {
        self.items.extend(other.items.iter().cloned());
    }

    /// Concatenation of several bundledefs
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Bundledef>) -> Self {
        let mut out = Bundledef::default();
        for p in parts {
            out.extend(p);
        }
        out
    }

    /// Tokenise without merging
    pub fn parse(&self) -> Result<Vec<BundledefItem>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.items.len() {
            let item = &self.items[i];
            if let Some(text) = item.strip_prefix(FLAG_COMMENT) {
                out.push(BundledefItem::Comment(text.to_string()));
                i += 1;
            } else if let Some(text) = item.strip_prefix(FLAG_DIRECTIVE) {
                let name = text
                    .strip_prefix("BEGIN ")
                    .map(str::trim)
                    .ok_or_else(|| Error::schema(format!("unexpected directive '{}'", item)))?;
                let end = format!("{}END {}", FLAG_DIRECTIVE, name);
                let close = self.items[i + 1..]
                    .iter()
                    .position(|s| *s == end)
                    .ok_or_else(|| Error::schema(format!("directive '{}' is not closed", name)))?;
                let lines = self.items[i + 1..i + 1 + close].to_vec();
                out.push(BundledefItem::Directive(Directive {
                    name: name.to_string(),
                    lines,
                }));
                i += close + 2;
            } else {
                let strand1 = self.items.get(i + 1).ok_or_else(|| {
                    Error::schema(format!("declaration '{}' has no second item", item))
                })?;
                out.push(BundledefItem::Decl(StrandDef::parse_pair(item, strand1)?));
                i += 2;
            }
        }
        Ok(out)
    }

    /// Validate and merge into a blueprint for `bundle_type`
    pub fn validate(&self, bundle_type: &str) -> Result<Blueprint> {
        let result = self.validate_inner(bundle_type);
        match &result {
            Ok(bp) => debug!(
                target: "nirva::blueprint",
                bundle_type,
                strands = bp.strands.len(),
                "bundledef validated"
            ),
            Err(e) => warn!(target: "nirva::blueprint", bundle_type, error = %e, "bundledef rejected"),
        }
        result
    }

    fn validate_inner(&self, bundle_type: &str) -> Result<Blueprint> {
        let mut bp = Blueprint {
            bundle_type: bundle_type.to_string(),
            strands: Vec::new(),
            template: None,
            directives: Vec::new(),
            comments: Vec::new(),
        };
        let mut pending = Vec::new();

        for item in self.parse()? {
            match item {
                BundledefItem::Comment(c) => bp.comments.push(c),
                BundledefItem::Directive(d) => pending.push(d),
                BundledefItem::Decl(def) => bp.merge(def)?,
            }
        }

        for d in pending {
            match d.name.as_str() {
                DIRECTIVE_MAKE_MANDATORY => {
                    for line in &d.lines {
                        bp.get_mut(line)?.optional = false;
                    }
                }
                DIRECTIVE_MAKE_READONLY => {
                    for line in &d.lines {
                        bp.get_mut(line)?.readonly = true;
                    }
                }
                DIRECTIVE_TEMPLATE => {
                    if bp.template.is_some() {
                        return Err(Error::schema(format!(
                            "'{}' declares more than one template",
                            bundle_type
                        )));
                    }
                    match d.lines.as_slice() {
                        [s0, s1] => bp.template = Some(StrandDef::parse_pair(s0, s1)?),
                        _ => {
                            return Err(Error::schema(
                                "template directive must hold exactly one declaration",
                            ))
                        }
                    }
                }
                _ => bp.directives.push(d),
            }
        }
        Ok(bp)
    }

    /// Length-prefixed wire form
    ///
    /// Layout: item count (u32 LE), then for each item its byte length
    /// (u32 LE) followed by the UTF-8 bytes.
    pub fn flatten(&self) -> Vec<u8> {
        let size = 4 + self.items.iter().map(|s| 4 + s.len()).sum::<usize>();
        let mut buf = Vec::with_capacity(size);
        // Writes into a Vec cannot fail
        let _ = buf.write_u32::<LittleEndian>(self.items.len() as u32);
        for item in &self.items {
            let _ = buf.write_u32::<LittleEndian>(item.len() as u32);
            buf.extend_from_slice(item.as_bytes());
        }
        buf
    }

    /// Parse the wire form produced by [`Bundledef::flatten`]
    pub fn unflatten(bytes: &[u8]) -> Result<Self> {
        let truncated = |_| Error::InvalidFormat("flattened bundledef is truncated".to_string());
        let mut cur = Cursor::new(bytes);
        let count = cur.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = cur.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            let remaining = bytes.len() - cur.position() as usize;
            if len > remaining {
                return Err(Error::InvalidFormat(
                    "flattened bundledef is truncated".to_string(),
                ));
            }
            let mut raw = vec![0u8; len];
            cur.read_exact(&mut raw).map_err(truncated)?;
            let s = String::from_utf8(raw)
                .map_err(|e| Error::InvalidFormat(format!("item is not UTF-8: {}", e)))?;
            items.push(s);
        }
        if (cur.position() as usize) != bytes.len() {
            return Err(Error::InvalidFormat(
                "trailing bytes after flattened bundledef".to_string(),
            ));
        }
        Ok(Self { items })
    }

    /// 64-bit fingerprint of the flattened form
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(&self.flatten())
    }
}

// ============================================================================
// Blueprint
// ============================================================================

/// Validated schema for one bundle type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    bundle_type: String,
    strands: Vec<StrandDef>,
    template: Option<StrandDef>,
    directives: Vec<Directive>,
    comments: Vec<String>,
}

impl Blueprint {
    fn merge(&mut self, def: StrandDef) -> Result<()> {
        let Some(existing) = self
            .strands
            .iter_mut()
            .find(|d| d.short_name == def.short_name)
        else {
            self.strands.push(def);
            return Ok(());
        };
        if existing.name != def.name {
            return Err(Error::schema(format!(
                "'{}' and '{}' share the short name '{}'",
                existing.name, def.name, def.short_name
            )));
        }
        if existing.stype != def.stype {
            return Err(Error::schema(format!(
                "'{}' declared as both {} and {}",
                def.name, existing.stype, def.stype
            )));
        }
        if existing.array_flags != def.array_flags || existing.default_text != def.default_text {
            return Err(Error::schema(format!(
                "'{}' declared with conflicting defaults '{}' and '{}'",
                def.name,
                existing.strand1(),
                def.strand1()
            )));
        }
        if existing.optional && !def.optional {
            existing.optional = false;
        }
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut StrandDef> {
        let sname = short_name(name);
        let bundle_type = &self.bundle_type;
        self.strands
            .iter_mut()
            .find(|d| d.short_name == sname)
            .ok_or_else(|| {
                Error::schema(format!("directive names unknown strand '{}' in {}", name, bundle_type))
            })
    }

    /// Bundle type this blueprint describes
    pub fn bundle_type(&self) -> &str {
        &self.bundle_type
    }

    /// Every strand def in declaration order
    pub fn strands(&self) -> &[StrandDef] {
        &self.strands
    }

    /// Mandatory strand defs
    pub fn mandatory(&self) -> impl Iterator<Item = &StrandDef> {
        self.strands.iter().filter(|d| !d.optional)
    }

    /// Optional strand defs
    pub fn optional(&self) -> impl Iterator<Item = &StrandDef> {
        self.strands.iter().filter(|d| d.optional)
    }

    /// Strand def by full or short name
    pub fn get(&self, name: &str) -> Option<&StrandDef> {
        let sname = short_name(name);
        self.strands.iter().find(|d| d.short_name == sname)
    }

    /// The template def, when the blueprint allows dynamically named strands
    pub fn template(&self) -> Option<&StrandDef> {
        self.template.as_ref()
    }

    /// Unrecognised directive blocks
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Comments
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Canonical bundledef reproducing this blueprint
    pub fn to_bundledef(&self) -> Bundledef {
        let mut items = Vec::new();
        for c in &self.comments {
            items.push(format!("{}{}", FLAG_COMMENT, c));
        }
        for d in &self.strands {
            items.push(d.strand0());
            items.push(d.strand1());
        }
        let readonly: Vec<&StrandDef> = self.strands.iter().filter(|d| d.readonly).collect();
        if !readonly.is_empty() {
            items.push(format!("{}BEGIN {}", FLAG_DIRECTIVE, DIRECTIVE_MAKE_READONLY));
            items.extend(readonly.iter().map(|d| d.name.clone()));
            items.push(format!("{}END {}", FLAG_DIRECTIVE, DIRECTIVE_MAKE_READONLY));
        }
        if let Some(t) = &self.template {
            items.push(format!("{}BEGIN {}", FLAG_DIRECTIVE, DIRECTIVE_TEMPLATE));
            items.push(t.strand0());
            items.push(t.strand1());
            items.push(format!("{}END {}", FLAG_DIRECTIVE, DIRECTIVE_TEMPLATE));
        }
        for d in &self.directives {
            items.push(format!("{}BEGIN {}", FLAG_DIRECTIVE, d.name));
            items.extend(d.lines.iter().cloned());
            items.push(format!("{}END {}", FLAG_DIRECTIVE, d.name));
        }
        Bundledef { items }
    }

    /// Flattened canonical form
    pub fn flatten(&self) -> Vec<u8> {
        self.to_bundledef().flatten()
    }

    /// Fingerprint of the canonical form
    pub fn fingerprint(&self) -> u64 {
        self.to_bundledef().fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_def() -> Bundledef {
        Bundledef::new([
            "sSTRAND_VALUE_STRAND_TYPE",
            "0 NULL",
            "?*STRAND_VALUE_DATA",
            "0 NULL",
        ])
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("STRAND_GENERIC_NAME"), ".name");
        assert_eq!(short_name("STRAND_VALUE_STRAND_TYPE"), ".strand_type");
        assert_eq!(short_name("ATTR_AUDIO_RATE"), ".rate");
        assert_eq!(short_name(".already"), ".already");
        assert_eq!(short_name("PLAIN"), ".plain");
        assert_eq!(short_name("STRAND_FLAGS"), ".flags");
    }

    #[test]
    fn test_parse_declarations() {
        let items = value_def().parse().unwrap();
        assert_eq!(items.len(), 2);
        match &items[1] {
            BundledefItem::Decl(d) => {
                assert!(d.optional);
                assert_eq!(d.stype, StrandType::Proxied);
                assert_eq!(d.short_name, ".data");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_second_item() {
        let def = Bundledef::new(["iSTRAND_GENERIC_FLAGS"]);
        assert!(matches!(def.validate("X"), Err(Error::Schema(_))));
    }

    #[test]
    fn test_optional_demoted_by_mandatory() {
        let mut def = Bundledef::new(["?sSTRAND_GENERIC_NAME", "0 NULL"]);
        def.extend(&Bundledef::new(["sSTRAND_GENERIC_NAME", "0 NULL"]));
        let bp = def.validate("X").unwrap();
        assert_eq!(bp.strands().len(), 1);
        assert!(!bp.get(".name").unwrap().optional);
    }

    #[test]
    fn test_identical_duplicate_ignored() {
        let def = Bundledef::concat([&value_def(), &value_def()]);
        let bp = def.validate("VALUE").unwrap();
        assert_eq!(bp.strands().len(), 2);
        assert_eq!(bp.optional().count(), 1);
    }

    #[test]
    fn test_conflicting_type_rejected() {
        let def = Bundledef::new(["iSTRAND_GENERIC_FLAGS", "0 0", "uSTRAND_GENERIC_FLAGS", "0 0"]);
        assert!(matches!(def.validate("X"), Err(Error::Schema(_))));
    }

    #[test]
    fn test_conflicting_default_rejected() {
        let def = Bundledef::new(["iSTRAND_GENERIC_FLAGS", "0 0", "iSTRAND_GENERIC_FLAGS", "0 1"]);
        assert!(def.validate("X").is_err());
    }

    #[test]
    fn test_same_short_name_different_domain_rejected() {
        let def = Bundledef::new(["sSTRAND_GENERIC_NAME", "0 NULL", "sSTRAND_OTHER_NAME", "0 NULL"]);
        assert!(def.validate("X").is_err());
    }

    #[test]
    fn test_directives() {
        let def = Bundledef::new([
            "#generic definition",
            "?iSTRAND_GENERIC_FLAGS",
            "0 0",
            "sSTRAND_VALUE_STRAND_TYPE",
            "0 NULL",
            "@BEGIN make_mandatory",
            "STRAND_GENERIC_FLAGS",
            "@END make_mandatory",
            "@BEGIN make_readonly",
            ".strand_type",
            "@END make_readonly",
            "@BEGIN template",
            "BCONT",
            "1 NULL",
            "@END template",
            "@BEGIN add_hook_auto",
            "VALUE_UPDATED",
            "@END add_hook_auto",
        ]);
        let bp = def.validate("X").unwrap();
        assert!(!bp.get(".flags").unwrap().optional);
        assert!(bp.get(".strand_type").unwrap().readonly);
        let t = bp.template().unwrap();
        assert_eq!(t.name, "CONT");
        assert!(t.is_array());
        assert_eq!(bp.directives().len(), 1);
        assert_eq!(bp.comments(), &["generic definition".to_string()]);
    }

    #[test]
    fn test_unclosed_directive() {
        let def = Bundledef::new(["@BEGIN make_mandatory", "STRAND_GENERIC_FLAGS"]);
        assert!(def.validate("X").is_err());
    }

    #[test]
    fn test_directive_unknown_strand() {
        let def = Bundledef::new(["@BEGIN make_readonly", "STRAND_GENERIC_NOPE", "@END make_readonly"]);
        assert!(def.validate("X").is_err());
    }

    #[test]
    fn test_new_strand_from_default() {
        let d = StrandDef::new("STRAND_GENERIC_FLAGS", StrandType::Int).with_default("5");
        let s = d.new_strand().unwrap();
        assert_eq!(s.first(), Some(&StrandValue::Int(5)));
        let d = StrandDef::new("STRAND_LIST_ITEMS", StrandType::Int).array();
        assert!(d.new_strand().unwrap().is_empty());
    }

    #[test]
    fn test_flatten_roundtrip_and_fingerprint() {
        let bp = value_def().validate("VALUE").unwrap();
        let bytes = bp.flatten();
        let back = Bundledef::unflatten(&bytes).unwrap().validate("VALUE").unwrap();
        assert_eq!(back, bp);
        assert_eq!(back.fingerprint(), bp.fingerprint());

        let other = Bundledef::new(["iSTRAND_GENERIC_FLAGS", "0 0"])
            .validate("VALUE")
            .unwrap();
        assert_ne!(other.fingerprint(), bp.fingerprint());
    }

    #[test]
    fn test_unflatten_rejects_truncation() {
        let bytes = value_def().flatten();
        assert!(Bundledef::unflatten(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(Bundledef::unflatten(&extra).is_err());
        assert!(Bundledef::unflatten(&[]).is_err());
    }
}
