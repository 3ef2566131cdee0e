//! Diagnostic views of bundles: JSON trees and C-like layouts

use super::BundleStore;
use nirva_core::{BundleId, Result, Strand, StrandType, StrandValue};
use serde_json::{json, Map, Value};
use std::fmt::Write;

fn value_json(v: &StrandValue) -> Value {
    match v {
        StrandValue::Int(i) => json!(i),
        StrandValue::Double(d) => json!(d),
        StrandValue::Bool(b) => json!(b),
        StrandValue::String(s) | StrandValue::FuncPtr(s) => json!(s),
        StrandValue::Int64(i) => json!(i),
        StrandValue::Uint(u) => json!(u),
        StrandValue::Uint64(u) => json!(u),
        StrandValue::VoidPtr(p) => json!(p.map(|p| format!("0x{:x}", p))),
        StrandValue::BundlePtr(b) | StrandValue::ConstBundlePtr(b) => {
            json!(b.map(|b| b.to_string()))
        }
    }
}

fn c_type(strand: &Strand) -> &'static str {
    match strand.effective_type() {
        StrandType::Int => "int",
        StrandType::Double => "double",
        StrandType::Boolean => "boolean",
        StrandType::String => "char *",
        StrandType::Int64 => "int64_t",
        StrandType::Uint => "uint32_t",
        StrandType::Uint64 => "uint64_t",
        StrandType::VoidPtr => "void *",
        StrandType::FuncPtr => "funcptr_t",
        StrandType::BundlePtr => "bundle_t *",
        StrandType::ConstBundlePtr => "const bundle_t *",
        StrandType::BundlePtrOptConst => "bundle_t * /* or const */",
        StrandType::Proxied => "void * /* unresolved */",
    }
}

impl BundleStore {
    /// JSON tree of a bundle; owned sub-bundles are nested, const pointers
    /// appear as `#id`
    pub fn to_json(&self, id: BundleId) -> Result<Value> {
        let entry = self.live(id)?;
        let (order, strands) = {
            let data = entry.data.read();
            (data.order.clone(), data.strands.clone())
        };
        let mut out = Map::new();
        for key in order {
            let Some(strand) = strands.get(&key) else {
                continue;
            };
            let mut values = Vec::with_capacity(strand.len());
            for v in strand.values() {
                values.push(match v {
                    StrandValue::BundlePtr(Some(child)) => self.to_json(*child)?,
                    other => value_json(other),
                });
            }
            let value = if strand.is_array() {
                Value::Array(values)
            } else {
                values.into_iter().next().unwrap_or(Value::Null)
            };
            out.insert(key, value);
        }
        Ok(json!({
            "id": id.to_string(),
            "uid": entry.uid.to_string(),
            "type": entry.blueprint.bundle_type(),
            "strands": Value::Object(out),
        }))
    }

    /// C-like struct rendering of a bundle's strands
    pub fn describe_layout(&self, id: BundleId) -> Result<String> {
        let entry = self.live(id)?;
        let data = entry.data.read();
        let mut out = String::new();
        let _ = writeln!(out, "struct {} {{", entry.blueprint.bundle_type().to_lowercase());
        for key in &data.order {
            let Some(strand) = data.strands.get(key) else {
                continue;
            };
            let field = key.trim_start_matches('.');
            let ctype = c_type(strand);
            if strand.is_array() {
                let _ = writeln!(out, "    {} *{}; /* {} elements */", ctype, field, strand.len());
            } else {
                let _ = writeln!(out, "    {} {};", ctype, field);
            }
        }
        out.push_str("};\n");
        Ok(out)
    }
}
