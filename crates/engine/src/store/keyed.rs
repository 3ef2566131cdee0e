//! Keyed arrays
//!
//! A keyed array is a backing array strand plus a parallel key index: a
//! string array strand named by the blueprint's template prefix followed by
//! the backing strand's short name (`.cont.entries` for `.entries`).
//! Position `i` of the index names element `i` of the backing array.
//!
//! The backing strand is written through the normal hooked path; the index
//! is bookkeeping and is updated directly.

use super::{BundleData, BundleEntry, BundleStore, Edit};
use nirva_core::{short_name, BundleId, Error, Result, StrandType, StrandValue};

fn key_position(data: &BundleData, index: &str, key: &str) -> Option<usize> {
    data.strands
        .get(index)
        .and_then(|s| s.values().iter().position(|v| v.as_str() == Some(key)))
}

impl BundleStore {
    fn key_index_name(&self, entry: &BundleEntry, strand: &str) -> Result<String> {
        let template = entry.blueprint.template().ok_or_else(|| {
            Error::schema(format!(
                "{} has no template strand for key indexes",
                entry.blueprint.bundle_type()
            ))
        })?;
        if template.stype != StrandType::String {
            return Err(Error::schema(format!(
                "template of {} is {}, key indexes need string",
                entry.blueprint.bundle_type(),
                template.stype
            )));
        }
        Ok(format!("{}{}", template.short_name, short_name(strand)))
    }

    /// Add or replace the element stored under `key`
    ///
    /// # Errors
    ///
    /// `Schema` if the bundle type has no string template; `InvalidInput` if
    /// the backing strand holds elements outside the index; any error from
    /// writing the backing strand.
    pub fn add_value_by_key(
        &self,
        id: BundleId,
        strand: &str,
        key: &str,
        value: StrandValue,
    ) -> Result<()> {
        let entry = self.live(id)?;
        let index = self.key_index_name(&entry, strand)?;
        let backing = short_name(strand);
        let (pos, indexed, stored) = {
            let data = entry.data.read();
            (
                key_position(&data, &index, key),
                data.strands.get(&index).map_or(0, |s| s.len()),
                data.strands.get(&backing).map_or(0, |s| s.len()),
            )
        };
        if let Some(i) = pos {
            self.edit(id, &backing, Edit::SetItem(i, value))?;
            return Ok(());
        }
        if indexed != stored {
            return Err(Error::invalid_input(format!(
                "strand '{}' holds {} elements but {} keys",
                backing, stored, indexed
            )));
        }
        self.edit(id, &backing, Edit::Append(value))?;
        let mut data = entry.data.write();
        let mut keys = match data.strands.get(&index) {
            Some(s) => s.clone(),
            None => self.def_for(&entry, &index)?.new_strand()?,
        };
        keys.push(&index, StrandValue::from(key))?;
        data.insert(index, keys);
        Ok(())
    }

    /// True if an element is stored under `key`
    pub fn has_value_for_key(&self, id: BundleId, strand: &str, key: &str) -> Result<bool> {
        let entry = self.live(id)?;
        let index = self.key_index_name(&entry, strand)?;
        let found = key_position(&entry.data.read(), &index, key).is_some();
        Ok(found)
    }

    /// Element stored under `key`
    pub fn get_value_by_key(&self, id: BundleId, strand: &str, key: &str) -> Result<StrandValue> {
        let entry = self.live(id)?;
        let index = self.key_index_name(&entry, strand)?;
        let backing = short_name(strand);
        let data = entry.data.read();
        key_position(&data, &index, key)
            .and_then(|i| data.strands.get(&backing).and_then(|s| s.get(i).cloned()))
            .ok_or_else(|| Error::not_found(format!("key '{}' in strand '{}'", key, backing)))
    }

    /// Remove and return the element stored under `key`
    pub fn remove_value_by_key(&self, id: BundleId, strand: &str, key: &str) -> Result<StrandValue> {
        let entry = self.live(id)?;
        let index = self.key_index_name(&entry, strand)?;
        let backing = short_name(strand);
        let pos = key_position(&entry.data.read(), &index, key)
            .ok_or_else(|| Error::not_found(format!("key '{}' in strand '{}'", key, backing)))?;
        let removed = self
            .edit(id, &backing, Edit::Remove(pos))?
            .ok_or_else(|| Error::internal("remove returned no element"))?;
        let mut data = entry.data.write();
        if let Some(keys) = data.strands.get_mut(&index) {
            keys.remove(pos);
        }
        Ok(removed)
    }

    /// Keys in index order
    pub fn keys(&self, id: BundleId, strand: &str) -> Result<Vec<String>> {
        let entry = self.live(id)?;
        let index = self.key_index_name(&entry, strand)?;
        let data = entry.data.read();
        Ok(data
            .strands
            .get(&index)
            .map(|s| {
                s.values()
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Position of the first element equal to `value`
    pub fn lookup_item_in_array(
        &self,
        id: BundleId,
        strand: &str,
        value: &StrandValue,
    ) -> Result<Option<usize>> {
        self.read_strand(id, strand, |s| s.values().iter().position(|v| v == value))
    }
}
