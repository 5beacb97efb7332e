use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::authz::errors::AuthzError;
use crate::authz::types::Setting;

/// Sparse two-axis grant table indexed both by row and by column.
///
/// Every cell lives in both indices with the same value; a missing cell
/// means `Unset`. Both indices are only ever written together by
/// [`SecurityMap::add_cell`] and [`SecurityMap::del_cell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityMap<R, C> {
    by_row: BTreeMap<R, BTreeMap<C, Setting>>,
    by_col: BTreeMap<C, BTreeMap<R, Setting>>,
}

impl<R, C> Default for SecurityMap<R, C> {
    fn default() -> Self {
        Self {
            by_row: BTreeMap::new(),
            by_col: BTreeMap::new(),
        }
    }
}

impl<R, C> SecurityMap<R, C>
where
    R: Ord + Clone,
    C: Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }

    /// Write `value` at (`row`, `col`). Returns `false` without touching
    /// anything when the cell already holds `value`.
    pub fn add_cell(&mut self, row: R, col: C, value: Setting) -> bool {
        let current = self.by_row.get(&row).and_then(|cols| cols.get(&col));
        if current == Some(&value) {
            return false;
        }

        self.by_col
            .entry(col.clone())
            .or_default()
            .insert(row.clone(), value);
        self.by_row.entry(row).or_default().insert(col, value);
        true
    }

    /// Remove the cell, pruning emptied buckets. Returns whether a cell existed.
    pub fn del_cell<Q1, Q2>(&mut self, row: &Q1, col: &Q2) -> bool
    where
        R: Borrow<Q1>,
        C: Borrow<Q2>,
        Q1: Ord + ?Sized,
        Q2: Ord + ?Sized,
    {
        let Some(cols) = self.by_row.get_mut(row) else {
            return false;
        };
        if cols.remove(col).is_none() {
            return false;
        }
        if cols.is_empty() {
            self.by_row.remove(row);
        }

        if let Some(rows) = self.by_col.get_mut(col) {
            rows.remove(row);
            if rows.is_empty() {
                self.by_col.remove(col);
            }
        }
        true
    }

    /// Setting at (`row`, `col`), or `default` when the cell is absent.
    pub fn query_cell<Q1, Q2>(&self, row: &Q1, col: &Q2, default: Setting) -> Setting
    where
        R: Borrow<Q1>,
        C: Borrow<Q2>,
        Q1: Ord + ?Sized,
        Q2: Ord + ?Sized,
    {
        self.by_row
            .get(row)
            .and_then(|cols| cols.get(col))
            .copied()
            .unwrap_or(default)
    }

    /// Strict lookup: a missing cell is an error.
    pub fn get_cell<Q1, Q2>(&self, row: &Q1, col: &Q2) -> Result<Setting, AuthzError>
    where
        R: Borrow<Q1>,
        C: Borrow<Q2>,
        Q1: Ord + Display + ?Sized,
        Q2: Ord + Display + ?Sized,
    {
        self.by_row
            .get(row)
            .and_then(|cols| cols.get(col))
            .copied()
            .ok_or_else(|| AuthzError::MissingCell {
                row: row.to_string(),
                col: col.to_string(),
            })
    }

    pub fn get_row<Q>(&self, row: &Q) -> Vec<(C, Setting)>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.by_row
            .get(row)
            .map(|cols| cols.iter().map(|(c, s)| (c.clone(), *s)).collect())
            .unwrap_or_default()
    }

    pub fn get_col<Q>(&self, col: &Q) -> Vec<(R, Setting)>
    where
        C: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.by_col
            .get(col)
            .map(|rows| rows.iter().map(|(r, s)| (r.clone(), *s)).collect())
            .unwrap_or_default()
    }

    pub fn get_all_cells(&self) -> Vec<(R, C, Setting)> {
        self.by_row
            .iter()
            .flat_map(|(r, cols)| cols.iter().map(move |(c, s)| (r.clone(), c.clone(), *s)))
            .collect()
    }

    /// Iterate a row without cloning keys.
    pub(crate) fn row_iter<Q>(&self, row: &Q) -> impl Iterator<Item = (&C, Setting)>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.by_row
            .get(row)
            .into_iter()
            .flat_map(|cols| cols.iter().map(|(c, s)| (c, *s)))
    }

    /// Iterate a column without cloning keys.
    pub(crate) fn col_iter<Q>(&self, col: &Q) -> impl Iterator<Item = (&R, Setting)>
    where
        C: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.by_col
            .get(col)
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(r, s)| (r, *s)))
    }
}

/// Persisted form of one cell.
#[derive(Serialize, Deserialize)]
struct Cell<R, C> {
    row: R,
    col: C,
    setting: Setting,
}

impl<R, C> Serialize for SecurityMap<R, C>
where
    R: Ord + Clone + Serialize,
    C: Ord + Clone + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cells: Vec<Cell<&R, &C>> = self
            .by_row
            .iter()
            .flat_map(|(row, cols)| {
                cols.iter().map(move |(col, setting)| Cell {
                    row,
                    col,
                    setting: *setting,
                })
            })
            .collect();
        cells.serialize(serializer)
    }
}

impl<'de, R, C> Deserialize<'de> for SecurityMap<R, C>
where
    R: Ord + Clone + Deserialize<'de>,
    C: Ord + Clone + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Rebuilding through add_cell keeps both indices in step.
        let cells: Vec<Cell<R, C>> = Vec::deserialize(deserializer)?;
        let mut map = SecurityMap::new();
        for cell in cells {
            map.add_cell(cell.row, cell.col, cell.setting);
        }
        Ok(map)
    }
}
