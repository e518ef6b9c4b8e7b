//! Pivot definitions and sort-schema resolution.
//!
//! A pivot is defined in YAML (or JSON) alongside the job that runs it:
//!
//! ```yaml
//! index:
//!   - { name: Prefecture, column: prefecture }
//!   - { name: City, column: city }
//! columns: date
//! values:
//!   - { name: Orders, column: order_count }
//!   - { name: Openings, column: job_offer_count }
//! sort: [prefecture, values]
//! ```
//!
//! `name` is the header written to the output, `column` the field read
//! from each input row. The sort entry `values` orders rows by value block.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::PivotError;
use crate::domain::Value;

/// Sort entry that orders rows by their value block
pub const VALUE_BLOCK_SENTINEL: &str = "values";

/// Synthetic label of the block-order helper column
pub const BLOCK_ORDER_LABEL: &str = "__values_sort__";

/// Synthetic label of the sort-only helper for sort entry `position`
pub fn sort_helper_label(position: usize) -> String {
    format!("__sort_{}__", position)
}

/// Whether `name` could collide with a synthetic helper label
pub fn is_reserved_label(name: &str) -> bool {
    if name == BLOCK_ORDER_LABEL {
        return true;
    }
    name.strip_prefix("__sort_")
        .and_then(|rest| rest.strip_suffix("__"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// A logical/physical column pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    /// Header in the output table
    pub name: String,

    /// Column read from input rows
    pub column: String,
}

impl FieldRef {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

/// One entry of the sort list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortField {
    /// Declaration order of the value blocks
    ValueBlock,

    /// A physical column
    Column(String),
}

impl From<String> for SortField {
    fn from(s: String) -> Self {
        if s == VALUE_BLOCK_SENTINEL {
            SortField::ValueBlock
        } else {
            SortField::Column(s)
        }
    }
}

impl From<&str> for SortField {
    fn from(s: &str) -> Self {
        SortField::from(s.to_string())
    }
}

impl From<SortField> for String {
    fn from(field: SortField) -> Self {
        match field {
            SortField::ValueBlock => VALUE_BLOCK_SENTINEL.to_string(),
            SortField::Column(column) => column,
        }
    }
}

/// A complete pivot definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSpec {
    /// Row-grouping fields, in output order
    pub index: Vec<FieldRef>,

    /// Column whose distinct values become output columns
    pub columns: String,

    /// One stacked block per entry
    pub values: Vec<FieldRef>,

    /// Ascending sort order of the final rows
    #[serde(default)]
    pub sort: Vec<SortField>,

    /// Header of the column naming each row's value block (default: "metric")
    #[serde(default = "default_metric_column")]
    pub metric_column: String,

    /// Column values always present in the output, even with no rows
    #[serde(default)]
    pub expected_columns: Vec<Value>,
}

fn default_metric_column() -> String {
    "metric".to_string()
}

impl PivotSpec {
    /// Create a spec with default metric column and no expected columns
    pub fn new(
        index: Vec<FieldRef>,
        columns: impl Into<String>,
        values: Vec<FieldRef>,
        sort: Vec<SortField>,
    ) -> Self {
        Self {
            index,
            columns: columns.into(),
            values,
            sort,
            metric_column: default_metric_column(),
            expected_columns: Vec::new(),
        }
    }

    /// Load a pivot definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pivot file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pivot definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pivot YAML")
    }

    /// Validate the definition without looking at any data
    pub fn validate(&self) -> Result<(), PivotError> {
        if self.index.is_empty() {
            return Err(PivotError::EmptyIndex);
        }
        if self.values.is_empty() {
            return Err(PivotError::EmptyValues);
        }
        if self.columns.is_empty() {
            return Err(PivotError::EmptyColumnField);
        }
        if self.metric_column.is_empty() {
            return Err(PivotError::BlankField {
                section: "metric_column",
                position: 0,
            });
        }

        for (section, fields) in [("index", &self.index), ("values", &self.values)] {
            for (position, field) in fields.iter().enumerate() {
                if field.name.is_empty() || field.column.is_empty() {
                    return Err(PivotError::BlankField { section, position });
                }
            }
        }

        for (position, field) in self.sort.iter().enumerate() {
            if matches!(field, SortField::Column(c) if c.is_empty()) {
                return Err(PivotError::BlankField {
                    section: "sort",
                    position,
                });
            }
        }

        // Headers before the column block must be unique
        let mut seen = HashSet::new();
        for name in self
            .index
            .iter()
            .map(|f| f.name.as_str())
            .chain(std::iter::once(self.metric_column.as_str()))
        {
            if is_reserved_label(name) {
                return Err(PivotError::ReservedName(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(PivotError::DuplicateName(name.to_string()));
            }
        }

        Ok(())
    }

    /// Validate and resolve the grouping key and sort keys
    pub fn resolve(&self) -> Result<SortSchema, PivotError> {
        self.validate()?;

        let mut group: Vec<GroupColumn> = self
            .index
            .iter()
            .map(|f| GroupColumn {
                column: f.column.clone(),
                label: f.name.clone(),
                helper: false,
            })
            .collect();
        let mut keys = Vec::with_capacity(self.sort.len());

        for (i, field) in self.sort.iter().enumerate() {
            match field {
                SortField::ValueBlock => keys.push(SortKey::BlockOrder),
                SortField::Column(column) => {
                    // Index columns sort under their own header; anything
                    // else joins the grouping key as a helper
                    if let Some(pos) = group.iter().position(|g| &g.column == column) {
                        keys.push(SortKey::Group(pos));
                    } else {
                        group.push(GroupColumn {
                            column: column.clone(),
                            label: sort_helper_label(i),
                            helper: true,
                        });
                        keys.push(SortKey::Group(group.len() - 1));
                    }
                }
            }
        }

        Ok(SortSchema { group, keys })
    }
}

/// A column of the grouping key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupColumn {
    /// Physical column read from input rows
    pub column: String,

    /// Output header, or a synthetic label for helpers
    pub label: String,

    /// Sort-only column, dropped from the final table
    pub helper: bool,
}

/// A resolved sort criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Position of the value block in `values`
    BlockOrder,

    /// Position in the grouping key
    Group(usize),
}

/// Grouping key plus sort keys, resolved before any row is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSchema {
    pub group: Vec<GroupColumn>,
    pub keys: Vec<SortKey>,
}

impl SortSchema {
    /// Synthetic labels of sort-only grouping columns
    pub fn helper_labels(&self) -> impl Iterator<Item = &str> {
        self.group
            .iter()
            .filter(|g| g.helper)
            .map(|g| g.label.as_str())
    }
}
