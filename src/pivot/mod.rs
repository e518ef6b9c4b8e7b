//! Stacked multi-metric pivot tables.
//!
//! Turns flat warehouse rows into a wide table for spreadsheet export:
//! one block of rows per value field, one column per distinct value of
//! the column field, missing cells filled with zero.
//!
//! The work happens in two phases. [`PivotSpec::resolve`] fixes the
//! grouping key and sort keys before any row is read. [`PivotReshaper::stack`]
//! then builds a [`StackedTable`] whose rows still carry the helper keys,
//! and [`StackedTable::finish`] strips them.

pub mod reshape;
pub mod spec;

use thiserror::Error;

pub use reshape::{reshape, PivotReshaper, StackedRow, StackedTable};
pub use spec::{
    is_reserved_label, sort_helper_label, FieldRef, GroupColumn, PivotSpec, SortField, SortKey,
    SortSchema, BLOCK_ORDER_LABEL, VALUE_BLOCK_SENTINEL,
};

/// Whether a pivot failure comes from the definition or the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotErrorKind {
    Configuration,
    DataShape,
}

/// Pivot failures; never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PivotError {
    #[error("Pivot index fields cannot be empty")]
    EmptyIndex,

    #[error("Pivot value fields cannot be empty")]
    EmptyValues,

    #[error("Pivot column field cannot be empty")]
    EmptyColumnField,

    #[error("Pivot {section} entry {position} has an empty name or column")]
    BlankField {
        section: &'static str,
        position: usize,
    },

    #[error("Duplicate pivot output column: '{0}'")]
    DuplicateName(String),

    #[error("Pivot output column '{0}' uses a reserved helper name")]
    ReservedName(String),

    #[error("Row {row} is missing column '{column}'")]
    MissingColumn { row: usize, column: String },

    #[error("Column value '{0}' renders the same header as another output column")]
    HeaderClash(String),
}

impl PivotError {
    pub fn kind(&self) -> PivotErrorKind {
        match self {
            PivotError::MissingColumn { .. } | PivotError::HeaderClash(_) => {
                PivotErrorKind::DataShape
            }
            _ => PivotErrorKind::Configuration,
        }
    }
}
