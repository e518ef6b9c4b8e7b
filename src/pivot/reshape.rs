//! Pivot reshaping.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use super::spec::{PivotSpec, SortKey, SortSchema, BLOCK_ORDER_LABEL};
use super::PivotError;
use crate::domain::{Row, Table, Value};

/// Validates a [`PivotSpec`] once and reshapes any number of row sets
#[derive(Debug, Clone)]
pub struct PivotReshaper {
    spec: PivotSpec,
    schema: SortSchema,
}

impl PivotReshaper {
    /// Fails on a malformed definition before any data is seen
    pub fn new(spec: PivotSpec) -> Result<Self, PivotError> {
        let schema = spec.resolve()?;
        Ok(Self { spec, schema })
    }

    pub fn spec(&self) -> &PivotSpec {
        &self.spec
    }

    pub fn schema(&self) -> &SortSchema {
        &self.schema
    }

    /// Build and sort the stacked blocks, helper keys still attached
    ///
    /// If a (group, column) pair occurs in several rows the last one wins;
    /// pre-aggregate upstream if that is not what you want.
    pub fn stack(&self, rows: &[Row]) -> Result<StackedTable, PivotError> {
        self.check_columns(rows)?;

        let spec = &self.spec;
        let mut universe: BTreeSet<Value> = spec.expected_columns.iter().cloned().collect();
        universe.extend(rows.iter().map(|r| r[&spec.columns].clone()));
        let universe: Vec<Value> = universe.into_iter().collect();
        self.check_headers(&universe)?;

        let mut stacked = Vec::new();
        for (block, field) in spec.values.iter().enumerate() {
            let mut groups: BTreeMap<Vec<Value>, BTreeMap<Value, Value>> = BTreeMap::new();

            for row in rows {
                let key = self
                    .schema
                    .group
                    .iter()
                    .map(|g| row[&g.column].clone())
                    .collect();
                groups
                    .entry(key)
                    .or_default()
                    .insert(row[&spec.columns].clone(), row[&field.column].clone());
            }

            debug!(block = %field.name, groups = groups.len(), "Built pivot block");

            for (key, mut cells) in groups {
                let cells = universe
                    .iter()
                    .map(|c| match cells.remove(c) {
                        Some(v) if !v.is_null() => v,
                        _ => Value::ZERO,
                    })
                    .collect();
                stacked.push(StackedRow { key, block, cells });
            }
        }

        let mut table = StackedTable {
            schema: self.schema.clone(),
            metric_column: spec.metric_column.clone(),
            block_names: spec.values.iter().map(|f| f.name.clone()).collect(),
            universe,
            rows: stacked,
        };
        table.sort();
        Ok(table)
    }

    /// Reshape `rows` into the final table
    pub fn reshape(&self, rows: &[Row]) -> Result<Table, PivotError> {
        let table = self.stack(rows)?.finish();
        debug!(rows = table.len(), columns = table.columns().len(), "Pivot complete");
        Ok(table)
    }

    // Distinct column values must render distinct headers, and none may
    // shadow a grouping label, the metric column or the block-order label
    fn check_headers(&self, universe: &[Value]) -> Result<(), PivotError> {
        let mut headers: HashSet<String> = self
            .schema
            .group
            .iter()
            .map(|g| g.label.clone())
            .collect();
        headers.insert(self.spec.metric_column.clone());
        headers.insert(BLOCK_ORDER_LABEL.to_string());

        for value in universe {
            let header = value.to_string();
            if !headers.insert(header.clone()) {
                return Err(PivotError::HeaderClash(header));
            }
        }
        Ok(())
    }

    fn check_columns(&self, rows: &[Row]) -> Result<(), PivotError> {
        let required: Vec<&str> = self
            .schema
            .group
            .iter()
            .map(|g| g.column.as_str())
            .chain(std::iter::once(self.spec.columns.as_str()))
            .chain(self.spec.values.iter().map(|f| f.column.as_str()))
            .collect();

        for (i, row) in rows.iter().enumerate() {
            if let Some(missing) = required.iter().find(|c| !row.contains_key(**c)) {
                return Err(PivotError::MissingColumn {
                    row: i,
                    column: missing.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Reshape `rows` according to `spec`
pub fn reshape(spec: &PivotSpec, rows: &[Row]) -> Result<Table, PivotError> {
    PivotReshaper::new(spec.clone())?.reshape(rows)
}

/// One pivot row before helper columns are stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackedRow {
    /// Grouping key, including sort-only helper columns
    pub key: Vec<Value>,

    /// Position of the value block this row belongs to
    pub block: usize,

    /// One cell per column-universe value
    pub cells: Vec<Value>,
}

/// All value blocks stacked, helper keys still present
#[derive(Debug, Clone)]
pub struct StackedTable {
    schema: SortSchema,
    metric_column: String,
    block_names: Vec<String>,
    universe: Vec<Value>,
    rows: Vec<StackedRow>,
}

impl StackedTable {
    pub fn rows(&self) -> &[StackedRow] {
        &self.rows
    }

    /// Distinct column-field values, in output order
    pub fn universe(&self) -> &[Value] {
        &self.universe
    }

    /// Every column, helpers included
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.schema.group.iter().map(|g| g.label.clone()).collect();
        columns.push(self.metric_column.clone());
        columns.push(BLOCK_ORDER_LABEL.to_string());
        columns.extend(self.universe.iter().map(|v| v.to_string()));
        columns
    }

    /// Columns that `finish` removes
    pub fn helper_columns(&self) -> Vec<String> {
        let mut helpers = vec![BLOCK_ORDER_LABEL.to_string()];
        helpers.extend(self.schema.helper_labels().map(str::to_string));
        helpers
    }

    // Stable, so ties keep emission order
    fn sort(&mut self) {
        let keys = &self.schema.keys;
        if keys.is_empty() {
            return;
        }

        self.rows.sort_by(|a, b| {
            keys.iter()
                .map(|key| match key {
                    SortKey::BlockOrder => a.block.cmp(&b.block),
                    SortKey::Group(i) => a.key[*i].cmp(&b.key[*i]),
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Drop helper columns and produce the output table
    pub fn finish(self) -> Table {
        let visible: Vec<usize> = self
            .schema
            .group
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.helper)
            .map(|(i, _)| i)
            .collect();

        let mut columns: Vec<String> = visible
            .iter()
            .map(|&i| self.schema.group[i].label.clone())
            .collect();
        columns.push(self.metric_column);
        columns.extend(self.universe.iter().map(|v| v.to_string()));

        let mut table = Table::new(columns);
        for row in self.rows {
            let mut cells: Vec<Value> = visible.iter().map(|&i| row.key[i].clone()).collect();
            cells.push(Value::Text(self.block_names[row.block].clone()));
            cells.extend(row.cells);
            table.push_row(cells);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::spec::{FieldRef, SortField};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn spec(sort: Vec<SortField>) -> PivotSpec {
        PivotSpec::new(
            vec![FieldRef::new("Prefecture", "prefecture")],
            "date",
            vec![
                FieldRef::new("Orders", "orders"),
                FieldRef::new("Openings", "openings"),
            ],
            sort,
        )
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            row(&[
                ("prefecture", "Tokyo".into()),
                ("region", "Kanto".into()),
                ("date", "2020-01-02".into()),
                ("orders", Value::Int(7)),
                ("openings", Value::Int(70)),
            ]),
            row(&[
                ("prefecture", "Osaka".into()),
                ("region", "Kansai".into()),
                ("date", "2020-01-01".into()),
                ("orders", Value::Int(3)),
                ("openings", Value::Int(30)),
            ]),
        ]
    }

    #[test]
    fn test_stacked_keeps_helpers_until_finish() {
        let reshaper = PivotReshaper::new(spec(vec!["region".into(), SortField::ValueBlock])).unwrap();
        let stacked = reshaper.stack(&sample_rows()).unwrap();

        assert_eq!(
            stacked.columns(),
            vec![
                "Prefecture",
                "__sort_0__",
                "metric",
                BLOCK_ORDER_LABEL,
                "2020-01-01",
                "2020-01-02",
            ]
        );
        assert_eq!(stacked.helper_columns(), vec![BLOCK_ORDER_LABEL, "__sort_0__"]);

        // Kansai sorts before Kanto; block order breaks the tie within a region
        let order: Vec<(Value, usize)> = stacked
            .rows()
            .iter()
            .map(|r| (r.key[0].clone(), r.block))
            .collect();
        let expected: Vec<(Value, usize)> = vec![
            ("Osaka".into(), 0),
            ("Osaka".into(), 1),
            ("Tokyo".into(), 0),
            ("Tokyo".into(), 1),
        ];
        assert_eq!(order, expected);

        let table = stacked.finish();
        assert_eq!(
            table.columns(),
            &["Prefecture", "metric", "2020-01-01", "2020-01-02"]
        );
        assert_eq!(table.get(0, "metric"), Some(&Value::from("Orders")));
        assert_eq!(table.get(1, "2020-01-01"), Some(&Value::Int(30)));
        assert_eq!(table.get(1, "2020-01-02"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_no_sort_keeps_emission_order() {
        let table = reshape(&spec(vec![]), &sample_rows()).unwrap();

        let metrics: Vec<String> = table
            .rows()
            .iter()
            .map(|r| format!("{}/{}", r[0], r[1]))
            .collect();
        assert_eq!(
            metrics,
            vec!["Osaka/Orders", "Tokyo/Orders", "Osaka/Openings", "Tokyo/Openings"]
        );
    }

    #[test]
    fn test_duplicate_cell_last_write_wins() {
        let mut rows = sample_rows();
        rows.push(row(&[
            ("prefecture", "Osaka".into()),
            ("region", "Kansai".into()),
            ("date", "2020-01-01".into()),
            ("orders", Value::Int(9)),
            ("openings", Value::Int(90)),
        ]));

        let table = reshape(&spec(vec!["prefecture".into()]), &rows).unwrap();
        assert_eq!(table.get(0, "2020-01-01"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_null_cell_filled_with_zero() {
        let mut rows = sample_rows();
        rows[1].insert("orders".to_string(), Value::Null);

        let table = reshape(&spec(vec!["prefecture".into()]), &rows).unwrap();
        assert_eq!(table.get(0, "Prefecture"), Some(&Value::from("Osaka")));
        assert_eq!(table.get(0, "2020-01-01"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_header_clash_rejected() {
        let mut rows = sample_rows();
        rows[1].insert("date".to_string(), Value::from("metric"));

        let err = reshape(&spec(vec![]), &rows).unwrap_err();
        assert_eq!(err, PivotError::HeaderClash("metric".to_string()));
        assert_eq!(err.kind(), crate::pivot::PivotErrorKind::DataShape);
    }

    #[test]
    fn test_missing_sort_only_column() {
        let mut rows = sample_rows();
        rows[1].remove("region");

        let err = reshape(&spec(vec!["region".into()]), &rows).unwrap_err();
        assert_eq!(
            err,
            PivotError::MissingColumn {
                row: 1,
                column: "region".to_string()
            }
        );
    }
}
