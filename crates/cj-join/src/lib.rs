#![forbid(unsafe_code)]

use std::{fmt, mem::size_of, ops::Deref, str::FromStr};

use bumpalo::{Bump, collections::Vec as BumpVec};
use cj_table::{Row, Table};
use thiserror::Error;

/// Cell text written for every column of a side that has no matching row.
pub const NULL_FILLER: &str = "null";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JoinStrategy {
    #[default]
    Left,
    Right,
    Inner,
    Full,
}

impl JoinStrategy {
    pub const ALL: [Self; 4] = [Self::Left, Self::Right, Self::Inner, Self::Full];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Inner => "inner",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinStrategy {
    type Err = JoinError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == value)
            .ok_or_else(|| JoinError::InvalidStrategy(value.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("invalid strategy error: `{0}` is not one of left, right, inner, full")]
    InvalidStrategy(String),
}

/// Join output: concatenated headers plus one concatenated row per match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    header: Vec<String>,
    rows: Vec<Row>,
}

impl MergedTable {
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, Vec<Row>) {
        (self.header, self.rows)
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

/// Positions of the left and right rows feeding one output row; `None`
/// means that side is filled with [`NULL_FILLER`].
type RowPair = (Option<usize>, Option<usize>);

pub fn join_tables(left: &Table, right: &Table, strategy: JoinStrategy) -> MergedTable {
    join_tables_with_options(left, right, strategy, JoinExecutionOptions::default())
}

pub fn join_tables_with_options(
    left: &Table,
    right: &Table,
    strategy: JoinStrategy,
    options: JoinExecutionOptions,
) -> MergedTable {
    let (merged, _) = join_tables_with_trace(left, right, strategy, options);
    merged
}

fn join_tables_with_trace(
    left: &Table,
    right: &Table,
    strategy: JoinStrategy,
    options: JoinExecutionOptions,
) -> (MergedTable, JoinExecutionTrace) {
    let output_rows = estimate_output_rows(left, right, strategy);
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let rows = if use_arena {
        let arena = Bump::new();
        build_rows(
            left,
            right,
            strategy,
            BumpVec::<RowPair>::with_capacity_in(output_rows, &arena),
        )
    } else {
        build_rows(left, right, strategy, Vec::<RowPair>::with_capacity(output_rows))
    };

    log::debug!(
        "{strategy} join: left_rows={} right_rows={} output_rows={} arena={use_arena}",
        left.len(),
        right.len(),
        rows.len()
    );

    let mut header = Vec::with_capacity(left.width() + right.width());
    header.extend_from_slice(left.header());
    header.extend_from_slice(right.header());

    (
        MergedTable { header, rows },
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    )
}

fn estimate_output_rows(left: &Table, right: &Table, strategy: JoinStrategy) -> usize {
    match strategy {
        JoinStrategy::Left => left.len(),
        JoinStrategy::Right => right.len(),
        JoinStrategy::Inner => left
            .keys()
            .filter(|key| right.key_index().contains(key))
            .count(),
        JoinStrategy::Full => {
            left.key_index().len()
                + right
                    .keys()
                    .filter(|key| !left.key_index().contains(key))
                    .count()
        }
    }
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<RowPair>())
}

/// Emits one [`RowPair`] per output row, in output order.
///
/// `left` and `right` walk their table in file order, duplicates included.
/// `inner` and `full` walk the distinct keys instead: left keys in order of
/// first appearance, then (for `full`) right-only keys in theirs.
fn plan_rows(
    left: &Table,
    right: &Table,
    strategy: JoinStrategy,
    mut emit: impl FnMut(RowPair),
) {
    match strategy {
        JoinStrategy::Left => {
            for (left_pos, row) in left.rows().iter().enumerate() {
                let key = &row[left.key_column()];
                emit((Some(left_pos), right.key_index().get(key)));
            }
        }
        JoinStrategy::Right => {
            for (right_pos, row) in right.rows().iter().enumerate() {
                let key = &row[right.key_column()];
                emit((left.key_index().get(key), Some(right_pos)));
            }
        }
        JoinStrategy::Inner => {
            for &left_pos in left.key_index().first_positions() {
                let key = &left.rows()[left_pos][left.key_column()];
                if let Some(right_pos) = right.key_index().get(key) {
                    emit((Some(left_pos), Some(right_pos)));
                }
            }
        }
        JoinStrategy::Full => {
            for &left_pos in left.key_index().first_positions() {
                let key = &left.rows()[left_pos][left.key_column()];
                emit((Some(left_pos), right.key_index().get(key)));
            }
            for &right_pos in right.key_index().first_positions() {
                let key = &right.rows()[right_pos][right.key_column()];
                if !left.key_index().contains(key) {
                    emit((None, Some(right_pos)));
                }
            }
        }
    }
}

/// Plans into `plan`, whichever allocator backs it, then materializes.
fn build_rows<P>(left: &Table, right: &Table, strategy: JoinStrategy, mut plan: P) -> Vec<Row>
where
    P: Extend<RowPair> + Deref<Target = [RowPair]>,
{
    plan_rows(left, right, strategy, |pair| plan.extend([pair]));
    materialize_rows(left, right, &*plan)
}

fn materialize_rows(left: &Table, right: &Table, plan: &[RowPair]) -> Vec<Row> {
    let width = left.width() + right.width();
    plan.iter()
        .map(|&(left_pos, right_pos)| {
            let mut row = Vec::with_capacity(width);
            extend_side(&mut row, left, left_pos);
            extend_side(&mut row, right, right_pos);
            row
        })
        .collect()
}

fn extend_side(row: &mut Row, table: &Table, pos: Option<usize>) {
    match pos.and_then(|pos| table.row(pos)) {
        Some(cells) => row.extend_from_slice(cells),
        None => row.extend((0..table.width()).map(|_| NULL_FILLER.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use bumpalo::{Bump, collections::Vec as BumpVec};
    use cj_table::{Row, Table};

    use super::{
        JoinError, JoinExecutionOptions, JoinStrategy, MergedTable, NULL_FILLER, RowPair,
        build_rows, join_tables, join_tables_with_options, join_tables_with_trace,
    };

    fn cells(values: &[&str]) -> Row {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    fn table(header: &[&str], rows: &[&[&str]], key: &str) -> Table {
        Table::new(
            cells(header),
            rows.iter().map(|row| cells(row)).collect(),
            key,
        )
        .expect("table")
    }

    fn people() -> Table {
        table(&["id", "name"], &[&["1", "Alice"], &["2", "Bob"]], "id")
    }

    fn ages() -> Table {
        table(&["id", "age"], &[&["2", "30"], &["3", "40"]], "id")
    }

    fn row_set(merged: &MergedTable) -> BTreeSet<Row> {
        merged.rows().iter().cloned().collect()
    }

    #[test]
    fn left_join_keeps_left_order_and_fills_right() {
        let out = join_tables(&people(), &ages(), JoinStrategy::Left);
        assert_eq!(out.header(), cells(&["id", "name", "id", "age"]).as_slice());
        assert_eq!(
            out.rows(),
            &[
                cells(&["1", "Alice", "null", "null"]),
                cells(&["2", "Bob", "2", "30"]),
            ]
        );
    }

    #[test]
    fn right_join_keeps_right_order_and_fills_left() {
        let out = join_tables(&people(), &ages(), JoinStrategy::Right);
        assert_eq!(
            out.rows(),
            &[
                cells(&["2", "Bob", "2", "30"]),
                cells(&["null", "null", "3", "40"]),
            ]
        );
    }

    #[test]
    fn inner_join_emits_only_shared_keys() {
        let out = join_tables(&people(), &ages(), JoinStrategy::Inner);
        assert_eq!(out.rows(), &[cells(&["2", "Bob", "2", "30"])]);
    }

    #[test]
    fn full_join_covers_union_of_keys() {
        let out = join_tables(&people(), &ages(), JoinStrategy::Full);
        let expected: BTreeSet<Row> = [
            cells(&["1", "Alice", "null", "null"]),
            cells(&["2", "Bob", "2", "30"]),
            cells(&["null", "null", "3", "40"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(out.rows().len(), 3);
        assert_eq!(row_set(&out), expected);
    }

    #[test]
    fn duplicate_keys_resolve_to_first_row_without_fan_out() {
        let left = table(
            &["id", "tag"],
            &[&["k", "first"], &["k", "second"]],
            "id",
        );
        let right = table(&["id", "score"], &[&["k", "10"]], "id");

        let inner = join_tables(&left, &right, JoinStrategy::Inner);
        assert_eq!(inner.rows(), &[cells(&["k", "first", "k", "10"])]);

        let full = join_tables(&left, &right, JoinStrategy::Full);
        assert_eq!(full.rows().len(), 1);

        // Positional strategies still emit every row of the driving side.
        let left_join = join_tables(&left, &right, JoinStrategy::Left);
        assert_eq!(left_join.rows().len(), 2);

        let right_join = join_tables(&right, &left, JoinStrategy::Left);
        assert_eq!(right_join.rows(), &[cells(&["k", "10", "k", "first"])]);
    }

    #[test]
    fn empty_sides_are_valid() {
        let empty = table(&["id", "x", "y"], &[], "id");
        let people = people();

        let left = join_tables(&people, &empty, JoinStrategy::Left);
        assert_eq!(left.header().len(), 5);
        assert_eq!(left.rows()[0], cells(&["1", "Alice", "null", "null", "null"]));

        let right = join_tables(&people, &empty, JoinStrategy::Right);
        assert!(right.rows().is_empty());

        let inner = join_tables(&empty, &people, JoinStrategy::Inner);
        assert!(inner.rows().is_empty());

        let full = join_tables(&empty, &people, JoinStrategy::Full);
        assert_eq!(full.rows().len(), 2);
        assert!(full.rows().iter().all(|row| row[..3].iter().all(|cell| cell == NULL_FILLER)));
    }

    #[test]
    fn colliding_column_names_are_kept() {
        let out = join_tables(&people(), &people(), JoinStrategy::Inner);
        assert_eq!(out.header(), cells(&["id", "name", "id", "name"]).as_slice());
    }

    #[test]
    fn keys_match_on_exact_text() {
        let left = table(&["id"], &[&["1"], &["01"]], "id");
        let right = table(&["id"], &[&["1"]], "id");
        let out = join_tables(&left, &right, JoinStrategy::Left);
        assert_eq!(out.rows(), &[cells(&["1", "1"]), cells(&["01", "null"])]);
    }

    #[test]
    fn strategy_parses_known_names_only() {
        for strategy in JoinStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<JoinStrategy>(), Ok(strategy));
        }
        assert_eq!(JoinStrategy::default(), JoinStrategy::Left);
        assert_eq!(
            "outer".parse::<JoinStrategy>(),
            Err(JoinError::InvalidStrategy("outer".to_owned()))
        );
        assert!("LEFT".parse::<JoinStrategy>().is_err());
    }

    #[test]
    fn arena_join_matches_global_allocator_behavior() {
        let global_options = JoinExecutionOptions {
            use_arena: false,
            arena_budget_bytes: 0,
        };
        for strategy in JoinStrategy::ALL {
            let global = join_tables_with_options(&people(), &ages(), strategy, global_options);
            let arena = join_tables_with_options(
                &people(),
                &ages(),
                strategy,
                JoinExecutionOptions::default(),
            );
            assert_eq!(arena, global, "{strategy}");
        }
    }

    #[test]
    fn arena_join_falls_back_when_budget_is_too_small() {
        let options = JoinExecutionOptions {
            use_arena: true,
            arena_budget_bytes: 1,
        };
        let (fallback_out, trace) =
            join_tables_with_trace(&people(), &ages(), JoinStrategy::Full, options);

        assert_eq!(fallback_out, join_tables(&people(), &ages(), JoinStrategy::Full));
        assert!(!trace.used_arena);
        assert_eq!(trace.output_rows, 3);
        assert!(trace.estimated_bytes > options.arena_budget_bytes);
    }

    #[test]
    fn arena_and_heap_plans_build_identical_rows() {
        let left = table(&["id", "v"], &[&["a", "1"], &["a", "2"], &["b", "3"]], "id");
        let right = table(&["id", "w"], &[&["b", "x"], &["c", "y"]], "id");

        for strategy in JoinStrategy::ALL {
            let arena = Bump::new();
            let from_arena = build_rows(
                &left,
                &right,
                strategy,
                BumpVec::<RowPair>::new_in(&arena),
            );
            let from_heap = build_rows(&left, &right, strategy, Vec::<RowPair>::new());
            assert_eq!(from_arena, from_heap, "{strategy}");
        }
    }

    #[test]
    fn row_estimate_matches_output_for_every_strategy() {
        let left = table(
            &["id", "v"],
            &[&["a", "1"], &["b", "2"], &["a", "3"], &["c", "4"]],
            "id",
        );
        let right = table(&["id", "w"], &[&["c", "x"], &["d", "y"], &["d", "z"]], "id");

        for strategy in JoinStrategy::ALL {
            let (out, trace) =
                join_tables_with_trace(&left, &right, strategy, JoinExecutionOptions::default());
            assert_eq!(trace.output_rows, out.rows().len(), "{strategy}");
            assert!(trace.used_arena);
        }
    }
}
