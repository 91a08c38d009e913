//! Deterministic synthetic sales dataset used to seed the source table.

use crate::model::ColumnInfo;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub const REGIONS: [&str; 8] = [
    "north", "south", "east", "west", "central", "coastal", "mountain", "island",
];

/// Rows handed to the collaborator per insert call.
pub const BATCH_ROWS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Real(f64),
    Text(String),
}

pub fn sales_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("sale_id", "INTEGER"),
        ColumnInfo::new("customer_id", "INTEGER"),
        ColumnInfo::new("product_id", "INTEGER"),
        ColumnInfo::new("sale_date", "TEXT"),
        ColumnInfo::new("region", "TEXT"),
        ColumnInfo::new("quantity", "INTEGER"),
        ColumnInfo::new("unit_price", "REAL"),
        ColumnInfo::new("amount", "REAL"),
    ]
}

/// Yields `rows` sales rows in batches. `sale_id` is unique but emitted in
/// shuffled order; `customer_id` repeats.
pub struct SalesGenerator {
    rng: ChaCha8Rng,
    ids: Vec<i64>,
    cursor: usize,
    customers: i64,
    epoch: NaiveDate,
}

impl SalesGenerator {
    pub fn new(seed: u64, rows: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut ids: Vec<i64> = (1..=rows as i64).collect();
        ids.shuffle(&mut rng);
        Self {
            rng,
            ids,
            cursor: 0,
            customers: (rows as i64 / 20).max(1),
            epoch: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.ids.len() - self.cursor
    }

    fn row(&mut self, sale_id: i64) -> Vec<Cell> {
        let quantity = self.rng.gen_range(1..=20i64);
        let unit_price = (self.rng.gen_range(1.0..500.0f64) * 100.0).round() / 100.0;
        let day = self.rng.gen_range(0..730i64);
        let date = self.epoch + ChronoDuration::days(day);
        vec![
            Cell::Int(sale_id),
            Cell::Int(self.rng.gen_range(1..=self.customers)),
            Cell::Int(self.rng.gen_range(1..=500i64)),
            Cell::Text(date.format("%Y-%m-%d").to_string()),
            Cell::Text(REGIONS[self.rng.gen_range(0..REGIONS.len())].to_string()),
            Cell::Int(quantity),
            Cell::Real(unit_price),
            Cell::Real(((quantity as f64) * unit_price * 100.0).round() / 100.0),
        ]
    }

    pub fn next_batch(&mut self, max: usize) -> Vec<Vec<Cell>> {
        let end = (self.cursor + max).min(self.ids.len());
        let ids: Vec<i64> = self.ids[self.cursor..end].to_vec();
        self.cursor = end;
        ids.into_iter().map(|id| self.row(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut g: SalesGenerator) -> Vec<Vec<Cell>> {
        let mut out = Vec::new();
        while g.remaining() > 0 {
            out.extend(g.next_batch(7));
        }
        out
    }

    #[test]
    fn test_same_seed_same_rows() {
        assert_eq!(drain(SalesGenerator::new(7, 50)), drain(SalesGenerator::new(7, 50)));
        assert_ne!(drain(SalesGenerator::new(7, 50)), drain(SalesGenerator::new(8, 50)));
    }

    #[test]
    fn test_sale_ids_unique_and_shuffled() {
        let rows = drain(SalesGenerator::new(1, 200));
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| match r[0] {
                Cell::Int(v) => v,
                _ => panic!("sale_id must be an integer"),
            })
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 200);
        assert_ne!(ids, sorted, "ids should not be emitted in key order");
    }

    #[test]
    fn test_row_width_matches_columns() {
        let rows = SalesGenerator::new(3, 5).next_batch(5);
        assert!(rows.iter().all(|r| r.len() == sales_columns().len()));
    }
}
