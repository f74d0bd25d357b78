//! Benchmark data generators.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rowcache_common::types::{RowId, Value};
use rowcache_invalidation::Invalidations;
use rowcache_storage::row::Columns;
use rowcache_storage::Row;

/// Table used for generated single rows.
pub const TABLE: &str = "hierarchy";

/// Generates random string data.
pub fn random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates `count` sequential row ids.
pub fn generate_row_ids(count: usize) -> Vec<RowId> {
    (0..count as i64).map(|i| RowId::new(TABLE, i)).collect()
}

/// Generates single rows with a random title each.
pub fn generate_rows(count: usize) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(42);
    generate_row_ids(count)
        .into_iter()
        .map(|row_id| {
            let mut columns = Columns::new();
            columns.insert("title".to_string(), Value::from(random_string(&mut rng, 24)));
            columns.insert("size".to_string(), Value::Int(rng.gen_range(0..1_000_000)));
            Row::simple(row_id, columns)
        })
        .collect()
}

/// Generates an invalidation set over `count` rows, roughly one in ten
/// deleted.
pub fn generate_invalidations(count: usize) -> Invalidations {
    let mut rng = StdRng::seed_from_u64(42);
    let mut invalidations = Invalidations::new();
    for row_id in generate_row_ids(count) {
        if rng.gen_ratio(1, 10) {
            invalidations.add_deleted(row_id);
        } else {
            invalidations.add_modified(row_id);
        }
    }
    invalidations
}

/// Generates `count` string values.
pub fn generate_values(count: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| Value::from(random_string(&mut rng, 16)))
        .collect()
}
