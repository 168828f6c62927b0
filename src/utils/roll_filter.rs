use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

/// Expected capacity and false-positive rate.
/// A hostel roster is small; the filter grows on demand anyway.
const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static ROLL_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

#[inline]
fn normalize(roll_number: &str) -> String {
    roll_number.trim().to_uppercase()
}

/// Check if a roll number might be taken (false positives possible)
pub fn might_exist(roll_number: &str) -> bool {
    let roll = normalize(roll_number);
    ROLL_FILTER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .contains(&roll)
}

pub fn insert(roll_number: &str) {
    let roll = normalize(roll_number);
    ROLL_FILTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .add(&roll);
}

pub fn remove(roll_number: &str) {
    let roll = normalize(roll_number);
    ROLL_FILTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&roll);
}

fn insert_batch(rolls: &[String]) {
    let mut filter = ROLL_FILTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    for roll in rolls {
        filter.add(roll);
    }
}

/// true  => roll number AVAILABLE
/// false => roll number TAKEN
pub async fn is_roll_available(roll_number: &str, pool: &MySqlPool) -> Result<bool, sqlx::Error> {
    // fast negative
    if !might_exist(roll_number) {
        return Ok(true);
    }

    let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students WHERE roll_number = ?")
        .bind(roll_number.trim())
        .fetch_one(pool)
        .await?;

    Ok(taken == 0)
}

/// Load every roll number into the filter, streaming in batches.
pub async fn warmup_roll_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT roll_number FROM students").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (roll,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize(&roll));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    tracing::info!(total, "Roll number filter warmup complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_rolls_are_found_regardless_of_case() {
        assert!(!might_exist("filter-test-7781"));
        insert(" filter-test-7781 ");
        assert!(might_exist("FILTER-TEST-7781"));

        remove("Filter-Test-7781");
        assert!(!might_exist("filter-test-7781"));
    }

    #[test]
    fn batch_insert_covers_all_rolls() {
        let rolls: Vec<String> = (0..50).map(|i| normalize(&format!("batch-{i}"))).collect();
        insert_batch(&rolls);
        assert!(rolls.iter().all(|r| might_exist(r)));
    }
}
