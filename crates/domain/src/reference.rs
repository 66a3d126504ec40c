//! Human-readable reference numbers: `ORD-2026-000001`.

use chrono::{DateTime, Datelike, Utc};
use store::StoreTransaction;

use crate::error::DomainError;

/// Formats a reference number. Values wider than six digits are kept whole.
pub fn format_reference(prefix: &str, year: i32, value: i64) -> String {
    format!("{prefix}-{year}-{value:06}")
}

/// Allocates the next reference number for `prefix` in the year of `now`.
///
/// Numbers are unique per prefix and year. A rolled-back transaction may
/// leave a gap.
pub(crate) async fn next_reference(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<String, DomainError> {
    let year = now.year();
    let value = tx.next_sequence(prefix, year).await?;
    Ok(format_reference(prefix, year, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use store::{InMemoryStore, Store};

    #[test]
    fn pads_to_six_digits() {
        assert_eq!(format_reference("ORD", 2026, 1), "ORD-2026-000001");
        assert_eq!(format_reference("INV", 2026, 1234567), "INV-2026-1234567");
    }

    #[tokio::test]
    async fn numbers_restart_each_year() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let dec = Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap();
        let jan = Utc.with_ymd_and_hms(2027, 1, 1, 1, 0, 0).unwrap();

        assert_eq!(
            next_reference(tx.as_mut(), "DSP", dec).await.unwrap(),
            "DSP-2026-000001"
        );
        assert_eq!(
            next_reference(tx.as_mut(), "DSP", dec).await.unwrap(),
            "DSP-2026-000002"
        );
        assert_eq!(
            next_reference(tx.as_mut(), "DSP", jan).await.unwrap(),
            "DSP-2027-000001"
        );
    }
}
