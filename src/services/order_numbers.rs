use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tracing::instrument;

use crate::errors::ServiceError;
use crate::repositories::OrderRepository;

/// Produces `PA` + zero-padded sequence + `ddmmyy` in the business time zone.
#[derive(Clone)]
pub struct OrderNumberGenerator {
    repository: Arc<dyn OrderRepository>,
    offset: FixedOffset,
}

impl OrderNumberGenerator {
    pub fn new(repository: Arc<dyn OrderRepository>, offset: FixedOffset) -> Self {
        Self { repository, offset }
    }

    pub fn format(sequence: u64, date: NaiveDate) -> String {
        format!("PA{:04}{}", sequence, date.format("%d%m%y"))
    }

    pub fn business_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    #[instrument(skip(self))]
    pub async fn next(&self, now: DateTime<Utc>) -> Result<String, ServiceError> {
        let sequence = self.repository.next_sequence().await?;
        Ok(Self::format(sequence, self.business_date(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryOrderRepository;
    use chrono::TimeZone;

    #[test]
    fn pads_to_four_digits_and_widens_beyond() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 7).unwrap();
        assert_eq!(OrderNumberGenerator::format(4, date), "PA0004070724");
        assert_eq!(OrderNumberGenerator::format(12345, date), "PA12345070724");
    }

    #[tokio::test]
    async fn date_follows_business_offset() {
        let generator = OrderNumberGenerator::new(
            Arc::new(InMemoryOrderRepository::new()),
            FixedOffset::east_opt(8 * 3600).unwrap(),
        );
        // 17:30 UTC on 6 July is already 7 July in Kuala Lumpur.
        let now = Utc.with_ymd_and_hms(2024, 7, 6, 17, 30, 0).unwrap();
        assert_eq!(generator.next(now).await.unwrap(), "PA0001070724");
        assert_eq!(generator.next(now).await.unwrap(), "PA0002070724");
    }
}
