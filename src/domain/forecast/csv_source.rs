use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use crate::api::forecast_dto::TrafficRecordDto;
use crate::domain::clock::clock::SharedClock;
use crate::domain::forecast::forecast::{Forecast, ForecastSource};
use crate::domain::utils::id::LinkId;
use crate::error::{Error, Result};

/// Replays a per-hour traffic dataset (`timestamp,link_id,bandwidth_utilization (ratio)`) as if it were the
/// predictor: slot `n` is answered with the `n`-th distinct hour, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct CsvReplayForecastSource {
    hours: Vec<(i64, Vec<(LinkId, f64)>)>,
    capacities: HashMap<LinkId, f64>,
    clock: SharedClock,
}

fn parse_timestamp(raw: &str) -> Result<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| Error::ConfigError(format!("unparseable timestamp '{}' in traffic dataset: {}", raw, e)))
}

impl CsvReplayForecastSource {
    pub fn from_path<P: AsRef<Path>>(path: P, capacities: HashMap<LinkId, f64>, clock: SharedClock) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, capacities, clock)
    }

    pub fn from_reader<R: Read>(reader: R, capacities: HashMap<LinkId, f64>, clock: SharedClock) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut by_hour: BTreeMap<i64, Vec<(LinkId, f64)>> = BTreeMap::new();

        for record in csv_reader.deserialize::<TrafficRecordDto>() {
            let record = record?;
            let timestamp = parse_timestamp(&record.timestamp)?;
            by_hour.entry(timestamp).or_default().push((LinkId::new(record.link_id), record.utilization_ratio));
        }

        if by_hour.is_empty() {
            return Err(Error::ConfigError("traffic dataset contains no records".to_string()));
        }

        log::info!("Loaded traffic dataset with {} hours.", by_hour.len());

        Ok(CsvReplayForecastSource { hours: by_hour.into_iter().collect(), capacities, clock })
    }

    pub fn hour_count(&self) -> usize {
        self.hours.len()
    }
}

#[async_trait]
impl ForecastSource for CsvReplayForecastSource {
    async fn fetch_slot(&self, slot: u64) -> Result<Vec<Forecast>> {
        let (hour, rows) = &self.hours[(slot % self.hours.len() as u64) as usize];
        let issued_at = self.clock.now_in_s();

        log::debug!("Replaying dataset hour {} for slot {}", hour, slot);

        Ok(rows
            .iter()
            .filter_map(|(link_id, ratio)| {
                let capacity = self.capacities.get(link_id)?;
                Some(Forecast { link_id: link_id.clone(), slot, predicted_utilization: ratio * capacity, issued_at })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::clock_mock::MockClock;
    use std::sync::Arc;

    const DATASET: &str = "timestamp,link_id,bandwidth_utilization (ratio)\n\
        2024-01-01 01:00:00,l1,0.5\n\
        2024-01-01 00:00:00,l1,0.25\n\
        2024-01-01 00:00:00,l2,0.75\n";

    #[tokio::test]
    async fn test_replays_hours_in_order_and_wraps() {
        let capacities = HashMap::from([(LinkId::new("l1"), 20.0), (LinkId::new("l2"), 4.0)]);
        let source = CsvReplayForecastSource::from_reader(DATASET.as_bytes(), capacities, Arc::new(MockClock::new(42))).unwrap();
        assert_eq!(source.hour_count(), 2);

        let first = source.fetch_slot(0).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].predicted_utilization, 5.0);
        assert_eq!(first[1].predicted_utilization, 3.0);
        assert_eq!(first[0].issued_at, 42);

        let second = source.fetch_slot(1).await.unwrap();
        assert_eq!(second[0].predicted_utilization, 10.0);

        let wrapped = source.fetch_slot(2).await.unwrap();
        assert_eq!(wrapped[0].slot, 2);
        assert_eq!(wrapped[0].predicted_utilization, 5.0, "Slot 2 wraps back to the first hour");
    }
}
