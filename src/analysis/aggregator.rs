//! Metric aggregation and comparison.
//!
//! This module provides the computations behind the analysis report:
//! monthly-to-annual roll-up, dominant metric selection and
//! year-over-year changes.

use crate::models::{AnnualRecord, Metric, MonthlyRecord};
use std::collections::BTreeMap;

/// Sum monthly records into one annual record per year, ascending by year.
pub fn aggregate_annual(monthly: &[MonthlyRecord]) -> Vec<AnnualRecord> {
    let mut by_year: BTreeMap<i32, AnnualRecord> = BTreeMap::new();

    for record in monthly {
        by_year
            .entry(record.year)
            .or_insert_with(|| AnnualRecord::empty(record.year))
            .accumulate(record);
    }

    by_year.into_values().collect()
}

/// Distinct years present in the annual data, ascending.
pub fn distinct_years(annual: &[AnnualRecord]) -> Vec<i32> {
    let mut years: Vec<i32> = annual.iter().map(|a| a.year).collect();
    years.sort_unstable();
    years.dedup();
    years
}

/// Distinct years in first-seen order.
pub fn years_in_order(annual: &[AnnualRecord]) -> Vec<i32> {
    let mut years = Vec::new();
    for record in annual {
        if !years.contains(&record.year) {
            years.push(record.year);
        }
    }
    years
}

/// The metric with the largest value for a year.
///
/// Ties go to the earlier metric in [`Metric::ALL`].
pub fn dominant_metric(annual: &AnnualRecord) -> (Metric, f64) {
    let mut best = (Metric::Co2, annual.co2_kg);
    for metric in &Metric::ALL[1..] {
        let value = annual.value(*metric);
        if value > best.1 {
            best = (*metric, value);
        }
    }
    best
}

/// Direction of a year-over-year change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increased,
    /// Also used for no change at all.
    Decreased,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increased => "increased",
            Direction::Decreased => "decreased",
        }
    }
}

/// Change in one metric between two consecutive years.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricChange {
    pub metric: Metric,
    /// `current - previous`.
    pub change: f64,
    /// `change / previous * 100`; `None` when the previous value is zero.
    pub percent: Option<f64>,
    pub direction: Direction,
}

/// Compare every metric of `current` against `previous`.
pub fn year_over_year(previous: &AnnualRecord, current: &AnnualRecord) -> Vec<MetricChange> {
    Metric::ALL
        .iter()
        .map(|&metric| {
            let prev = previous.value(metric);
            let change = current.value(metric) - prev;
            let percent = (prev != 0.0).then(|| change / prev * 100.0);
            let direction = if change > 0.0 {
                Direction::Increased
            } else {
                Direction::Decreased
            };

            MetricChange {
                metric,
                change,
                percent,
                direction,
            }
        })
        .collect()
}

/// Latest year's record plus the record for the year before it, if both exist.
///
/// Requires more than one annual record.
pub fn comparison_pair(annual: &[AnnualRecord]) -> Option<(&AnnualRecord, &AnnualRecord)> {
    if annual.len() <= 1 {
        return None;
    }
    let latest_year = *distinct_years(annual).last()?;
    let latest = annual.iter().find(|a| a.year == latest_year)?;
    let previous = annual.iter().find(|a| a.year == latest_year - 1)?;
    Some((previous, latest))
}

/// Average monthly records per distinct year, rounded to one decimal.
///
/// Returns `None` when there are no years to divide by.
pub fn records_per_year(monthly_count: usize, year_count: usize) -> Option<f64> {
    if year_count == 0 {
        return None;
    }
    let avg = monthly_count as f64 / year_count as f64;
    Some((avg * 10.0).round() / 10.0)
}

/// Years whose reported totals drift from the monthly sums by more than
/// `tolerance` (relative), with the metric that drifted.
pub fn annual_mismatches(
    monthly: &[MonthlyRecord],
    annual: &[AnnualRecord],
    tolerance: f64,
) -> Vec<(i32, Metric)> {
    let computed = aggregate_annual(monthly);
    let mut mismatches = Vec::new();

    for reported in annual {
        let Some(sum) = computed.iter().find(|c| c.year == reported.year) else {
            continue;
        };
        for metric in Metric::ALL {
            let expected = sum.value(metric);
            let actual = reported.value(metric);
            let scale = expected.abs().max(actual.abs());
            if scale > 0.0 && (expected - actual).abs() / scale > tolerance {
                mismatches.push((reported.year, metric));
            }
        }
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(year: i32, month: u32, co2: f64, plastic: f64, water: f64, energy: f64) -> MonthlyRecord {
        MonthlyRecord {
            year,
            month,
            month_label: String::new(),
            co2_kg: co2,
            plastic_lbs: plastic,
            water_gal: water,
            energy_kwh: energy,
        }
    }

    fn annual(year: i32, co2: f64, plastic: f64, water: f64, energy: f64) -> AnnualRecord {
        AnnualRecord {
            year,
            co2_kg: co2,
            plastic_lbs: plastic,
            water_gal: water,
            energy_kwh: energy,
        }
    }

    #[test]
    fn test_aggregate_annual_example() {
        let monthly = vec![
            month(2020, 1, 1200.5, 45.2, 5000.0, 2500.0),
            month(2020, 2, 1150.0, 42.0, 4800.0, 2400.0),
        ];

        let totals = aggregate_annual(&monthly);

        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].year, 2020);
        assert!((totals[0].co2_kg - 2350.5).abs() < 1e-9);
        assert!((totals[0].plastic_lbs - 87.2).abs() < 1e-9);
        assert_eq!(totals[0].water_gal, 9800.0);
        assert_eq!(totals[0].energy_kwh, 4900.0);
    }

    #[test]
    fn test_aggregate_is_additive_per_year() {
        let monthly: Vec<MonthlyRecord> = (1..=12)
            .flat_map(|m| {
                vec![
                    month(2021, m, m as f64 * 1.1, 0.0, 0.0, 0.0),
                    month(2022, m, m as f64 * 2.2, 0.0, 0.0, 0.0),
                ]
            })
            .collect();

        let totals = aggregate_annual(&monthly);
        assert_eq!(totals.iter().map(|t| t.year).collect::<Vec<_>>(), vec![2021, 2022]);

        for total in &totals {
            let expected: f64 = monthly
                .iter()
                .filter(|m| m.year == total.year)
                .map(|m| m.co2_kg)
                .sum();
            assert!((total.co2_kg - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_distinct_years() {
        let data = vec![
            annual(2023, 0.0, 0.0, 0.0, 0.0),
            annual(2021, 0.0, 0.0, 0.0, 0.0),
            annual(2023, 0.0, 0.0, 0.0, 0.0),
        ];
        assert_eq!(distinct_years(&data), vec![2021, 2023]);
        assert_eq!(years_in_order(&data), vec![2023, 2021]);
    }

    #[test]
    fn test_dominant_metric() {
        assert_eq!(
            dominant_metric(&annual(2020, 10.0, 5.0, 300.0, 40.0)),
            (Metric::Water, 300.0)
        );
        // Ties keep the earlier metric.
        assert_eq!(
            dominant_metric(&annual(2020, 50.0, 10.0, 50.0, 50.0)),
            (Metric::Co2, 50.0)
        );
        assert_eq!(
            dominant_metric(&annual(2020, 0.0, 0.0, 0.0, 0.0)),
            (Metric::Co2, 0.0)
        );
    }

    #[test]
    fn test_year_over_year() {
        let changes = year_over_year(
            &annual(2022, 1000.0, 50.0, 0.0, 200.0),
            &annual(2023, 1500.0, 40.0, 10.0, 200.0),
        );

        assert_eq!(changes[0].metric, Metric::Co2);
        assert_eq!(changes[0].change, 500.0);
        assert_eq!(changes[0].percent, Some(50.0));
        assert_eq!(changes[0].direction, Direction::Increased);

        assert_eq!(changes[1].change, -10.0);
        assert!((changes[1].percent.unwrap() + 20.0).abs() < 1e-9);
        assert_eq!(changes[1].direction, Direction::Decreased);

        assert_eq!(changes[2].percent, None);
        assert_eq!(changes[2].direction, Direction::Increased);

        assert_eq!(changes[3].change, 0.0);
        assert_eq!(changes[3].direction, Direction::Decreased);
    }

    #[test]
    fn test_comparison_pair() {
        let data = vec![annual(2022, 1.0, 0.0, 0.0, 0.0), annual(2023, 2.0, 0.0, 0.0, 0.0)];
        let (prev, latest) = comparison_pair(&data).unwrap();
        assert_eq!(prev.year, 2022);
        assert_eq!(latest.year, 2023);

        let gap = vec![annual(2020, 1.0, 0.0, 0.0, 0.0), annual(2023, 2.0, 0.0, 0.0, 0.0)];
        assert!(comparison_pair(&gap).is_none());

        let single = vec![annual(2023, 2.0, 0.0, 0.0, 0.0)];
        assert!(comparison_pair(&single).is_none());
    }

    #[test]
    fn test_records_per_year() {
        assert_eq!(records_per_year(24, 2), Some(12.0));
        assert_eq!(records_per_year(10, 3), Some(3.3));
        assert_eq!(records_per_year(5, 0), None);
    }

    #[test]
    fn test_annual_mismatches() {
        let monthly = vec![month(2020, 1, 100.0, 0.0, 0.0, 0.0), month(2020, 2, 100.0, 0.0, 0.0, 0.0)];
        assert!(annual_mismatches(&monthly, &[annual(2020, 200.0, 0.0, 0.0, 0.0)], 0.005).is_empty());
        assert_eq!(
            annual_mismatches(&monthly, &[annual(2020, 250.0, 0.0, 0.0, 0.0)], 0.005),
            vec![(2020, Metric::Co2)]
        );
    }
}
