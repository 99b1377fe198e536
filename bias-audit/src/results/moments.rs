//! Local moment aggregation
//!
//! Used when the backend returns measurement rows without moments. Rows are
//! grouped by (variation, magnitude, group). Statistics that are undefined
//! for the group size are left out rather than reported as NaN.

use crate::models::{BiasMeasure, MeasurementRow, MomentRow, MomentStats};
use std::collections::BTreeMap;

type GroupKey = (String, i64, Option<String>);

/// Aggregate moments for every bias measure present in `rows`
pub fn compute_moments(rows: &[MeasurementRow]) -> Vec<MomentRow> {
    let mut groups: BTreeMap<GroupKey, BTreeMap<BiasMeasure, Vec<f64>>> = BTreeMap::new();

    for row in rows {
        let key = (row.variation.clone(), row.magnitude, row.group.clone());
        let measures = groups.entry(key).or_default();
        for measure in BiasMeasure::ALL {
            if let Some(value) = row.bias(measure).filter(|v| v.is_finite()) {
                measures.entry(measure).or_default().push(value);
            }
        }
    }

    groups
        .into_iter()
        .map(|((variation, magnitude, group), measures)| MomentRow {
            variation,
            magnitude,
            group,
            stats: measures
                .into_iter()
                .filter_map(|(measure, values)| Some((measure, describe(&values)?)))
                .collect(),
        })
        .collect()
}

/// Mean, sample variance and adjusted Fisher-Pearson skewness
///
/// Variance needs two values; skewness needs three and a non-zero spread.
pub fn describe(values: &[f64]) -> Option<MomentStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;

    let variance = (values.len() >= 2).then(|| m2 * n / (n - 1.0));
    let skewness = (values.len() >= 3 && m2 > 0.0).then(|| {
        let g1 = m3 / m2.powf(1.5);
        g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
    });

    Some(MomentStats {
        mean,
        variance,
        skewness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Moment;

    fn row(variation: &str, magnitude: i64, bias_0: f64, group: Option<&str>) -> MeasurementRow {
        MeasurementRow {
            index: None,
            variation: variation.to_string(),
            magnitude,
            original_grade: 80.0,
            perturbed_grade: 80.0 + bias_0,
            difference: bias_0,
            bias_0,
            additional: BTreeMap::new(),
            group: group.map(str::to_string),
            original_text: None,
            perturbed_text: None,
        }
    }

    #[test]
    fn test_spelling_mean_of_three_rows() {
        let rows = vec![
            row("spelling", 50, -5.0, None),
            row("spelling", 50, -7.0, None),
            row("spelling", 50, -9.0, None),
        ];
        let moments = compute_moments(&rows);
        assert_eq!(moments.len(), 1);

        let m = &moments[0];
        assert_eq!(m.variation, "spelling");
        assert_eq!(m.stat(BiasMeasure::Bias0, Moment::Mean), Some(-7.0));
        let variance = m.stat(BiasMeasure::Bias0, Moment::Variance).unwrap();
        assert!((variance - 4.0).abs() < 1e-12);
        assert_eq!(m.stat(BiasMeasure::Bias0, Moment::Skewness), Some(0.0));
        assert!(!m.stats.contains_key(&BiasMeasure::Bias1));
    }

    #[test]
    fn test_groups_split_by_magnitude_and_label() {
        let rows = vec![
            row("pio", 10, 1.0, Some("north")),
            row("pio", 10, 3.0, Some("south")),
            row("pio", 20, 2.0, Some("north")),
        ];
        let moments = compute_moments(&rows);
        assert_eq!(moments.len(), 3);
        assert!(moments
            .iter()
            .all(|m| m.stat(BiasMeasure::Bias0, Moment::Variance).is_none()));
    }

    #[test]
    fn test_skewness_sign() {
        let stats = describe(&[0.0, 0.0, 0.0, 10.0]).unwrap();
        assert!(stats.skewness.unwrap() > 0.0);

        let flat = describe(&[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(flat.variance, Some(0.0));
        assert_eq!(flat.skewness, None);
        assert!(describe(&[]).is_none());
    }

    #[test]
    fn test_additional_measures_aggregated() {
        let mut a = row("cognates", 30, -2.0, None);
        a.additional.insert(BiasMeasure::Bias2, 4.0);
        let mut b = row("cognates", 30, -4.0, None);
        b.additional.insert(BiasMeasure::Bias2, 6.0);

        let moments = compute_moments(&[a, b]);
        assert_eq!(moments[0].stat(BiasMeasure::Bias2, Moment::Mean), Some(5.0));
        assert_eq!(moments[0].stat(BiasMeasure::Bias2, Moment::Variance), Some(2.0));
    }
}
