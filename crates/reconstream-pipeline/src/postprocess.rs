//! Result clean-up applied before a cloud leaves the pipeline.

use crate::types::PointCloud;

/// Drop points whose confidence falls below the given percentile (0-100).
///
/// Clouds without confidences, and a percentile of 0, are returned unchanged.
pub fn filter_by_confidence(cloud: PointCloud, percentile: f32) -> PointCloud {
    if percentile <= 0.0 || cloud.confidence.len() != cloud.points.len() || cloud.is_empty() {
        return cloud;
    }

    let mut sorted = cloud.confidence.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (percentile.min(100.0) / 100.0 * (sorted.len() - 1) as f32).round() as usize;
    let threshold = sorted[rank];

    let mut kept = PointCloud::with_capacity(cloud.len());
    for i in 0..cloud.len() {
        if cloud.confidence[i] >= threshold {
            kept.push(cloud.points[i], cloud.colors[i], cloud.confidence[i]);
        }
    }
    kept
}

/// Uniformly subsample a cloud down to at most `max_points` points.
pub fn limit_points(cloud: PointCloud, max_points: usize) -> PointCloud {
    let len = cloud.len();
    if len <= max_points {
        return cloud;
    }
    if max_points == 0 {
        return PointCloud::default();
    }

    let has_confidence = cloud.confidence.len() == len;
    let mut kept = PointCloud::with_capacity(max_points);
    for i in 0..max_points {
        let src = i * len / max_points;
        let confidence = if has_confidence { cloud.confidence[src] } else { 1.0 };
        kept.push(cloud.points[src], cloud.colors[src], confidence);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_with_confidence(values: &[f32]) -> PointCloud {
        let mut cloud = PointCloud::default();
        for (i, c) in values.iter().enumerate() {
            cloud.push([i as f32, 0.0, 0.0], [0, 0, 0], *c);
        }
        cloud
    }

    #[test]
    fn test_percentile_drops_low_confidence() {
        let cloud = cloud_with_confidence(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1]);
        let filtered = filter_by_confidence(cloud, 50.0);
        assert_eq!(filtered.len(), 6);
        assert!(filtered.confidence.iter().all(|c| *c >= 0.6));
    }

    #[test]
    fn test_zero_percentile_keeps_everything() {
        let cloud = cloud_with_confidence(&[0.3, 0.1, 0.2]);
        assert_eq!(filter_by_confidence(cloud, 0.0).len(), 3);
    }

    #[test]
    fn test_limit_points_is_uniform() {
        let cloud = cloud_with_confidence(&[1.0; 10]);
        let limited = limit_points(cloud, 5);
        assert_eq!(limited.len(), 5);
        let xs: Vec<f32> = limited.points.iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_limit_points_noop_when_small() {
        let cloud = cloud_with_confidence(&[1.0; 3]);
        assert_eq!(limit_points(cloud, 10).len(), 3);
    }
}
