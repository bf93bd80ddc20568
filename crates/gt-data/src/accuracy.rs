//! Top-k hit counting for classifier outputs.

use gt_types::{validation_error, GtResult};

/// Indices of the `k` highest scores, highest first; ties keep index order.
fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// Number of samples whose target class is among the `k` best-scored classes.
///
/// `scores` holds one row of per-class scores per sample; `k` is clamped to the
/// number of classes.
pub fn compute_topk_hits(scores: &[Vec<f32>], targets: &[usize], k: usize) -> GtResult<usize> {
    if scores.len() != targets.len() {
        return Err(validation_error!(
            "{} score rows but {} targets",
            scores.len(),
            targets.len()
        ));
    }
    let mut hits = 0;
    for (row, &target) in scores.iter().zip(targets) {
        let k = k.min(row.len());
        if top_k_indices(row, k).contains(&target) {
            hits += 1;
        }
    }
    Ok(hits)
}

/// Top-5 and top-1 hit counts, in that order.
pub fn calculate_metrics(scores: &[Vec<f32>], targets: &[usize]) -> GtResult<(usize, usize)> {
    let top5 = compute_topk_hits(scores, targets, 5)?;
    let top1 = compute_topk_hits(scores, targets, 1)?;
    Ok((top5, top1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top1_and_clamped_topk() {
        let scores = vec![
            vec![0.1, 0.7, 0.2],
            vec![0.6, 0.3, 0.1],
            vec![0.2, 0.3, 0.5],
        ];
        let targets = [1, 1, 0];

        assert_eq!(compute_topk_hits(&scores, &targets, 1).unwrap(), 1);
        assert_eq!(compute_topk_hits(&scores, &targets, 2).unwrap(), 2);
        // k larger than the class count covers every class
        assert_eq!(calculate_metrics(&scores, &targets).unwrap(), (3, 1));
    }

    #[test]
    fn ties_prefer_lower_index() {
        assert_eq!(top_k_indices(&[0.5, 0.5, 0.1], 1), vec![0]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert!(compute_topk_hits(&[vec![1.0]], &[], 1).is_err());
    }
}
