//! Masked move sampling - softmax restricted to legal actions plus epsilon-greedy exploration

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::IndexedRandom;

use super::action_space::Action;

/// Logit substituted at masked-out positions before the softmax
pub const MASKED_LOGIT: f32 = -1e9;

/// Softmax over `logits` with every false `mask` entry driven to zero probability.
///
/// With an all-false mask the result is all zeros.
pub fn masked_softmax(logits: &[f32], mask: &[bool]) -> Vec<f32> {
    let masked: Vec<f32> = logits
        .iter()
        .zip(mask)
        .map(|(&logit, &legal)| if legal { logit } else { MASKED_LOGIT })
        .collect();

    if !mask.iter().any(|&legal| legal) {
        return vec![0.0; masked.len()];
    }

    let max = masked.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = masked
        .iter()
        .zip(mask)
        .map(|(&logit, &legal)| if legal { (logit - max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Pick an action among the legal ones.
///
/// With probability `epsilon` the choice is uniform over legal actions, otherwise
/// it is drawn from the masked softmax. Returns `None` when nothing is legal.
/// Degenerate model output (NaN or infinite logits) falls back to the uniform choice.
pub fn sample_action<R: Rng + ?Sized>(
    logits: &[f32],
    mask: &[bool],
    epsilon: f64,
    rng: &mut R,
) -> Option<Action> {
    let legal: Vec<Action> = mask
        .iter()
        .enumerate()
        .filter_map(|(action, &valid)| valid.then_some(action))
        .collect();

    if legal.is_empty() {
        return None;
    }

    if rng.random::<f64>() < epsilon {
        return legal.choose(rng).copied();
    }

    let probs = masked_softmax(logits, mask);
    match WeightedIndex::new(&probs) {
        Ok(dist) => Some(dist.sample(rng)),
        Err(err) => {
            tracing::warn!("Policy distribution degenerate ({}), picking uniformly", err);
            legal.choose(rng).copied()
        }
    }
}
