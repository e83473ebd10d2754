//! Importance ranking: weighted PageRank over the call graph.

use crate::config::RankingConfig;

/// Scores indexed by node, plus convergence details
#[derive(Debug, Clone, PartialEq)]
pub struct RankResult {
    pub scores: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Rank `n` nodes given weighted `(from, to, weight)` edges.
///
/// Every node starts at `1/n`. Mass flows along edges in proportion to
/// their weight; nodes without outgoing edges spread their mass evenly.
/// Self-loops are ignored. Iteration stops once the L1 delta between
/// rounds drops below `epsilon` or after `max_iterations`. Finally every
/// score is raised to at least `floor_fraction / n`.
///
/// The result is a pure function of its inputs.
pub fn importance(n: usize, edges: &[(usize, usize, f64)], config: &RankingConfig) -> RankResult {
    if n == 0 {
        return RankResult {
            scores: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let nf = n as f64;
    let damping = config.damping.clamp(0.0, 1.0);

    let mut out_weight = vec![0.0f64; n];
    let mut inbound: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for &(from, to, weight) in edges {
        if from == to || from >= n || to >= n || weight <= 0.0 {
            continue;
        }
        out_weight[from] += weight;
        inbound[to].push((from, weight));
    }

    let mut scores = vec![1.0 / nf; n];
    let mut next = vec![0.0f64; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;

        let dangling: f64 = (0..n)
            .filter(|&i| out_weight[i] == 0.0)
            .map(|i| scores[i])
            .sum();
        let base = (1.0 - damping) / nf + damping * dangling / nf;

        for (to, slot) in next.iter_mut().enumerate() {
            let flow: f64 = inbound[to]
                .iter()
                .map(|&(from, w)| scores[from] * w / out_weight[from])
                .sum();
            *slot = base + damping * flow;
        }

        let delta: f64 = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        if delta < config.epsilon {
            converged = true;
            break;
        }
    }

    let floor = config.floor_fraction.max(0.0) / nf;
    for s in &mut scores {
        if *s < floor {
            *s = floor;
        }
    }

    RankResult {
        scores,
        iterations,
        converged,
    }
}
