use std::collections::HashSet;

use rand::Rng;

use super::pool::CredentialPool;
use super::{Credential, CredentialId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum KeySelectError {
    #[error("no key configured for provider '{provider}'")]
    ProviderUnknown { provider: String },
    #[error("no key configured for provider '{provider}' and model '{model}'")]
    NoConfiguredKeyForModel { provider: String, model: String },
}

/// Weighted-random key draw (spec §4.2, C2): filters a provider's keys by
/// model support and cooldown state, then picks one proportionally to
/// `weight`. Grounded on the teacher's `CredentialPool` cooldown filtering
/// (`acquire_for_model`), generalized from "first active match" to a
/// weighted draw over *all* active matches.
pub struct KeySelector<'a> {
    pool: &'a CredentialPool,
}

impl<'a> KeySelector<'a> {
    pub fn new(pool: &'a CredentialPool) -> Self {
        Self { pool }
    }

    /// Selects one key for `(provider, model)`, excluding any id already in
    /// `excluded` (spec §4.2 rule 5: retries within a request exclude
    /// previously-tried keys).
    pub async fn select(
        &self,
        provider: &str,
        model: &str,
        excluded: &HashSet<CredentialId>,
    ) -> Result<(CredentialId, Credential), KeySelectError> {
        let candidates = self.pool.active_candidates(provider).await;
        if candidates.is_empty() {
            return Err(KeySelectError::ProviderUnknown { provider: provider.to_string() });
        }

        let mut filtered = Vec::with_capacity(candidates.len());
        for (id, key) in candidates {
            if excluded.contains(&id) {
                continue;
            }
            if !key.supports_model(model) {
                continue;
            }
            if self.pool.is_model_unavailable(id, model).await {
                continue;
            }
            filtered.push((id, key));
        }

        if filtered.is_empty() {
            return Err(KeySelectError::NoConfiguredKeyForModel {
                provider: provider.to_string(),
                model: model.to_string(),
            });
        }

        Ok(weighted_pick(filtered))
    }
}

/// Draws `u` uniformly from `(0, Σ weight_i]` and picks the smallest `i`
/// with cumulative weight `>= u` (spec §4.2 rule 4).
fn weighted_pick(candidates: Vec<(CredentialId, Credential)>) -> (CredentialId, Credential) {
    if candidates.len() == 1 {
        return candidates.into_iter().next().expect("len checked above");
    }

    let total: f64 = candidates.iter().map(|(_, key)| key.weight.max(0.0)).sum();
    if total <= 0.0 {
        // Degenerate configuration (all weights non-positive): fall back to uniform choice.
        let index = rand::rng().random_range(0..candidates.len());
        return candidates.into_iter().nth(index).expect("index in range");
    }

    let u = rand::rng().random_range(f64::MIN_POSITIVE..=total);
    let mut cumulative = 0.0;
    for (id, key) in candidates.iter() {
        cumulative += key.weight.max(0.0);
        if cumulative >= u {
            return (*id, key.clone());
        }
    }
    // Floating-point rounding can leave `u` fractionally above the final
    // cumulative sum; fall back to the last candidate.
    candidates.into_iter().last().expect("non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use polygate_protocol::ProviderSpecificConfig;
    use std::collections::BTreeSet;

    fn key(id: i64, weight: f64) -> (CredentialId, Credential) {
        (
            id,
            Credential {
                id,
                value: format!("key-{id}"),
                models: BTreeSet::new(),
                weight,
                provider_specific_config: ProviderSpecificConfig::None,
            },
        )
    }

    #[test]
    fn weighted_pick_respects_distribution_within_tolerance() {
        let mut counts = [0u32; 3];
        for _ in 0..10_000 {
            let candidates = vec![key(1, 0.5), key(2, 0.25), key(3, 0.25)];
            let (id, _) = weighted_pick(candidates);
            counts[(id - 1) as usize] += 1;
        }
        let p1 = counts[0] as f64 / 10_000.0;
        let p2 = counts[1] as f64 / 10_000.0;
        let p3 = counts[2] as f64 / 10_000.0;
        // 3-sigma bound for n=10_000, p=0.5 is ~1.5%; p=0.25 is ~1.3%. Use a
        // generous 5% tolerance to keep this test non-flaky.
        assert!((p1 - 0.5).abs() < 0.05, "p1={p1}");
        assert!((p2 - 0.25).abs() < 0.05, "p2={p2}");
        assert!((p3 - 0.25).abs() < 0.05, "p3={p3}");
    }

    #[test]
    fn single_candidate_always_wins() {
        let (id, _) = weighted_pick(vec![key(7, 1.0)]);
        assert_eq!(id, 7);
    }
}
