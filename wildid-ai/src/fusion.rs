//! Fusion Engine
//!
//! Groups canonicalized candidates into clusters by identity key, scores each
//! cluster, resolves its category and picks the winner.
//!
//! # Fused confidence
//! Each provider contributes its strongest member, scaled by its trust weight,
//! and contributions combine as a Bayesian update (noisy-OR):
//! ```text
//! fused = 1 - (1 - w1·c1) * (1 - w2·c2) * ... * (1 - wN·cN)
//! ```
//! Agreement across providers raises confidence; repeats from one provider do not.
//! Clusters left on a synthesized identity are scaled by `unresolved_penalty`.
//!
//! # Category
//! First available of: dominant provider's domain, Knowledge-Graph taxonomy,
//! any other member hint, the scene category of the Vision bundle, the request hint.
//!
//! # Winner
//! Highest fused confidence; ties go to resolved identities, then higher rank
//! specificity, then lexical canonical name.

use crate::canonicalizer::{CanonicalCandidate, Identity};
use crate::config::FusionConfig;
use crate::extractor::{infer_category, Candidate};
use crate::types::{
    clamp_unit, Alternative, Category, Provider, Rank, SpeciesResult, UnidentifiedReason,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Candidates sharing one canonical identity
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub identity: Identity,
    /// Members in extraction order
    pub members: Vec<Candidate>,
    pub fused_confidence: f64,
    pub dominant_provider: Provider,
    pub category: Option<Category>,
}

impl Cluster {
    /// Canonical name shown to callers
    pub fn name(&self) -> &str {
        &self.identity.scientific_name
    }

    /// Rank from the Knowledge-Graph, else the most specific member rank
    pub fn rank(&self) -> Option<Rank> {
        if self.identity.resolved {
            return Some(self.identity.rank);
        }
        self.members
            .iter()
            .filter_map(|m| m.rank)
            .max_by_key(|r| r.specificity())
    }

    fn common_name(&self) -> Option<String> {
        self.identity.common_name.clone().or_else(|| {
            self.members
                .iter()
                .filter(|m| m.provider == self.dominant_provider)
                .chain(self.members.iter())
                .find_map(|m| m.common_name.clone())
        })
    }

    fn taxonomic_key(&self) -> Option<String> {
        if self.identity.resolved {
            return Some(self.identity.key.clone());
        }
        self.members.iter().find_map(|m| m.key.clone())
    }

    pub fn alternative(&self) -> Alternative {
        Alternative {
            name: self.name().to_string(),
            confidence: self.fused_confidence,
            category: self.category,
        }
    }
}

/// Fusion decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Winner passed every gate
    Accepted,
    Unidentified(UnidentifiedReason),
}

/// Ranked clusters plus the decision on the best one
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    /// Best first
    pub ranked: Vec<Cluster>,
    pub verdict: Verdict,
}

impl Fused {
    pub fn winner(&self) -> Option<&Cluster> {
        self.ranked.first()
    }

    /// Result for an accepted winner (without enrichment)
    pub fn species_result(&self) -> Option<SpeciesResult> {
        if self.verdict != Verdict::Accepted {
            return None;
        }
        let winner = self.winner()?;
        Some(SpeciesResult {
            category: winner.category?,
            canonical_name: winner.name().to_string(),
            common_name: winner.common_name(),
            rank: winner.rank(),
            confidence: winner.fused_confidence,
            provider: winner.dominant_provider,
            taxonomic_key: winner.taxonomic_key(),
            wiki: None,
            ui: None,
        })
    }

    /// Up to `n` runner-up clusters
    pub fn alternatives(&self, n: usize) -> Vec<Alternative> {
        self.ranked.iter().skip(1).take(n).map(Cluster::alternative).collect()
    }

    /// Winner leads the runner-up by less than `margin`
    pub fn is_ambiguous(&self, margin: f64) -> bool {
        match (self.ranked.first(), self.ranked.get(1)) {
            (Some(winner), Some(runner_up)) => {
                winner.fused_confidence - runner_up.fused_confidence < margin
            }
            _ => false,
        }
    }
}

/// Weighted cluster fusion
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse candidates into ranked clusters and decide on the winner
    ///
    /// # Arguments
    /// * `candidates` - canonicalized candidates in extraction order
    /// * `scene` - category inferred from the whole Vision bundle
    /// * `hint` - category requested by the caller
    pub fn fuse(
        &self,
        candidates: &[CanonicalCandidate],
        scene: Option<Category>,
        hint: Option<Category>,
    ) -> Fused {
        // Group by identity key, first-seen order
        let mut groups: Vec<(Identity, Vec<Candidate>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for cc in candidates {
            match index.get(cc.identity.key.as_str()) {
                Some(&i) => groups[i].1.push(cc.candidate.clone()),
                None => {
                    index.insert(cc.identity.key.as_str(), groups.len());
                    groups.push((cc.identity.clone(), vec![cc.candidate.clone()]));
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            clusters = groups.len(),
            "Grouped candidates by canonical identity"
        );

        let mut ranked: Vec<Cluster> = groups
            .into_iter()
            .map(|(identity, members)| self.score_cluster(identity, members, scene, hint))
            .collect();
        ranked.sort_by(compare_clusters);

        let verdict = match ranked.first() {
            None => Verdict::Unidentified(UnidentifiedReason::NoCandidates),
            Some(w) if w.fused_confidence < self.config.acceptance_threshold => {
                Verdict::Unidentified(UnidentifiedReason::BelowThreshold)
            }
            Some(w) if w.category.is_none() => {
                Verdict::Unidentified(UnidentifiedReason::Uncategorized)
            }
            Some(_) => Verdict::Accepted,
        };

        if let Some(winner) = ranked.first() {
            debug!(
                winner = %winner.identity.key,
                confidence = winner.fused_confidence,
                provider = %winner.dominant_provider,
                ?verdict,
                "Fusion complete"
            );
        }

        Fused { ranked, verdict }
    }

    fn score_cluster(
        &self,
        identity: Identity,
        members: Vec<Candidate>,
        scene: Option<Category>,
        hint: Option<Category>,
    ) -> Cluster {
        // Strongest member per provider; BTreeMap iterates in invocation order
        let mut per_provider: BTreeMap<Provider, f64> = BTreeMap::new();
        for member in &members {
            let entry = per_provider.entry(member.provider).or_insert(0.0);
            *entry = entry.max(member.confidence);
        }

        let mut dominant = (members[0].provider, f64::NEG_INFINITY);
        let mut disbelief = 1.0;
        for (&provider, &confidence) in &per_provider {
            let contribution = clamp_unit(self.config.weight(provider) * confidence);
            if contribution > dominant.1 {
                dominant = (provider, contribution);
            }
            disbelief *= 1.0 - contribution;
        }

        let mut fused = 1.0 - disbelief;
        if !identity.resolved {
            fused *= self.config.unresolved_penalty;
        }

        let category = resolve_category(dominant.0, &identity, &members, scene, hint);

        Cluster {
            identity,
            members,
            fused_confidence: clamp_unit(fused),
            dominant_provider: dominant.0,
            category,
        }
    }
}

/// Category chain for one cluster
fn resolve_category(
    dominant: Provider,
    identity: &Identity,
    members: &[Candidate],
    scene: Option<Category>,
    hint: Option<Category>,
) -> Option<Category> {
    let domain = match dominant {
        Provider::PlantId => Some(Category::Flower),
        Provider::INaturalist => members
            .iter()
            .filter(|m| m.provider == Provider::INaturalist)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .and_then(|m| m.category_hint),
        Provider::Vision => infer_category(
            members
                .iter()
                .filter(|m| m.provider == Provider::Vision)
                .map(|m| (m.raw_name.as_str(), m.confidence)),
        ),
        Provider::KnowledgeGraph | Provider::Wikipedia => None,
    };

    domain
        .or(identity.category_hint)
        .or_else(|| members.iter().find_map(|m| m.category_hint))
        .or(scene)
        .or(hint)
}

/// Best first: fused desc, resolved first, specificity desc, name asc, key asc
fn compare_clusters(a: &Cluster, b: &Cluster) -> Ordering {
    b.fused_confidence
        .total_cmp(&a.fused_confidence)
        .then_with(|| b.identity.resolved.cmp(&a.identity.resolved))
        .then_with(|| {
            let specificity = |c: &Cluster| c.rank().map(|r| r.specificity()).unwrap_or(0);
            specificity(b).cmp(&specificity(a))
        })
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.identity.key.cmp(&b.identity.key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(provider: Provider, name: &str, confidence: f64) -> Candidate {
        Candidate {
            provider,
            raw_name: name.to_string(),
            common_name: None,
            rank: None,
            confidence,
            key: None,
            category_hint: None,
        }
    }

    fn resolved(key: &str, name: &str, rank: Rank) -> Identity {
        Identity {
            key: key.to_string(),
            scientific_name: name.to_string(),
            common_name: None,
            rank,
            category_hint: None,
            resolved: true,
        }
    }

    fn cc(candidate: Candidate, identity: Identity) -> CanonicalCandidate {
        CanonicalCandidate {
            candidate,
            identity,
        }
    }

    fn engine() -> FusionEngine {
        FusionEngine::new(FusionConfig::default())
    }

    #[test]
    fn test_single_source_keeps_weighted_confidence() {
        let input = vec![cc(
            candidate(Provider::PlantId, "Rosa rubiginosa", 0.9),
            resolved("gbif:1", "Rosa rubiginosa", Rank::Species),
        )];
        let fused = engine().fuse(&input, None, None);
        let winner = fused.winner().unwrap();
        assert!((winner.fused_confidence - 0.9).abs() < 1e-9);
        assert_eq!(winner.category, Some(Category::Flower));
        assert_eq!(fused.verdict, Verdict::Accepted);
    }

    #[test]
    fn test_agreement_across_providers_boosts() {
        let k1 = resolved("gbif:1", "Rosa rubiginosa", Rank::Species);
        let input = vec![
            cc(candidate(Provider::PlantId, "Rosa rubiginosa", 0.7), k1.clone()),
            cc(candidate(Provider::INaturalist, "Sweet briar", 0.6), k1),
        ];
        let fused = engine().fuse(&input, None, None);
        assert_eq!(fused.ranked.len(), 1);
        // 1 - (1 - 0.7)(1 - 0.54)
        assert!((fused.ranked[0].fused_confidence - 0.862).abs() < 1e-9);
    }

    #[test]
    fn test_same_provider_repeats_do_not_inflate() {
        let k1 = resolved("gbif:1", "Rosa", Rank::Genus);
        let input = vec![
            cc(candidate(Provider::PlantId, "Rosa", 0.5), k1.clone()),
            cc(candidate(Provider::PlantId, "Rose", 0.5), k1),
        ];
        let fused = engine().fuse(&input, None, None);
        assert!((fused.ranked[0].fused_confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unresolved_cluster_penalized() {
        let input = vec![cc(
            candidate(Provider::PlantId, "Rosa rubiginosa", 0.9),
            Identity::synthesized("Rosa rubiginosa"),
        )];
        let fused = engine().fuse(&input, None, None);
        assert!((fused.ranked[0].fused_confidence - 0.9 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_tie_break_prefers_resolved_then_specific_then_lexical() {
        let input = vec![
            cc(candidate(Provider::PlantId, "b", 0.5), resolved("gbif:2", "Beta", Rank::Genus)),
            cc(candidate(Provider::PlantId, "a", 0.5), resolved("gbif:1", "Alpha", Rank::Genus)),
            cc(candidate(Provider::PlantId, "c", 0.5), resolved("gbif:3", "Gamma", Rank::Species)),
        ];
        let fused = engine().fuse(&input, None, None);
        let names: Vec<_> = fused.ranked.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Gamma", "Alpha", "Beta"]);

        let mut config = FusionConfig::default();
        config.unresolved_penalty = 1.0;
        let input = vec![
            cc(candidate(Provider::PlantId, "Aaa", 0.5), Identity::synthesized("Aaa")),
            cc(candidate(Provider::PlantId, "z", 0.5), resolved("gbif:9", "Zzz", Rank::Unknown)),
        ];
        let fused = FusionEngine::new(config).fuse(&input, None, None);
        assert_eq!(fused.winner().unwrap().name(), "Zzz");
    }

    #[test]
    fn test_below_threshold_is_unidentified() {
        let input = vec![cc(
            candidate(Provider::PlantId, "Rosa", 0.35),
            resolved("gbif:1", "Rosa", Rank::Genus),
        )];
        let fused = engine().fuse(&input, None, None);
        assert_eq!(
            fused.verdict,
            Verdict::Unidentified(UnidentifiedReason::BelowThreshold)
        );
        assert_eq!(fused.species_result(), None);
    }

    #[test]
    fn test_no_candidates() {
        let fused = engine().fuse(&[], Some(Category::Flower), None);
        assert_eq!(
            fused.verdict,
            Verdict::Unidentified(UnidentifiedReason::NoCandidates)
        );
    }

    #[test]
    fn test_category_chain_falls_back_to_scene_then_hint() {
        let mut config = FusionConfig::default();
        config.provider_weights.insert("vision".into(), 1.0);
        let engine = FusionEngine::new(config);
        let input = vec![cc(
            candidate(Provider::Vision, "Danaus plexippus", 0.8),
            resolved("gbif:5", "Danaus plexippus", Rank::Species),
        )];

        let fused = engine.fuse(&input, None, None);
        assert_eq!(
            fused.verdict,
            Verdict::Unidentified(UnidentifiedReason::Uncategorized)
        );

        let fused = engine.fuse(&input, Some(Category::Bug), Some(Category::Animal));
        assert_eq!(fused.winner().unwrap().category, Some(Category::Bug));

        let fused = engine.fuse(&input, None, Some(Category::Animal));
        assert_eq!(fused.winner().unwrap().category, Some(Category::Animal));
    }

    #[test]
    fn test_knowledge_graph_taxonomy_beats_scene() {
        let mut identity = resolved("gbif:5", "Danaus plexippus", Rank::Species);
        identity.category_hint = Some(Category::Bug);
        let input = vec![cc(candidate(Provider::Vision, "Danaus plexippus", 0.9), identity)];
        let fused = engine().fuse(&input, Some(Category::Flower), None);
        assert_eq!(fused.winner().unwrap().category, Some(Category::Bug));
    }

    #[test]
    fn test_alternatives_and_ambiguity() {
        let input = vec![
            cc(candidate(Provider::PlantId, "a", 0.8), resolved("gbif:1", "Alpha", Rank::Species)),
            cc(candidate(Provider::PlantId, "b", 0.7), resolved("gbif:2", "Beta", Rank::Species)),
            cc(candidate(Provider::PlantId, "c", 0.2), resolved("gbif:3", "Gamma", Rank::Species)),
            cc(candidate(Provider::PlantId, "d", 0.1), resolved("gbif:4", "Delta", Rank::Species)),
        ];
        let fused = engine().fuse(&input, None, None);
        let alternatives = fused.alternatives(2);
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].name, "Beta");
        assert_eq!(alternatives[1].name, "Gamma");
        assert!(fused.is_ambiguous(0.15));
        assert!(!fused.is_ambiguous(0.05));
    }

    #[test]
    fn test_species_result_fields() {
        let mut member = candidate(Provider::PlantId, "Rosa rubiginosa", 0.9);
        member.common_name = Some("sweet briar".into());
        let input = vec![cc(member, resolved("gbif:1", "Rosa rubiginosa", Rank::Species))];
        let result = engine().fuse(&input, None, None).species_result().unwrap();
        assert_eq!(result.canonical_name, "Rosa rubiginosa");
        assert_eq!(result.common_name.as_deref(), Some("sweet briar"));
        assert_eq!(result.rank, Some(Rank::Species));
        assert_eq!(result.taxonomic_key.as_deref(), Some("gbif:1"));
        assert_eq!(result.provider, Provider::PlantId);
        assert_eq!(result.category, Category::Flower);
    }
}
