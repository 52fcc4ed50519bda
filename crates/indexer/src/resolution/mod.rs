//! Override resolution: module load order, preferences, interception chains
//! and subscription fan-out.

pub mod ancestry;
pub mod confidence;
pub mod interception;
pub mod order;
pub mod preference;
pub mod scope;
pub mod subscription;

pub use ancestry::TypeHierarchy;
pub use confidence::{ConfidencePolicy, GeometricDecay, ReciprocalDecay};
pub use interception::{CallNesting, ChainLink, ChainMap, InterceptionChain, InvocationStep};
pub use order::ModuleOrder;
pub use preference::{EffectivePreference, PreferenceMap, PreferenceResolution};
pub use scope::ScopeTree;
pub use subscription::{EffectiveSubscriber, EventFanOut, SubscriptionGraph};

use crate::config::AnalysisConfig;
use crate::errors::{Result, WarningLog};
use crate::facts::{CanonicalFacts, FactKind};
use std::time::Instant;
use tracing::info;

/// Output of the resolution phase, read-only for every later phase
#[derive(Debug, Clone)]
pub struct Resolved {
    pub scopes: ScopeTree,
    pub order: ModuleOrder,
    pub hierarchy: TypeHierarchy,
    pub preferences: PreferenceMap,
    pub chains: ChainMap,
    pub subscriptions: SubscriptionGraph,
}

pub struct ResolutionEngine<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> ResolutionEngine<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, facts: &CanonicalFacts, warnings: &mut WarningLog) -> Result<Resolved> {
        let start = Instant::now();

        let mut scopes = self.config.scope_tree()?;
        scopes.attach_unknown(&facts.referenced_scopes(), warnings);

        let order = ModuleOrder::compute(facts, warnings)?;
        let hierarchy = TypeHierarchy::new(facts.symbols());

        let policy = self.config.confidence.policy();
        let preferences = PreferenceMap::resolve(facts.preferences(), &order, policy.as_ref());
        let chains = ChainMap::resolve(facts.interceptions(), &hierarchy, &scopes, &order);
        let subscriptions = SubscriptionGraph::resolve(
            facts.subscriptions(),
            facts.dispatches(),
            &scopes,
            &order,
            self.config.weight(FactKind::Subscription),
        );

        info!(
            "Resolved {} preferences ({} conflicts, {} policy), {} interception chains, {} events in {:?}",
            preferences.len(),
            preferences.conflict_count(),
            policy.name(),
            chains.len(),
            subscriptions.len(),
            start.elapsed()
        );

        Ok(Resolved {
            scopes,
            order,
            hierarchy,
            preferences,
            chains,
            subscriptions,
        })
    }
}
