//! Model routing.
//!
//! Picks the provider and model for a request from its endpoint family and
//! combined prompt length. Routing is pure: the same inputs always give the
//! same decision, and every input gives one.

use std::collections::HashMap;

use crate::core::config::{
    EndpointFamily, EndpointPolicies, ModelTarget, ProviderKind, RoutingPolicy,
};
use crate::services::prompt::AssembledPrompt;

/// Everything needed to make the provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub provider: ProviderKind,
    pub model: String,
    pub system_text: String,
    pub user_text: String,
}

impl RoutingPolicy {
    /// Target for a request of `combined_len` characters.
    pub fn select(&self, combined_len: usize) -> &ModelTarget {
        match self {
            RoutingPolicy::Fixed { target } => target,
            RoutingPolicy::Threshold {
                threshold,
                light,
                heavy,
            } => {
                if combined_len > *threshold {
                    heavy
                } else {
                    light
                }
            }
        }
    }
}

/// Routing policies for all endpoint families.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    policies: HashMap<EndpointFamily, RoutingPolicy>,
}

impl ModelRouter {
    pub fn new(endpoints: &EndpointPolicies) -> Self {
        let policies = endpoints
            .iter()
            .map(|policy| (policy.family, policy.routing.clone()))
            .collect();
        Self { policies }
    }

    fn policy(&self, family: EndpointFamily) -> &RoutingPolicy {
        // `new` inserts every family, so the lookup always succeeds.
        &self.policies[&family]
    }

    /// Provider and model for a family at a given combined length.
    pub fn choose(&self, family: EndpointFamily, combined_len: usize) -> &ModelTarget {
        self.policy(family).select(combined_len)
    }

    /// Attach the routed target to an assembled prompt.
    pub fn route(&self, family: EndpointFamily, prompt: AssembledPrompt) -> RoutingDecision {
        let target = self.choose(family, prompt.combined_len);
        RoutingDecision {
            provider: target.provider,
            model: target.model.clone(),
            system_text: prompt.system_text,
            user_text: prompt.user_text,
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(&EndpointPolicies::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::prompt::assemble;

    #[test]
    fn test_default_family_is_fixed() {
        let router = ModelRouter::default();
        for len in [0, 1, 16_001, 1_000_000] {
            let target = router.choose(EndpointFamily::Default, len);
            assert_eq!(target.provider, ProviderKind::Groq);
            assert_eq!(target.model, "llama3-70b-8192");
        }
    }

    #[test]
    fn test_advisory_threshold_boundary() {
        let router = ModelRouter::default();

        let at = router.choose(EndpointFamily::Advisory, 16_000);
        assert_eq!(at.provider, ProviderKind::Groq);
        assert_eq!(at.model, "mixtral-8x7b-32768");

        let above = router.choose(EndpointFamily::Advisory, 16_001);
        assert_eq!(above.provider, ProviderKind::Gemini);
        assert_eq!(above.model, "gemini-pro");
    }

    #[test]
    fn test_alt_model_threshold_boundary() {
        let router = ModelRouter::default();

        assert_eq!(
            router.choose(EndpointFamily::AltModel, 24_000).model,
            "llama3-8b-8192"
        );
        let above = router.choose(EndpointFamily::AltModel, 24_001);
        assert_eq!(above.model, "mixtral-8x7b-32768");
        assert_eq!(above.provider, ProviderKind::Groq);
    }

    #[test]
    fn test_provider_b_is_gemini() {
        let router = ModelRouter::default();
        assert_eq!(
            router.choose(EndpointFamily::ProviderB, 0).provider,
            ProviderKind::Gemini
        );
    }

    #[test]
    fn test_route_carries_prompt_text() {
        let router = ModelRouter::default();
        let assembled = assemble("Explain gravity", None, None, None);
        let decision = router.route(EndpointFamily::Default, assembled);

        assert_eq!(decision.user_text, "Explain gravity");
        assert_eq!(decision.system_text, "");
        assert_eq!(decision.provider, ProviderKind::Groq);
    }

    #[test]
    fn test_custom_threshold() {
        let mut endpoints = EndpointPolicies::default();
        endpoints.advisory.routing = RoutingPolicy::Threshold {
            threshold: 10,
            light: ModelTarget::new(ProviderKind::Groq, "small"),
            heavy: ModelTarget::new(ProviderKind::Gemini, "large"),
        };
        let router = ModelRouter::new(&endpoints);

        assert_eq!(router.choose(EndpointFamily::Advisory, 10).model, "small");
        assert_eq!(router.choose(EndpointFamily::Advisory, 11).model, "large");
    }
}
