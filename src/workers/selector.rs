//! Deployment selection for the scheduling worker.

use crate::models::RegistryDeployment;
use rand::seq::SliceRandom;

/// Picks one deployment out of the eligible candidates
///
/// Callers pass only eligible deployments; an empty slice yields `None`.
pub trait DeploymentSelector: Send + Sync {
    fn select<'a>(&self, candidates: &'a [RegistryDeployment]) -> Option<&'a RegistryDeployment>;
}

/// Uniform random choice
///
/// No load signal is available at this layer, so spreading registries at random
/// keeps them from piling onto the first eligible deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDeploymentSelector;

impl DeploymentSelector for RandomDeploymentSelector {
    fn select<'a>(&self, candidates: &'a [RegistryDeployment]) -> Option<&'a RegistryDeployment> {
        candidates.choose(&mut rand::thread_rng())
    }
}

/// Always the first candidate; deterministic placement for tests and single-deployment setups
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDeploymentSelector;

impl DeploymentSelector for FirstDeploymentSelector {
    fn select<'a>(&self, candidates: &'a [RegistryDeployment]) -> Option<&'a RegistryDeployment> {
        candidates.first()
    }
}
