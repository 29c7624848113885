//! Governance rules evaluated before any extraction.

use std::collections::BTreeMap;

use promote_core::config::BranchRule;
use promote_core::{CoreError, CoreResult, DeploymentUnit, PromoteConfig};
use regex::Regex;

/// Result of a governance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(Vec<String>),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail(errors)
        }
    }
}

/// Decides whether a unit may be promoted from the current branch.
pub trait GovernanceValidator: Send + Sync {
    fn validate(&self, unit: &DeploymentUnit, branch: Option<&str>) -> Verdict;
}

/// Accepts every unit. Used when `[governance] enabled = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl GovernanceValidator for AllowAll {
    fn validate(&self, _unit: &DeploymentUnit, _branch: Option<&str>) -> Verdict {
        Verdict::Pass
    }
}

struct CompiledBranchRule {
    pattern: Regex,
    allowed_env_types: Vec<String>,
}

/// Rule set driven by `[governance]` and the `env_type` of each server.
pub struct RuleValidator {
    env_types: BTreeMap<String, String>,
    promotion_order: Vec<String>,
    protected: Vec<String>,
    require_rollback_reference: bool,
    require_change_request: bool,
    branches: Vec<CompiledBranchRule>,
}

impl RuleValidator {
    pub fn from_config(config: &PromoteConfig) -> CoreResult<Self> {
        let governance = &config.governance;
        let branches = governance
            .branches
            .iter()
            .map(compile_branch_rule)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            env_types: config
                .servers
                .iter()
                .map(|(name, server)| (name.clone(), server.env_type.clone()))
                .collect(),
            promotion_order: governance.promotion_order.clone(),
            protected: governance.protected_env_types.clone(),
            require_rollback_reference: governance.require_rollback_reference,
            require_change_request: governance.require_change_request,
            branches,
        })
    }

    fn check_order(&self, source_env: &str, target_env: &str, errors: &mut Vec<String>) {
        let position = |env: &str| self.promotion_order.iter().position(|e| e == env);
        let (Some(source_idx), Some(target_idx)) = (position(source_env), position(target_env)) else {
            return;
        };
        if target_idx == source_idx + 1 {
            return;
        }
        if target_idx <= source_idx {
            errors.push(format!(
                "invalid promotion order ({source_env} to {target_env})"
            ));
        } else {
            errors.push(format!(
                "invalid promotion order: must deploy to {} next ({source_env} to {target_env})",
                self.promotion_order[source_idx + 1]
            ));
        }
    }

    fn check_branch(&self, branch: &str, unit: &DeploymentUnit, target_env: &str, errors: &mut Vec<String>) {
        let Some(rule) = self.branches.iter().find(|r| r.pattern.is_match(branch)) else {
            return;
        };
        if !rule.allowed_env_types.iter().any(|e| e == target_env) {
            errors.push(format!(
                "branch {branch} may deploy to {} but target {} is {target_env}",
                rule.allowed_env_types.join(", "),
                unit.target
            ));
        }
    }
}

impl GovernanceValidator for RuleValidator {
    fn validate(&self, unit: &DeploymentUnit, branch: Option<&str>) -> Verdict {
        let mut errors = Vec::new();

        let source_env = self.env_types.get(&unit.source);
        let target_env = self.env_types.get(&unit.target);
        if source_env.is_none() {
            errors.push(format!("unknown source server `{}`", unit.source));
        }
        if target_env.is_none() {
            errors.push(format!("unknown target server `{}`", unit.target));
        }
        if unit.source == unit.target {
            errors.push(format!("source and target must differ (both `{}`)", unit.source));
        }

        if let (Some(source_env), Some(target_env)) = (source_env, target_env) {
            self.check_order(source_env, target_env, &mut errors);

            if self.protected.iter().any(|p| p == target_env) {
                if self.require_rollback_reference && unit.rollback_reference.is_none() {
                    errors.push(format!("deployments to {target_env} require a rollback reference"));
                }
                if self.require_change_request && unit.change_request.is_none() {
                    errors.push(format!("deployments to {target_env} require a change request"));
                }
            }

            if let Some(branch) = branch.filter(|b| !b.is_empty()) {
                self.check_branch(branch, unit, target_env, &mut errors);
            }
        }

        Verdict::from_errors(errors)
    }
}

fn compile_branch_rule(rule: &BranchRule) -> CoreResult<CompiledBranchRule> {
    let pattern = Regex::new(&format!("^(?:{})$", rule.pattern)).map_err(|e| {
        CoreError::InvalidConfig(format!("branch pattern `{}`: {e}", rule.pattern))
    })?;
    Ok(CompiledBranchRule {
        pattern,
        allowed_env_types: rule.allowed_env_types.clone(),
    })
}
