//! Flag compiler.
//!
//! The migration utility takes a single positional control string with one
//! `Y`/`N` slot per capability. The slot order is fixed by the utility, so the
//! table below is the only place positions are defined: the `Capability` enum,
//! the canonical table and the `ProfileFlags` struct are all generated from it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Number of slots in a compiled flag string.
pub const FLAG_COUNT: usize = 25;

const ENABLED: char = 'Y';
const DISABLED: char = 'N';

/// Whether a slot overwrites an existing definition or only fills a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    ReplaceExisting,
    AddMissing,
}

macro_rules! capability_table {
    ($( $pos:literal => $variant:ident, $key:ident, $label:literal, $kind:ident; )*) => {
        /// A single slot of the migration utility's import flags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Capability {
            $($variant,)*
        }

        impl Capability {
            /// Canonical slot order, position 1 first.
            pub const TABLE: [Capability; FLAG_COUNT] = [$(Capability::$variant,)*];

            /// Profile key for this capability.
            pub fn key(self) -> &'static str {
                match self {
                    $(Capability::$variant => stringify!($key),)*
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $(Capability::$variant => $label,)*
                }
            }

            /// 1-based slot position.
            pub fn position(self) -> usize {
                match self {
                    $(Capability::$variant => $pos,)*
                }
            }

            pub fn kind(self) -> CapabilityKind {
                match self {
                    $(Capability::$variant => CapabilityKind::$kind,)*
                }
            }
        }

        /// One boolean per capability. Every field is required when parsing
        /// and unknown keys are rejected.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct ProfileFlags {
            $(pub $key: bool,)*
        }

        impl ProfileFlags {
            /// Every capability set to `value`.
            pub fn uniform(value: bool) -> Self {
                Self { $($key: value,)* }
            }

            pub fn get(&self, capability: Capability) -> bool {
                match capability {
                    $(Capability::$variant => self.$key,)*
                }
            }

            pub fn set(&mut self, capability: Capability, value: bool) {
                match capability {
                    $(Capability::$variant => self.$key = value,)*
                }
            }
        }
    };
}

capability_table! {
    1 => ReplaceObjectType, replace_object_type, "Replace existing Object Type", ReplaceExisting;
    2 => ReplaceRequestType, replace_request_type, "Replace existing Request Type", ReplaceExisting;
    3 => ReplaceSpecialCommand, replace_special_command, "Replace existing Special Command", ReplaceExisting;
    4 => ReplaceValidation, replace_validation, "Replace existing Validation", ReplaceExisting;
    5 => ReplaceWorkflow, replace_workflow, "Replace existing Workflow", ReplaceExisting;
    6 => ReplaceReportType, replace_report_type, "Replace existing Report Type", ReplaceExisting;
    7 => ReplaceWorkflowStepSource, replace_workflow_step_source, "Replace existing Workflow Step Source", ReplaceExisting;
    8 => ReplaceUserDataContext, replace_user_data_context, "Replace existing User Data Context", ReplaceExisting;
    9 => ReplacePortletDefinition, replace_portlet_definition, "Replace existing Portlet Definition", ReplaceExisting;
    10 => AddMissingEnvironment, add_missing_environment, "Add missing Environment", AddMissing;
    11 => AddMissingSecurityGroup, add_missing_security_group, "Add missing Security Group", AddMissing;
    12 => AddMissingRequestStatus, add_missing_request_status, "Add missing Request Status", AddMissing;
    13 => ReplaceModule, replace_module, "Replace existing Module", ReplaceExisting;
    14 => ReplaceDataSource, replace_data_source, "Replace existing Data Source", ReplaceExisting;
    15 => ReplaceProjectType, replace_project_type, "Replace existing Project Type", ReplaceExisting;
    16 => ReplaceWorkPlanTemplate, replace_work_plan_template, "Replace existing Work Plan Template", ReplaceExisting;
    17 => ReplaceRequestHeaderType, replace_request_header_type, "Replace existing Request Header Type", ReplaceExisting;
    18 => ReplaceOverviewPageSection, replace_overview_page_section, "Replace existing Overview Page Section", ReplaceExisting;
    19 => ReplaceDashboardDataSource, replace_dashboard_data_source, "Replace existing Dashboard Data Source", ReplaceExisting;
    20 => ReplacePortfolioType, replace_portfolio_type, "Replace existing Portfolio Type", ReplaceExisting;
    21 => ReplaceProgramType, replace_program_type, "Replace existing Program Type", ReplaceExisting;
    22 => ReplaceOdataDataSource, replace_odata_data_source, "Replace existing OData Data Source", ReplaceExisting;
    23 => ReplaceCustomMenu, replace_custom_menu, "Replace existing Custom Menu", ReplaceExisting;
    24 => ReplaceChatbotIntent, replace_chatbot_intent, "Replace existing Chatbot Intent", ReplaceExisting;
    25 => ReplaceDashboardPage, replace_dashboard_page, "Replace existing Dashboard Page", ReplaceExisting;
}

/// `(enabled, requires)` pairs checked before encoding.
const CONSTRAINTS: &[(Capability, Capability)] = &[
    (Capability::ReplacePortfolioType, Capability::ReplaceModule),
    (Capability::ReplaceChatbotIntent, Capability::ReplaceReportType),
];

impl Capability {
    pub fn from_key(key: &str) -> Option<Self> {
        Capability::TABLE.iter().copied().find(|c| c.key() == key)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl ProfileFlags {
    /// Build from a loose mapping. Every capability must appear exactly once
    /// and no other key may appear.
    pub fn from_map(map: &BTreeMap<String, bool>) -> CoreResult<Self> {
        if let Some(unknown) = map.keys().find(|k| Capability::from_key(k).is_none()) {
            return Err(CoreError::UnknownCapability(unknown.clone()));
        }

        let mut flags = ProfileFlags::uniform(false);
        for capability in Capability::TABLE {
            let value = map
                .get(capability.key())
                .ok_or_else(|| CoreError::MissingCapability(capability.key().to_string()))?;
            flags.set(capability, *value);
        }
        Ok(flags)
    }

    /// Capabilities currently enabled, in slot order.
    pub fn enabled(&self) -> Vec<Capability> {
        Capability::TABLE
            .iter()
            .copied()
            .filter(|c| self.get(*c))
            .collect()
    }
}

/// Compile profile flags into the positional control string.
pub fn compile(flags: &ProfileFlags) -> CoreResult<CompiledFlags> {
    for (enabled, requires) in CONSTRAINTS {
        if flags.get(*enabled) && !flags.get(*requires) {
            return Err(CoreError::Constraint {
                enabled: enabled.key(),
                requires: requires.key(),
            });
        }
    }

    let encoded: String = Capability::TABLE
        .iter()
        .map(|c| if flags.get(*c) { ENABLED } else { DISABLED })
        .collect();

    CompiledFlags::parse(&encoded)
}

/// A validated control string: exactly [`FLAG_COUNT`] characters of `Y`/`N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompiledFlags(String);

impl CompiledFlags {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let raw = raw.trim();
        let len = raw.chars().count();
        if len != FLAG_COUNT {
            return Err(CoreError::InvalidFlags(format!(
                "expected {FLAG_COUNT} characters, got {len}"
            )));
        }
        if let Some(bad) = raw.chars().find(|c| *c != ENABLED && *c != DISABLED) {
            return Err(CoreError::InvalidFlags(format!(
                "unexpected character {bad:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.0.as_bytes()[capability.position() - 1] == ENABLED as u8
    }
}

impl fmt::Display for CompiledFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CompiledFlags {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CompiledFlags::parse(&value)
    }
}

impl From<CompiledFlags> for String {
    fn from(flags: CompiledFlags) -> Self {
        flags.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(capabilities: &[Capability]) -> ProfileFlags {
        let mut flags = ProfileFlags::uniform(false);
        for c in capabilities {
            flags.set(*c, true);
        }
        flags
    }

    #[test]
    fn table_positions_are_sequential() {
        for (i, c) in Capability::TABLE.iter().enumerate() {
            assert_eq!(c.position(), i + 1);
        }
    }

    #[test]
    fn add_missing_slots_are_ten_to_twelve() {
        let add_missing: Vec<usize> = Capability::TABLE
            .iter()
            .filter(|c| c.kind() == CapabilityKind::AddMissing)
            .map(|c| c.position())
            .collect();
        assert_eq!(add_missing, vec![10, 11, 12]);
    }

    #[test]
    fn compile_has_fixed_length() {
        let compiled = compile(&ProfileFlags::uniform(true)).unwrap();
        assert_eq!(compiled.as_str().len(), FLAG_COUNT);
        assert_eq!(compiled.as_str(), "Y".repeat(FLAG_COUNT));

        let compiled = compile(&ProfileFlags::uniform(false)).unwrap();
        assert_eq!(compiled.as_str(), "N".repeat(FLAG_COUNT));
    }

    #[test]
    fn compile_is_deterministic() {
        let flags = only(&[
            Capability::ReplaceWorkflow,
            Capability::ReplaceModule,
            Capability::AddMissingSecurityGroup,
        ]);
        let first = compile(&flags).unwrap();
        for _ in 0..10 {
            assert_eq!(compile(&flags.clone()).unwrap(), first);
        }
    }

    #[test]
    fn workflow_only_profile() {
        let compiled = compile(&only(&[Capability::ReplaceWorkflow])).unwrap();
        assert_eq!(compiled.as_str(), "NNNNYNNNNNNNNNNNNNNNNNNNN");
        assert!(compiled.is_enabled(Capability::ReplaceWorkflow));
        assert!(!compiled.is_enabled(Capability::ReplaceObjectType));
    }

    #[test]
    fn portfolio_type_requires_module() {
        let err = compile(&only(&[Capability::ReplacePortfolioType])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Constraint {
                enabled: "replace_portfolio_type",
                requires: "replace_module"
            }
        ));

        let ok = compile(&only(&[
            Capability::ReplacePortfolioType,
            Capability::ReplaceModule,
        ]));
        assert!(ok.is_ok());
    }

    #[test]
    fn chatbot_intent_requires_report_type() {
        let err = compile(&only(&[Capability::ReplaceChatbotIntent])).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Constraint {
                enabled: "replace_chatbot_intent",
                requires: "replace_report_type"
            }
        ));
    }

    #[test]
    fn from_map_rejects_unknown_key() {
        let mut map: BTreeMap<String, bool> = Capability::TABLE
            .iter()
            .map(|c| (c.key().to_string(), false))
            .collect();
        map.insert("replace_everything".into(), true);

        let err = ProfileFlags::from_map(&map).unwrap_err();
        assert!(matches!(err, CoreError::UnknownCapability(k) if k == "replace_everything"));
    }

    #[test]
    fn from_map_rejects_missing_key() {
        let mut map: BTreeMap<String, bool> = Capability::TABLE
            .iter()
            .map(|c| (c.key().to_string(), true))
            .collect();
        map.remove("add_missing_request_status");

        let err = ProfileFlags::from_map(&map).unwrap_err();
        assert!(matches!(err, CoreError::MissingCapability(k) if k == "add_missing_request_status"));
    }

    #[test]
    fn from_map_round_trips_values() {
        let map: BTreeMap<String, bool> = Capability::TABLE
            .iter()
            .map(|c| (c.key().to_string(), c.kind() == CapabilityKind::AddMissing))
            .collect();
        let flags = ProfileFlags::from_map(&map).unwrap();
        assert_eq!(
            compile(&flags).unwrap().as_str(),
            "NNNNNNNNNYYYNNNNNNNNNNNNN"
        );
    }

    #[test]
    fn toml_with_missing_field_is_rejected() {
        let err = toml::from_str::<ProfileFlags>("replace_workflow = true\n");
        assert!(err.is_err());
    }

    #[test]
    fn parse_rejects_wrong_length_and_alphabet() {
        assert!(CompiledFlags::parse("YN").is_err());
        assert!(CompiledFlags::parse(&"Y".repeat(26)).is_err());
        assert!(CompiledFlags::parse(&format!("{}X", "N".repeat(24))).is_err());
        assert!(CompiledFlags::parse(&"n".repeat(25)).is_err());
        assert!(CompiledFlags::parse(&"N".repeat(25)).is_ok());
    }

    #[test]
    fn compiled_flags_deserialize_validates() {
        let bad: Result<CompiledFlags, _> = serde_json::from_str("\"YYY\"");
        assert!(bad.is_err());
        let good: CompiledFlags = serde_json::from_str(&format!("\"{}\"", "Y".repeat(25))).unwrap();
        assert_eq!(good.as_str().len(), 25);
    }
}
