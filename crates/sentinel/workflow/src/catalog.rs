//! Workflow catalog: the fixed step ordering for each workflow kind
//!
//! The catalog is built once at startup and shared read-only. Lookups
//! take no locks.

use sentinel_types::{SentinelError, SentinelResult, StepName, WorkflowDefinition, WorkflowKind};
use std::collections::HashMap;

const EMERGENCY_INTAKE: &[&str] = &[
    StepName::TRIAGE,
    StepName::ADMISSION,
    StepName::LEGAL,
    StepName::MEDICAL_RECORDS,
    StepName::SMART_HEALTH_DEVICE,
    StepName::BILLING,
    StepName::COMMUNICATION,
    StepName::SCHEDULING,
];

const SCHEDULED_INTAKE: &[&str] = &[
    StepName::ADMISSION,
    StepName::TRIAGE,
    StepName::MEDICAL_RECORDS,
    StepName::SMART_HEALTH_DEVICE,
    StepName::BILLING,
    StepName::SCHEDULING,
    StepName::COMMUNICATION,
];

const DEVICE_SCAN: &[&str] = &[
    StepName::SMART_HEALTH_DEVICE,
    StepName::MEDICAL_RECORDS,
    StepName::COMMUNICATION,
];

const DEVICE_EMERGENCY: &[&str] = &[
    StepName::SMART_HEALTH_DEVICE,
    StepName::TRIAGE,
    StepName::COMMUNICATION,
    StepName::ADMISSION,
];

/// Registry of workflow definitions keyed by kind
#[derive(Clone, Debug)]
pub struct WorkflowCatalog {
    definitions: HashMap<WorkflowKind, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// The hospital's standard orderings for all four workflow kinds
    pub fn standard() -> Self {
        let table = [
            (WorkflowKind::EmergencyIntake, EMERGENCY_INTAKE),
            (WorkflowKind::ScheduledIntake, SCHEDULED_INTAKE),
            (WorkflowKind::DeviceScan, DEVICE_SCAN),
            (WorkflowKind::DeviceEmergency, DEVICE_EMERGENCY),
        ];

        let definitions = table
            .into_iter()
            .map(|(kind, steps)| {
                let def = WorkflowDefinition {
                    kind,
                    steps: steps.iter().map(|s| StepName::from(*s)).collect(),
                };
                (kind, def)
            })
            .collect();

        Self { definitions }
    }

    /// Build a catalog from explicit definitions.
    ///
    /// Fails if a kind is defined twice, or if no device-emergency ordering
    /// is present (override depends on it).
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = WorkflowDefinition>,
    ) -> SentinelResult<Self> {
        let mut map = HashMap::new();
        for def in definitions {
            let kind = def.kind;
            if map.insert(kind, def).is_some() {
                return Err(SentinelError::Config(format!(
                    "workflow {} defined more than once",
                    kind
                )));
            }
        }

        if !map.contains_key(&WorkflowKind::DeviceEmergency) {
            return Err(SentinelError::Config(
                "catalog has no device-emergency ordering".into(),
            ));
        }

        tracing::info!(workflows = map.len(), "Workflow catalog built");
        Ok(Self { definitions: map })
    }

    pub fn lookup(&self, kind: WorkflowKind) -> SentinelResult<&WorkflowDefinition> {
        self.definitions
            .get(&kind)
            .ok_or_else(|| SentinelError::UnknownWorkflow(kind.to_string()))
    }

    /// Look up a workflow by its wire name, e.g. `"emergency-intake"`
    pub fn lookup_name(&self, name: &str) -> SentinelResult<&WorkflowDefinition> {
        let kind: WorkflowKind = name.parse()?;
        self.lookup(kind)
    }

    /// Steps an emergency override splices into a session's plan
    pub fn emergency_sequence(&self) -> &[StepName] {
        self.definitions
            .get(&WorkflowKind::DeviceEmergency)
            .map(|d| d.steps.as_slice())
            .unwrap_or(&[])
    }

    pub fn kinds(&self) -> Vec<WorkflowKind> {
        let mut kinds: Vec<_> = self.definitions.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Every step name used by some workflow
    pub fn step_names(&self) -> Vec<StepName> {
        let mut names: Vec<StepName> = Vec::new();
        for def in self.definitions.values() {
            for step in &def.steps {
                if !names.contains(step) {
                    names.push(step.clone());
                }
            }
        }
        names
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(def: &WorkflowDefinition) -> Vec<&str> {
        def.steps.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn test_standard_orderings() {
        let catalog = WorkflowCatalog::standard();

        assert_eq!(
            names(catalog.lookup(WorkflowKind::EmergencyIntake).unwrap()),
            vec![
                "triage",
                "admission",
                "legal",
                "medical_records",
                "smart_health_device",
                "billing",
                "communication",
                "scheduling"
            ]
        );
        assert_eq!(
            names(catalog.lookup(WorkflowKind::DeviceScan).unwrap()),
            vec!["smart_health_device", "medical_records", "communication"]
        );
        assert_eq!(
            catalog
                .emergency_sequence()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
            vec!["smart_health_device", "triage", "communication", "admission"]
        );
    }

    #[test]
    fn test_lookup_name() {
        let catalog = WorkflowCatalog::standard();
        assert_eq!(
            catalog.lookup_name("scheduled-intake").unwrap().kind,
            WorkflowKind::ScheduledIntake
        );
        assert!(matches!(
            catalog.lookup_name("outpatient"),
            Err(SentinelError::UnknownWorkflow(name)) if name == "outpatient"
        ));
    }

    #[test]
    fn test_unregistered_kind() {
        let catalog = WorkflowCatalog::from_definitions(vec![WorkflowDefinition::new(
            WorkflowKind::DeviceEmergency,
            vec![StepName::from("triage")],
        )
        .unwrap()])
        .unwrap();

        assert!(matches!(
            catalog.lookup(WorkflowKind::EmergencyIntake),
            Err(SentinelError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn test_catalog_requires_emergency_ordering() {
        let result = WorkflowCatalog::from_definitions(vec![WorkflowDefinition::new(
            WorkflowKind::DeviceScan,
            vec![StepName::from("triage")],
        )
        .unwrap()]);
        assert!(matches!(result, Err(SentinelError::Config(_))));
    }
}
