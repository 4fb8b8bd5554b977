//! Domain types for MediSentinel
//!
//! Shared vocabulary of the orchestration and telemetry cores:
//!
//! - **Workflows**: [`WorkflowKind`], [`StepName`], [`WorkflowDefinition`]
//! - **Sessions**: [`Session`], [`SessionStatus`], [`SessionView`]
//! - **Steps**: [`StepResult`], [`FailurePolicy`], [`StepFailure`]
//! - **Devices**: [`Device`], [`ThresholdSet`], [`EmergencyContact`]
//! - **Telemetry**: [`VitalSample`], [`EmergencyEvent`], [`NotificationAttempt`]
//! - **Errors**: [`SentinelError`]

#![deny(unsafe_code)]

pub mod device;
pub mod error;
pub mod ids;
pub mod retry;
pub mod session;
pub mod step;
pub mod telemetry;
pub mod workflow;

pub use device::{
    BreachSide, Bounds, Channel, Device, DeviceRegistration, EmergencyContact, ThresholdBreach,
    ThresholdSet, VitalName,
};
pub use error::{SentinelError, SentinelResult};
pub use ids::{DeviceId, EventId, PatientId, SessionId};
pub use retry::RetryPolicy;
pub use session::{OverrideRecord, Session, SessionOutcome, SessionStatus, SessionView};
pub use step::{FailureKind, FailurePolicy, StepError, StepErrorKind, StepFailure, StepResult};
pub use telemetry::{AckState, DeliveryStatus, EmergencyEvent, NotificationAttempt, VitalSample};
pub use workflow::{StepName, WorkflowDefinition, WorkflowKind};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn cursor_never_exceeds_plan(results in proptest::collection::vec(0usize..8, 0..20)) {
            let steps: Vec<StepName> = StepName::VOCABULARY.iter().map(|s| StepName::from(*s)).collect();
            let def = WorkflowDefinition::new(WorkflowKind::EmergencyIntake, steps.clone()).unwrap();
            let mut session = Session::new(&def, serde_json::Value::Null);
            let mut previous = session.cursor;
            for idx in results {
                session.record_current(StepResult::success(steps[idx].clone(), serde_json::Value::Null));
                prop_assert!(session.cursor <= session.steps.len());
                prop_assert!(session.cursor >= previous);
                previous = session.cursor;
            }
        }

        #[test]
        fn breach_iff_outside_bounds(min in -100.0f64..100.0, width in 0.0f64..100.0, value in -300.0f64..300.0) {
            let bounds = Bounds::new(min, min + width);
            let outside = value < min || value > min + width;
            prop_assert_eq!(bounds.breach(value).is_some(), outside);
        }
    }
}
