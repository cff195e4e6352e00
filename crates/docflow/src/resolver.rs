//! Transition resolution.
//!
//! Classifies a requested move against the circuit layout and decides
//! whether it is legal. Nothing here touches storage.

use crate::statuses::missing_requirements;
use crate::tracker::Snapshot;
use docflow_core::{CircuitDefinition, Step, StepId, WorkflowError, WorkflowResult};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// How a requested step change relates to the circuit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Ordered circuit, target at `order + 1`.
    Advance,
    /// Ordered circuit, target at a lower order.
    Return,
    /// Unordered circuit, any other step.
    Move,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Advance => write!(f, "advance"),
            TransitionKind::Return => write!(f, "return"),
            TransitionKind::Move => write!(f, "move"),
        }
    }
}

/// A transition that passed every rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub from: StepId,
    pub to: StepId,
}

/// Classifies a move from `current` to `target` by ordering rules alone.
///
/// # Errors
///
/// - [`WorkflowError::NoOpTransition`] if `target` is the current step
/// - [`WorkflowError::Validation`] if `target` is not a step of the circuit
/// - [`WorkflowError::StepSkip`] if an ordered move jumps forward by more than one
/// - [`WorkflowError::BacktrackNotAllowed`] if an ordered move goes back without
///   `allow_backtrack`
pub fn classify(
    definition: &CircuitDefinition,
    current: &Step,
    target: StepId,
) -> WorkflowResult<TransitionKind> {
    if target == current.id {
        return Err(WorkflowError::NoOpTransition(target));
    }
    let to = definition.step(target).ok_or_else(|| {
        WorkflowError::Validation(format!(
            "step {target} is not part of circuit {}",
            definition.circuit.key
        ))
    })?;

    let circuit = &definition.circuit;
    if !circuit.has_ordered_flow {
        return Ok(TransitionKind::Move);
    }

    if to.order_index < current.order_index {
        if !circuit.allow_backtrack {
            return Err(WorkflowError::BacktrackNotAllowed {
                circuit_id: circuit.id,
            });
        }
        return Ok(TransitionKind::Return);
    }
    if to.order_index == current.order_index.saturating_add(1) {
        return Ok(TransitionKind::Advance);
    }
    Err(WorkflowError::StepSkip {
        from_order: current.order_index,
        to_order: to.order_index,
    })
}

/// Applies the ordering and requirement rules to a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TransitionResolver {
    gate_unordered_moves: bool,
}

impl Default for TransitionResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TransitionResolver {
    /// `gate_unordered_moves` makes moves in unordered circuits require the
    /// current step to be satisfied, like an advance does.
    pub fn new(gate_unordered_moves: bool) -> Self {
        Self {
            gate_unordered_moves,
        }
    }

    /// Resolves a move of the snapshot's document to `target`.
    ///
    /// Returns are never gated on requirements.
    ///
    /// # Errors
    ///
    /// Everything [`classify`] returns, plus
    /// [`WorkflowError::RequirementsNotMet`] for a gated transition out of an
    /// unsatisfied step.
    pub fn resolve(&self, snapshot: &Snapshot, target: StepId) -> WorkflowResult<Transition> {
        let kind = classify(&snapshot.definition, &snapshot.current, target).map_err(|e| {
            warn!(
                document_id = %snapshot.state.document_id,
                from = %snapshot.current.id,
                to = %target,
                error = %e,
                "Transition refused"
            );
            e
        })?;

        let gated = match kind {
            TransitionKind::Advance => true,
            TransitionKind::Move => self.gate_unordered_moves,
            TransitionKind::Return => false,
        };
        if gated {
            let missing = missing_requirements(
                snapshot.current_statuses(),
                &snapshot.state.completed_status_ids,
            );
            if !missing.is_empty() {
                warn!(
                    document_id = %snapshot.state.document_id,
                    step_id = %snapshot.current.id,
                    missing = missing.len(),
                    "Required statuses incomplete"
                );
                return Err(WorkflowError::RequirementsNotMet {
                    step_id: snapshot.current.id,
                    missing,
                });
            }
        }

        debug!(
            document_id = %snapshot.state.document_id,
            from = %snapshot.current.id,
            to = %target,
            kind = %kind,
            "Transition resolved"
        );
        Ok(Transition {
            kind,
            from: snapshot.current.id,
            to: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_core::{Circuit, CircuitId, DocumentId, DocumentWorkflowState, Status, StatusId};
    use std::collections::BTreeMap;

    fn circuit(has_ordered_flow: bool, allow_backtrack: bool) -> Circuit {
        Circuit {
            id: CircuitId::new(7),
            key: "CR-0007".to_string(),
            title: "Contracts".to_string(),
            description: String::new(),
            is_active: true,
            has_ordered_flow,
            allow_backtrack,
        }
    }

    fn step(id: u64, order_index: u32) -> Step {
        Step {
            id: StepId::new(id),
            key: format!("CR-0007-ST{id:02}"),
            circuit_id: CircuitId::new(7),
            title: format!("Step {id}"),
            description: String::new(),
            order_index,
            responsible_role: None,
            is_final_step: order_index == 2,
        }
    }

    // Draft(0) -> Review(1) -> Final(2); Review has one required status.
    fn snapshot(ordered: bool, backtrack: bool, at: u64) -> Snapshot {
        let definition = CircuitDefinition::new(
            circuit(ordered, backtrack),
            vec![step(1, 0), step(2, 1), step(3, 2)],
        );
        let current = definition
            .step(StepId::new(at))
            .cloned()
            .expect("member step");
        let mut requirements = BTreeMap::new();
        requirements.insert(
            StepId::new(2),
            vec![Status {
                id: StatusId::new(20),
                key: "CR-0007-ST02-SS01".to_string(),
                step_id: StepId::new(2),
                title: "Legal review".to_string(),
                is_required: true,
            }],
        );
        Snapshot {
            state: DocumentWorkflowState::assigned(
                DocumentId::new(1),
                CircuitId::new(7),
                current.id,
                Utc::now(),
            ),
            definition,
            current,
            requirements,
        }
    }

    #[test]
    fn test_classify_ordered() {
        let snap = snapshot(true, true, 2);
        let def = &snap.definition;
        let current = &snap.current;

        assert_eq!(
            classify(def, current, StepId::new(3)),
            Ok(TransitionKind::Advance)
        );
        assert_eq!(
            classify(def, current, StepId::new(1)),
            Ok(TransitionKind::Return)
        );
        assert_eq!(
            classify(def, current, StepId::new(2)),
            Err(WorkflowError::NoOpTransition(StepId::new(2)))
        );
    }

    #[test]
    fn test_classify_skip() {
        let snap = snapshot(true, false, 1);
        assert_eq!(
            classify(&snap.definition, &snap.current, StepId::new(3)),
            Err(WorkflowError::StepSkip {
                from_order: 0,
                to_order: 2
            })
        );
    }

    #[test]
    fn test_classify_backtrack_disallowed() {
        let snap = snapshot(true, false, 2);
        assert_eq!(
            classify(&snap.definition, &snap.current, StepId::new(1)),
            Err(WorkflowError::BacktrackNotAllowed {
                circuit_id: CircuitId::new(7)
            })
        );
    }

    #[test]
    fn test_classify_unordered_is_move() {
        let snap = snapshot(false, false, 1);
        assert_eq!(
            classify(&snap.definition, &snap.current, StepId::new(3)),
            Ok(TransitionKind::Move)
        );
    }

    #[test]
    fn test_classify_foreign_step() {
        let snap = snapshot(true, false, 1);
        let result = classify(&snap.definition, &snap.current, StepId::new(99));
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_advance_requires_statuses() {
        let resolver = TransitionResolver::default();
        let mut snap = snapshot(true, false, 2);

        let result = resolver.resolve(&snap, StepId::new(3));
        assert_eq!(
            result,
            Err(WorkflowError::RequirementsNotMet {
                step_id: StepId::new(2),
                missing: vec![StatusId::new(20)],
            })
        );

        snap.state.completed_status_ids.insert(StatusId::new(20));
        let transition = resolver.resolve(&snap, StepId::new(3)).expect("advance");
        assert_eq!(transition.kind, TransitionKind::Advance);
        assert_eq!(transition.from, StepId::new(2));
        assert_eq!(transition.to, StepId::new(3));
    }

    #[test]
    fn test_return_ignores_statuses() {
        let resolver = TransitionResolver::default();
        let snap = snapshot(true, true, 2);
        let transition = resolver.resolve(&snap, StepId::new(1)).expect("return");
        assert_eq!(transition.kind, TransitionKind::Return);
    }

    #[test]
    fn test_unordered_gate_is_configurable() {
        let snap = snapshot(false, false, 2);

        let gated = TransitionResolver::new(true).resolve(&snap, StepId::new(1));
        assert!(matches!(
            gated,
            Err(WorkflowError::RequirementsNotMet { .. })
        ));

        let free = TransitionResolver::new(false)
            .resolve(&snap, StepId::new(1))
            .expect("ungated move");
        assert_eq!(free.kind, TransitionKind::Move);
    }
}
