//! Declarative step catalog.
//!
//! Steps are defined once and referenced by name from the transitions of
//! each workflow. A transition routes one `(type, state)` pair to the steps
//! dispatched when an event in that state arrives. The table is flat: there
//! is no explicit end marker, a state without a transition ends the saga.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// A complete routing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDefinition {
    pub steps: Vec<StepDefinition>,
    pub workflows: Vec<WorkflowDefinition>,
}

/// An executable step, run by one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub service: String,
    #[serde(default)]
    pub description: String,
    pub topic: String,
    /// Sources whose latest response payloads are merged into the step input.
    pub payload_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub description: String,
    /// States that start a new instance.
    #[serde(default)]
    pub initiating_states: Vec<String>,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: String,
    /// Names of the steps to dispatch, in dispatch order.
    pub steps: Vec<String>,
}

/// A step whose input merges several sources, so field collisions overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCandidate {
    pub step: String,
    pub payload_keys: Vec<String>,
}

impl CatalogDefinition {
    /// Parses a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Looks up a step definition by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Checks the catalog for inconsistencies.
    ///
    /// On success returns the steps that merge more than one source; their
    /// sources must not share field names unless overwriting is intended.
    pub fn validate(&self) -> Result<Vec<MergeCandidate>> {
        let mut step_names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(invalid("step with empty name"));
            }
            if !step_names.insert(step.name.as_str()) {
                return Err(invalid(format!("duplicate step '{}'", step.name)));
            }
            if step.topic.trim().is_empty() {
                return Err(invalid(format!("step '{}' has no topic", step.name)));
            }
            if step.service.trim().is_empty() {
                return Err(invalid(format!("step '{}' has no service", step.name)));
            }
            if step.payload_keys.is_empty() {
                return Err(invalid(format!("step '{}' has no payload keys", step.name)));
            }
            let mut keys = HashSet::new();
            if let Some(dup) = step.payload_keys.iter().find(|k| !keys.insert(k.as_str())) {
                return Err(invalid(format!(
                    "step '{}' lists payload key '{}' twice",
                    step.name, dup
                )));
            }
        }

        let mut types = HashSet::new();
        for workflow in &self.workflows {
            if workflow.workflow_type.trim().is_empty() {
                return Err(invalid("workflow with empty type"));
            }
            if !types.insert(workflow.workflow_type.as_str()) {
                return Err(invalid(format!(
                    "duplicate workflow '{}'",
                    workflow.workflow_type
                )));
            }

            let mut states = HashSet::new();
            for transition in &workflow.transitions {
                if !states.insert(transition.state.as_str()) {
                    return Err(invalid(format!(
                        "workflow '{}' routes state '{}' twice",
                        workflow.workflow_type, transition.state
                    )));
                }
                if transition.steps.is_empty() {
                    return Err(invalid(format!(
                        "workflow '{}' state '{}' has no steps",
                        workflow.workflow_type, transition.state
                    )));
                }
                let mut seen = HashSet::new();
                for name in &transition.steps {
                    if !step_names.contains(name.as_str()) {
                        return Err(invalid(format!(
                            "workflow '{}' state '{}' references unknown step '{}'",
                            workflow.workflow_type, transition.state, name
                        )));
                    }
                    if !seen.insert(name.as_str()) {
                        return Err(invalid(format!(
                            "workflow '{}' state '{}' lists step '{}' twice",
                            workflow.workflow_type, transition.state, name
                        )));
                    }
                }
            }
        }

        Ok(self
            .steps
            .iter()
            .filter(|s| s.payload_keys.len() > 1)
            .map(|s| MergeCandidate {
                step: s.name.clone(),
                payload_keys: s.payload_keys.clone(),
            })
            .collect())
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidCatalog(message.into())
}

fn step(name: &str, service: &str, topic: &str, description: &str, keys: &[&str]) -> StepDefinition {
    StepDefinition {
        name: name.to_string(),
        service: service.to_string(),
        description: description.to_string(),
        topic: topic.to_string(),
        payload_keys: keys.iter().map(|k| k.to_string()).collect(),
    }
}

fn transition(state: &str, steps: &[&str]) -> Transition {
    Transition {
        state: state.to_string(),
        steps: steps.iter().map(|s| s.to_string()).collect(),
    }
}

/// The routing table of the order and bank registration sagas.
pub fn default_catalog() -> CatalogDefinition {
    CatalogDefinition {
        steps: vec![
            step(
                "validate_user",
                "user-svc",
                "user-topic",
                "Check the ordering user exists and may order",
                &["order-svc"],
            ),
            step(
                "reserve_product",
                "product-svc",
                "product-topic",
                "Reserve stock for the ordered product",
                &["order-svc", "user-svc"],
            ),
            step(
                "process_payment",
                "payment-svc",
                "payment-topic",
                "Charge the user's bank account",
                &["order-svc", "user-svc", "product-svc"],
            ),
            step(
                "complete_order",
                "order-svc",
                "order-topic",
                "Mark the order as paid",
                &["payment-svc"],
            ),
            step(
                "release_product",
                "product-svc",
                "product-topic",
                "Return reserved stock",
                &["order-svc", "product-svc"],
            ),
            step(
                "refund_payment",
                "payment-svc",
                "payment-topic",
                "Refund a captured payment",
                &["order-svc", "payment-svc"],
            ),
            step(
                "cancel_order",
                "order-svc",
                "order-topic",
                "Mark the order as cancelled",
                &["order-svc"],
            ),
            step(
                "create_bank_account",
                "bank-svc",
                "bank-topic",
                "Open a ledger account for the registering user",
                &["order-svc"],
            ),
            step(
                "link_bank_account",
                "user-svc",
                "user-topic",
                "Attach the new ledger account to the user",
                &["order-svc", "bank-svc"],
            ),
        ],
        workflows: vec![
            WorkflowDefinition {
                workflow_type: "order_process".to_string(),
                description: "Validate, reserve and pay for an order".to_string(),
                initiating_states: vec!["order_created".to_string()],
                transitions: vec![
                    transition("order_created", &["validate_user"]),
                    transition("user_validation_success", &["reserve_product"]),
                    transition("user_validation_failed", &["cancel_order"]),
                    transition("product_reservation_success", &["process_payment"]),
                    transition("product_reservation_failed", &["cancel_order"]),
                    transition("payment_success", &["complete_order"]),
                    transition("payment_failed", &["release_product"]),
                    transition("product_release_success", &["cancel_order"]),
                ],
            },
            WorkflowDefinition {
                workflow_type: "order_cancel_process".to_string(),
                description: "Undo a paid order".to_string(),
                initiating_states: vec!["order_cancel".to_string()],
                transitions: vec![
                    transition("order_cancel", &["release_product", "refund_payment"]),
                    transition("refund_success", &["cancel_order"]),
                ],
            },
            WorkflowDefinition {
                workflow_type: "bank_registration".to_string(),
                description: "Register a user with the bank ledger".to_string(),
                initiating_states: vec!["bank_regis_created".to_string()],
                transitions: vec![
                    transition("bank_regis_created", &["create_bank_account"]),
                    transition("bank_account_created", &["link_bank_account"]),
                ],
            },
        ],
    }
}
