//! Wires the orchestrator to the inbound topic.

use async_trait::async_trait;
use global_event::GlobalEvent;
use messaging::{HandlerError, Message, MessageHandler, Producer};
use workflow_store::WorkflowStore;

use crate::orchestrator::Orchestrator;

#[async_trait]
impl<S, P> MessageHandler for Orchestrator<S, P>
where
    S: WorkflowStore,
    P: Producer,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event = GlobalEvent::from_slice(&message.payload)
            .map_err(|e| HandlerError::Rejected(e.to_string()))?;

        self.process_event(&event).await.map_err(|e| {
            if e.is_rejection() {
                HandlerError::Rejected(e.to_string())
            } else {
                HandlerError::Failed(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::RecordingProducer;
    use workflow_store::{InMemoryWorkflowStore, default_catalog};

    async fn orchestrator() -> Orchestrator<InMemoryWorkflowStore, RecordingProducer> {
        let store = InMemoryWorkflowStore::with_catalog(&default_catalog())
            .await
            .unwrap();
        Orchestrator::new(store, RecordingProducer::new())
    }

    #[tokio::test]
    async fn undecodable_payload_is_rejected() {
        let orch = orchestrator().await;
        let message = Message::new("orchestra-topic", "I-1", b"not json".to_vec());

        assert!(matches!(
            orch.handle(&message).await,
            Err(HandlerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn routing_errors_are_redeliverable() {
        let orch = orchestrator().await;
        let event = GlobalEvent::builder()
            .instance_id("I-404")
            .event_type("order_process")
            .state("payment_success")
            .build();
        let message = Message::new("orchestra-topic", "I-404", event.to_bytes().unwrap());

        assert!(matches!(
            orch.handle(&message).await,
            Err(HandlerError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn decoded_event_is_processed() {
        let orch = orchestrator().await;
        let event = GlobalEvent::builder()
            .instance_id("I-1")
            .event_type("order_process")
            .state("order_created")
            .source("order-svc")
            .response(serde_json::json!({"ref": "R1"}))
            .build();
        let message = Message::new("orchestra-topic", "I-1", event.to_bytes().unwrap());

        orch.handle(&message).await.unwrap();
        assert_eq!(orch.producer().sent_to("user-topic").len(), 1);
    }
}
