use crate::clients::{LLMClient, LLMError};
use crate::prompts::build_repair_prompt;
use crate::schema::{parse, Schema, StructuredRecord, ValidationError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),
    #[error("Repair failed: {second}")]
    Unrecoverable {
        /// The repair completion that still failed to validate.
        malformed_text: String,
        first: ValidationError,
        second: ValidationError,
    },
}

/// Asks the model to correct output that failed schema validation. Invokes the
/// model exactly once and re-validates exactly once; a second validation
/// failure is surfaced with both errors attached rather than retried.
pub async fn repair(
    client: &dyn LLMClient,
    schema: &Schema,
    malformed: &str,
    error: &ValidationError,
) -> Result<StructuredRecord, RepairError> {
    let prompt = build_repair_prompt(schema, malformed, error);
    info!(reason = error.reason.describe(), "attempting a repair pass");

    let completion = client.complete(&prompt).await?;

    match parse(&completion, schema) {
        Ok(record) => {
            info!("repair pass produced a valid record");
            Ok(record)
        }
        Err(second) => {
            warn!(reason = second.reason.describe(), "repair pass still invalid");
            Err(RepairError::Unrecoverable {
                malformed_text: completion,
                first: error.clone(),
                second,
            })
        }
    }
}

/// Validates `text` against `schema`, falling back to a single repair pass on
/// failure. At most two model calls are ever made for one final answer: the
/// one that produced `text` and the repair call.
pub async fn parse_or_repair(
    client: &dyn LLMClient,
    schema: &Schema,
    text: &str,
) -> Result<StructuredRecord, RepairError> {
    match parse(text, schema) {
        Ok(record) => Ok(record),
        Err(error) => repair(client, schema, text, &error).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ModelInfo;
    use crate::schema::{FieldType, FieldValue, SchemaField, ValidationFailure};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedClient {
        responses: AsyncMutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: AsyncMutex::new(responses.into_iter().map(String::from).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                return Err(LLMError::RequestFailed("script exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "scripted".to_string(),
                max_tokens: None,
            }
        }
    }

    fn contact_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .push(SchemaField::new("company", FieldType::String, "Company name"))
            .expect("field");
        schema
            .push(SchemaField::new("phone", FieldType::String, "Company phone number"))
            .expect("field");
        schema
            .push(SchemaField::new("location", FieldType::String, "Company location"))
            .expect("field");
        schema
    }

    #[tokio::test]
    async fn test_valid_text_needs_no_model_call() {
        let client = ScriptedClient::new(vec![]);
        let schema = contact_schema();

        let record = parse_or_repair(
            &client,
            &schema,
            r#"{"company":"Acme","phone":"555-0100","location":"NY"}"#,
        )
        .await
        .expect("record");

        assert_eq!(record.get("company"), Some(&FieldValue::String("Acme".to_string())));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_repair_recovers_with_one_call() {
        let client = ScriptedClient::new(vec![
            r#"{"company":"Acme","phone":"555-0100","location":"NY"}"#,
        ]);
        let schema = contact_schema();

        let record = parse_or_repair(&client, &schema, "Acme, phone 555-0100, NY")
            .await
            .expect("record");

        assert_eq!(record.get("phone"), Some(&FieldValue::String("555-0100".to_string())));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_unrecoverable() {
        let client = ScriptedClient::new(vec!["still not json, sorry"]);
        let schema = contact_schema();

        let err = parse_or_repair(&client, &schema, "Acme, phone 555-0100, NY")
            .await
            .unwrap_err();

        match err {
            RepairError::Unrecoverable {
                malformed_text,
                first,
                second,
            } => {
                assert_eq!(malformed_text, "still not json, sorry");
                assert_eq!(first.reason, ValidationFailure::NotJson);
                assert_eq!(first.offending_text, "Acme, phone 555-0100, NY");
                assert_eq!(second.reason, ValidationFailure::NotJson);
            }
            other => panic!("expected Unrecoverable, got {:?}", other),
        }
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let client = ScriptedClient::new(vec![]);
        let schema = contact_schema();

        let err = parse_or_repair(&client, &schema, "not json at all")
            .await
            .unwrap_err();

        assert!(matches!(err, RepairError::Llm(_)));
    }
}
