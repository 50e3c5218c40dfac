use super::validation_chain::{ValidationChain, ValidationContext, ValidationResult, ValidationRule};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;

const MAX_NAME_LENGTH: usize = 255;

/// Batch sizes above this commit so rarely that a failure loses a lot of work
const LARGE_BATCH_SIZE: i32 = 100_000;

/// Every import needs a name
pub struct ConfigurationNameRule;

#[async_trait]
impl ValidationRule for ConfigurationNameRule {
    async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult> {
        let name = context.configuration.name.trim();
        if name.is_empty() {
            return Ok(ValidationResult::invalid(
                "Import name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Ok(ValidationResult::invalid(format!(
                "Import name too long (max {} characters)",
                MAX_NAME_LENGTH
            )));
        }
        Ok(ValidationResult::valid())
    }

    fn rule_name(&self) -> &'static str {
        "ConfigurationName"
    }
}

/// The input format service must be known to this process
pub struct InputServiceRule;

#[async_trait]
impl ValidationRule for InputServiceRule {
    async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult> {
        let service_id = context.configuration.input.service_identifier.trim();
        if service_id.is_empty() {
            return Ok(ValidationResult::invalid(
                "Input service identifier cannot be empty".to_string(),
            ));
        }
        if !context.available_services.iter().any(|s| s == service_id) {
            return Ok(ValidationResult::invalid(format!(
                "Input format service {} not available",
                service_id
            )));
        }
        Ok(ValidationResult::valid())
    }

    fn rule_name(&self) -> &'static str {
        "InputService"
    }
}

pub struct TimeZoneRule;

#[async_trait]
impl ValidationRule for TimeZoneRule {
    async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult> {
        match context.configuration.input.time_zone() {
            Ok(_) => Ok(ValidationResult::valid()),
            Err(AppError::ValidationError(message)) => Ok(ValidationResult::invalid(message)),
            Err(e) => Err(e),
        }
    }

    fn rule_name(&self) -> &'static str {
        "TimeZone"
    }

    fn should_skip(&self, context: &ValidationContext) -> bool {
        context.configuration.input.time_zone_id.is_none()
    }
}

/// Batch size never fails validation, it only warns
pub struct BatchSizeRule;

#[async_trait]
impl ValidationRule for BatchSizeRule {
    async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult> {
        let result = ValidationResult::valid();
        match context.configuration.batch_size {
            Some(size) if size < 1 => Ok(result.with_warning(format!(
                "Batch size {} loads everything in a single transaction",
                size
            ))),
            Some(size) if size > LARGE_BATCH_SIZE => Ok(result.with_warning(format!(
                "Batch size {} is very large",
                size
            ))),
            _ => Ok(result),
        }
    }

    fn rule_name(&self) -> &'static str {
        "BatchSize"
    }
}

/// Factory for creating validation chains
#[derive(Default)]
pub struct ValidationChainBuilder;

impl ValidationChainBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Rules applied to every submitted or updated configuration
    pub fn build_submission_chain(self) -> ValidationChain {
        ValidationChain::new()
            .add_rule(Arc::new(ConfigurationNameRule))
            .add_rule(Arc::new(InputServiceRule))
            .add_rule(Arc::new(TimeZoneRule))
            .add_rule(Arc::new(BatchSizeRule))
    }
}
