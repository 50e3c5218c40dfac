use crate::modules::jobs::domain::entities::ImportConfiguration;
use crate::shared::errors::{AppError, AppResult};
use crate::log_debug;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a validation rule check
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(error: String) -> Self {
        Self {
            is_valid: false,
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: String) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.errors.push(error);
        self.is_valid = false;
        self
    }

    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.is_valid = self.is_valid && other.is_valid;
        self
    }

    /// Collapse into a single `ValidationError` listing every failure
    pub fn into_result(self) -> AppResult<Vec<String>> {
        if self.is_valid {
            Ok(self.warnings)
        } else {
            Err(AppError::ValidationError(self.errors.join("; ")))
        }
    }
}

/// What a submitted configuration is checked against
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub configuration: ImportConfiguration,
    /// Identifiers of the input format services available in this process
    pub available_services: Vec<String>,
}

impl ValidationContext {
    pub fn new(configuration: &ImportConfiguration, available_services: Vec<String>) -> Self {
        Self {
            configuration: configuration.clone(),
            available_services,
        }
    }
}

#[async_trait]
pub trait ValidationRule: Send + Sync {
    async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult>;

    /// Name used when logging
    fn rule_name(&self) -> &'static str;

    fn should_skip(&self, _context: &ValidationContext) -> bool {
        false
    }
}

/// Ordered rules; every rule runs so all failures are reported together
#[derive(Clone, Default)]
pub struct ValidationChain {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl ValidationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub async fn validate(&self, context: &ValidationContext) -> AppResult<ValidationResult> {
        let mut combined_result = ValidationResult::valid();

        for rule in &self.rules {
            if rule.should_skip(context) {
                continue;
            }

            let rule_result = rule.validate(context).await?;
            if !rule_result.is_valid {
                log_debug!(
                    "Validation rule '{}' failed for import '{}'",
                    rule.rule_name(),
                    context.configuration.name
                );
            }

            combined_result = combined_result.merge(rule_result);
        }

        Ok(combined_result)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
