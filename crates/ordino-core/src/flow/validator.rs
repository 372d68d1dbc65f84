//! Input validation contract and the built-in rule validator.
//!
//! Wait states can gate on a validator before their actions run. The
//! contract is async so integrations can call out (NLU classification,
//! address lookup); the built-in `RuleValidator` covers the common
//! declarative rules without leaving the process.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};

use ordino_types::context::ExecutionContext;
use ordino_types::flow::ValidatorConfig;

// ---------------------------------------------------------------------------
// ValidationOutcome
// ---------------------------------------------------------------------------

/// Result of validating one piece of user input.
///
/// Not a `Result`: an invalid input is a normal outcome, not an error.
/// Validators that call external services fold transport failures into
/// an invalid outcome with a reason.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Whether the input passed.
    pub valid: bool,
    /// Canonical value extracted from the input, stored in context on success.
    pub extracted: Option<Value>,
    /// Why the input failed.
    pub reason: Option<String>,
    /// What the caller should ask the user next.
    pub suggested_response: Option<String>,
}

impl ValidationOutcome {
    /// A passing outcome carrying the extracted canonical value.
    pub fn ok(extracted: Value) -> Self {
        Self {
            valid: true,
            extracted: Some(extracted),
            reason: None,
            suggested_response: None,
        }
    }

    /// A failing outcome with a reason and an optional re-prompt.
    pub fn invalid(reason: impl Into<String>, suggested_response: Option<String>) -> Self {
        Self {
            valid: false,
            extracted: None,
            reason: Some(reason.into()),
            suggested_response,
        }
    }
}

// ---------------------------------------------------------------------------
// InputValidator contract
// ---------------------------------------------------------------------------

/// Validates raw user input for a wait state before its actions run.
pub trait InputValidator: Send + Sync {
    /// Validate `input` against the state's validator config.
    fn validate(
        &self,
        config: &ValidatorConfig,
        input: &Value,
        context: &ExecutionContext,
    ) -> impl Future<Output = ValidationOutcome> + Send;
}

/// Object-safe version of [`InputValidator`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch
/// (`dyn InputValidatorDyn`). A blanket implementation is provided for
/// all types implementing `InputValidator`.
pub trait InputValidatorDyn: Send + Sync {
    fn validate_boxed<'a>(
        &'a self,
        config: &'a ValidatorConfig,
        input: &'a Value,
        context: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = ValidationOutcome> + Send + 'a>>;
}

/// Blanket implementation: any `InputValidator` automatically implements
/// `InputValidatorDyn`.
impl<T: InputValidator> InputValidatorDyn for T {
    fn validate_boxed<'a>(
        &'a self,
        config: &'a ValidatorConfig,
        input: &'a Value,
        context: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = ValidationOutcome> + Send + 'a>> {
        Box::pin(self.validate(config, input, context))
    }
}

/// Type-erased input validator for engine injection.
///
/// Since `InputValidator` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxInputValidator` provides an equivalent method that
/// delegates to the inner `InputValidatorDyn` trait object.
pub struct BoxInputValidator {
    inner: Box<dyn InputValidatorDyn + Send + Sync>,
}

impl BoxInputValidator {
    /// Wrap a concrete `InputValidator` in a type-erased box.
    pub fn new<T: InputValidator + 'static>(validator: T) -> Self {
        Self {
            inner: Box::new(validator),
        }
    }

    /// Validate input against a wait state's validator config.
    pub async fn validate(
        &self,
        config: &ValidatorConfig,
        input: &Value,
        context: &ExecutionContext,
    ) -> ValidationOutcome {
        self.inner.validate_boxed(config, input, context).await
    }
}

impl std::fmt::Debug for BoxInputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxInputValidator").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RuleValidator
// ---------------------------------------------------------------------------

/// Built-in declarative rule validator.
///
/// Supported rules:
/// - `non_empty` -- input is non-empty after trimming
/// - `min_length` / `max_length` -- length bounds, params `min` / `max`
/// - `numeric` -- input parses as a number
/// - `integer_range` -- whole number within params `min`..=`max`
/// - `one_of` -- case-insensitive match against params `choices`,
///   extracting the canonical choice
/// - `phone` -- 7 to 15 digits after stripping formatting
///
/// Unknown rule names fail validation rather than silently passing.
#[derive(Debug, Default)]
pub struct RuleValidator;

impl RuleValidator {
    pub fn new() -> Self {
        Self
    }

    fn apply(&self, config: &ValidatorConfig, input: &Value) -> ValidationOutcome {
        let prompt = config.prompt.clone();
        let text = input_text(input);
        let trimmed = text.trim();

        match config.rule.as_str() {
            "non_empty" => {
                if trimmed.is_empty() {
                    ValidationOutcome::invalid("input must not be empty", prompt)
                } else {
                    ValidationOutcome::ok(json!(trimmed))
                }
            }
            "min_length" => {
                let min = config.params.get("min").and_then(Value::as_u64).unwrap_or(1);
                if (trimmed.chars().count() as u64) < min {
                    ValidationOutcome::invalid(
                        format!("input must be at least {} characters", min),
                        prompt,
                    )
                } else {
                    ValidationOutcome::ok(json!(trimmed))
                }
            }
            "max_length" => {
                let max = config
                    .params
                    .get("max")
                    .and_then(Value::as_u64)
                    .unwrap_or(u64::MAX);
                if (trimmed.chars().count() as u64) > max {
                    ValidationOutcome::invalid(
                        format!("input must be at most {} characters", max),
                        prompt,
                    )
                } else {
                    ValidationOutcome::ok(json!(trimmed))
                }
            }
            "numeric" => match parse_number(input, trimmed) {
                Some(number) => ValidationOutcome::ok(number),
                None => ValidationOutcome::invalid("input must be a number", prompt),
            },
            "integer_range" => {
                let Some(value) = parse_integer(input, trimmed) else {
                    return ValidationOutcome::invalid("input must be a whole number", prompt);
                };
                let min = config.params.get("min").and_then(Value::as_i64);
                let max = config.params.get("max").and_then(Value::as_i64);
                let below = min.is_some_and(|m| value < m);
                let above = max.is_some_and(|m| value > m);
                if below || above {
                    ValidationOutcome::invalid(
                        format!(
                            "input must be between {} and {}",
                            min.map_or("-".to_string(), |m| m.to_string()),
                            max.map_or("-".to_string(), |m| m.to_string()),
                        ),
                        prompt,
                    )
                } else {
                    ValidationOutcome::ok(json!(value))
                }
            }
            "one_of" => {
                let choices: Vec<&str> = config
                    .params
                    .get("choices")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                match choices
                    .iter()
                    .find(|choice| choice.eq_ignore_ascii_case(trimmed))
                {
                    Some(canonical) => ValidationOutcome::ok(json!(canonical)),
                    None => ValidationOutcome::invalid(
                        format!("input must be one of: {}", choices.join(", ")),
                        prompt,
                    ),
                }
            }
            "phone" => match normalize_phone(trimmed) {
                Some(digits) => ValidationOutcome::ok(json!(digits)),
                None => {
                    ValidationOutcome::invalid("input must be a valid phone number", prompt)
                }
            },
            other => ValidationOutcome::invalid(
                format!("unknown validation rule '{}'", other),
                prompt,
            ),
        }
    }
}

impl InputValidator for RuleValidator {
    async fn validate(
        &self,
        config: &ValidatorConfig,
        input: &Value,
        _context: &ExecutionContext,
    ) -> ValidationOutcome {
        self.apply(config, input)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Text form of the raw input for string-based rules.
fn input_text(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(input).unwrap_or_default(),
    }
}

fn parse_number(input: &Value, trimmed: &str) -> Option<Value> {
    if let Value::Number(_) = input {
        return Some(input.clone());
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(json!(n));
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| json!(f))
}

fn parse_integer(input: &Value, trimmed: &str) -> Option<i64> {
    if let Some(n) = input.as_i64() {
        return Some(n);
    }
    if input.is_number() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

/// Strip phone formatting and keep the digits; 7 to 15 digits pass.
fn normalize_phone(trimmed: &str) -> Option<String> {
    let unprefixed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = String::with_capacity(unprefixed.len());
    for c in unprefixed.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    if (7..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
