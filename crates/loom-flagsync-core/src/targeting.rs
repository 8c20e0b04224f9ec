// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting evaluation.
//!
//! The resolver hands a flag's opaque `targeting` tree to a
//! [`TargetingEvaluator`]. [`RuleEvaluator`] is the built-in implementation and
//! understands this shape:
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "conditions": [{ "attribute": "plan", "operator": "equals", "value": "pro" }],
//!       "variant": "on"
//!     }
//!   ],
//!   "fractional": {
//!     "seed": "checkout",
//!     "buckets": [{ "variant": "on", "weight": 10 }, { "variant": "off", "weight": 90 }]
//!   }
//! }
//! ```
//!
//! Rules are tried in order and all of a rule's conditions must match. When no
//! rule matches and a `fractional` block exists, the targeting key is bucketed
//! with murmur3. Otherwise nothing matches and the default variant is served.

use std::cmp::Ordering;
use std::io::Cursor;

use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::EvaluationContext;
use crate::flag::FlagDefinition;
use crate::resolution::ErrorType;

/// Context attribute name that reads the targeting key instead of an attribute.
pub const TARGETING_KEY_ATTRIBUTE: &str = "targetingKey";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetingError {
	/// The context lacks something the rule needs.
	#[error("Invalid evaluation context: {0}")]
	InvalidContext(String),

	/// The rule itself is malformed.
	#[error("Invalid targeting rule: {0}")]
	Rule(String),
}

impl TargetingError {
	pub fn error_type(&self) -> ErrorType {
		match self {
			TargetingError::InvalidContext(_) => ErrorType::InvalidContext,
			TargetingError::Rule(_) => ErrorType::General,
		}
	}
}

/// Selects a variant for a flag that carries targeting rules.
///
/// Implementations must be pure and deterministic: the same flag and context
/// always produce the same answer, and no I/O is performed. `Ok(None)` means
/// no rule matched.
pub trait TargetingEvaluator: Send + Sync {
	fn evaluate(
		&self,
		flag: &FlagDefinition,
		ctx: &EvaluationContext,
	) -> Result<Option<String>, TargetingError>;
}

/// Operators for attribute conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperator {
	Equals,
	NotEquals,
	Contains,
	StartsWith,
	EndsWith,
	GreaterThan,
	LessThan,
	GreaterThanOrEquals,
	LessThanOrEquals,
	In,
	NotIn,
}

impl AttributeOperator {
	/// Evaluates this operator against two JSON values.
	pub fn evaluate(&self, actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
		match self {
			AttributeOperator::Equals => actual == expected,
			AttributeOperator::NotEquals => actual != expected,
			AttributeOperator::Contains => {
				if let (Some(actual_str), Some(expected_str)) =
					(actual.as_str(), expected.as_str())
				{
					actual_str.contains(expected_str)
				} else if let Some(actual_arr) = actual.as_array() {
					actual_arr.contains(expected)
				} else {
					false
				}
			}
			AttributeOperator::StartsWith => match (actual.as_str(), expected.as_str()) {
				(Some(a), Some(b)) => a.starts_with(b),
				_ => false,
			},
			AttributeOperator::EndsWith => match (actual.as_str(), expected.as_str()) {
				(Some(a), Some(b)) => a.ends_with(b),
				_ => false,
			},
			AttributeOperator::GreaterThan => {
				compare_values(actual, expected).is_some_and(Ordering::is_gt)
			}
			AttributeOperator::LessThan => {
				compare_values(actual, expected).is_some_and(Ordering::is_lt)
			}
			AttributeOperator::GreaterThanOrEquals => {
				compare_values(actual, expected).is_some_and(Ordering::is_ge)
			}
			AttributeOperator::LessThanOrEquals => {
				compare_values(actual, expected).is_some_and(Ordering::is_le)
			}
			AttributeOperator::In => expected
				.as_array()
				.is_some_and(|expected_arr| expected_arr.contains(actual)),
			AttributeOperator::NotIn => expected
				.as_array()
				.map_or(true, |expected_arr| !expected_arr.contains(actual)),
		}
	}
}

/// Numbers compare numerically, strings lexicographically; anything else is
/// incomparable.
fn compare_values(actual: &serde_json::Value, expected: &serde_json::Value) -> Option<Ordering> {
	match (actual.as_f64(), expected.as_f64()) {
		(Some(a), Some(b)) => a.partial_cmp(&b),
		_ => match (actual.as_str(), expected.as_str()) {
			(Some(a), Some(b)) => Some(a.cmp(b)),
			_ => None,
		},
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetingRules {
	#[serde(default)]
	rules: Vec<Rule>,
	#[serde(default)]
	fractional: Option<Fractional>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Rule {
	#[serde(default)]
	conditions: Vec<Condition>,
	variant: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Condition {
	attribute: String,
	operator: AttributeOperator,
	value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fractional {
	#[serde(default)]
	seed: Option<String>,
	buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Bucket {
	variant: String,
	weight: u32,
}

/// Built-in evaluator for condition rules and fractional rollouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
	pub fn new() -> Self {
		Self
	}
}

impl TargetingEvaluator for RuleEvaluator {
	fn evaluate(
		&self,
		flag: &FlagDefinition,
		ctx: &EvaluationContext,
	) -> Result<Option<String>, TargetingError> {
		let Some(targeting) = &flag.targeting else {
			return Ok(None);
		};

		let rules = TargetingRules::deserialize(targeting)
			.map_err(|e| TargetingError::Rule(e.to_string()))?;

		for rule in &rules.rules {
			if rule.conditions.iter().all(|cond| condition_matches(cond, ctx)) {
				return Ok(Some(rule.variant.clone()));
			}
		}

		match &rules.fractional {
			Some(fractional) => bucket(fractional, &flag.key, ctx).map(Some),
			None => Ok(None),
		}
	}
}

fn condition_matches(condition: &Condition, ctx: &EvaluationContext) -> bool {
	if condition.attribute == TARGETING_KEY_ATTRIBUTE {
		return match &ctx.targeting_key {
			Some(key) => condition
				.operator
				.evaluate(&serde_json::Value::from(key.as_str()), &condition.value),
			None => false,
		};
	}
	match ctx.attribute(&condition.attribute) {
		Some(actual) => condition.operator.evaluate(actual, &condition.value),
		None => false,
	}
}

/// Assigns the targeting key to a weighted bucket using consistent hashing.
fn bucket(
	fractional: &Fractional,
	flag_key: &str,
	ctx: &EvaluationContext,
) -> Result<String, TargetingError> {
	let targeting_key = ctx.targeting_key.as_deref().ok_or_else(|| {
		TargetingError::InvalidContext("fractional rollout requires a targeting key".to_string())
	})?;

	let total_weight: u32 = fractional.buckets.iter().map(|b| b.weight).sum();
	if total_weight == 0 {
		return Err(TargetingError::Rule(
			"fractional buckets have zero total weight".to_string(),
		));
	}

	let seed = fractional.seed.as_deref().unwrap_or(flag_key);
	let input = format!("{seed}{targeting_key}");
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0)
		.map_err(|e| TargetingError::Rule(e.to_string()))?;

	let point = hash % total_weight;
	let mut cumulative = 0u32;
	for bucket in &fractional.buckets {
		cumulative += bucket.weight;
		if point < cumulative {
			return Ok(bucket.variant.clone());
		}
	}

	Err(TargetingError::Rule("fractional bucket selection failed".to_string()))
}
