// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::EvaluationContext;
use crate::flag::FlagDefinition;
use crate::resolution::{ErrorType, Reason, ResolutionError};
use crate::targeting::TargetingEvaluator;
use crate::value::{FlagMetadata, FlagValue, ValueKind};

/// A successfully evaluated variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
	pub variant: String,
	pub value: FlagValue,
	pub reason: Reason,
	pub flag_metadata: FlagMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
	Value(Evaluated),
	/// The flag is disabled; callers serve their own default.
	Disabled(FlagMetadata),
}

/// Evaluates a flag for a given context.
///
/// The evaluation order is:
/// 1. Disabled flags short-circuit
/// 2. Without targeting the default variant is served (`Static`)
/// 3. Targeting selects a variant (`TargetingMatch`) or falls back to the
///    default variant (`Default`)
/// 4. The selected variant must exist and satisfy the requested kind
///
/// Returned metadata is the flag-set metadata overlaid by the flag's own.
pub fn evaluate_flag(
	flag: &FlagDefinition,
	requested: ValueKind,
	context: &EvaluationContext,
	evaluator: &dyn TargetingEvaluator,
	set_metadata: &FlagMetadata,
) -> Result<Evaluation, ResolutionError> {
	let mut flag_metadata = set_metadata.clone();
	flag_metadata.extend(flag.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

	if !flag.is_enabled() {
		return Ok(Evaluation::Disabled(flag_metadata));
	}

	let (variant, reason) = match &flag.targeting {
		None => (flag.default_variant.clone(), Reason::Static),
		Some(_) => match evaluator.evaluate(flag, context) {
			Ok(Some(variant)) => (variant, Reason::TargetingMatch),
			Ok(None) => (flag.default_variant.clone(), Reason::Default),
			Err(e) => return Err(ResolutionError::new(e.error_type(), e.to_string())),
		},
	};

	let value = flag.variant(&variant).ok_or_else(|| {
		ResolutionError::new(
			ErrorType::General,
			format!("flag '{}' selected unknown variant '{}'", flag.key, variant),
		)
	})?;

	if !value.satisfies(requested) {
		return Err(ResolutionError::new(
			ErrorType::TypeMismatch,
			format!(
				"flag '{}' is {} but {} was requested",
				flag.key,
				value.kind(),
				requested
			),
		));
	}

	Ok(Evaluation::Value(Evaluated {
		variant,
		value: value.clone(),
		reason,
		flag_metadata,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::targeting::{RuleEvaluator, TargetingError};
	use crate::value::MetadataValue;
	use serde_json::json;

	fn create_test_flag(raw: serde_json::Value) -> FlagDefinition {
		FlagDefinition::from_json("test.feature", raw).unwrap()
	}

	struct FixedEvaluator(Result<Option<String>, TargetingError>);

	impl TargetingEvaluator for FixedEvaluator {
		fn evaluate(
			&self,
			_flag: &FlagDefinition,
			_ctx: &EvaluationContext,
		) -> Result<Option<String>, TargetingError> {
			self.0.clone()
		}
	}

	fn eval(
		flag: &FlagDefinition,
		kind: ValueKind,
		evaluator: &dyn TargetingEvaluator,
	) -> Result<Evaluation, ResolutionError> {
		evaluate_flag(flag, kind, &EvaluationContext::new(), evaluator, &FlagMetadata::new())
	}

	#[test]
	fn test_static_without_targeting() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"on": true, "off": false}, "defaultVariant": "on"
		}));
		let Evaluation::Value(result) = eval(&flag, ValueKind::Boolean, &RuleEvaluator).unwrap()
		else {
			panic!("expected a value");
		};
		assert_eq!(result.reason, Reason::Static);
		assert_eq!(result.variant, "on");
		assert_eq!(result.value, FlagValue::Bool(true));
	}

	#[test]
	fn test_targeting_match_and_default() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"on": true, "off": false}, "defaultVariant": "off",
			"targeting": {"rules": []}
		}));

		let matched = FixedEvaluator(Ok(Some("on".to_string())));
		let Evaluation::Value(result) = eval(&flag, ValueKind::Boolean, &matched).unwrap() else {
			panic!("expected a value");
		};
		assert_eq!(result.reason, Reason::TargetingMatch);
		assert_eq!(result.value, FlagValue::Bool(true));

		let unmatched = FixedEvaluator(Ok(None));
		let Evaluation::Value(result) = eval(&flag, ValueKind::Boolean, &unmatched).unwrap() else {
			panic!("expected a value");
		};
		assert_eq!(result.reason, Reason::Default);
		assert_eq!(result.variant, "off");
	}

	#[test]
	fn test_disabled_flag() {
		let flag = create_test_flag(json!({
			"state": "DISABLED", "variants": {"on": true}, "defaultVariant": "on"
		}));
		assert!(matches!(
			eval(&flag, ValueKind::Boolean, &RuleEvaluator).unwrap(),
			Evaluation::Disabled(_)
		));
	}

	#[test]
	fn test_unknown_variant_is_general_error() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"on": true}, "defaultVariant": "on",
			"targeting": {"rules": []}
		}));
		let evaluator = FixedEvaluator(Ok(Some("ghost".to_string())));
		let err = eval(&flag, ValueKind::Boolean, &evaluator).unwrap_err();
		assert_eq!(err.error_type, ErrorType::General);
	}

	#[test]
	fn test_evaluator_error_type_is_kept() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"on": true}, "defaultVariant": "on",
			"targeting": {"rules": []}
		}));
		let evaluator = FixedEvaluator(Err(TargetingError::InvalidContext("no key".to_string())));
		let err = eval(&flag, ValueKind::Boolean, &evaluator).unwrap_err();
		assert_eq!(err.error_type, ErrorType::InvalidContext);
	}

	#[test]
	fn test_type_mismatch() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"a": "text"}, "defaultVariant": "a"
		}));
		let err = eval(&flag, ValueKind::Boolean, &RuleEvaluator).unwrap_err();
		assert_eq!(err.error_type, ErrorType::TypeMismatch);
	}

	#[test]
	fn test_integer_served_as_double() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"a": 3}, "defaultVariant": "a"
		}));
		assert!(eval(&flag, ValueKind::Double, &RuleEvaluator).is_ok());
	}

	#[test]
	fn test_flag_metadata_overlays_set_metadata() {
		let flag = create_test_flag(json!({
			"state": "ENABLED", "variants": {"on": true}, "defaultVariant": "on",
			"metadata": {"team": "growth"}
		}));
		let mut set_metadata = FlagMetadata::new();
		set_metadata.insert("team".to_string(), "platform".into());
		set_metadata.insert("flagSetId".to_string(), "web".into());

		let result = evaluate_flag(
			&flag,
			ValueKind::Boolean,
			&EvaluationContext::new(),
			&RuleEvaluator,
			&set_metadata,
		)
		.unwrap();
		let Evaluation::Value(result) = result else {
			panic!("expected a value");
		};
		assert_eq!(result.flag_metadata["team"], MetadataValue::String("growth".to_string()));
		assert_eq!(result.flag_metadata["flagSetId"], MetadataValue::String("web".to_string()));
	}
}
