// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for in-process flag sync and resolution.
//!
//! This crate holds the transport-free half of the flag sync engine: flag
//! definitions and their JSON configuration format, immutable configuration
//! snapshots, evaluation contexts and their cache fingerprints, the targeting
//! evaluator contract, resolution results and provider events. The runtime
//! (`loom-flagsync`) builds the store, cache, sync channels and resolver on
//! top of it.
//!
//! # Example
//!
//! ```
//! use loom_flagsync_core::{
//!     evaluate_flag, EvaluationContext, Evaluation, FlagSet, Reason, RuleEvaluator, ValueKind,
//! };
//!
//! let set = FlagSet::parse(r#"{
//!     "flags": {
//!         "new-checkout": {
//!             "state": "ENABLED",
//!             "variants": { "on": true, "off": false },
//!             "defaultVariant": "off"
//!         }
//!     }
//! }"#).unwrap();
//!
//! let flag = &set.flags["new-checkout"];
//! let ctx = EvaluationContext::new().with_targeting_key("user-1");
//! let result =
//!     evaluate_flag(flag, ValueKind::Boolean, &ctx, &RuleEvaluator, &set.metadata).unwrap();
//! match result {
//!     Evaluation::Value(v) => assert_eq!(v.reason, Reason::Static),
//!     Evaluation::Disabled(_) => unreachable!(),
//! }
//! ```

pub mod context;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod flag;
pub mod resolution;
pub mod sync;
pub mod targeting;
pub mod value;

pub use context::EvaluationContext;
pub use error::{FlagsError, Result};
pub use evaluation::{evaluate_flag, Evaluated, Evaluation};
pub use event::{EventError, ProviderEvent, ProviderEventKind};
pub use flag::{diff_flag_keys, FlagConfigSnapshot, FlagDefinition, FlagDelta, FlagSet, FlagState};
pub use resolution::{ErrorType, Reason, ResolutionDetails, ResolutionError};
pub use sync::{PayloadContent, StorageEvent, SyncFailure, SyncMetadata, SyncPayload};
pub use targeting::{AttributeOperator, RuleEvaluator, TargetingError, TargetingEvaluator};
pub use value::{FlagMetadata, FlagType, FlagValue, MetadataValue, StructValue, ValueKind};
